//! Outgoing gateway message queue.
//!
//! FIFO between the broker-facing `receive` call (producer) and the
//! outbound worker (single consumer). The queue is bounded; the reaction to
//! a full queue is chosen at construction via [`OverflowPolicy`]. Consumer
//! wakeup uses a `Notify` so the outbound worker does not have to spin when
//! the queue sits empty.

use crate::config::OverflowPolicy;
use crate::error::ProxyError;
use crate::message::GatewayMessage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

struct QueueInner {
    items: VecDeque<GatewayMessage>,
    closed: bool,
}

/// Bounded FIFO of messages awaiting transmission to the module host.
///
/// ## Ordering Guarantee
///
/// Messages leave in the order they were pushed. The single consumer may
/// return a message it could not transmit via `push_front`, which restores
/// it to the head, so a stalled remote delays the queue without reordering
/// it.
///
/// ## Concurrency Model
///
/// Producers are the broker-facing `receive` calls; the consumer is the
/// outbound worker. State lives behind one short-lived mutex that is never
/// held across an await; the two `Notify` handles carry the wakeups in
/// each direction, so neither side needs to spin while the queue is empty
/// or full.
pub struct OutgoingQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    policy: OverflowPolicy,
    /// Signaled when an item is pushed or the queue closes.
    consumer: Notify,
    /// Signaled when space frees up, for `Block` producers.
    producer: Notify,
}

impl OutgoingQueue {
    /// Create an empty queue.
    ///
    /// ## Parameters
    /// - `capacity`: Maximum number of queued messages before the overflow
    ///   policy engages
    /// - `policy`: What `push` does when the queue is full
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity,
            policy,
            consumer: Notify::new(),
            producer: Notify::new(),
        }
    }

    /// Enqueue a message at the tail.
    ///
    /// ## Parameters
    /// - `message`: The message to queue; ownership transfers to the queue
    ///   on success and the value is dropped on any other outcome
    ///
    /// ## Returns
    /// - `Ok(())`: The message was queued, or consumed by a drop policy
    /// - `Err(ProxyError::QueueClosed)`: The queue was closed before the
    ///   message could be admitted
    ///
    /// ## Overflow Behavior
    ///
    /// - `Block`: waits until the consumer makes room
    /// - `DropOldest`: evicts the head to admit this message
    /// - `DropNewest`: discards this message and reports success
    ///
    /// Messages removed by a drop policy never reached the transmission
    /// path, so the consumer's drop-after-send accounting is unaffected.
    pub async fn push(&self, message: GatewayMessage) -> Result<(), ProxyError> {
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(ProxyError::QueueClosed);
                }
                if inner.items.len() < self.capacity {
                    inner.items.push_back(message);
                    self.consumer.notify_one();
                    return Ok(());
                }
                match self.policy {
                    OverflowPolicy::Block => {}
                    OverflowPolicy::DropOldest => {
                        let evicted = inner.items.pop_front();
                        inner.items.push_back(message);
                        drop(inner);
                        drop(evicted);
                        debug!("outgoing queue full, evicted oldest message");
                        self.consumer.notify_one();
                        return Ok(());
                    }
                    OverflowPolicy::DropNewest => {
                        drop(inner);
                        drop(message);
                        debug!("outgoing queue full, discarded incoming message");
                        return Ok(());
                    }
                }
            }
            // Block policy: wait for the consumer to make room, then retry.
            self.producer.notified().await;
        }
    }

    /// Remove and return the oldest message, waiting up to `timeout` for
    /// one to arrive.
    ///
    /// ## Parameters
    /// - `timeout`: Upper bound on the wait when the queue is empty
    ///
    /// ## Returns
    /// - `Some(message)`: The head of the queue
    /// - `None`: Nothing arrived within `timeout`, or the queue is closed
    ///   and fully drained
    ///
    /// The caller cannot distinguish the two `None` cases here; the
    /// outbound worker does not need to, because its stop flag is what
    /// actually ends its loop.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<GatewayMessage> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(message) = inner.items.pop_front() {
                    self.producer.notify_one();
                    return Some(message);
                }
                if inner.closed {
                    return None;
                }
            }
            if tokio::time::timeout(timeout, self.consumer.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Return a message to the head of the queue.
    ///
    /// Used by the consumer when a transmission attempt could not run at
    /// all (the channel would block), so the message keeps its place in
    /// line. Capacity is deliberately not re-checked: the message was
    /// already admitted once, and bouncing it here would turn a stalled
    /// remote into silent message loss.
    ///
    /// ## Parameters
    /// - `message`: The previously popped message to reinstate
    pub fn push_front(&self, message: GatewayMessage) {
        let mut inner = self.inner.lock();
        inner.items.push_front(message);
        self.consumer.notify_one();
    }

    /// Close the queue.
    ///
    /// Producers fail with `QueueClosed` from this point on; the consumer
    /// drains whatever is already queued and then sees end-of-queue. Both
    /// sides' waiters are woken so nobody sleeps through the shutdown.
    /// Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.consumer.notify_waiters();
        self.producer.notify_waiters();
    }

    /// Number of messages currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue currently holds no messages.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(tag: u8) -> GatewayMessage {
        GatewayMessage::new(vec![tag])
    }

    #[tokio::test]
    async fn pops_in_push_order() {
        let queue = OutgoingQueue::new(8, OverflowPolicy::Block);
        for tag in 0..3 {
            queue.push(msg(tag)).await.unwrap();
        }
        for tag in 0..3 {
            let popped = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
            assert_eq!(popped.content, vec![tag]);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_queue() {
        let queue = OutgoingQueue::new(8, OverflowPolicy::Block);
        assert!(queue.pop_timeout(Duration::from_millis(5)).await.is_none());
    }

    #[tokio::test]
    async fn push_front_restores_head_position() {
        let queue = OutgoingQueue::new(8, OverflowPolicy::Block);
        queue.push(msg(1)).await.unwrap();
        queue.push(msg(2)).await.unwrap();

        let head = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
        queue.push_front(head);

        let again = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(again.content, vec![1]);
    }

    #[tokio::test]
    async fn drop_oldest_evicts_head() {
        let queue = OutgoingQueue::new(2, OverflowPolicy::DropOldest);
        queue.push(msg(1)).await.unwrap();
        queue.push(msg(2)).await.unwrap();
        queue.push(msg(3)).await.unwrap();

        assert_eq!(queue.len(), 2);
        let first = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.content, vec![2]);
    }

    #[tokio::test]
    async fn drop_newest_discards_incoming() {
        let queue = OutgoingQueue::new(2, OverflowPolicy::DropNewest);
        queue.push(msg(1)).await.unwrap();
        queue.push(msg(2)).await.unwrap();
        queue.push(msg(3)).await.unwrap();

        assert_eq!(queue.len(), 2);
        let first = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.content, vec![1]);
    }

    #[tokio::test]
    async fn block_policy_waits_for_space() {
        let queue = std::sync::Arc::new(OutgoingQueue::new(1, OverflowPolicy::Block));
        queue.push(msg(1)).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(msg(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished(), "producer should be blocked");

        let first = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.content, vec![1]);

        producer.await.unwrap().unwrap();
        let second = queue.pop_timeout(Duration::from_millis(50)).await.unwrap();
        assert_eq!(second.content, vec![2]);
    }

    #[tokio::test]
    async fn close_fails_producers_and_drains_consumer() {
        let queue = OutgoingQueue::new(4, OverflowPolicy::Block);
        queue.push(msg(1)).await.unwrap();
        queue.close();

        assert!(matches!(
            queue.push(msg(2)).await,
            Err(ProxyError::QueueClosed)
        ));
        // remaining item still drains
        let drained = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(drained.content, vec![1]);
        assert!(queue.pop_timeout(Duration::from_millis(10)).await.is_none());
    }
}
