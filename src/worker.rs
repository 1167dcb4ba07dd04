//! Long-running worker task bookkeeping.
//!
//! Each proxy handle owns a fixed set of [`Worker`] records. A worker wraps
//! a stop flag and the task's join handle; the loop body polls the flag at
//! the top of every iteration and exits once it is set. Shutdown sets the
//! flag and then awaits the join handle, so a worker is never joined before
//! it has been told to stop.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::ProxyError;

/// A cooperative stop signal shared between a worker loop and its owner.
///
/// The flag is the only cancellation mechanism a worker has: the loop body
/// polls it at the top of every iteration and exits once it is set. Clones
/// share the same underlying atomic, so the copy captured by the task body
/// observes a `set()` issued through the owning [`Worker`].
///
/// ## Memory Ordering
///
/// Reads use `Acquire` and writes use `Release`, which is sufficient
/// because the flag only ever transitions in one direction per task run
/// and carries no payload beyond the boolean itself.
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Whether a stop has been requested.
    ///
    /// ## Returns
    /// `true` once `set()` has been called and the worker should wind down;
    /// `false` while the worker is expected to keep looping.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Request that the worker loop exit at its next poll.
    ///
    /// Idempotent; setting an already-set flag has no further effect.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    // Re-arms the flag for a fresh task run. Only `Worker::spawn` may do
    // this, and only after the previous task has finished.
    fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Bookkeeping for one long-running proxy task.
///
/// A worker record pairs a [`StopFlag`] with the task's `JoinHandle` and
/// enforces the shutdown protocol: signal first, join second, never the
/// other way around. Each proxy handle owns a fixed set of these records
/// (inbound, outbound, control monitor, async-create) and drives them
/// through the same three calls:
///
/// 1. `spawn()` launches the loop body
/// 2. the body polls `stop_flag()` every iteration
/// 3. `stop_and_join()` signals and waits during teardown
///
/// ## Thread Safety
///
/// The handle slot is guarded by a short-lived mutex that is never held
/// across an await point; the stop flag is a lock-free atomic.
pub struct Worker {
    name: &'static str,
    stop: StopFlag,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Create an idle worker record.
    ///
    /// ## Parameters
    /// - `name`: Static label used in log lines and error messages
    ///
    /// ## Returns
    /// A record with no running task and an unset stop flag, ready for
    /// `spawn()`.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stop: StopFlag::default(),
            handle: Mutex::new(None),
        }
    }

    /// The worker's diagnostic label.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The flag the worker loop must poll each iteration.
    ///
    /// ## Returns
    /// A clone sharing the record's underlying atomic; the task body
    /// captures it once and checks `is_set()` at the top of every loop
    /// iteration.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Launch the worker body.
    ///
    /// A worker record tracks exactly one task at a time, so spawning is
    /// rejected while a previous task is still live. A stop request left
    /// over from an earlier run is cleared first, which is what allows a
    /// worker that was stopped (for example by an unwound `start`) to be
    /// relaunched later.
    ///
    /// ## Parameters
    /// - `body`: The loop future to run; it must poll this worker's
    ///   [`StopFlag`] each iteration
    ///
    /// ## Returns
    /// - `Ok(())`: Task launched and its handle recorded
    /// - `Err(ProxyError::TaskSpawn)`: A task from a previous `spawn` is
    ///   still running
    pub fn spawn<F>(&self, body: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(ProxyError::TaskSpawn(format!(
                "{} worker is already running",
                self.name
            )));
        }
        self.stop.clear();
        debug!(worker = self.name, "spawning worker task");
        *handle = Some(tokio::spawn(body));
        Ok(())
    }

    /// Whether a spawned task is still live.
    ///
    /// ## Returns
    /// `true` while a task launched by `spawn()` has neither finished nor
    /// been joined; `false` for an idle record.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Wait for the task to finish without signalling it.
    ///
    /// Only meaningful for single-shot workers that terminate on their
    /// own, such as the async-create task, whose result the synchronous
    /// create path waits for. For looping workers use `stop_and_join()`;
    /// joining one of those without a stop signal would wait forever.
    ///
    /// ## Panics in the Task
    ///
    /// A panicking task is logged and otherwise absorbed; the join itself
    /// never propagates the panic to the caller.
    pub async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            debug!(worker = self.name, "joining worker task");
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(worker = self.name, "worker task panicked: {e}");
                }
            }
        }
    }

    /// Signal the worker to stop, then wait for it to finish.
    ///
    /// This is the only sanctioned shutdown sequence: the flag is set
    /// before the handle is awaited, so a task is never joined without
    /// first being told to exit. The handle is taken out of the record,
    /// which makes repeated calls (and calls for a worker that was never
    /// spawned) harmless no-ops.
    ///
    /// ## Stop Latency
    ///
    /// Bounded by one loop iteration plus whatever blocking receive the
    /// task is parked in; the proxy closes the channels before joining so
    /// that parked receives wake promptly.
    pub async fn stop_and_join(&self) {
        self.stop.set();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            debug!(worker = self.name, "joining worker task");
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(worker = self.name, "worker task panicked: {e}");
                }
            }
        }
    }
}
