//! The outprocess module proxy.
//!
//! One [`ModuleHandle`] stands in for one module that actually runs in a
//! separate module-host process. To the gateway the handle looks like any
//! in-process module with the usual create / start / receive / destroy
//! surface; underneath it owns two paired channels to the host (control for
//! lifecycle frames, message for gateway traffic) and up to four worker
//! tasks that pump them:
//!
//! - **async-create** runs the create handshake once and reports the result
//!   through the lifecycle state.
//! - **inbound** receives gateway frames from the host and publishes them
//!   to the broker.
//! - **outbound** drains the outgoing queue onto the message channel.
//! - **control** watches the control channel for failure replies and
//!   re-attaches to a restarted host.
//!
//! ## Lifecycle
//!
//! ```text
//! Initial -> Handshaking -> Ready -> Running -> Draining -> Closed
//!                                      |  ^
//!                                      v  |
//!                                    Attaching
//! ```
//!
//! `create` drives Initial through Handshaking (and, in sync mode, waits
//! for Ready). `start` moves a handle to Running; a failure reply from the
//! host detours through Attaching while the monitor re-runs the handshake;
//! `destroy` drains and closes. A handshake is only ever driven by one task
//! at a time: async-create before the module runs, the control monitor
//! afterwards.

use crate::broker::{Broker, ModuleId};
use crate::config::{LifecycleMode, ModuleArgs, ProxyConfig};
use crate::control::{self, ControlFrame};
use crate::defaults;
use crate::error::{ChannelError, ProxyError, TrySendError};
use crate::message::GatewayMessage;
use crate::queue::OutgoingQueue;
use crate::transport::{self, PairChannel};
use crate::worker::{StopFlag, Worker};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Observable lifecycle state of a proxied module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Allocated but not yet handshaking.
    Initial,
    /// The create handshake is in flight.
    Handshaking,
    /// The module host acknowledged creation; not yet started.
    Ready,
    /// Workers are pumping messages.
    Running,
    /// The host reported failure; the monitor is re-running the handshake.
    Attaching,
    /// Destroy in progress.
    Draining,
    /// Torn down, or creation failed.
    Closed,
}

struct Channels {
    message: Option<Arc<dyn PairChannel>>,
    control: Option<Arc<dyn PairChannel>>,
}

/// Shared state behind one module handle.
struct HandleInner {
    id: ModuleId,
    config: ProxyConfig,
    broker: Arc<dyn Broker>,
    channels: Mutex<Channels>,
    outgoing: OutgoingQueue,
    state: Mutex<LifecycleState>,
    inbound: Worker,
    outbound: Worker,
    control: Worker,
    async_create: Worker,
}

/// Gateway-side stand-in for one remote module instance.
///
/// The handle is what the gateway holds between [`create`] and
/// [`destroy`](Self::destroy): it accepts outbound messages through
/// [`receive`](Self::receive), reports the module's
/// [`state`](Self::state), and owns the channels and worker tasks that
/// keep the remote module attached.
///
/// ## Call Ordering
///
/// The caller is responsible for sequencing `create`, then `start`, then
/// any number of `receive` calls, then `destroy`. The handle tolerates a
/// failed `start` being retried.
///
/// ## Cloning
///
/// Clones are cheap and all refer to the same module; `destroy` must be
/// called on exactly one of them, after which the others only observe the
/// `Closed` state.
pub struct ModuleHandle {
    inner: Arc<HandleInner>,
}

impl Clone for ModuleHandle {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Wrap a module-host configuration string.
///
/// ## Parameters
/// - `raw`: The configuration text the gateway holds for this module
///
/// ## Returns
/// - `Some(args)`: An owned wrapper around the text
/// - `None`: The input was empty
pub fn parse_config(raw: &str) -> Option<ModuleArgs> {
    ModuleArgs::parse(raw)
}

/// Release a parsed configuration.
///
/// Present for symmetry with `parse_config` in the module ABI; releasing
/// is an ordinary drop.
pub fn free_config(config: ModuleArgs) {
    drop(config);
}

/// Build a proxy for one remote module.
///
/// Opens both channels, then launches the create handshake on the
/// async-create worker. In [`LifecycleMode::Sync`] the call waits for the
/// handshake and returns `None` if it fails; in async mode the handle
/// comes back immediately and the handshake completes in the background.
///
/// ## Parameters
/// - `broker`: The gateway bus inbound messages are published to; shared
///   ownership keeps it alive at least as long as the handle
/// - `config`: Validated per [`ProxyConfig::validate`] before anything is
///   acquired
///
/// ## Returns
/// - `Some(handle)`: A live proxy, in `Ready` (sync) or `Handshaking`
///   (async) state
/// - `None`: Validation, channel setup, or the synchronous handshake
///   failed; the cause is logged
///
/// ## Failure Cleanup
///
/// Any step that fails releases everything acquired before it: channels
/// are closed, the queue is closed, and any launched worker is stopped
/// and joined before the call returns. A `None` never leaks a socket or a
/// task.
pub async fn create(broker: Arc<dyn Broker>, config: ProxyConfig) -> Option<ModuleHandle> {
    if let Err(e) = config.validate() {
        error!("rejecting module configuration: {e}");
        return None;
    }

    let channels = match connection_setup(&config).await {
        Ok(channels) => channels,
        Err(e) => {
            error!("unable to set up module channels: {e}");
            return None;
        }
    };

    let inner = Arc::new(HandleInner {
        id: Uuid::new_v4(),
        outgoing: OutgoingQueue::new(config.queue_capacity, config.overflow),
        broker,
        channels: Mutex::new(channels),
        state: Mutex::new(LifecycleState::Initial),
        inbound: Worker::new("inbound"),
        outbound: Worker::new("outbound"),
        control: Worker::new("control"),
        async_create: Worker::new("async-create"),
        config,
    });

    *inner.state.lock() = LifecycleState::Handshaking;
    let task_inner = inner.clone();
    if let Err(e) = inner.async_create.spawn(async_create_task(task_inner)) {
        error!(module = %inner.id, "unable to launch create handshake: {e}");
        teardown(&inner).await;
        return None;
    }

    if inner.config.lifecycle == LifecycleMode::Sync {
        inner.async_create.join().await;
        if *inner.state.lock() != LifecycleState::Ready {
            teardown(&inner).await;
            return None;
        }
    }

    info!(module = %inner.id, lifecycle = ?inner.config.lifecycle, "module proxy created");
    Some(ModuleHandle { inner })
}

impl ModuleHandle {
    /// Identity of this module instance, as seen by the broker.
    ///
    /// Stable for the life of the handle; the broker receives it as the
    /// source of every published message.
    pub fn id(&self) -> ModuleId {
        self.inner.id
    }

    /// Current lifecycle state.
    ///
    /// ## Returns
    /// A snapshot; the background workers may move the state the moment
    /// the lock is released, so this is for observation and coarse
    /// sequencing, not for atomic check-then-act decisions.
    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    /// Start the module: launch the message workers and tell the host to
    /// run.
    ///
    /// The start frame goes out before the outbound worker exists, so no
    /// gateway frame can reach the host ahead of it.
    ///
    /// ## Returns
    /// - `Ok(())`: Workers running, start frame delivered, state is
    ///   `Running`
    /// - `Err(ProxyError::TaskSpawn)`: Called in a state that cannot
    ///   start, or a worker was already running
    /// - `Err(ProxyError::TransportIo)`: The start frame could not be
    ///   delivered within its bounded retries
    ///
    /// ## Failure Cleanup
    ///
    /// If any step after the first spawn fails, the workers already
    /// launched are stopped and joined before the error is returned; the
    /// handle remains valid for a retry or for `destroy`.
    pub async fn start(&self) -> Result<(), ProxyError> {
        let inner = &self.inner;
        {
            let state = inner.state.lock();
            match *state {
                LifecycleState::Ready | LifecycleState::Handshaking => {}
                other => {
                    return Err(ProxyError::TaskSpawn(format!(
                        "start is not valid in the {other:?} state"
                    )))
                }
            }
        }

        inner.inbound.spawn(inbound_task(inner.clone()))?;

        if let Err(e) = inner.control.spawn(control_task(inner.clone())) {
            inner.inbound.stop_and_join().await;
            return Err(e);
        }

        if let Err(e) = self.send_start_frame().await {
            error!(module = %inner.id, "unable to deliver start frame: {e}");
            inner.control.stop_and_join().await;
            inner.inbound.stop_and_join().await;
            return Err(e);
        }

        if let Err(e) = inner.outbound.spawn(outbound_task(inner.clone())) {
            inner.control.stop_and_join().await;
            inner.inbound.stop_and_join().await;
            return Err(e);
        }

        *inner.state.lock() = LifecycleState::Running;
        info!(module = %inner.id, "module started");
        Ok(())
    }

    async fn send_start_frame(&self) -> Result<(), ProxyError> {
        let inner = &self.inner;
        let channel = inner.channels.lock().control.clone();
        let Some(channel) = channel else {
            return Err(ProxyError::TransportIo(ChannelError::Closed));
        };
        let frame = control::build_start_frame()?;
        send_with_retry(
            &channel,
            frame,
            inner.config.destroy_retries,
            inner.config.remote_message_wait(),
        )
        .await
    }

    /// Accept a gateway message for the module.
    ///
    /// ## Parameters
    /// - `message`: The broker's message; a clone goes onto the outgoing
    ///   queue so the caller keeps its own copy
    ///
    /// ## Delivery Semantics
    ///
    /// Wire order matches call order. With a `Block` queue policy this
    /// call waits for space; with the drop policies it returns
    /// immediately. A message that cannot be queued (queue closed, or
    /// shed by policy) is logged and its clone released; the call itself
    /// never fails.
    pub async fn receive(&self, message: &GatewayMessage) {
        let queued = message.clone();
        if let Err(e) = self.inner.outgoing.push(queued).await {
            debug!(module = %self.inner.id, "message not queued: {e}");
        }
    }

    /// Tear the module down.
    ///
    /// ## Teardown Sequence
    ///
    /// 1. Send the destroy frame best-effort, with bounded non-blocking
    ///    retries (the host may already be gone)
    /// 2. Close the outgoing queue and both channels, waking any parked
    ///    worker
    /// 3. Stop and join the workers in order: inbound, outbound, control
    ///    monitor, async-create
    ///
    /// Completion is therefore bounded even against an unreachable host:
    /// the retry budget plus the workers' stop latency. The handle is
    /// consumed; clones left behind observe the `Closed` state.
    pub async fn destroy(self) {
        let inner = self.inner;
        *inner.state.lock() = LifecycleState::Draining;
        info!(module = %inner.id, "destroying module proxy");

        let channel = inner.channels.lock().control.clone();
        if let Some(channel) = channel {
            match control::build_destroy_frame() {
                Ok(frame) => {
                    if let Err(e) =
                        send_with_retry(&channel, frame, inner.config.destroy_retries, Duration::ZERO)
                            .await
                    {
                        warn!(module = %inner.id, "destroy frame not delivered: {e}");
                    }
                }
                Err(e) => error!(module = %inner.id, "unable to build destroy frame: {e}"),
            }
        }

        teardown(&inner).await;
    }
}

/// Close everything a handle owns: queue, channels, workers. Channel
/// closure comes first so that workers parked in a blocking receive wake
/// up and observe the stop flags.
async fn teardown(inner: &Arc<HandleInner>) {
    inner.outgoing.close();
    connection_teardown(inner);
    inner.inbound.stop_and_join().await;
    inner.outbound.stop_and_join().await;
    inner.control.stop_and_join().await;
    inner.async_create.stop_and_join().await;
    *inner.state.lock() = LifecycleState::Closed;
    debug!(module = %inner.id, "module proxy torn down");
}

/// Open the message channel, then the control channel. A failure on the
/// second closes the first before reporting.
async fn connection_setup(config: &ProxyConfig) -> Result<Channels, ProxyError> {
    let message = transport::connect(&config.message_uri).await?;
    let control = match transport::connect(&config.control_uri).await {
        Ok(control) => control,
        Err(e) => {
            message.close();
            return Err(e);
        }
    };
    Ok(Channels {
        message: Some(message),
        control: Some(control),
    })
}

fn connection_teardown(inner: &HandleInner) {
    let mut channels = inner.channels.lock();
    if let Some(channel) = channels.message.take() {
        channel.close();
    }
    if let Some(channel) = channels.control.take() {
        channel.close();
    }
}

fn transition(inner: &HandleInner, from: LifecycleState, to: LifecycleState) -> bool {
    let mut state = inner.state.lock();
    if *state == from {
        *state = to;
        true
    } else {
        false
    }
}

/// Send a control frame with bounded non-blocking attempts. The frame is
/// reused across attempts and dropped here if it was never handed over.
async fn send_with_retry(
    channel: &Arc<dyn PairChannel>,
    frame: Vec<u8>,
    attempts: u32,
    delay: Duration,
) -> Result<(), ProxyError> {
    let mut frame = frame;
    for attempt in 1..=attempts {
        match channel.try_send(frame) {
            Ok(()) => return Ok(()),
            Err(TrySendError {
                frame: back,
                error: ChannelError::WouldBlock,
            }) => {
                frame = back;
                if attempt < attempts && !delay.is_zero() {
                    sleep(delay).await;
                }
            }
            Err(TrySendError { error, .. }) => return Err(ProxyError::TransportIo(error)),
        }
    }
    Err(ProxyError::TransportIo(ChannelError::WouldBlock))
}

/// The create handshake.
///
/// Builds and sends a create frame, then waits for the host's verdict.
/// `WouldBlock` on the send and transient receive failures restart the
/// attempt after `remote_message_wait`; the first frame actually received
/// settles the handshake one way or the other.
async fn run_handshake(inner: &HandleInner, stop: &StopFlag) -> Result<(), ProxyError> {
    let (channel, wait) = {
        let channels = inner.channels.lock();
        (channels.control.clone(), inner.config.remote_message_wait())
    };
    let Some(channel) = channel else {
        return Err(ProxyError::TransportIo(ChannelError::Closed));
    };

    let mut attempts: u32 = 0;
    loop {
        if stop.is_set() {
            return Err(ProxyError::TransportIo(ChannelError::Interrupted));
        }
        if let Some(max) = inner.config.handshake_attempts {
            if attempts >= max {
                return Err(ProxyError::HandshakeTimeout { attempts: max });
            }
        }
        attempts += 1;

        // A zero wait degrades the retry loop to a busy one; keep it fair
        // to the tasks that will produce the reply.
        if wait.is_zero() {
            tokio::task::yield_now().await;
        }

        let frame =
            control::build_create_frame(&inner.config.message_uri, &inner.config.module_args)?;

        match channel.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError {
                error: ChannelError::WouldBlock,
                ..
            }) => {
                // frame dropped; rebuilt on the next attempt
                sleep(wait).await;
                continue;
            }
            Err(TrySendError { error, .. }) => return Err(ProxyError::TransportIo(error)),
        }

        match channel.recv_timeout(wait).await {
            Ok(bytes) => {
                return match ControlFrame::decode(&bytes)? {
                    ControlFrame::Reply { status: 0 } => Ok(()),
                    ControlFrame::Reply { status } => {
                        Err(ProxyError::HandshakeRejected { status })
                    }
                    other => Err(ProxyError::CodecFailed(format!(
                        "expected a reply during handshake, got {other:?}"
                    ))),
                };
            }
            Err(e) if e.is_transient() => continue,
            Err(e) => return Err(ProxyError::TransportIo(e)),
        }
    }
}

/// Single-shot worker body running the initial create handshake.
async fn async_create_task(inner: Arc<HandleInner>) {
    let stop = inner.async_create.stop_flag();
    match run_handshake(&inner, &stop).await {
        Ok(()) => {
            transition(&inner, LifecycleState::Handshaking, LifecycleState::Ready);
            info!(module = %inner.id, "module host acknowledged creation");
        }
        Err(e) => {
            error!(module = %inner.id, "create handshake failed: {e}");
            transition(&inner, LifecycleState::Handshaking, LifecycleState::Closed);
        }
    }
}

/// Receive gateway frames from the host and publish them to the broker.
///
/// The receive carries a generous timeout whose only purpose is to come
/// back around to the stop flag on an idle channel; expiry is not an
/// error.
async fn inbound_task(inner: Arc<HandleInner>) {
    let stop = inner.inbound.stop_flag();
    loop {
        if stop.is_set() {
            break;
        }
        let channel = inner.channels.lock().message.clone();
        let Some(channel) = channel else { break };

        match channel.recv_timeout(defaults::IDLE_RECV_TIMEOUT).await {
            Ok(bytes) => match GatewayMessage::from_bytes(&bytes) {
                Ok(message) => inner.broker.publish(inner.id, message),
                Err(e) => warn!(module = %inner.id, "discarding undecodable gateway frame: {e}"),
            },
            Err(e) if e.is_transient() => {}
            Err(e) => {
                debug!(module = %inner.id, "inbound worker exiting: {e}");
                break;
            }
        }
        sleep(defaults::MESSAGE_POLL_INTERVAL).await;
    }
}

/// Drain the outgoing queue onto the message channel.
///
/// A dequeued message is dropped exactly once after its transmission
/// attempt completes. `WouldBlock` means the attempt never ran: the frame
/// is discarded and the message goes back to the head of the queue, so a
/// stalled host delays delivery but never reorders or loses it.
async fn outbound_task(inner: Arc<HandleInner>) {
    let stop = inner.outbound.stop_flag();
    loop {
        if stop.is_set() {
            break;
        }
        let Some(message) = inner
            .outgoing
            .pop_timeout(defaults::MESSAGE_POLL_INTERVAL)
            .await
        else {
            continue;
        };

        let channel = inner.channels.lock().message.clone();
        let Some(channel) = channel else { break };

        match message.to_bytes() {
            Ok(frame) => match channel.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError {
                    error: ChannelError::WouldBlock,
                    ..
                }) => {
                    inner.outgoing.push_front(message);
                    sleep(defaults::MESSAGE_POLL_INTERVAL).await;
                    continue;
                }
                Err(TrySendError { error, .. }) => {
                    warn!(module = %inner.id, "unable to send outgoing message: {error}");
                }
            },
            Err(e) => error!(module = %inner.id, "unable to serialize outgoing message: {e}"),
        }
        sleep(defaults::MESSAGE_POLL_INTERVAL).await;
    }
}

/// Watch the control channel for failure replies; re-attach when one
/// arrives.
async fn control_task(inner: Arc<HandleInner>) {
    let stop = inner.control.stop_flag();
    let mut needs_reattach = false;
    loop {
        if stop.is_set() {
            break;
        }

        if needs_reattach {
            transition(&inner, LifecycleState::Running, LifecycleState::Attaching);
            match run_handshake(&inner, &stop).await {
                Ok(()) => {
                    send_restart_frame(&inner).await;
                    needs_reattach = false;
                    transition(&inner, LifecycleState::Attaching, LifecycleState::Running);
                    info!(module = %inner.id, "module host re-attached");
                }
                Err(e) => warn!(module = %inner.id, "re-attach attempt failed: {e}"),
            }
        }

        let channel = inner.channels.lock().control.clone();
        let Some(channel) = channel else { break };

        match channel.try_recv() {
            Ok(bytes) => match ControlFrame::decode(&bytes) {
                Ok(ControlFrame::Reply { status }) if status != 0 => {
                    warn!(
                        module = %inner.id,
                        "{}",
                        ProxyError::RemoteTerminated { status }
                    );
                    needs_reattach = true;
                }
                Ok(_) => {}
                Err(e) => debug!(module = %inner.id, "undecodable control frame: {e}"),
            },
            Err(ChannelError::WouldBlock) => {}
            Err(e) => {
                debug!(module = %inner.id, "control monitor exiting: {e}");
                break;
            }
        }
        sleep(defaults::CONTROL_POLL_INTERVAL).await;
    }
}

/// After a successful re-attach, tell the host to run again. Best effort;
/// a failure here leaves the next failure reply to trigger another round.
async fn send_restart_frame(inner: &HandleInner) {
    let channel = inner.channels.lock().control.clone();
    let Some(channel) = channel else { return };
    match control::build_start_frame() {
        Ok(frame) => {
            if let Err(e) = send_with_retry(
                &channel,
                frame,
                inner.config.destroy_retries,
                inner.config.remote_message_wait(),
            )
            .await
            {
                warn!(module = %inner.id, "start frame after re-attach not delivered: {e}");
            }
        }
        Err(e) => error!(module = %inner.id, "unable to build start frame: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ChannelBroker;
    use crate::control::build_start_frame;

    fn test_config(tag: &str) -> ProxyConfig {
        let mut config = ProxyConfig::new(
            format!("inproc://{tag}/control"),
            format!("inproc://{tag}/message"),
            "{}",
        );
        config.remote_message_wait_ms = 20;
        config
    }

    /// Host half that acknowledges every create frame with a success reply.
    async fn friendly_host(control_uri: String) -> Arc<dyn PairChannel> {
        let control = transport::bind(&control_uri).await.unwrap();
        let host = control.clone();
        tokio::spawn(async move {
            while let Ok(bytes) = host.recv().await {
                if matches!(
                    ControlFrame::decode(&bytes),
                    Ok(ControlFrame::Create { .. })
                ) {
                    let reply = (ControlFrame::Reply { status: 0 }).encode().unwrap();
                    let _ = host.send(reply).await;
                }
            }
        });
        control
    }

    #[test]
    fn parse_and_free_config_wrap_and_release() {
        assert!(parse_config("").is_none());
        let args = parse_config(r#"{"path": "/opt/mod.so"}"#).unwrap();
        assert_eq!(args.as_str(), r#"{"path": "/opt/mod.so"}"#);
        free_config(args);
    }

    #[tokio::test]
    async fn failed_start_unwinds_already_spawned_workers() {
        let config = test_config("unwind");
        let _control = friendly_host(config.control_uri.clone()).await;
        let _message = transport::bind(&config.message_uri).await.unwrap();

        let (broker, _stream) = ChannelBroker::new();
        let handle = create(Arc::new(broker), config).await.expect("create");
        assert_eq!(handle.state(), LifecycleState::Ready);

        // Force the start-frame step to fail after the first workers spawn.
        let stolen = handle.inner.channels.lock().control.take();
        assert!(handle.start().await.is_err());

        assert!(!handle.inner.inbound.is_running());
        assert!(!handle.inner.control.is_running());
        assert!(!handle.inner.outbound.is_running());
        assert_ne!(handle.state(), LifecycleState::Running);

        handle.inner.channels.lock().control = stolen;
        handle.destroy().await;
    }

    #[tokio::test]
    async fn failed_sync_create_closes_channels_and_workers() {
        // No host anywhere, and a handshake budget so create gives up.
        let mut config = test_config("no-host");
        config.handshake_attempts = Some(2);
        config.remote_message_wait_ms = 5;

        let (broker, _stream) = ChannelBroker::new();
        assert!(create(Arc::new(broker), config).await.is_none());

        // Both endpoints were released; the connect side can be claimed anew.
        assert!(transport::connect("inproc://no-host/control").await.is_ok());
        assert!(transport::connect("inproc://no-host/message").await.is_ok());
    }

    #[tokio::test]
    async fn start_is_rejected_after_destroy_state() {
        let config = test_config("late-start");
        let _control = friendly_host(config.control_uri.clone()).await;
        let _message = transport::bind(&config.message_uri).await.unwrap();

        let (broker, _stream) = ChannelBroker::new();
        let handle = create(Arc::new(broker), config).await.expect("create");

        *handle.inner.state.lock() = LifecycleState::Closed;
        assert!(matches!(
            handle.start().await,
            Err(ProxyError::TaskSpawn(_))
        ));
        *handle.inner.state.lock() = LifecycleState::Ready;
        handle.destroy().await;
    }

    #[tokio::test]
    async fn handshake_makes_progress_with_zero_wait() {
        let mut config = test_config("zero-wait");
        config.remote_message_wait_ms = 0;
        let _control = friendly_host(config.control_uri.clone()).await;
        let _message = transport::bind(&config.message_uri).await.unwrap();

        let (broker, _stream) = ChannelBroker::new();
        let handle = tokio::time::timeout(
            Duration::from_secs(5),
            create(Arc::new(broker), config),
        )
        .await
        .expect("zero wait must not stall create")
        .expect("create succeeds");
        handle.destroy().await;
    }

    #[tokio::test]
    async fn handshake_fails_hard_on_non_reply_frame() {
        let config = test_config("wrong-frame");
        let control = transport::bind(&config.control_uri).await.unwrap();
        let _message = transport::bind(&config.message_uri).await.unwrap();

        // Answer the create frame with a start frame instead of a reply.
        let host = control.clone();
        tokio::spawn(async move {
            if host.recv().await.is_ok() {
                let _ = host.send(build_start_frame().unwrap()).await;
            }
        });

        let (broker, _stream) = ChannelBroker::new();
        assert!(create(Arc::new(broker), config).await.is_none());
    }

    #[tokio::test]
    async fn handshake_fails_hard_on_failure_reply() {
        let config = test_config("rejected");
        let control = transport::bind(&config.control_uri).await.unwrap();
        let _message = transport::bind(&config.message_uri).await.unwrap();

        let host = control.clone();
        tokio::spawn(async move {
            if host.recv().await.is_ok() {
                let reply = (ControlFrame::Reply { status: 3 }).encode().unwrap();
                let _ = host.send(reply).await;
            }
        });

        let (broker, _stream) = ChannelBroker::new();
        assert!(create(Arc::new(broker), config).await.is_none());
    }
}
