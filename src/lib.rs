//! # Outprocess Module Proxy
//!
//! A gateway-side proxy that makes a module running in a separate host
//! process look like a local, in-process module. The proxy owns two paired
//! IPC channels to the module host (control and message), drives the host
//! through its create / start / destroy lifecycle, pumps gateway messages
//! in both directions, and transparently re-attaches when the host fails
//! and comes back.

pub mod broker;
pub mod config;
pub mod control;
pub mod error;
pub mod message;
pub mod proxy;
pub mod queue;
pub mod transport;
pub mod worker;

pub use broker::{Broker, ChannelBroker, LogBroker, ModuleId};
pub use config::{LifecycleMode, ModuleArgs, OverflowPolicy, ProxyConfig};
pub use error::{ChannelError, ProxyError};
pub use message::GatewayMessage;
pub use proxy::{create, free_config, parse_config, LifecycleState, ModuleHandle};

/// The current version of the proxy crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tuning values.
pub mod defaults {
    use std::time::Duration;

    /// Pause at the end of each message worker iteration.
    pub const MESSAGE_POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// Pause at the end of each control monitor iteration.
    pub const CONTROL_POLL_INTERVAL: Duration = Duration::from_millis(250);

    /// Control channel receive timeout and handshake retry sleep, in
    /// milliseconds.
    pub const REMOTE_MESSAGE_WAIT_MS: u64 = 1000;

    /// How long the inbound worker sits in one receive before re-checking
    /// its stop flag. Bounds worker stop latency on an idle channel.
    pub const IDLE_RECV_TIMEOUT: Duration = Duration::from_millis(250);

    /// Outgoing queue bound.
    pub const QUEUE_CAPACITY: usize = 1024;

    /// Non-blocking send attempts for best-effort control frames.
    pub const DESTROY_RETRIES: u32 = 10;

    /// Frames buffered per direction inside a transport endpoint.
    pub const CHANNEL_DEPTH: usize = 64;

    /// Upper bound on a single wire frame.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

    /// Pause between connection attempts while a unix endpoint waits for
    /// its peer.
    pub const RECONNECT_DELAY: Duration = Duration::from_millis(50);

    /// How long a closing unix endpoint lets its pump flush accepted
    /// frames before it is stopped outright.
    pub const CLOSE_GRACE: Duration = Duration::from_millis(250);
}
