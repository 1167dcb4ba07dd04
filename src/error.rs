//! Error types shared across the proxy.
//!
//! The library distinguishes between transport-level errors (`ChannelError`,
//! produced by the pair channels) and proxy-level errors (`ProxyError`,
//! produced by configuration, codec, and lifecycle code). Transient transport
//! conditions are retried in place by the worker loops; everything else
//! either ends the affected task or is surfaced to the caller.

use thiserror::Error;

/// Errors produced by a pair channel endpoint.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The operation could not complete without waiting. Retryable.
    #[error("operation would block")]
    WouldBlock,

    /// A bounded receive expired before a frame arrived. Retryable.
    #[error("receive timed out")]
    TimedOut,

    /// The operation was interrupted before completion. Retryable.
    #[error("operation interrupted")]
    Interrupted,

    /// The endpoint was closed locally. Terminal for this channel.
    #[error("channel closed")]
    Closed,

    /// An underlying I/O failure that is not one of the retryable kinds.
    #[error("channel i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// True for the conditions that warrant a sleep-and-retry rather than
    /// ending the operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChannelError::WouldBlock | ChannelError::TimedOut | ChannelError::Interrupted
        )
    }
}

/// A failed non-blocking send. The frame travels back to the caller so that
/// buffer ownership stays unambiguous: the transport owns a frame only once
/// a send has succeeded.
#[derive(Debug)]
pub struct TrySendError {
    /// The frame that was not sent.
    pub frame: Vec<u8>,
    /// Why the send did not happen.
    pub error: ChannelError,
}

impl std::fmt::Display for TrySendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "non-blocking send failed: {}", self.error)
    }
}

impl std::error::Error for TrySendError {}

/// Proxy-level error kinds.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The configuration failed validation or could not be parsed.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A channel endpoint could not be created or connected.
    #[error("transport setup failed: {0}")]
    TransportSetup(String),

    /// An unexpected transport failure during normal operation.
    #[error("transport i/o failure: {0}")]
    TransportIo(#[from] ChannelError),

    /// A control or gateway frame could not be encoded or decoded.
    #[error("codec failure: {0}")]
    CodecFailed(String),

    /// The module host answered the create handshake with a failure reply,
    /// or with a frame that is not a reply at all.
    #[error("module host rejected handshake (status {status})")]
    HandshakeRejected { status: i32 },

    /// The handshake retry budget was exhausted without a usable reply.
    #[error("handshake gave up after {attempts} attempts")]
    HandshakeTimeout { attempts: u32 },

    /// A worker task could not be spawned, or was spawned out of order.
    #[error("worker task error: {0}")]
    TaskSpawn(String),

    /// The module host reported that it has failed or been torn down.
    #[error("remote module host terminated (status {status})")]
    RemoteTerminated { status: i32 },

    /// The outgoing queue was closed while an enqueue was in flight.
    #[error("outgoing queue closed")]
    QueueClosed,
}
