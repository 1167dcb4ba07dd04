//! Paired channel transport abstraction and implementations.
//!
//! The proxy talks to its module host over two endpoints of a paired,
//! framed, datagram-style transport: whole frames in, whole frames out, one
//! peer per endpoint. This module defines the [`PairChannel`] trait the
//! proxy codes against and a URI-scheme factory over the two concrete
//! implementations:
//!
//! - `inproc://<name>`: in-process channel pair ([`memory`]), used by tests
//!   and embedders that host both ends in one process.
//! - `ipc://<path>`: unix domain socket with length-prefixed framing
//!   ([`unix`]); the proxy connects, the module host binds.
//!
//! ## Buffer ownership
//!
//! A frame handed to `send`/`try_send` belongs to the transport once the
//! call succeeds. On a failed `try_send` the frame comes back inside
//! [`TrySendError`] so the caller can retry or drop it; there is never a
//! moment where both sides think they own the bytes.
//!
//! ## Peer loss
//!
//! Pair endpoints survive their peer: a lost peer surfaces as `WouldBlock`
//! on non-blocking sends and silence on receives, and the endpoint links up
//! again when a new peer arrives. `Closed` is reserved for local teardown.

use crate::error::ProxyError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod unix;

pub use crate::error::{ChannelError, TrySendError};
pub use memory::MemoryChannel;
pub use unix::UnixChannel;

/// One endpoint of a paired framed channel.
///
/// Implementations deliver whole frames or nothing; there is no partial
/// read or write at this interface. All methods take `&self` so a single
/// endpoint can be shared across worker tasks behind an `Arc`, with the
/// convention that only one logical actor receives on a given endpoint at
/// a time.
#[async_trait]
pub trait PairChannel: Send + Sync {
    /// Send a frame, waiting for buffer space if necessary.
    ///
    /// ## Parameters
    /// - `frame`: The bytes to transmit; ownership passes to the transport
    ///   on success and the buffer is dropped on failure
    ///
    /// ## Returns
    /// - `Ok(())`: The transport accepted the frame
    /// - `Err(ChannelError::Closed)`: The endpoint was torn down locally
    async fn send(&self, frame: Vec<u8>) -> Result<(), ChannelError>;

    /// Send a frame without waiting.
    ///
    /// ## Parameters
    /// - `frame`: The bytes to transmit
    ///
    /// ## Returns
    /// - `Ok(())`: The transport accepted the frame and now owns it
    /// - `Err(TrySendError)`: The frame travels back inside the error;
    ///   `WouldBlock` means no peer or no buffer space right now,
    ///   `Closed` means the endpoint is gone
    fn try_send(&self, frame: Vec<u8>) -> Result<(), TrySendError>;

    /// Receive the next frame, waiting indefinitely.
    ///
    /// ## Returns
    /// - `Ok(frame)`: A complete frame; the caller owns the buffer and
    ///   releases it by dropping
    /// - `Err(ChannelError::Closed)`: The endpoint was torn down; a
    ///   receive parked here wakes with this error rather than hanging
    async fn recv(&self) -> Result<Vec<u8>, ChannelError>;

    /// Receive without waiting.
    ///
    /// ## Returns
    /// - `Ok(frame)`: A frame was already queued
    /// - `Err(ChannelError::WouldBlock)`: Nothing queued right now
    /// - `Err(ChannelError::Closed)`: The endpoint is gone
    fn try_recv(&self) -> Result<Vec<u8>, ChannelError>;

    /// Receive with an upper bound on the wait.
    ///
    /// ## Parameters
    /// - `timeout`: Longest time to wait; a zero timeout still delivers a
    ///   frame that is already queued
    ///
    /// ## Returns
    /// As `recv()`, plus `Err(ChannelError::TimedOut)` when the bound
    /// expires first.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Vec<u8>, ChannelError>;

    /// Tear the endpoint down.
    ///
    /// Idempotent. Pending and future operations observe `Closed`; the
    /// peer is not notified beyond the underlying connection going away.
    fn close(&self);

    /// The URI this endpoint was created from, for diagnostics.
    fn uri(&self) -> &str;
}

/// Open the connecting side of a pair at `uri`.
///
/// This is the proxy's end of both channels. Connecting succeeds even
/// before the host's binding end exists; frames flow once both sides are
/// attached.
///
/// ## Parameters
/// - `uri`: `inproc://<name>` or `ipc://<path>`
///
/// ## Returns
/// - `Ok(endpoint)`: A shareable endpoint handle
/// - `Err(ProxyError::TransportSetup)`: Unknown scheme, empty locator, or
///   the implementation could not allocate its resources
pub async fn connect(uri: &str) -> Result<Arc<dyn PairChannel>, ProxyError> {
    match Scheme::of(uri)? {
        Scheme::Inproc => Ok(Arc::new(MemoryChannel::connect(uri)?)),
        Scheme::Ipc => Ok(Arc::new(UnixChannel::connect(uri).await?)),
    }
}

/// Open the binding side of a pair at `uri`.
///
/// This is the module-host end; the proxy itself only connects, but tests
/// and host emulations bind. A unix endpoint claims the socket path here,
/// an in-process endpoint claims the registry name.
///
/// ## Parameters
/// - `uri`: `inproc://<name>` or `ipc://<path>`
///
/// ## Returns
/// - `Ok(endpoint)`: A shareable endpoint handle
/// - `Err(ProxyError::TransportSetup)`: Unknown scheme, empty locator, or
///   the bind point is already claimed
pub async fn bind(uri: &str) -> Result<Arc<dyn PairChannel>, ProxyError> {
    match Scheme::of(uri)? {
        Scheme::Inproc => Ok(Arc::new(MemoryChannel::bind(uri)?)),
        Scheme::Ipc => Ok(Arc::new(UnixChannel::bind(uri).await?)),
    }
}

enum Scheme {
    Inproc,
    Ipc,
}

impl Scheme {
    fn of(uri: &str) -> Result<Self, ProxyError> {
        if uri.starts_with("inproc://") {
            Ok(Scheme::Inproc)
        } else if uri.starts_with("ipc://") {
            Ok(Scheme::Ipc)
        } else {
            Err(ProxyError::TransportSetup(format!(
                "unsupported channel uri: {uri}"
            )))
        }
    }
}

/// Strip a known scheme prefix, leaving the endpoint locator.
pub(crate) fn locator(uri: &str) -> Result<&str, ProxyError> {
    let rest = uri
        .strip_prefix("inproc://")
        .or_else(|| uri.strip_prefix("ipc://"))
        .ok_or_else(|| ProxyError::TransportSetup(format!("unsupported channel uri: {uri}")))?;
    if rest.is_empty() {
        return Err(ProxyError::TransportSetup(format!(
            "channel uri has no endpoint: {uri}"
        )));
    }
    Ok(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        assert!(connect("tcp://127.0.0.1:1").await.is_err());
        assert!(bind("module-a").await.is_err());
    }

    #[test]
    fn locator_strips_scheme() {
        assert_eq!(locator("inproc://pair/a").unwrap(), "pair/a");
        assert_eq!(locator("ipc:///tmp/a.sock").unwrap(), "/tmp/a.sock");
        assert!(locator("inproc://").is_err());
    }
}
