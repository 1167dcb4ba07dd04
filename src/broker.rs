//! Broker-facing seam.
//!
//! The proxy does not own the gateway's publish/subscribe bus; it only needs
//! one downcall on it. [`Broker`] is that seam. Implementations must be
//! cheap and non-blocking since the inbound worker publishes from its
//! receive loop.

use crate::message::GatewayMessage;
use tracing::info;
use uuid::Uuid;

/// Identity of the proxy handle publishing a message, so the bus can avoid
/// echoing messages back to their source.
pub type ModuleId = Uuid;

/// The one operation the proxy performs against the gateway bus.
pub trait Broker: Send + Sync {
    /// Deliver a message that arrived from the module host.
    fn publish(&self, source: ModuleId, message: GatewayMessage);
}

/// Broker that logs every published message. Used by the standalone driver
/// binary, where there is no real bus to deliver into.
#[derive(Debug, Default)]
pub struct LogBroker;

impl Broker for LogBroker {
    fn publish(&self, source: ModuleId, message: GatewayMessage) {
        info!(
            module = %source,
            properties = ?message.properties,
            content_len = message.content.len(),
            "module published message"
        );
    }
}

/// Broker that forwards published messages into an unbounded channel, so a
/// consumer elsewhere can observe exactly what the proxy delivered.
pub struct ChannelBroker {
    sink: tokio::sync::mpsc::UnboundedSender<(ModuleId, GatewayMessage)>,
}

impl ChannelBroker {
    /// Create the broker and the receiving half of its channel.
    pub fn new() -> (
        Self,
        tokio::sync::mpsc::UnboundedReceiver<(ModuleId, GatewayMessage)>,
    ) {
        let (sink, stream) = tokio::sync::mpsc::unbounded_channel();
        (Self { sink }, stream)
    }
}

impl Broker for ChannelBroker {
    fn publish(&self, source: ModuleId, message: GatewayMessage) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.sink.send((source, message));
    }
}
