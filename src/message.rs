//! Gateway message representation and byte-array codec.
//!
//! The proxy forwards gateway messages verbatim; it never looks inside them.
//! A message is a bag of named properties plus an opaque content block, and
//! the only operations the proxy needs are clone, serialize, deserialize,
//! and drop. Serialization uses bincode so both ends of the message channel
//! agree on a compact binary layout.

use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single message traveling between the broker and the module host.
///
/// Property order is stable (`BTreeMap`) so that serializing the same
/// message twice yields identical bytes, which keeps wire captures
/// comparable in tests and tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Named string properties attached to the message.
    pub properties: BTreeMap<String, String>,

    /// Opaque message content.
    pub content: Vec<u8>,
}

impl GatewayMessage {
    /// Create a message with the given content and no properties.
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            properties: BTreeMap::new(),
            content,
        }
    }

    /// Builder-style property attachment.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Serialize the message for transmission on the message channel.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProxyError> {
        bincode::serialize(self).map_err(|e| ProxyError::CodecFailed(e.to_string()))
    }

    /// Reconstruct a message received from the message channel.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProxyError> {
        bincode::deserialize(bytes).map_err(|e| ProxyError::CodecFailed(e.to_string()))
    }
}
