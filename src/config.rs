//! Proxy configuration.
//!
//! A [`ProxyConfig`] describes one remote module instance: where its two
//! channels live, what arguments the module host needs, how the create
//! handshake behaves, and how the outgoing queue reacts to pressure. The
//! structure deserializes from JSON with serde, which is how the gateway
//! binary loads it from disk.

use crate::defaults;
use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How `create` treats the handshake with the module host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleMode {
    /// `create` waits for the handshake and fails if it fails.
    #[default]
    Sync,
    /// `create` returns a live handle immediately; the handshake continues
    /// in the background.
    Async,
}

/// What the outgoing queue does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Hold the enqueuing caller until space frees up.
    #[default]
    Block,
    /// Evict the oldest queued message to admit the new one.
    DropOldest,
    /// Discard the incoming message.
    DropNewest,
}

/// Opaque module-host argument blob.
///
/// The gateway hands the proxy a configuration string for the module host;
/// the proxy never interprets it, it only carries it inside the create
/// frame. Releasing the parsed value is an ordinary drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleArgs(String);

impl ModuleArgs {
    /// Wrap a configuration string.
    ///
    /// ## Parameters
    /// - `raw`: The module host's configuration text, taken verbatim
    ///
    /// ## Returns
    /// - `Some(args)`: An owned copy of the input
    /// - `None`: The input was empty; an empty blob has no meaning to a
    ///   module host
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            None
        } else {
            Some(Self(raw.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Full configuration for one proxied module.
///
/// One value of this type describes everything the proxy needs to stand in
/// for a remote module: where the two channels live, what to tell the
/// module host at create time, and how the handshake and the outgoing
/// queue behave under pressure.
///
/// ## Construction Paths
///
/// - `from_json()`: the gateway path, deserializing a JSON document
/// - `new()`: the embedder/test path, taking the three required fields
///   and defaulting the rest
///
/// Both paths end in `validate()`, which rejects configurations the proxy
/// could not act on (empty endpoints, shared endpoints, empty arguments).
///
/// ## Field Categories
///
/// - **Endpoints**: `control_uri`, `message_uri`
/// - **Host identity**: `module_args`
/// - **Handshake**: `lifecycle`, `remote_message_wait_ms`,
///   `handshake_attempts`
/// - **Queue**: `queue_capacity`, `overflow`
/// - **Teardown**: `destroy_retries`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// URI of the lifecycle (control) channel.
    pub control_uri: String,

    /// URI of the gateway-message (data) channel.
    pub message_uri: String,

    /// Arguments forwarded to the module host in the create frame.
    pub module_args: String,

    /// Sync or async create behavior.
    #[serde(default)]
    pub lifecycle: LifecycleMode,

    /// Control channel receive timeout, also the retry sleep between
    /// handshake attempts, in milliseconds.
    #[serde(default = "default_remote_message_wait_ms")]
    pub remote_message_wait_ms: u64,

    /// Upper bound on the outgoing queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Reaction to a full outgoing queue.
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Non-blocking send attempts for the best-effort destroy frame.
    #[serde(default = "default_destroy_retries")]
    pub destroy_retries: u32,

    /// Optional cap on create handshake attempts. `None` retries until the
    /// channel is torn down.
    #[serde(default)]
    pub handshake_attempts: Option<u32>,
}

fn default_remote_message_wait_ms() -> u64 {
    defaults::REMOTE_MESSAGE_WAIT_MS
}

fn default_queue_capacity() -> usize {
    defaults::QUEUE_CAPACITY
}

fn default_destroy_retries() -> u32 {
    defaults::DESTROY_RETRIES
}

impl ProxyConfig {
    /// Convenience constructor used by tests and embedders.
    ///
    /// ## Parameters
    /// - `control_uri`: Lifecycle channel endpoint
    /// - `message_uri`: Gateway-message channel endpoint
    /// - `module_args`: Argument blob for the module host
    ///
    /// ## Returns
    /// A configuration with every tuning field at its default: synchronous
    /// lifecycle, the standard handshake wait, a blocking queue of the
    /// default capacity, and ten destroy-frame attempts.
    pub fn new(
        control_uri: impl Into<String>,
        message_uri: impl Into<String>,
        module_args: impl Into<String>,
    ) -> Self {
        Self {
            control_uri: control_uri.into(),
            message_uri: message_uri.into(),
            module_args: module_args.into(),
            lifecycle: LifecycleMode::default(),
            remote_message_wait_ms: defaults::REMOTE_MESSAGE_WAIT_MS,
            queue_capacity: defaults::QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
            destroy_retries: defaults::DESTROY_RETRIES,
            handshake_attempts: None,
        }
    }

    /// Parse a JSON configuration document.
    ///
    /// ## Parameters
    /// - `raw`: The document text; unknown keys are rejected so typos do
    ///   not silently fall back to defaults
    ///
    /// ## Returns
    /// - `Ok(config)`: Parsed and validated configuration
    /// - `Err(ProxyError::ConfigInvalid)`: Malformed JSON, an unknown or
    ///   ill-typed field, or a value `validate()` rejects
    pub fn from_json(raw: &str) -> Result<Self, ProxyError> {
        let config: ProxyConfig =
            serde_json::from_str(raw).map_err(|e| ProxyError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the proxy cannot act on.
    ///
    /// ## Validation Rules
    ///
    /// - Both channel URIs must be non-empty and distinct; the protocol
    ///   assumes lifecycle frames and gateway traffic never share a wire
    /// - `module_args` must be non-empty, since an empty argument block
    ///   cannot form a create frame
    /// - `queue_capacity` must admit at least one message
    /// - `handshake_attempts`, when set, must allow at least one attempt
    ///
    /// ## Returns
    /// - `Ok(())`: The configuration is usable
    /// - `Err(ProxyError::ConfigInvalid)`: The first rule violated, named
    ///   in the error message
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.control_uri.is_empty() {
            return Err(ProxyError::ConfigInvalid("control_uri is empty".into()));
        }
        if self.message_uri.is_empty() {
            return Err(ProxyError::ConfigInvalid("message_uri is empty".into()));
        }
        if self.control_uri == self.message_uri {
            return Err(ProxyError::ConfigInvalid(
                "control_uri and message_uri must be distinct endpoints".into(),
            ));
        }
        if self.module_args.is_empty() {
            return Err(ProxyError::ConfigInvalid("module_args is empty".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ProxyError::ConfigInvalid("queue_capacity must be > 0".into()));
        }
        if self.handshake_attempts == Some(0) {
            return Err(ProxyError::ConfigInvalid(
                "handshake_attempts must be > 0 when set".into(),
            ));
        }
        Ok(())
    }

    /// The configured control-channel wait as a `Duration`.
    ///
    /// This one value plays both of its protocol roles: the receive
    /// timeout on the control channel during a handshake, and the sleep
    /// between handshake attempts.
    pub fn remote_message_wait(&self) -> Duration {
        Duration::from_millis(self.remote_message_wait_ms)
    }
}
