//! Control channel wire format.
//!
//! Four frame kinds travel on the control channel, all sharing a two-byte
//! `{version, type}` header:
//!
//! - `Create` carries the message channel URI and the module host arguments
//!   so the remote end can attach and instantiate the module. String lengths
//!   on the wire include a trailing NUL, and the strings are transmitted
//!   NUL-terminated.
//! - `Start` and `Destroy` are header-only lifecycle commands.
//! - `Reply` carries a signed status; zero is success, anything else means
//!   the module host has failed or is gone.
//!
//! All multi-byte integers are little-endian. Encoding is two-pass: callers
//! size a frame with [`ControlFrame::encoded_len`], allocate, and fill with
//! [`ControlFrame::encode_into`], or use [`ControlFrame::encode`] which does
//! both.

use crate::error::ProxyError;

/// Control protocol version emitted and accepted by this proxy.
pub const CONTROL_VERSION: u8 = 1;

/// Gateway message format version advertised in the create frame.
pub const GATEWAY_MESSAGE_VERSION: u8 = 1;

/// URI tag for a paired two-endpoint channel, the only channel kind the
/// proxy creates.
pub const URI_TYPE_PAIR: u8 = 16;

const TYPE_MODULE_CREATE: u8 = 1;
const TYPE_MODULE_REPLY: u8 = 2;
const TYPE_MODULE_START: u8 = 3;
const TYPE_MODULE_DESTROY: u8 = 4;

const HEADER_LEN: usize = 2;

/// A decoded control channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// Instruct the module host to create the module instance.
    Create {
        /// Gateway message format version the proxy will speak on the
        /// message channel.
        gateway_version: u8,
        /// Channel kind tag for `uri`.
        uri_type: u8,
        /// Message channel URI the host should attach to.
        uri: String,
        /// Opaque module arguments.
        args: String,
    },
    /// Instruct the module host to start delivering and accepting messages.
    Start,
    /// Instruct the module host to tear the module down.
    Destroy,
    /// Host response; `status == 0` reports success.
    Reply { status: i32 },
}

impl ControlFrame {
    fn type_tag(&self) -> u8 {
        match self {
            ControlFrame::Create { .. } => TYPE_MODULE_CREATE,
            ControlFrame::Reply { .. } => TYPE_MODULE_REPLY,
            ControlFrame::Start => TYPE_MODULE_START,
            ControlFrame::Destroy => TYPE_MODULE_DESTROY,
        }
    }

    /// Exact number of bytes [`encode_into`](Self::encode_into) will write.
    pub fn encoded_len(&self) -> usize {
        match self {
            ControlFrame::Create { uri, args, .. } => {
                // header + gateway version + uri block + args block,
                // both strings NUL-terminated with length-including-NUL
                HEADER_LEN + 1 + 4 + 1 + uri.len() + 1 + 4 + args.len() + 1
            }
            ControlFrame::Start | ControlFrame::Destroy => HEADER_LEN,
            ControlFrame::Reply { .. } => HEADER_LEN + 4,
        }
    }

    /// Serialize into `out`, which must be exactly `encoded_len()` bytes.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<(), ProxyError> {
        if out.len() != self.encoded_len() {
            return Err(ProxyError::CodecFailed(format!(
                "encode buffer is {} bytes, frame needs {}",
                out.len(),
                self.encoded_len()
            )));
        }

        out[0] = CONTROL_VERSION;
        out[1] = self.type_tag();
        let mut at = HEADER_LEN;

        match self {
            ControlFrame::Create {
                gateway_version,
                uri_type,
                uri,
                args,
            } => {
                out[at] = *gateway_version;
                at += 1;
                at = put_string(out, at, *uri_type, uri);
                put_args(out, at, args);
            }
            ControlFrame::Start | ControlFrame::Destroy => {}
            ControlFrame::Reply { status } => {
                out[at..at + 4].copy_from_slice(&status.to_le_bytes());
            }
        }
        Ok(())
    }

    /// Size and serialize in one call.
    pub fn encode(&self) -> Result<Vec<u8>, ProxyError> {
        let mut out = vec![0u8; self.encoded_len()];
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Deserialize a frame received on the control channel.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProxyError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProxyError::CodecFailed(format!(
                "control frame truncated at {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != CONTROL_VERSION {
            return Err(ProxyError::CodecFailed(format!(
                "unsupported control version {}",
                bytes[0]
            )));
        }

        let body = &bytes[HEADER_LEN..];
        match bytes[1] {
            TYPE_MODULE_CREATE => decode_create(body),
            TYPE_MODULE_REPLY => {
                if body.len() != 4 {
                    return Err(ProxyError::CodecFailed(
                        "reply frame has malformed status".into(),
                    ));
                }
                let status = i32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                Ok(ControlFrame::Reply { status })
            }
            TYPE_MODULE_START if body.is_empty() => Ok(ControlFrame::Start),
            TYPE_MODULE_DESTROY if body.is_empty() => Ok(ControlFrame::Destroy),
            TYPE_MODULE_START | TYPE_MODULE_DESTROY => Err(ProxyError::CodecFailed(
                "unexpected payload on header-only frame".into(),
            )),
            other => Err(ProxyError::CodecFailed(format!(
                "unknown control frame type {other}"
            ))),
        }
    }
}

fn put_string(out: &mut [u8], mut at: usize, uri_type: u8, value: &str) -> usize {
    let len_with_nul = (value.len() + 1) as u32;
    out[at..at + 4].copy_from_slice(&len_with_nul.to_le_bytes());
    at += 4;
    out[at] = uri_type;
    at += 1;
    out[at..at + value.len()].copy_from_slice(value.as_bytes());
    at += value.len();
    out[at] = 0;
    at + 1
}

fn put_args(out: &mut [u8], mut at: usize, value: &str) {
    let len_with_nul = (value.len() + 1) as u32;
    out[at..at + 4].copy_from_slice(&len_with_nul.to_le_bytes());
    at += 4;
    out[at..at + value.len()].copy_from_slice(value.as_bytes());
    at += value.len();
    out[at] = 0;
}

fn decode_create(body: &[u8]) -> Result<ControlFrame, ProxyError> {
    let malformed = || ProxyError::CodecFailed("create frame malformed".into());

    if body.is_empty() {
        return Err(malformed());
    }
    let gateway_version = body[0];
    let mut at = 1;

    let uri_len = read_u32(body, &mut at).ok_or_else(malformed)? as usize;
    if uri_len == 0 || at >= body.len() {
        return Err(malformed());
    }
    let uri_type = body[at];
    at += 1;
    let uri = read_nul_string(body, &mut at, uri_len).ok_or_else(malformed)?;

    let args_len = read_u32(body, &mut at).ok_or_else(malformed)? as usize;
    if args_len == 0 {
        return Err(malformed());
    }
    let args = read_nul_string(body, &mut at, args_len).ok_or_else(malformed)?;

    if at != body.len() {
        return Err(malformed());
    }

    Ok(ControlFrame::Create {
        gateway_version,
        uri_type,
        uri,
        args,
    })
}

fn read_u32(body: &[u8], at: &mut usize) -> Option<u32> {
    let bytes = body.get(*at..*at + 4)?;
    *at += 4;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a `len`-byte block whose final byte must be NUL; returns the string
/// without the terminator.
fn read_nul_string(body: &[u8], at: &mut usize, len: usize) -> Option<String> {
    let block = body.get(*at..*at + len)?;
    if *block.last()? != 0 {
        return None;
    }
    *at += len;
    String::from_utf8(block[..len - 1].to_vec()).ok()
}

/// Build the create frame announcing `message_uri` and `args` to the module
/// host. Rejects empty inputs; a create frame with nothing to say is a
/// configuration bug, not a protocol message.
pub fn build_create_frame(message_uri: &str, args: &str) -> Result<Vec<u8>, ProxyError> {
    if message_uri.is_empty() {
        return Err(ProxyError::ConfigInvalid(
            "message channel uri is empty".into(),
        ));
    }
    if args.is_empty() {
        return Err(ProxyError::ConfigInvalid("module arguments are empty".into()));
    }
    ControlFrame::Create {
        gateway_version: GATEWAY_MESSAGE_VERSION,
        uri_type: URI_TYPE_PAIR,
        uri: message_uri.to_owned(),
        args: args.to_owned(),
    }
    .encode()
}

/// Build the header-only start frame.
pub fn build_start_frame() -> Result<Vec<u8>, ProxyError> {
    ControlFrame::Start.encode()
}

/// Build the header-only destroy frame.
pub fn build_destroy_frame() -> Result<Vec<u8>, ProxyError> {
    ControlFrame::Destroy.encode()
}
