//! Wire types for the framed message protocol and the JWT payloads
//! exchanged during the upgrade handshake and peer discovery.
//!
//! Every WebSocket binary message is exactly one frame:
//!
//!     [u32 BE header_len][header_len bytes of bincode-encoded FrameHeader][body]
//!
//! `header_len + body.len()` must not exceed the negotiated
//! `max_message_size`. Unlike a fixed-layout UDP wire protocol, this
//! header is a small variable-shape record, so it is encoded with
//! `bincode` over a concrete struct rather than a `zerocopy` layout.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four wire actions a client may request against the cache table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Action {
    Get = 0,
    AddOrUpdate = 1,
    Delete = 2,
    Dequeue = 3,
}

impl TryFrom<u8> for Action {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Action::Get),
            1 => Ok(Action::AddOrUpdate),
            2 => Ok(Action::Delete),
            3 => Ok(Action::Dequeue),
            other => Err(WireError::UnknownAction(other)),
        }
    }
}

/// Response status codes. `Deleted`/`Modified` are used only by the
/// `Dequeue` action to report which kind of change event was delivered —
/// every other action reports its outcome with
/// `Okay`/`NotFound`/`Error`/`InvalidArgument`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    Okay = 0,
    NotFound = 1,
    Error = 2,
    InvalidArgument = 3,
    Deleted = 4,
    Modified = 5,
}

/// The header block carried by every frame: `action | object_id |
/// alternate_object_id | status_code | new_object_id`.
///
/// Requests set `action`, `object_id`, and optionally `alternate_object_id`;
/// `status_code` and `new_object_id` are response-only fields left at their
/// defaults on a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Client-chosen correlation id; responses echo it verbatim.
    pub correlation_id: u64,
    pub action: Action,
    pub object_id: Option<String>,
    pub alternate_object_id: Option<String>,
    pub status_code: Option<StatusCode>,
    pub new_object_id: Option<String>,
}

impl FrameHeader {
    pub fn request(correlation_id: u64, action: Action, object_id: impl Into<String>) -> Self {
        Self {
            correlation_id,
            action,
            object_id: Some(object_id.into()),
            alternate_object_id: None,
            status_code: None,
            new_object_id: None,
        }
    }

    pub fn response(correlation_id: u64, action: Action, status: StatusCode) -> Self {
        Self {
            correlation_id,
            action,
            object_id: None,
            alternate_object_id: None,
            status_code: Some(status),
            new_object_id: None,
        }
    }

    /// Encode `[u32 BE header_len][header][body]` into a single message.
    pub fn encode(&self, body: &[u8]) -> Result<Vec<u8>, WireError> {
        let header_bytes = bincode::serialize(self).map_err(|_| WireError::Encode)?;
        let mut out = Vec::with_capacity(4 + header_bytes.len() + body.len());
        out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(body);
        Ok(out)
    }

    /// Decode a message, enforcing `max_message_size` on the combined size.
    pub fn decode(message: &[u8], max_message_size: u32) -> Result<(Self, &[u8]), WireError> {
        if message.len() > max_message_size as usize {
            return Err(WireError::TooLarge);
        }
        if message.len() < 4 {
            return Err(WireError::Truncated);
        }
        let header_len = u32::from_be_bytes(message[..4].try_into().unwrap()) as usize;
        if 4 + header_len > message.len() {
            return Err(WireError::Truncated);
        }
        let header: FrameHeader =
            bincode::deserialize(&message[4..4 + header_len]).map_err(|_| WireError::Decode)?;
        Ok((header, &message[4 + header_len..]))
    }
}

/// A signed, self-describing cluster membership token. Carried both as
/// the self-advertisement returned from `well_known_path` and as elements
/// of the `peers` array returned from `discovery_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAdvertisement {
    /// Node id, used as the membership-collection key (case-insensitive).
    pub iss: String,
    /// Absolute connect endpoint.
    pub url: String,
    /// Absolute discovery endpoint; empty string if this node serves none.
    #[serde(default)]
    pub dis: String,
    /// Issue time, Unix seconds.
    pub iat: u64,
    pub nonce: String,
}

/// JWT payload presented by the client on upgrade step 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeClaims {
    pub chl: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

/// JWT payload returned by the server in the upgrade negotiation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationClaims {
    pub chl: String,
    pub recv_buf_size: u32,
    pub header_buf_size: u32,
    pub max_message_size: u32,
    pub iss: String,
}

/// JWT payload returned from `discovery_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResponseClaims {
    pub iat: u64,
    pub nonce: String,
    pub peers: Vec<PeerAdvertisement>,
}

/// JWT payload sent as the body of a `discovery_path` POST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRequestClaims {
    pub iat: u64,
    pub nonce: String,
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown wire action byte: {0}")]
    UnknownAction(u8),
    #[error("failed to encode frame")]
    Encode,
    #[error("failed to decode frame")]
    Decode,
    #[error("message exceeds negotiated max_message_size")]
    TooLarge,
    #[error("message truncated before header could be read")]
    Truncated,
}
