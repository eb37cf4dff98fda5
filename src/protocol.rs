//! Wire protocol between daemons and the hub.
//!
//! One JSON object per WebSocket binary frame. Every message is
//! self-describing: a receiver that does not recognize the action tag
//! logs and ignores the frame rather than failing the connection.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Wire protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not a valid wire message
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Action-dependent payload did not decode
    #[error("bad action data: {0}")]
    BadActionData(String),

    /// A different action was required at this point of the exchange
    #[error("unexpected action: {0}")]
    UnexpectedAction(Action),
}

/// Action tag carried by every wire message.
///
/// The set is closed; tags introduced by newer peers decode as
/// [`Action::Unknown`] so old hubs and daemons can skip them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// No-op placeholder
    #[serde(rename = "none")]
    None,

    /// Handshake: daemon requests registration under an identity
    #[serde(rename = "register")]
    Register,

    /// Handshake: hub confirms registration and final identity
    #[serde(rename = "ready")]
    Ready,

    /// Hub notifies daemons that the universal clipboard changed
    #[serde(rename = "cbchanged")]
    ClipboardChanged,

    /// Daemon pushes a new clipboard value to the hub
    #[serde(rename = "cbput")]
    ClipboardPut,

    /// Daemon asks for the live daemon listing
    #[serde(rename = "lsdaemonreq")]
    ListDaemonsRequest,

    /// Hub's private reply to a listing request
    #[serde(rename = "lsdaemonsres")]
    ListDaemonsResponse,

    /// Either side announces it is closing the connection
    #[serde(rename = "terminate")]
    Terminate,

    /// Unrecognized tag from a newer peer
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Action::None => "none",
            Action::Register => "register",
            Action::Ready => "ready",
            Action::ClipboardChanged => "cbchanged",
            Action::ClipboardPut => "cbput",
            Action::ListDaemonsRequest => "lsdaemonreq",
            Action::ListDaemonsResponse => "lsdaemonsres",
            Action::Terminate => "terminate",
            Action::Unknown => "unknown",
        };
        write!(f, "{tag}")
    }
}

/// The only unit of exchange between a daemon and the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Action tag for dispatch
    pub action: Action,

    /// Logical identity of the message origin, empty for hub-only
    /// control messages
    #[serde(default)]
    pub user_id: String,

    /// Human-readable diagnostic, never used for control flow
    #[serde(default, rename = "msg")]
    pub message: String,

    /// Action-dependent payload, base64 on the wire
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl WireMessage {
    /// Handshake request carrying the requested identity.
    pub fn register(user_id: impl Into<String>) -> Self {
        Self {
            action: Action::Register,
            user_id: user_id.into(),
            message: String::new(),
            data: Vec::new(),
        }
    }

    /// Handshake confirmation carrying the final identity.
    pub fn ready(user_id: impl Into<String>) -> Self {
        Self {
            action: Action::Ready,
            user_id: user_id.into(),
            message: String::new(),
            data: Vec::new(),
        }
    }

    /// Close announcement with a diagnostic reason.
    pub fn terminate(user_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Terminate,
            user_id: user_id.into(),
            message: reason.into(),
            data: Vec::new(),
        }
    }

    /// Clipboard push from a daemon.
    pub fn clipboard_put(user_id: impl Into<String>, value: &ClipboardValue) -> Self {
        Self {
            action: Action::ClipboardPut,
            user_id: user_id.into(),
            message: String::new(),
            data: value.encode(),
        }
    }

    /// Change notification fanned out by the hub.
    pub fn clipboard_changed(origin_id: impl Into<String>, value: &ClipboardValue) -> Self {
        Self {
            action: Action::ClipboardChanged,
            user_id: origin_id.into(),
            message: "universal clipboard has changes".to_string(),
            data: value.encode(),
        }
    }

    /// Daemon listing request.
    pub fn list_daemons_request(user_id: impl Into<String>) -> Self {
        Self {
            action: Action::ListDaemonsRequest,
            user_id: user_id.into(),
            message: String::new(),
            data: Vec::new(),
        }
    }

    /// Private reply to a listing request; `table` is the
    /// tab-separated text table.
    pub fn list_daemons_response(table: String) -> Self {
        Self {
            action: Action::ListDaemonsResponse,
            user_id: String::new(),
            message: String::new(),
            data: table.into_bytes(),
        }
    }

    /// Encode to one wire frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode one wire frame. Never panics on malformed input.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(frame)?)
    }
}

/// Clipboard content kind shared across the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClipboardKind {
    /// UTF-8 plain text
    #[serde(rename = "text")]
    Text,

    /// PNG-encoded image bytes
    #[serde(rename = "image/png")]
    ImagePng,
}

impl fmt::Display for ClipboardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipboardKind::Text => write!(f, "text"),
            ClipboardKind::ImagePng => write!(f, "image/png"),
        }
    }
}

/// Clipboard value payload carried inside `cbput`/`cbchanged` frames.
///
/// `data` is the UTF-8 text itself for [`ClipboardKind::Text`] and
/// base64-encoded bytes for [`ClipboardKind::ImagePng`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardValue {
    /// Content kind
    #[serde(rename = "type")]
    pub kind: ClipboardKind,

    /// Kind-dependent string encoding of the payload
    pub data: String,
}

impl ClipboardValue {
    /// Build a payload from raw clipboard bytes.
    pub fn from_bytes(kind: ClipboardKind, raw: &[u8]) -> Self {
        let data = match kind {
            ClipboardKind::Text => String::from_utf8_lossy(raw).into_owned(),
            ClipboardKind::ImagePng => BASE64.encode(raw),
        };
        Self { kind, data }
    }

    /// Recover the raw clipboard bytes.
    ///
    /// A payload that fails base64 decoding degrades to an empty value
    /// instead of an error; the slot dedup then makes it a no-op.
    pub fn into_bytes(self) -> (ClipboardKind, Vec<u8>) {
        let raw = match self.kind {
            ClipboardKind::Text => self.data.into_bytes(),
            ClipboardKind::ImagePng => BASE64.decode(self.data.as_bytes()).unwrap_or_default(),
        };
        (self.kind, raw)
    }

    /// Serialize for embedding into a wire message `data` field.
    pub fn encode(&self) -> Vec<u8> {
        // Struct-to-JSON of two plain fields cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse from a wire message `data` field.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(data).map_err(|e| ProtocolError::BadActionData(e.to_string()))
    }
}

/// Serde adapter encoding `Vec<u8>` as a base64 JSON string, matching
/// the wire format's byte-field convention. Absent and null fields
/// decode to an empty payload.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let field: Option<String> = Option::deserialize(de)?;
        match field {
            Some(s) => BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
