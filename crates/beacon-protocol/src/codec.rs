//! Codec for encoding and decoding Beacon wire messages.
//!
//! Messages are JSON text, one message per WebSocket frame. There is no
//! length prefix and no multi-frame reassembly.

use serde::Deserialize;
use thiserror::Error;

use crate::message::WireMessage;

/// Maximum frame size (16 MiB). Inline media dominates frame size.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame that is not UTF-8.
    #[error("Frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Inline media that is not valid base64.
    #[error("Invalid media encoding: {0}")]
    Media(#[from] base64::DecodeError),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode a message to a JSON text frame.
///
/// # Errors
///
/// Returns an error if the message is [`WireMessage::Unknown`], if encoding
/// fails, or if the frame is too large.
pub fn encode(message: &WireMessage) -> Result<String, ProtocolError> {
    if matches!(message, WireMessage::Unknown) {
        return Err(ProtocolError::Invalid(
            "cannot encode an unknown message kind".into(),
        ));
    }

    let text = serde_json::to_string(message)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a message from a JSON text frame.
///
/// Unknown `type` values decode to [`WireMessage::Unknown`] rather than failing.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a valid message.
pub fn decode(text: &str) -> Result<WireMessage, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(serde_json::from_str(text)?)
}

/// Decode a message from a binary frame holding UTF-8 JSON.
///
/// # Errors
///
/// Returns an error if the bytes are not UTF-8 or not a valid message.
pub fn decode_bytes(data: &[u8]) -> Result<WireMessage, ProtocolError> {
    decode(std::str::from_utf8(data)?)
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type")]
    kind: String,
}

/// Peek at the raw `type` field of a frame.
///
/// Used for diagnostics when a frame decodes to [`WireMessage::Unknown`].
#[must_use]
pub fn message_type(text: &str) -> Option<String> {
    serde_json::from_str::<TypeTag>(text).ok().map(|t| t.kind)
}
