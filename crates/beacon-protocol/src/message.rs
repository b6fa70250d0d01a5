//! Wire message types for the Beacon protocol.
//!
//! Every message is a single JSON object sent as one WebSocket text frame.
//! The `type` field discriminates the variant.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::codec::ProtocolError;

/// Greeting text carried by the `connected` message.
pub const CONNECTED_GREETING: &str = "Connected to Beacon server";

/// Text carried by the `server-shutdown` message.
pub const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

/// A protocol message.
///
/// Unknown `type` values decode to [`WireMessage::Unknown`] so that newer peers
/// can introduce message kinds without breaking older ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Server greeting sent right after a connection is accepted.
    #[serde(rename = "connected")]
    Connected {
        /// Identifier the server assigned to this connection.
        #[serde(rename = "clientId")]
        client_id: String,
        /// Human-readable greeting.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Identity announcement from a subscriber.
    #[serde(rename = "auth")]
    Auth {
        /// Identity used for targeted delivery.
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// Liveness check.
    #[serde(rename = "ping")]
    Ping,

    /// Liveness reply.
    #[serde(rename = "pong")]
    Pong,

    /// A notification for display.
    #[serde(rename = "notification")]
    Notification {
        /// Notification payload.
        data: NotificationData,
    },

    /// Best-effort final frame before the server goes away.
    #[serde(rename = "server-shutdown")]
    ServerShutdown {
        /// Human-readable reason.
        #[serde(default)]
        message: String,
    },

    /// Any message kind this build does not know about.
    #[serde(other)]
    Unknown,
}

impl WireMessage {
    /// Get the wire name of this message kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Connected { .. } => "connected",
            WireMessage::Auth { .. } => "auth",
            WireMessage::Ping => "ping",
            WireMessage::Pong => "pong",
            WireMessage::Notification { .. } => "notification",
            WireMessage::ServerShutdown { .. } => "server-shutdown",
            WireMessage::Unknown => "unknown",
        }
    }

    /// Create a `connected` greeting.
    #[must_use]
    pub fn connected(client_id: impl Into<String>) -> Self {
        WireMessage::Connected {
            client_id: client_id.into(),
            message: Some(CONNECTED_GREETING.to_string()),
        }
    }

    /// Create an `auth` announcement.
    #[must_use]
    pub fn auth(user_id: impl Into<String>) -> Self {
        WireMessage::Auth {
            user_id: user_id.into(),
        }
    }

    /// Create a `notification` message.
    #[must_use]
    pub fn notification(data: NotificationData) -> Self {
        WireMessage::Notification { data }
    }

    /// Create a `server-shutdown` message with the default text.
    #[must_use]
    pub fn server_shutdown() -> Self {
        WireMessage::ServerShutdown {
            message: SHUTDOWN_MESSAGE.to_string(),
        }
    }
}

/// Payload of a `notification` message.
///
/// Media travels inline: the bytes are base64-encoded into `mediaData` next to
/// their MIME type and original filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Display name of the publisher.
    pub sender: String,
    /// Text body, empty when the notification is media only.
    #[serde(default)]
    pub message: String,
    /// Display duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// MIME type of the attached media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Original filename of the attached media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_filename: Option<String>,
    /// Base64-encoded media bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_data: Option<String>,
}

impl NotificationData {
    /// Create a text payload.
    #[must_use]
    pub fn new(sender: impl Into<String>, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            sender: sender.into(),
            message: message.into(),
            duration: Some(duration_ms),
            media_type: None,
            media_filename: None,
            media_data: None,
        }
    }

    /// Attach media, encoding the bytes as base64.
    #[must_use]
    pub fn with_media(
        mut self,
        media_type: impl Into<String>,
        filename: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        self.media_type = Some(media_type.into());
        self.media_filename = Some(filename.into());
        self.media_data = Some(BASE64.encode(bytes));
        self
    }

    /// Check whether the payload carries media.
    #[must_use]
    pub fn has_media(&self) -> bool {
        self.media_data.is_some()
    }

    /// Decode the attached media bytes.
    ///
    /// Returns `Ok(None)` when no media is attached.
    ///
    /// # Errors
    ///
    /// Returns an error if `mediaData` is not valid base64.
    pub fn media_bytes(&self) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.media_data
            .as_deref()
            .map(|data| BASE64.decode(data))
            .transpose()
            .map_err(ProtocolError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_kind() {
        assert_eq!(WireMessage::Ping.kind(), "ping");
        assert_eq!(WireMessage::server_shutdown().kind(), "server-shutdown");
        assert_eq!(WireMessage::auth("alice").kind(), "auth");
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(WireMessage::connected("42")).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["clientId"], "42");

        let value = serde_json::to_value(WireMessage::auth("alice")).unwrap();
        assert_eq!(value, json!({"type": "auth", "userId": "alice"}));

        let value = serde_json::to_value(WireMessage::Ping).unwrap();
        assert_eq!(value, json!({"type": "ping"}));
    }

    #[test]
    fn test_notification_field_names() {
        let data = NotificationData::new("bob", "hi", 5000).with_media("image/png", "f.png", b"\x89PNG");
        let value = serde_json::to_value(WireMessage::notification(data)).unwrap();

        assert_eq!(value["type"], "notification");
        assert_eq!(value["data"]["sender"], "bob");
        assert_eq!(value["data"]["duration"], 5000);
        assert_eq!(value["data"]["mediaType"], "image/png");
        assert_eq!(value["data"]["mediaFilename"], "f.png");
        assert!(value["data"]["mediaData"].is_string());
    }

    #[test]
    fn test_text_only_omits_media_fields() {
        let value = serde_json::to_value(NotificationData::new("bob", "hi", 5000)).unwrap();
        assert!(value.get("mediaType").is_none());
        assert!(value.get("mediaData").is_none());
    }

    #[test]
    fn test_unknown_type_decodes_to_fallback() {
        let msg: WireMessage = serde_json::from_str(r#"{"type":"typing","who":"x"}"#).unwrap();
        assert_eq!(msg, WireMessage::Unknown);
    }

    #[test]
    fn test_media_bytes_invalid_base64() {
        let mut data = NotificationData::new("bob", "", 1000);
        data.media_data = Some("not base64!".to_string());
        assert!(data.media_bytes().is_err());
    }

    #[test]
    fn test_media_bytes_absent() {
        let data = NotificationData::new("bob", "hi", 1000);
        assert_eq!(data.media_bytes().unwrap(), None);
    }
}
