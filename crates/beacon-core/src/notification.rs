//! Notification model and publish-time validation.
//!
//! A [`Notification`] is built once from a [`PublishRequest`] and never
//! modified afterwards. Construction is where every publish rule lives:
//! content presence, media type, media size and the duration bounds.

use beacon_protocol::{NotificationData, ProtocolError, WireMessage};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Display duration used when the publisher does not give one.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(5);

/// Longest display duration a publisher may request.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(30);

/// Shortest display duration a publisher may request.
pub const MIN_DURATION: Duration = Duration::from_secs(1);

/// Maximum size of inline media (8 MiB before base64).
pub const DEFAULT_MAX_MEDIA_BYTES: usize = 8 * 1024 * 1024;

/// MIME type prefixes accepted for inline media.
pub const ALLOWED_MEDIA_PREFIXES: [&str; 2] = ["image/", "video/"];

/// Fallback MIME type when a received notification omits one.
const UNKNOWN_MEDIA_TYPE: &str = "application/octet-stream";

/// Publish request rejected before any delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Neither text nor media was provided.
    #[error("Please provide at least a message or media")]
    Empty,

    /// Sender display name is empty.
    #[error("Sender name cannot be empty")]
    MissingSender,

    /// Media is not an image or a video.
    #[error("Unsupported media type '{0}': please attach an image or video")]
    UnsupportedMediaType(String),

    /// Media exceeds the configured size limit.
    #[error("Media size {size} exceeds maximum {max}")]
    MediaTooLarge {
        /// Size of the attached media in bytes.
        size: usize,
        /// Configured maximum in bytes.
        max: usize,
    },

    /// Encoded notification does not fit in a single frame.
    #[error("Notification is too large to send ({0} bytes)")]
    FrameTooLarge(usize),

    /// Notification could not be encoded for the wire.
    #[error("Notification could not be encoded: {0}")]
    Unencodable(String),
}

/// Bounds applied to every publish request.
#[derive(Debug, Clone)]
pub struct NotificationPolicy {
    /// Duration used when the request has none.
    pub default_duration: Duration,
    /// Upper bound; longer requests are clamped, not rejected.
    pub max_duration: Duration,
    /// Upper bound on inline media size.
    pub max_media_bytes: usize,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            default_duration: DEFAULT_DURATION,
            max_duration: DEFAULT_MAX_DURATION,
            max_media_bytes: DEFAULT_MAX_MEDIA_BYTES,
        }
    }
}

impl NotificationPolicy {
    /// Resolve a requested duration in seconds against the bounds.
    #[must_use]
    pub fn resolve_duration(&self, requested_secs: Option<u64>) -> Duration {
        let max = self.max_duration.max(MIN_DURATION);
        requested_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_duration)
            .clamp(MIN_DURATION, max)
    }
}

/// Inline media attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    /// Raw media bytes.
    pub bytes: Bytes,
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Original filename.
    pub filename: String,
}

impl Media {
    /// Create a media attachment.
    #[must_use]
    pub fn new(
        bytes: impl Into<Bytes>,
        mime_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            filename: filename.into(),
        }
    }

    /// Check whether the MIME type is an image or a video.
    #[must_use]
    pub fn is_displayable(&self) -> bool {
        ALLOWED_MEDIA_PREFIXES
            .iter()
            .any(|prefix| self.mime_type.starts_with(prefix))
    }
}

/// Validated inputs from the command front-end.
#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    /// Publisher display name.
    pub sender: String,
    /// Optional text body.
    pub text: Option<String>,
    /// Optional inline media.
    pub media: Option<Media>,
    /// Requested display duration in seconds.
    pub duration_secs: Option<u64>,
}

impl PublishRequest {
    /// Create an empty request from a sender.
    #[must_use]
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            ..Default::default()
        }
    }

    /// Set the text body.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Attach media.
    #[must_use]
    pub fn with_media(mut self, media: Media) -> Self {
        self.media = Some(media);
        self
    }

    /// Request a display duration.
    #[must_use]
    pub fn with_duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = Some(secs);
        self
    }
}

/// One publish event, ready for fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    sender: String,
    text: String,
    media: Option<Media>,
    duration: Duration,
}

impl Notification {
    /// Validate a request and build the notification.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the sender is empty, if neither text
    /// nor media is present, or if the media is not an acceptable image or
    /// video. An out-of-range duration is clamped rather than rejected.
    pub fn build(
        request: PublishRequest,
        policy: &NotificationPolicy,
    ) -> Result<Self, ValidationError> {
        if request.sender.trim().is_empty() {
            return Err(ValidationError::MissingSender);
        }

        let text = request.text.unwrap_or_default();
        if text.is_empty() && request.media.is_none() {
            return Err(ValidationError::Empty);
        }

        if let Some(media) = &request.media {
            if !media.is_displayable() {
                return Err(ValidationError::UnsupportedMediaType(media.mime_type.clone()));
            }
            if media.bytes.len() > policy.max_media_bytes {
                return Err(ValidationError::MediaTooLarge {
                    size: media.bytes.len(),
                    max: policy.max_media_bytes,
                });
            }
        }

        Ok(Self {
            sender: request.sender,
            text,
            media: request.media,
            duration: policy.resolve_duration(request.duration_secs),
        })
    }

    /// Rebuild a notification received over the wire.
    ///
    /// No publish rules are applied: the relay already enforced them. A missing
    /// or zero duration falls back to `default_duration`.
    ///
    /// # Errors
    ///
    /// Returns an error if the inline media is not valid base64.
    pub fn from_wire(
        data: &NotificationData,
        default_duration: Duration,
    ) -> Result<Self, ProtocolError> {
        let media = data.media_bytes()?.map(|bytes| Media {
            bytes: Bytes::from(bytes),
            mime_type: data
                .media_type
                .clone()
                .unwrap_or_else(|| UNKNOWN_MEDIA_TYPE.to_string()),
            filename: data.media_filename.clone().unwrap_or_default(),
        });

        let duration = data
            .duration
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(default_duration);

        Ok(Self {
            sender: data.sender.clone(),
            text: data.message.clone(),
            media,
            duration,
        })
    }

    /// Publisher display name.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Text body, empty for media-only notifications.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Attached media, if any.
    #[must_use]
    pub fn media(&self) -> Option<&Media> {
        self.media.as_ref()
    }

    /// Display duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Convert to the wire payload.
    #[must_use]
    pub fn to_data(&self) -> NotificationData {
        let data = NotificationData::new(
            self.sender.clone(),
            self.text.clone(),
            self.duration.as_millis() as u64,
        );
        match &self.media {
            Some(media) => data.with_media(media.mime_type.clone(), media.filename.clone(), &media.bytes),
            None => data,
        }
    }

    /// Wrap in a `notification` wire message.
    #[must_use]
    pub fn to_wire(&self) -> WireMessage {
        WireMessage::notification(self.to_data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(bytes: &'static [u8]) -> Media {
        Media::new(bytes, "image/png", "f.png")
    }

    #[test]
    fn test_rejects_empty_notification() {
        let policy = NotificationPolicy::default();

        assert_eq!(
            Notification::build(PublishRequest::new("bob"), &policy),
            Err(ValidationError::Empty)
        );
        assert_eq!(
            Notification::build(PublishRequest::new("bob").with_text(""), &policy),
            Err(ValidationError::Empty)
        );
    }

    #[test]
    fn test_rejects_missing_sender() {
        let policy = NotificationPolicy::default();
        assert_eq!(
            Notification::build(PublishRequest::new("  ").with_text("hi"), &policy),
            Err(ValidationError::MissingSender)
        );
    }

    #[test]
    fn test_media_only_is_accepted() {
        let policy = NotificationPolicy::default();
        let notification =
            Notification::build(PublishRequest::new("bob").with_media(png(b"img")), &policy).unwrap();

        assert_eq!(notification.text(), "");
        assert_eq!(notification.media().unwrap().filename, "f.png");
    }

    #[test]
    fn test_rejects_non_displayable_media() {
        let policy = NotificationPolicy::default();
        let request = PublishRequest::new("bob").with_media(Media::new(&b"%PDF"[..], "application/pdf", "a.pdf"));

        assert_eq!(
            Notification::build(request, &policy),
            Err(ValidationError::UnsupportedMediaType("application/pdf".into()))
        );
    }

    #[test]
    fn test_rejects_oversized_media() {
        let policy = NotificationPolicy {
            max_media_bytes: 2,
            ..Default::default()
        };
        let request = PublishRequest::new("bob").with_media(png(b"abc"));

        assert_eq!(
            Notification::build(request, &policy),
            Err(ValidationError::MediaTooLarge { size: 3, max: 2 })
        );
    }

    #[test]
    fn test_duration_defaults_and_clamps() {
        let policy = NotificationPolicy::default();
        let build = |secs: Option<u64>| {
            let mut request = PublishRequest::new("bob").with_text("hi");
            request.duration_secs = secs;
            Notification::build(request, &policy).unwrap().duration()
        };

        assert_eq!(build(None), Duration::from_secs(5));
        assert_eq!(build(Some(12)), Duration::from_secs(12));
        assert_eq!(build(Some(45)), Duration::from_secs(30));
        assert_eq!(build(Some(0)), Duration::from_secs(1));
    }

    #[test]
    fn test_wire_duration_in_milliseconds() {
        let policy = NotificationPolicy::default();
        let notification = Notification::build(
            PublishRequest::new("bob").with_text("hi").with_duration_secs(7),
            &policy,
        )
        .unwrap();

        assert_eq!(notification.to_data().duration, Some(7000));
    }

    #[test]
    fn test_from_wire_restores_media_bytes() {
        let bytes: &'static [u8] = &[0, 1, 2, 254, 255];
        let policy = NotificationPolicy::default();
        let sent = Notification::build(
            PublishRequest::new("bob").with_media(png(bytes)),
            &policy,
        )
        .unwrap();

        let received = Notification::from_wire(&sent.to_data(), DEFAULT_DURATION).unwrap();
        assert_eq!(received, sent);
        assert_eq!(&received.media().unwrap().bytes[..], bytes);
    }

    #[test]
    fn test_from_wire_uses_local_default_duration() {
        let mut data = NotificationData::new("bob", "hi", 0);
        data.duration = None;

        let received = Notification::from_wire(&data, Duration::from_secs(9)).unwrap();
        assert_eq!(received.duration(), Duration::from_secs(9));
    }
}
