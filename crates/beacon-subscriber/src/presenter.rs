//! Presentation of received notifications.

use async_trait::async_trait;
use beacon_core::Notification;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

/// Renders delivered notifications.
///
/// Called once per received `notification` frame, in arrival order, from a
/// task separate from the socket read loop.
#[async_trait]
pub trait Presenter: Send + Sync + 'static {
    /// Show one notification.
    async fn on_notification(&self, notification: Notification);
}

/// Presenter that writes notifications to the log and hides them after
/// their display duration.
///
/// A new notification replaces the one on screen, cancelling its hide timer.
#[derive(Debug, Default)]
pub struct LogPresenter {
    hide: Mutex<Option<JoinHandle<()>>>,
}

impl LogPresenter {
    /// Create a presenter with nothing on screen.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a notification is currently shown.
    pub async fn is_showing(&self) -> bool {
        self.hide
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

#[async_trait]
impl Presenter for LogPresenter {
    async fn on_notification(&self, notification: Notification) {
        let media = notification
            .media()
            .map(|m| format!("{} ({}, {} bytes)", m.filename, m.mime_type, m.bytes.len()));

        info!(
            sender = %notification.sender(),
            text = %notification.text(),
            media = ?media,
            duration = ?notification.duration(),
            "Notification"
        );

        let duration = notification.duration();
        let sender = notification.sender().to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            info!(sender = %sender, "Notification hidden");
        });

        if let Some(previous) = self.hide.lock().await.replace(task) {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_protocol::NotificationData;
    use std::time::Duration;

    fn notification(duration_ms: u64) -> Notification {
        let data = NotificationData::new("bob", "hello", duration_ms);
        Notification::from_wire(&data, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_hides_after_duration() {
        let presenter = LogPresenter::new();
        presenter.on_notification(notification(3_000)).await;
        assert!(presenter.is_showing().await);

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert!(presenter.is_showing().await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!presenter.is_showing().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_notification_restarts_timer() {
        let presenter = LogPresenter::new();
        presenter.on_notification(notification(2_000)).await;

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        presenter.on_notification(notification(2_000)).await;

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(presenter.is_showing().await);
    }
}
