//! Server-side WebSocket sink for connections accepted through axum.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::traits::{FrameSink, TransportError};

/// Sending half of an accepted axum WebSocket.
///
/// The read half stays with the connection's handler task; this half is
/// shared with the registry so that broadcasts and heartbeats can reach it.
pub struct WebSocketSink {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    is_open: AtomicBool,
    close_started: AtomicBool,
}

impl WebSocketSink {
    /// Wrap the sending half of a split WebSocket.
    #[must_use]
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            is_open: AtomicBool::new(true),
            close_started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Text(text.to_owned())).await {
            self.is_open.store(false, Ordering::SeqCst);
            return Err(TransportError::SendFailed(e.to_string()));
        }
        Ok(())
    }

    // A sink marked closed by a failed or abandoned send still gets its
    // close handshake here.
    async fn close(&self) -> Result<(), TransportError> {
        self.is_open.store(false, Ordering::SeqCst);
        if self.close_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(error = %e, "Close frame not delivered");
        }
        sink.close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }

    fn mark_closed(&self) {
        self.is_open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}
