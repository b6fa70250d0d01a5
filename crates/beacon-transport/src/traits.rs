//! Transport abstraction traits for Beacon.
//!
//! The relay never touches sockets directly. Every accepted connection is
//! represented by a [`FrameSink`], which lets the core deliver frames without
//! knowing which WebSocket implementation sits underneath.

use async_trait::async_trait;
use beacon_protocol::{codec, WireMessage};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Counter backing [`ConnectionId::next`]. Starts at 1 so that 0 never appears.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
///
/// Identifiers are drawn from a process-wide counter, so they are strictly
/// increasing in accept order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// Clients see the id as an opaque string.
impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection attempt timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Outbound connection attempt failed.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// A send did not complete in time. The peer is not reading.
    #[error("Send timed out")]
    SendTimeout,

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] beacon_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The sending half of one accepted connection.
///
/// Implementations must be safe to call from several tasks at once: the
/// delivery engine, the heartbeat sweep and the connection's own read loop
/// can all send concurrently. Frames sent from one task arrive in order.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one pre-encoded text frame.
    ///
    /// A failed send marks the sink closed.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Encode and send a message.
    async fn send(&self, message: &WireMessage) -> Result<(), TransportError> {
        let text = codec::encode(message)?;
        self.send_text(&text).await
    }

    /// Close the connection gracefully. Closing twice is not an error.
    async fn close(&self) -> Result<(), TransportError>;

    /// Mark the sink closed without touching the socket.
    ///
    /// Used when a send was abandoned; later sends fail fast and the
    /// heartbeat sweep evicts the connection.
    fn mark_closed(&self);

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_increase() {
        let id1 = ConnectionId::next();
        let id2 = ConnectionId::next();
        assert!(id2 > id1);
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_connection_id_serializes_as_string() {
        let id = ConnectionId::from(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");
        assert_eq!(id.to_string(), "42");
    }
}
