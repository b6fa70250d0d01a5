//! Delivery engine: broadcast and targeted send.
//!
//! A message is encoded once and the same text frame goes to every target.
//! Sends run concurrently; a failure on one connection is logged and does
//! not affect the others. Every send is bounded by a timeout, so a peer
//! that stops reading cannot hold up a fan-out.

use crate::registry::{Connection, Registry};
use beacon_protocol::{codec, ProtocolError, WireMessage};
use beacon_transport::{FrameSink, TransportError};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default time a single send may take before the peer is given up on.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Fans messages out to registered connections.
#[derive(Clone)]
pub struct DeliveryEngine {
    registry: Arc<Registry>,
    send_timeout: Duration,
}

impl DeliveryEngine {
    /// Create an engine reading from `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Set the per-connection send timeout.
    #[must_use]
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// The per-connection send timeout.
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Encode `message` and send it to every open connection.
    ///
    /// Returns the number of successful sends.
    ///
    /// # Errors
    ///
    /// Returns an error only if the message cannot be encoded, in which case
    /// nothing is sent.
    pub async fn broadcast(&self, message: &WireMessage) -> Result<usize, ProtocolError> {
        let text = codec::encode(message)?;
        Ok(self.broadcast_text(&text).await)
    }

    /// Send a pre-encoded frame to every open connection.
    ///
    /// Walks the whole registry snapshot before returning. Connections whose
    /// socket is closed are skipped and left for the heartbeat sweep to evict.
    pub async fn broadcast_text(&self, text: &str) -> usize {
        let targets: Vec<Connection> = self
            .registry
            .all()
            .into_iter()
            .filter(Connection::is_open)
            .collect();

        let results = join_all(
            targets
                .iter()
                .map(|conn| deliver(conn, text, self.send_timeout)),
        )
        .await;
        let delivered = results.into_iter().filter(|ok| *ok).count();

        debug!(targets = targets.len(), delivered, "Broadcast complete");
        delivered
    }

    /// Encode `message` and send it to the first connection with `identity`.
    ///
    /// Returns `true` only if a send was attempted and succeeded. Other
    /// connections sharing the identity receive nothing.
    ///
    /// # Errors
    ///
    /// Returns an error only if the message cannot be encoded.
    pub async fn send_to_identity(
        &self,
        identity: &str,
        message: &WireMessage,
    ) -> Result<bool, ProtocolError> {
        let text = codec::encode(message)?;
        Ok(self.send_text_to_identity(identity, &text).await)
    }

    /// Send a pre-encoded frame to the first connection with `identity`.
    pub async fn send_text_to_identity(&self, identity: &str, text: &str) -> bool {
        match self.registry.find_by_identity(identity) {
            Some(conn) if conn.is_open() => deliver(&conn, text, self.send_timeout).await,
            Some(conn) => {
                debug!(connection = %conn.id, identity = %identity, "Target connection is closed");
                false
            }
            None => {
                debug!(identity = %identity, "No connection with identity");
                false
            }
        }
    }
}

/// Send one frame, giving up after `limit`.
///
/// An abandoned send marks the sink closed so later sends fail fast.
pub(crate) async fn send_within(
    sink: &dyn FrameSink,
    text: &str,
    limit: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(limit, sink.send_text(text)).await {
        Ok(result) => result,
        Err(_) => {
            sink.mark_closed();
            Err(TransportError::SendTimeout)
        }
    }
}

/// Close a sink, giving up on the handshake after `limit`.
pub(crate) async fn close_within(sink: &dyn FrameSink, limit: Duration) -> Result<(), TransportError> {
    match tokio::time::timeout(limit, sink.close()).await {
        Ok(result) => result,
        Err(_) => {
            sink.mark_closed();
            Err(TransportError::SendTimeout)
        }
    }
}

async fn deliver(conn: &Connection, text: &str, limit: Duration) -> bool {
    match send_within(conn.sink().as_ref(), text, limit).await {
        Ok(()) => {
            trace!(connection = %conn.id, bytes = text.len(), "Delivered frame");
            true
        }
        Err(e) => {
            warn!(connection = %conn.id, error = %e, "Delivery failed");
            false
        }
    }
}
