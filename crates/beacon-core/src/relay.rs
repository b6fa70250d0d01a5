//! Relay endpoint.
//!
//! The relay owns the registry and drives the per-connection lifecycle:
//! accept (register and greet), inbound control frames (`auth`, `pong`),
//! and close (unregister). It also exposes the publish entry points used by
//! the command front-end, and the shutdown sequence.

use crate::delivery::{close_within, send_within, DeliveryEngine};
use crate::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::notification::{Notification, NotificationPolicy, PublishRequest, ValidationError};
use crate::registry::Registry;
use beacon_protocol::{codec, ProtocolError, WireMessage};
use beacon_transport::{ConnectionId, FrameSink, TransportError};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identity reported for connections that never sent `auth`.
pub const ANONYMOUS: &str = "anonymous";

/// Public view of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Announced identity, or `"anonymous"`.
    pub user_id: String,
    /// Accept time in milliseconds since the Unix epoch.
    pub connected_at: u64,
    /// Remote address, if known.
    pub ip: Option<String>,
}

/// The accepting side of the relay.
pub struct Relay {
    registry: Arc<Registry>,
    delivery: DeliveryEngine,
    policy: NotificationPolicy,
    accepting: AtomicBool,
}

impl Relay {
    /// Create a relay with an empty registry.
    #[must_use]
    pub fn new(policy: NotificationPolicy) -> Self {
        let registry = Arc::new(Registry::new());
        info!(
            default_duration = ?policy.default_duration,
            max_duration = ?policy.max_duration,
            "Creating relay"
        );
        Self {
            delivery: DeliveryEngine::new(Arc::clone(&registry)),
            registry,
            policy,
            accepting: AtomicBool::new(true),
        }
    }

    /// Bound every send and close to `send_timeout`.
    #[must_use]
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.delivery = self.delivery.with_send_timeout(send_timeout);
        self
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The delivery engine.
    #[must_use]
    pub fn delivery(&self) -> &DeliveryEngine {
        &self.delivery
    }

    /// The publish bounds.
    #[must_use]
    pub fn policy(&self) -> &NotificationPolicy {
        &self.policy
    }

    /// Build a heartbeat monitor over this relay's registry.
    #[must_use]
    pub fn heartbeat(&self, config: HeartbeatConfig) -> HeartbeatMonitor {
        HeartbeatMonitor::new(Arc::clone(&self.registry), config)
    }

    /// Check if new connections are still accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Register a newly accepted connection and greet it with its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay is shutting down or the greeting cannot
    /// be sent; the connection is not left registered in either case.
    pub async fn accept(
        &self,
        sink: Arc<dyn FrameSink>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<ConnectionId, TransportError> {
        if !self.is_accepting() {
            self.refuse(sink.as_ref(), None).await;
            return Err(TransportError::ConnectionClosed);
        }

        let id = self.registry.register(Arc::clone(&sink), remote_addr);

        // Shutdown may have taken its snapshot between the check and the insert.
        if !self.is_accepting() {
            self.registry.unregister(id);
            self.refuse(sink.as_ref(), Some(id)).await;
            return Err(TransportError::ConnectionClosed);
        }
        info!(connection = %id, remote = ?remote_addr, "New connection");

        let greeted = match codec::encode(&WireMessage::connected(id.to_string())) {
            Ok(text) => send_within(sink.as_ref(), &text, self.delivery.send_timeout()).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = greeted {
            warn!(connection = %id, error = %e, "Failed to send greeting");
            self.registry.unregister(id);
            return Err(e);
        }

        Ok(id)
    }

    async fn refuse(&self, sink: &dyn FrameSink, id: Option<ConnectionId>) {
        debug!(connection = ?id, "Refusing connection, relay is shutting down");
        if let Err(e) = close_within(sink, self.delivery.send_timeout()).await {
            debug!(connection = ?id, error = %e, "Close of refused connection failed");
        }
    }

    /// Handle one inbound text frame.
    ///
    /// Malformed frames are logged and dropped; the connection stays open.
    pub fn handle_text(&self, id: ConnectionId, text: &str) {
        match codec::decode(text) {
            Ok(WireMessage::Unknown) => {
                let kind = codec::message_type(text);
                info!(connection = %id, kind = ?kind, "Unhandled message type");
            }
            Ok(message) => self.handle_message(id, message),
            Err(e) => self.log_protocol_error(id, &e),
        }
    }

    /// Handle one inbound binary frame carrying UTF-8 JSON.
    pub fn handle_binary(&self, id: ConnectionId, data: &[u8]) {
        match std::str::from_utf8(data) {
            Ok(text) => self.handle_text(id, text),
            Err(e) => self.log_protocol_error(id, &ProtocolError::from(e)),
        }
    }

    fn log_protocol_error(&self, id: ConnectionId, error: &ProtocolError) {
        warn!(connection = %id, error = %error, "Dropping malformed frame");
    }

    /// Apply a decoded inbound message.
    pub fn handle_message(&self, id: ConnectionId, message: WireMessage) {
        match message {
            WireMessage::Auth { user_id } => {
                if self.registry.set_identity(id, user_id.as_str()) {
                    info!(connection = %id, identity = %user_id, "Client authenticated");
                }
            }
            WireMessage::Pong => {
                self.registry.mark_alive(id);
            }
            WireMessage::Unknown => {
                info!(connection = %id, "Unhandled message type");
            }
            WireMessage::Connected { .. }
            | WireMessage::Ping
            | WireMessage::Notification { .. }
            | WireMessage::ServerShutdown { .. } => {
                warn!(connection = %id, kind = message.kind(), "Unexpected message from client");
            }
        }
    }

    /// Forget a connection whose socket closed. Idempotent.
    pub fn disconnect(&self, id: ConnectionId) {
        if let Some(conn) = self.registry.unregister(id) {
            info!(
                connection = %id,
                identity = conn.identity.as_deref().unwrap_or(ANONYMOUS),
                "Disconnected"
            );
        }
    }

    fn encode(&self, notification: &Notification) -> Result<String, ValidationError> {
        codec::encode(&notification.to_wire()).map_err(|e| match e {
            ProtocolError::FrameTooLarge(size) => ValidationError::FrameTooLarge(size),
            other => ValidationError::Unencodable(other.to_string()),
        })
    }

    /// Validate and broadcast a notification to every open connection.
    ///
    /// Returns the number of connections that received it. Zero means there
    /// were no subscribers, which is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] without sending anything if the request
    /// breaks a publish rule.
    pub async fn publish(&self, request: PublishRequest) -> Result<usize, ValidationError> {
        let notification = Notification::build(request, &self.policy)?;
        let text = self.encode(&notification)?;

        let delivered = self.delivery.broadcast_text(&text).await;
        info!(
            sender = %notification.sender(),
            has_media = notification.media().is_some(),
            duration = ?notification.duration(),
            recipients = delivered,
            "Published notification"
        );
        Ok(delivered)
    }

    /// Validate and send a notification to the first connection with `identity`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] without sending anything if the request
    /// breaks a publish rule.
    pub async fn publish_to(
        &self,
        identity: &str,
        request: PublishRequest,
    ) -> Result<bool, ValidationError> {
        let notification = Notification::build(request, &self.policy)?;
        let text = self.encode(&notification)?;

        let delivered = self.delivery.send_text_to_identity(identity, &text).await;
        info!(
            sender = %notification.sender(),
            identity = %identity,
            delivered,
            "Published targeted notification"
        );
        Ok(delivered)
    }

    /// Summarise every registered connection.
    #[must_use]
    pub fn connected_summary(&self) -> Vec<ClientSummary> {
        let mut clients: Vec<ClientSummary> = self
            .registry
            .all()
            .into_iter()
            .map(|conn| ClientSummary {
                id: conn.id,
                user_id: conn.identity.unwrap_or_else(|| ANONYMOUS.to_string()),
                connected_at: conn.connected_at,
                ip: conn.remote_addr.map(|addr| addr.ip().to_string()),
            })
            .collect();
        clients.sort_by_key(|c| c.id);
        clients
    }

    /// Announce shutdown, close every connection and refuse new ones.
    ///
    /// Returns how many connections received the `server-shutdown` frame.
    pub async fn shutdown(&self) -> usize {
        self.accepting.store(false, Ordering::SeqCst);

        let notified = match self.delivery.broadcast(&WireMessage::server_shutdown()).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to encode shutdown message");
                0
            }
        };

        for conn in self.registry.all() {
            if let Err(e) = close_within(conn.sink().as_ref(), self.delivery.send_timeout()).await {
                debug!(connection = %conn.id, error = %e, "Close during shutdown failed");
            }
            self.registry.unregister(conn.id);
        }

        info!(notified, "Relay shut down");
        notified
    }
}
