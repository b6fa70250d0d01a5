//! Connection registry.
//!
//! The registry is the only shared mutable state in the relay. It is a
//! sharded concurrent map; every operation locks a single shard for the
//! duration of the map access and never across socket I/O. Readers get
//! owned snapshots they can iterate while the map keeps changing.

use beacon_transport::{ConnectionId, FrameSink};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Liveness of a connection as seen by the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Liveness {
    /// Replied to the last ping, or has not been pinged yet.
    Alive,
    /// Pinged and no `pong` seen since.
    AwaitingReply,
    /// Missed a whole heartbeat period; about to be evicted.
    PresumedDead,
}

/// One registered connection.
#[derive(Clone)]
pub struct Connection {
    /// Assigned connection identifier.
    pub id: ConnectionId,
    /// Identity announced by the subscriber, if any.
    pub identity: Option<String>,
    /// Accept time in milliseconds since the Unix epoch.
    pub connected_at: u64,
    /// Remote peer address, if known.
    pub remote_addr: Option<SocketAddr>,
    /// Heartbeat liveness.
    pub liveness: Liveness,
    sink: Arc<dyn FrameSink>,
}

impl Connection {
    /// The connection's sending half.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn FrameSink> {
        &self.sink
    }

    /// Check if the underlying socket reports open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sink.is_open()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("connected_at", &self.connected_at)
            .field("remote_addr", &self.remote_addr)
            .field("liveness", &self.liveness)
            .field("open", &self.is_open())
            .finish()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Registry of live subscriber connections.
#[derive(Default)]
pub struct Registry {
    connections: DashMap<ConnectionId, Connection>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted connection.
    ///
    /// The connection starts out [`Liveness::Alive`] with no identity.
    pub fn register(
        &self,
        sink: Arc<dyn FrameSink>,
        remote_addr: Option<SocketAddr>,
    ) -> ConnectionId {
        let id = ConnectionId::next();
        self.connections.insert(
            id,
            Connection {
                id,
                identity: None,
                connected_at: now_millis(),
                remote_addr,
                liveness: Liveness::Alive,
                sink,
            },
        );
        debug!(connection = %id, total = self.connections.len(), "Registered connection");
        id
    }

    /// Set the identity of a connection, replacing any earlier one.
    ///
    /// Returns `false` if the connection is not registered.
    pub fn set_identity(&self, id: ConnectionId, identity: impl Into<String>) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut entry) => {
                entry.identity = Some(identity.into());
                true
            }
            None => false,
        }
    }

    /// Remove a connection. Removing an absent connection is a no-op.
    pub fn unregister(&self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id).map(|(_, conn)| conn);
        if removed.is_some() {
            debug!(connection = %id, total = self.connections.len(), "Unregistered connection");
        }
        removed
    }

    /// Snapshot every registered connection.
    #[must_use]
    pub fn all(&self) -> Vec<Connection> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// Look up a single connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.get(&id).map(|e| e.value().clone())
    }

    /// Find the first connection that announced `identity`.
    ///
    /// When several connections share an identity, the earliest registered
    /// one wins.
    #[must_use]
    pub fn find_by_identity(&self, identity: &str) -> Option<Connection> {
        self.connections
            .iter()
            .filter(|e| e.identity.as_deref() == Some(identity))
            .min_by_key(|e| e.id)
            .map(|e| e.value().clone())
    }

    /// Record a liveness reply.
    pub fn mark_alive(&self, id: ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(&id) {
            entry.liveness = Liveness::Alive;
        }
    }

    /// Record that a ping is about to be sent.
    pub fn mark_awaiting_reply(&self, id: ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(&id) {
            entry.liveness = Liveness::AwaitingReply;
        }
    }

    /// Mark a connection dead if it is still waiting for a reply.
    ///
    /// The check and the transition happen under one shard lock, so a `pong`
    /// arriving concurrently either wins entirely or loses entirely.
    pub fn expire_if_awaiting(&self, id: ConnectionId) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut entry) if entry.liveness == Liveness::AwaitingReply => {
                entry.liveness = Liveness::PresumedDead;
                true
            }
            _ => false,
        }
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
