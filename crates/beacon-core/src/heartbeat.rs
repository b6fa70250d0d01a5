//! Heartbeat monitor.
//!
//! Every period the monitor pings each open connection. With
//! `evict_on_missed_pong` enabled, a connection that has not answered the
//! previous ping by the next tick is presumed dead, closed and evicted.
//! Without it, only connections whose socket already reports closed are
//! evicted.

use crate::delivery::{close_within, send_within, DEFAULT_SEND_TIMEOUT};
use crate::registry::{Connection, Liveness, Registry};
use beacon_protocol::{codec, WireMessage};
use beacon_transport::ConnectionId;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Heartbeat configuration.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Evict connections that miss a full period without a `pong`.
    pub evict_on_missed_pong: bool,
    /// Longest a single ping or eviction close may take.
    pub send_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            evict_on_missed_pong: true,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Why a connection was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The socket already reported closed.
    SocketClosed,
    /// No `pong` within one full period.
    MissedPong,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pings sent successfully.
    pub pinged: usize,
    /// Pings that failed to send.
    pub failed: usize,
    /// Connections removed from the registry.
    pub evicted: Vec<(ConnectionId, EvictionReason)>,
}

enum Outcome {
    Pinged,
    Failed,
    Evicted(ConnectionId, EvictionReason),
    Skipped,
}

/// Periodically pings every registered connection.
pub struct HeartbeatMonitor {
    registry: Arc<Registry>,
    config: HeartbeatConfig,
}

impl HeartbeatMonitor {
    /// Create a monitor over `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, config: HeartbeatConfig) -> Self {
        Self { registry, config }
    }

    /// Run one sweep over a snapshot of the registry.
    pub async fn sweep(&self) -> SweepReport {
        let ping = match codec::encode(&WireMessage::Ping) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode ping");
                return SweepReport::default();
            }
        };

        let snapshot = self.registry.all();
        let outcomes = join_all(snapshot.iter().map(|conn| self.check(conn, &ping))).await;

        let mut report = SweepReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Pinged => report.pinged += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Evicted(id, reason) => report.evicted.push((id, reason)),
                Outcome::Skipped => {}
            }
        }
        report
    }

    async fn check(&self, conn: &Connection, ping: &str) -> Outcome {
        if !conn.is_open() {
            return self.evict(conn, EvictionReason::SocketClosed).await;
        }

        if self.config.evict_on_missed_pong {
            if conn.liveness == Liveness::AwaitingReply && self.registry.expire_if_awaiting(conn.id) {
                return self.evict(conn, EvictionReason::MissedPong).await;
            }
            // Marked before sending so a fast pong cannot be overwritten.
            self.registry.mark_awaiting_reply(conn.id);
        }

        match send_within(conn.sink().as_ref(), ping, self.config.send_timeout).await {
            Ok(()) => Outcome::Pinged,
            Err(e) => {
                // Left in place; the next sweep sees the closed socket.
                warn!(connection = %conn.id, error = %e, "Ping failed");
                Outcome::Failed
            }
        }
    }

    async fn evict(&self, conn: &Connection, reason: EvictionReason) -> Outcome {
        if self.registry.unregister(conn.id).is_none() {
            return Outcome::Skipped;
        }
        if let Err(e) = close_within(conn.sink().as_ref(), self.config.send_timeout).await {
            debug!(connection = %conn.id, error = %e, "Close after eviction failed");
        }
        info!(connection = %conn.id, reason = ?reason, "Evicted connection");
        Outcome::Evicted(conn.id, reason)
    }

    /// Start sweeping on the configured period.
    ///
    /// The first sweep happens one full period after the call.
    #[must_use]
    pub fn spawn(self) -> HeartbeatHandle {
        self.spawn_with(|_| {})
    }

    /// Start sweeping, calling `on_sweep` with each report.
    #[must_use]
    pub fn spawn_with<F>(self, on_sweep: F) -> HeartbeatHandle
    where
        F: Fn(&SweepReport) + Send + 'static,
    {
        let period = self.config.interval;
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let report = self.sweep().await;
                debug!(
                    pinged = report.pinged,
                    failed = report.failed,
                    evicted = report.evicted.len(),
                    "Heartbeat sweep"
                );
                on_sweep(&report);
            }
        });

        HeartbeatHandle { task }
    }
}

/// Handle to a running heartbeat. Dropping it stops the heartbeat.
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stop the heartbeat.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
