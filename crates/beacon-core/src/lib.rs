//! # beacon-core
//!
//! Core relay logic for the Beacon notification relay.
//!
//! - **Registry** - Live subscriber connections and their identities
//! - **Delivery** - Broadcast and targeted send
//! - **Heartbeat** - Periodic liveness probing and eviction
//! - **Relay** - Connection lifecycle and the publish entry points
//! - **Notification** - Publish validation and the wire payload
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Publisher  │────▶│    Relay    │────▶│  Delivery   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │  Registry   │◀────│  Heartbeat  │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod delivery;
pub mod heartbeat;
pub mod notification;
pub mod registry;
pub mod relay;

#[cfg(test)]
mod test_support;

pub use delivery::DeliveryEngine;
pub use heartbeat::{HeartbeatConfig, HeartbeatHandle, HeartbeatMonitor, SweepReport};
pub use notification::{Media, Notification, NotificationPolicy, PublishRequest, ValidationError};
pub use registry::{Connection, Liveness, Registry};
pub use relay::{ClientSummary, Relay};
