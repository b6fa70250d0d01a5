//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon notification relay.
//!
//! Every message is one JSON object in one WebSocket text frame, discriminated
//! by its `type` field.
//!
//! ## Message Types
//!
//! - `connected` - Server greeting carrying the assigned connection id
//! - `auth` - Subscriber identity announcement
//! - `ping` / `pong` - Liveness check and reply
//! - `notification` - Text and/or inline media for display
//! - `server-shutdown` - Best-effort final frame
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, NotificationData, WireMessage};
//!
//! let data = NotificationData::new("alice", "Hello, world!", 5000);
//! let encoded = codec::encode(&WireMessage::notification(data)).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.kind(), "notification");
//! ```

pub mod codec;
pub mod message;

pub use codec::{decode, encode, ProtocolError};
pub use message::{NotificationData, WireMessage};
