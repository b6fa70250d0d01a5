//! # beacon-transport
//!
//! Transport abstraction layer for the Beacon notification relay.
//!
//! - **`FrameSink`** - the sending half of an accepted connection, as seen by the core
//! - **`WebSocketSink`** - `FrameSink` over an axum WebSocket
//! - **`websocket`** - the subscriber-side dialer built on tokio-tungstenite
//!
//! ```rust,ignore
//! use beacon_transport::websocket;
//!
//! let (mut writer, mut reader) = websocket::connect("ws://127.0.0.1:3001", timeout).await?;
//! while let Some(message) = reader.recv().await? {
//!     // Dispatch message
//! }
//! ```

pub mod axum_ws;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use axum_ws::WebSocketSink;
pub use traits::{ConnectionId, FrameSink, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WsReader, WsWriter};
