//! # beacon-subscriber
//!
//! Receiving side of the Beacon notification relay: one long-lived
//! WebSocket session per endpoint, with a fixed-delay reconnect, `pong`
//! replies to heartbeats and dispatch of notifications to a [`Presenter`].
//!
//! ```rust,ignore
//! use beacon_subscriber::{LogPresenter, Session, SubscriberConfig};
//!
//! let config = SubscriberConfig::new("ws://127.0.0.1:3001").with_user_id("alice");
//! let session = Session::spawn(config, Arc::new(LogPresenter::new()));
//! // ...
//! session.shutdown().await;
//! ```

pub mod config;
pub mod presenter;
pub mod reconnect;
pub mod session;

pub use config::{ConfigError, SubscriberConfig};
pub use presenter::{LogPresenter, Presenter};
pub use reconnect::ReconnectTimer;
pub use session::{Session, SessionState, NOTIFICATION_BACKLOG};
