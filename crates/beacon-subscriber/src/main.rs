//! # Beacon Subscriber
//!
//! Connects to a Beacon relay and shows the notifications it delivers.
//!
//! ## Usage
//!
//! ```bash
//! BEACON_SUBSCRIBER_SERVER_URL=ws://127.0.0.1:3001 beacon-subscriber
//!
//! beacon-subscriber --server-url ws://relay.local:3001 --user-id alice
//! ```

use anyhow::{Context, Result};
use beacon_subscriber::{LogPresenter, Session, SubscriberConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Beacon notification subscriber.
#[derive(Debug, Parser)]
#[command(name = "beacon-subscriber", version, about)]
struct Cli {
    /// Path to a configuration file.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Relay address, overriding the configured one.
    #[arg(long)]
    server_url: Option<String>,

    /// Identity to announce, overriding the configured one.
    #[arg(long)]
    user_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_subscriber=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&cli)?;
    tracing::info!(
        server = %config.server_url,
        identity = config.identity().unwrap_or("-"),
        "Starting Beacon subscriber"
    );

    let session = Session::spawn(config, Arc::new(LogPresenter::new()));
    let mut state = session.watch();

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                tracing::info!(state = ?current, "Connection status");
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<SubscriberConfig> {
    let settings = SubscriberConfig::layers(cli.config.as_deref())
        .set_override_option("server_url", cli.server_url.clone())?
        .set_override_option("user_id", cli.user_id.clone())?
        .build()
        .context("Failed to load subscriber configuration")?;

    SubscriberConfig::from_settings(settings).context("Invalid subscriber configuration")
}
