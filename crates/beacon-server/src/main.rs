//! # Beacon Server
//!
//! Realtime presence and notification server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! beacon
//!
//! # Run with environment variables
//! BEACON_PORT=8080 BEACON_HOST=0.0.0.0 BEACON_JWT_SECRET=... beacon
//!
//! # Override any config key
//! BEACON__CONNECTION__OUTBOX_CAPACITY=512 beacon
//! ```

use anyhow::Result;
use beacon_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    if config.uses_dev_secret() {
        tracing::warn!("Using the development JWT secret; set BEACON_JWT_SECRET in production");
    }

    tracing::info!("Starting Beacon server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
