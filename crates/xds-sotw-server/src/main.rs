//! # xds-sotw Server
//!
//! Serves versioned resource snapshots to discovery clients. Each client
//! stream is reconciled against the latest snapshot for its node, and every
//! snapshot change is pushed to the streams still open for that node.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use xds_sotw_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting xds-sotw server"
    );

    let server = Server::bind(config).await?;
    server.run().await?;

    Ok(())
}
