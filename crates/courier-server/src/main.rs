//! Courier Server - standalone entry point
//!
//! Thin wrapper around `courier-api`: loads configuration from the
//! environment, runs the HTTP façade and the email worker until a shutdown
//! signal arrives.

use anyhow::Result;
use courier_api::{AppConfig, CourierServer};

#[tokio::main]
async fn main() -> Result<()> {
    courier_api::server::init_tracing();

    tracing::info!("Starting Courier...");

    let config = AppConfig::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        e
    })?;

    let server = CourierServer::new(config).await.map_err(|e| {
        tracing::error!("Failed to initialize server: {}", e);
        e
    })?;

    server.run().await.map_err(|e| {
        tracing::error!("Server error during execution: {}", e);
        e
    })?;

    Ok(())
}
