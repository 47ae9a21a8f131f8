//! Node Scaler Controller
//!
//! Keeps a buffer of free game-server capacity in a Kubernetes node pool:
//! - Grows the cloud node pool when too few game-server slots are free
//! - Cordons surplus nodes and uncordons them again when capacity runs short
//! - Deletes cordoned nodes once their grace period has passed and no game
//!   sessions remain on them
//!
//! Scaling runs on a fixed tick and whenever a game session starts or ends.

mod cluster;
mod config;
mod controller;
mod error;
mod health;
mod lifecycle;
mod quantity;
mod scaler;
mod snapshot;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ScalerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Node Scaler Controller");

    let config = ScalerConfig::from_env()?;

    info!("Configuration:");
    info!("  Node selector: {}", config.node_selector);
    info!("  CPU request: {}m", config.cpu_request);
    info!("  Buffer count: {}", config.buffer_count);
    info!("  Tick: {:?}", config.tick);
    info!("  Shutdown grace: {:?}", config.shutdown);
    info!("  Min nodes: {}", config.min_nodes);
    info!(
        "  Max nodes: {}",
        config.max_nodes.map_or_else(|| "unset".to_string(), |max| max.to_string())
    );
    info!("  Node pool: {}", config.node_pool.as_deref().unwrap_or("from node label"));
    info!("  Game selector: {}", config.game_selector);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
