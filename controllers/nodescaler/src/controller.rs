//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the scaler to the
//! cluster and the cloud node pool, and the reconciliation loop that drives
//! it from the tick timer and the game session watcher.

use crate::cluster::KubeClusterClient;
use crate::config::ScalerConfig;
use crate::error::ControllerError;
use crate::health;
use crate::lifecycle::SystemClock;
use crate::scaler::{NodeScaler, TickReport};
use crate::snapshot::{node_name, NodeList};
use crate::watcher::GameWatcher;
use kube::Client;
use nodepool_client::GceNodePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Node label GKE puts the node pool name in
pub const NODE_POOL_LABEL: &str = "cloud.google.com/gke-nodepool";

/// Main controller for node pool scaling.
pub struct Controller {
    config: Arc<ScalerConfig>,
    cluster: Arc<KubeClusterClient>,
    scaler: Arc<NodeScaler>,
}

impl Controller {
    /// Creates a new controller instance.
    ///
    /// Connects to the cluster and to the node pool backing the managed nodes.
    pub async fn new(config: ScalerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Node Scaler Controller");
        let config = Arc::new(config);

        let kube_client = Client::try_default().await?;
        let cluster = Arc::new(KubeClusterClient::new(kube_client));

        let nodes = NodeList::fetch(cluster.as_ref(), &config.node_selector, config.cpu_request).await?;
        let pool_name = node_pool_name(&config, &nodes)?;
        info!("Managing node pool {}", pool_name);

        let node_pool = Arc::new(GceNodePool::connect(&pool_name).await?);
        let scaler = Arc::new(NodeScaler::new(
            cluster.clone(),
            node_pool,
            Arc::new(SystemClock),
            config.clone(),
        )?);

        Ok(Self {
            config,
            cluster,
            scaler,
        })
    }

    /// Runs the controller until SIGINT or SIGTERM.
    ///
    /// Shutdown is ordered: the loop finishes its current tick and exits, then
    /// the watcher is stopped, then the readiness endpoint.
    pub async fn run(self) -> Result<(), ControllerError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let health = tokio::spawn(health::serve(self.config.port, shutdown_rx.clone()));
        let (game_watcher, events) = GameWatcher::start(self.cluster.pod_api(), &self.config.game_selector);
        let reconciliation = tokio::spawn(run_reconciliation_loop(
            self.scaler.clone(),
            self.config.tick,
            events,
            shutdown_rx,
        ));

        info!("Node Scaler Controller running");
        shutdown_signal().await?;
        info!("Shutting down Node Scaler Controller");

        // Err means every receiver is already gone
        let _ = shutdown_tx.send(true);

        reconciliation
            .await
            .map_err(|e| ControllerError::Watch(format!("Reconciliation loop panicked: {}", e)))?;
        game_watcher.stop().await;
        health
            .await
            .map_err(|e| ControllerError::Watch(format!("Readiness endpoint panicked: {}", e)))??;

        info!("Node Scaler Controller stopped");
        Ok(())
    }
}

/// Name of the GKE node pool to resize.
///
/// `NODE_POOL` wins; otherwise the node pool label of the first managed node.
fn node_pool_name(config: &ScalerConfig, nodes: &NodeList) -> Result<String, ControllerError> {
    if let Some(name) = &config.node_pool {
        return Ok(name.clone());
    }

    let first = nodes.nodes().first().ok_or_else(|| {
        ControllerError::InvalidConfig(format!(
            "No nodes match selector {} and NODE_POOL is not set",
            config.node_selector
        ))
    })?;

    first
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(NODE_POOL_LABEL))
        .cloned()
        .ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "Node {} has no {} label and NODE_POOL is not set",
                node_name(first),
                NODE_POOL_LABEL
            ))
        })
}

/// Runs the scaler on every tick and every game session event until shutdown.
///
/// Only one tick runs at a time. A failed tick is logged and the loop waits
/// for the next wakeup.
pub async fn run_reconciliation_loop(
    scaler: Arc<NodeScaler>,
    tick: Duration,
    mut events: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting reconciliation loop, ticking every {:?}", tick);
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut events_open = true;

    loop {
        tokio::select! {
            biased;
            () = shutdown_requested(&mut shutdown) => break,
            event = events.recv(), if events_open => {
                if event.is_none() {
                    warn!("Game session event channel closed, scaling on tick only");
                    events_open = false;
                    continue;
                }
                debug!("Game session event received");
            }
            _ = interval.tick() => debug!("Reconciliation tick"),
        }

        match scaler.scale_nodes().await {
            Ok(report) => log_report(&report),
            Err(e) => error!("Error scaling nodes: {}", e),
        }
    }

    info!("Reconciliation loop stopped");
}

/// Resolves once shutdown is requested or the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn log_report(report: &TickReport) {
    if *report == TickReport::default() {
        debug!("No scaling changes this tick");
        return;
    }
    info!(
        "Scaling tick: resized_to={:?} uncordoned={:?} cordoned={:?} deleted={:?}",
        report.resized_to, report.uncordoned, report.cordoned, report.deleted
    );
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<(), ControllerError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<(), ControllerError> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
