//! Scaling policy engine.
//!
//! Each call to `NodeScaler::scale_nodes` is one reconciliation tick:
//!
//! 1. Take a fresh `NodeList` snapshot.
//! 2. If the pool is below the minimum node count, grow it to the minimum
//!    and stop.
//! 3. If fewer game-server slots are free than the buffer asks for,
//!    uncordon the busiest cordoned nodes first, then grow the pool for
//!    whatever is still missing.
//! 4. If more slots are free than the buffer asks for, cordon as many whole
//!    nodes as the excess covers, emptiest first.
//! 5. Delete cordoned nodes whose grace period has passed and that run no
//!    game sessions.
//!
//! A tick keeps no state of its own. Everything that must outlive a tick
//! (which nodes are cordoned, and since when) lives on the node records.

use crate::cluster::ClusterClientTrait;
use crate::config::ScalerConfig;
use crate::error::ControllerError;
use crate::lifecycle::{self, Clock};
use crate::snapshot::{cpu_capacity, node_name, LabelSelector, NodeList, RESOURCE_CPU};
use chrono::Duration as ChronoDuration;
use nodepool_client::NodePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one tick changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Size passed to `increase_to_size`, if it was called
    pub resized_to: Option<i64>,
    pub uncordoned: Vec<String>,
    pub cordoned: Vec<String>,
    pub deleted: Vec<String>,
}

impl TickReport {
    /// Whether any node record was modified
    pub fn mutated_nodes(&self) -> bool {
        !self.uncordoned.is_empty() || !self.cordoned.is_empty() || !self.deleted.is_empty()
    }
}

/// Scales the managed node pool up and down based on free CPU
pub struct NodeScaler {
    cluster: Arc<dyn ClusterClientTrait>,
    node_pool: Arc<dyn NodePool>,
    clock: Arc<dyn Clock>,
    config: Arc<ScalerConfig>,
    game_selector: LabelSelector,
}

impl NodeScaler {
    /// Creates a new scaler.
    pub fn new(
        cluster: Arc<dyn ClusterClientTrait>,
        node_pool: Arc<dyn NodePool>,
        clock: Arc<dyn Clock>,
        config: Arc<ScalerConfig>,
    ) -> Result<Self, ControllerError> {
        let game_selector = LabelSelector::parse(&config.game_selector)?;
        Ok(Self {
            cluster,
            node_pool,
            clock,
            config,
            game_selector,
        })
    }

    /// Takes a fresh snapshot of the managed nodes
    pub async fn node_list(&self) -> Result<NodeList, ControllerError> {
        NodeList::fetch(
            self.cluster.as_ref(),
            &self.config.node_selector,
            self.config.cpu_request,
        )
        .await
    }

    /// Runs one reconciliation tick.
    ///
    /// Fails fast: the first error aborts the rest of the tick. Changes made
    /// before the error stay in place and are corrected by later ticks.
    pub async fn scale_nodes(&self) -> Result<TickReport, ControllerError> {
        let mut report = TickReport::default();
        let nl = self.node_list().await?;

        let total = nl.nodes().len() as i64;
        if total < self.config.min_nodes {
            info!(
                "Node count {} is below the minimum of {}, increasing node pool",
                total, self.config.min_nodes
            );
            self.increase_to_size(self.config.min_nodes, &mut report).await?;
            return Ok(report);
        }

        self.balance_buffer(&nl, &mut report).await?;

        // Decisions above may have changed schedulability, so the sweep
        // must not trust the first snapshot in that case.
        let nl = if report.mutated_nodes() {
            self.node_list().await?
        } else {
            nl
        };
        self.delete_cordoned_nodes(&nl, &mut report).await?;

        Ok(report)
    }

    /// Steps 3 and 4: compare free slots against the buffer target
    async fn balance_buffer(&self, nl: &NodeList, report: &mut TickReport) -> Result<(), ControllerError> {
        let available = nl.available_slots();
        let buffer = self.config.buffer_count;
        info!(
            "CPU Requests blocks of {}m. Available: {}. Requires a buffer of {}",
            nl.cpu_request(),
            available,
            buffer
        );

        if available < buffer {
            let satisfied = self.uncordon_nodes(nl, buffer.saturating_sub(available), report).await?;
            if satisfied {
                return Ok(());
            }

            let nl = self.node_list().await?;
            let available = nl.available_slots();
            self.increase_nodes(&nl, buffer.saturating_sub(available), report).await
        } else if available > buffer {
            self.cordon_nodes(nl, available.saturating_sub(buffer), report).await
        } else {
            Ok(())
        }
    }

    /// Uncordons the cordoned nodes with the most CPU in use first, until
    /// `game_number` slots have been freed.
    ///
    /// Returns `true` once enough capacity has been reclaimed.
    async fn uncordon_nodes(
        &self,
        nl: &NodeList,
        game_number: i64,
        report: &mut TickReport,
    ) -> Result<bool, ControllerError> {
        if game_number <= 0 {
            warn!("Cannot uncordon nodes by a 0 or negative number. {}", game_number);
            return Ok(true);
        }

        let mut nodes = nl.cordoned_nodes();
        if nodes.is_empty() {
            info!("No nodes that are unscheduled, exiting...");
            return Ok(false);
        }

        // Stable sort, busiest first
        nodes.sort_by_key(|n| std::cmp::Reverse(nl.sum_resource_limit(n, RESOURCE_CPU)));

        let mut cpu_request = game_number.saturating_mul(self.config.cpu_request);
        info!(
            "Uncordoning nodes. Requesting {} game servers for a cpuRequest of {}",
            game_number, cpu_request
        );

        for node in nodes {
            let freed = cpu_capacity(node) - nl.sum_resource_limit(node, RESOURCE_CPU);
            let mut node = node.clone();
            lifecycle::cordon(self.cluster.as_ref(), self.clock.as_ref(), &mut node, false).await?;
            report.uncordoned.push(node_name(&node).to_string());

            cpu_request = cpu_request.saturating_sub(freed);
            info!(
                "{} cpuRequest remaining after uncordoning node, and adding {} cpu",
                cpu_request, freed
            );
            if cpu_request <= 0 {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Grows the node pool by enough nodes to hold `game_number` more game servers
    async fn increase_nodes(
        &self,
        nl: &NodeList,
        game_number: i64,
        report: &mut TickReport,
    ) -> Result<(), ControllerError> {
        if game_number <= 0 {
            warn!("Cannot increase nodes by a 0 or negative number. {}", game_number);
            return Ok(());
        }

        let available_count = nl.available_nodes().len() as i64;
        info!(
            "Attempting to increase nodelist of {}, by {} cpu blocks",
            nl.nodes().len(),
            game_number
        );

        let Some(capacity) = reference_capacity(nl) else {
            warn!("No node with a known CPU capacity to size the increase from, requesting a single node");
            return self.increase_to_size(available_count.max(1), report).await;
        };

        // Not exact since other containers share the nodes, but the next
        // tick corrects any shortfall.
        let cpu_request = game_number.saturating_mul(self.config.cpu_request);
        let diff = div_ceil(cpu_request, capacity);
        info!("Adding {} nodes to the node pool", diff);

        self.increase_to_size(available_count.saturating_add(diff), report).await
    }

    /// Cordons whole nodes covered by `game_number` excess slots, emptiest first
    async fn cordon_nodes(
        &self,
        nl: &NodeList,
        game_number: i64,
        report: &mut TickReport,
    ) -> Result<(), ControllerError> {
        if game_number <= 0 {
            warn!("Cannot cordon nodes by a 0 or negative number. {}", game_number);
            return Ok(());
        }

        let Some(capacity) = reference_capacity(nl) else {
            debug!("No node with a known CPU capacity, nothing to cordon");
            return Ok(());
        };

        let mut nodes = nl.available_nodes();
        let cpu_request = game_number.saturating_mul(self.config.cpu_request);
        let mut diff = cpu_request.div_euclid(capacity);

        let spare = nodes.len() as i64 - self.config.min_nodes;
        if diff > spare {
            info!(
                "Limiting cordon to {} nodes to keep the minimum of {} available",
                spare.max(0),
                self.config.min_nodes
            );
            diff = spare;
        }

        if diff <= 0 {
            info!("No nodes to be cordoned.");
            return Ok(());
        }

        info!("Cordoning {} nodes", diff);

        // Stable sort, fewest pods first
        nodes.sort_by_key(|n| nl.node_pods(n).len());

        for node in nodes.into_iter().take(diff as usize) {
            let mut node = node.clone();
            info!("Cordoning node: {}", node_name(&node));
            lifecycle::cordon(self.cluster.as_ref(), self.clock.as_ref(), &mut node, true).await?;
            report.cordoned.push(node_name(&node).to_string());
        }

        Ok(())
    }

    /// Step 5: deletes cordoned nodes past the grace period that host no
    /// game sessions, without dropping below the minimum node count.
    ///
    /// The instances are removed from the node pool first, which also lowers
    /// its target size. Node records are only deleted once that succeeded.
    async fn delete_cordoned_nodes(&self, nl: &NodeList, report: &mut TickReport) -> Result<(), ControllerError> {
        let grace = ChronoDuration::from_std(self.config.shutdown).map_err(|e| {
            ControllerError::InvalidConfig(format!("Shutdown grace period out of range: {}", e))
        })?;
        let now = self.clock.now();
        let mut remaining = nl.nodes().len() as i64;
        let mut deletable = Vec::new();

        for node in nl.cordoned_nodes() {
            let name = node_name(node);
            let Some(cordoned_at) = lifecycle::lifecycle_timestamp(node) else {
                debug!("Cordoned node {} has no lifecycle timestamp, leaving it alone", name);
                continue;
            };

            if now.signed_duration_since(cordoned_at) < grace {
                debug!("Node {} cordoned at {} is still within its grace period", name, cordoned_at);
                continue;
            }

            let sessions = nl.game_session_count(node, &self.game_selector);
            if sessions > 0 {
                debug!("Node {} still has {} game sessions, not deleting", name, sessions);
                continue;
            }

            if remaining <= self.config.min_nodes {
                info!(
                    "Not deleting node {}, the pool is at the minimum of {} nodes",
                    name, self.config.min_nodes
                );
                break;
            }

            info!("Deleting node {}, cordoned since {}", name, cordoned_at);
            deletable.push(node);
            remaining -= 1;
        }

        if deletable.is_empty() {
            return Ok(());
        }

        let instances: Vec<String> = deletable.iter().map(|node| lifecycle::instance_id(node)).collect();
        self.node_pool.delete_nodes(&instances).await?;

        for node in deletable {
            lifecycle::delete_node(self.cluster.as_ref(), node).await?;
            report.deleted.push(node_name(node).to_string());
        }

        Ok(())
    }

    /// Calls the node pool, applying the maximum node count
    async fn increase_to_size(&self, size: i64, report: &mut TickReport) -> Result<(), ControllerError> {
        let size = match self.config.max_nodes {
            Some(max) if size > max => {
                info!("Requested node pool size {} capped to maximum of {}", size, max);
                max
            }
            _ => size,
        };

        self.node_pool.increase_to_size(size).await?;
        report.resized_to = Some(size);
        Ok(())
    }
}

/// CPU capacity used as the size of one node.
///
/// All managed nodes are assumed to be the same shape: the first available
/// node is used, falling back to the first node with any capacity.
fn reference_capacity(nl: &NodeList) -> Option<i64> {
    nl.available_nodes()
        .into_iter()
        .chain(nl.nodes().iter())
        .map(cpu_capacity)
        .find(|capacity| *capacity > 0)
}

fn div_ceil(numerator: i64, denominator: i64) -> i64 {
    let quotient = numerator.div_euclid(denominator);
    if numerator.rem_euclid(denominator) == 0 {
        quotient
    } else {
        quotient + 1
    }
}
