//! Node lifecycle operations.
//!
//! Cordoning marks a node (un)schedulable and stamps the transition time in
//! an annotation on the node itself, so the cordon-to-delete grace period
//! survives controller restarts.

use crate::cluster::ClusterClientTrait;
use crate::error::ControllerError;
use crate::snapshot::node_name;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::{Node, NodeSpec};
use tracing::{debug, info};

/// Annotation holding the time of the last cordon/uncordon transition
pub const TIMESTAMP_ANNOTATION: &str = "nodescaler/timestamp";

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Sets a node's schedulability, stamps the transition time and persists it.
///
/// The node is modified in place before the update is sent, so after a
/// failure the local copy no longer matches the cluster.
pub async fn cordon(
    cluster: &dyn ClusterClientTrait,
    clock: &dyn Clock,
    node: &mut Node,
    unschedulable: bool,
) -> Result<(), ControllerError> {
    let operation = if unschedulable { "cordon" } else { "uncordon" };
    let now = clock.now();

    node.spec.get_or_insert_with(NodeSpec::default).unschedulable = Some(unschedulable);
    node.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(TIMESTAMP_ANNOTATION.to_string(), format_timestamp(now));

    debug!("Setting node {} unschedulable={}", node_name(node), unschedulable);
    let updated = cluster
        .update_node(node)
        .await
        .map_err(|e| ControllerError::update(node_name(node), operation, e))?;
    *node = updated;

    info!("Node {} {}ed at {}", node_name(node), operation, format_timestamp(now));
    Ok(())
}

/// Removes a node record from the cluster
pub async fn delete_node(cluster: &dyn ClusterClientTrait, node: &Node) -> Result<(), ControllerError> {
    let name = node_name(node);
    cluster
        .delete_node(name)
        .await
        .map_err(|e| ControllerError::update(name, "delete", e))?;
    info!("Deleted node {}", name);
    Ok(())
}

/// Cloud instance backing a node: its provider ID, or the node name when
/// the cloud controller has not set one
pub fn instance_id(node: &Node) -> String {
    node.spec
        .as_ref()
        .and_then(|spec| spec.provider_id.as_deref())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| node_name(node))
        .to_string()
}

/// Time of the node's last cordon/uncordon, if it carries a valid stamp
pub fn lifecycle_timestamp(node: &Node) -> Option<DateTime<Utc>> {
    let raw = node.metadata.annotations.as_ref()?.get(TIMESTAMP_ANNOTATION)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
}

/// RFC 3339 with nanoseconds, always in UTC
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
