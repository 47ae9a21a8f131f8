//! Test utilities for unit testing the scaler
//!
//! This module provides node and pod fixtures, an in-memory
//! `ClusterClientTrait` and a manually advanced clock.

use crate::cluster::{ClusterClientTrait, ClusterError};
use crate::lifecycle::{format_timestamp, Clock, TIMESTAMP_ANNOTATION};
use crate::snapshot::{is_cordoned, node_name, LabelSelector};
use chrono::{DateTime, Duration, TimeZone, Utc};
use k8s_openapi::api::core::v1::{
    Container, Node, NodeCondition, NodeSpec, NodeStatus, Pod, PodSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Helper to create a ready, schedulable node with the given CPU capacity
pub fn create_test_node(name: &str, cpu: &str) -> Node {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), "game-server".to_string());

    let mut capacity = BTreeMap::new();
    capacity.insert("cpu".to_string(), Quantity(cpu.to_string()));

    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            annotations: Some(BTreeMap::new()),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            unschedulable: Some(false),
            provider_id: Some(format!("gce://test-project/us-west1-b/{}", name)),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            capacity: Some(capacity),
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Helper to create nodes named `node0`, `node1`, ... with the given CPU capacities
pub fn create_test_nodes(cpus: &[&str]) -> Vec<Node> {
    cpus.iter()
        .enumerate()
        .map(|(i, cpu)| create_test_node(&format!("node{}", i), cpu))
        .collect()
}

/// Sets the node's `Ready` condition
pub fn set_ready(node: &mut Node, ready: bool) {
    let status = if ready { "True" } else { "False" };
    if let Some(conditions) = node.status.as_mut().and_then(|s| s.conditions.as_mut()) {
        for condition in conditions.iter_mut().filter(|c| c.type_ == "Ready") {
            condition.status = status.to_string();
        }
    }
}

/// Marks a node unschedulable without a lifecycle timestamp
pub fn set_cordoned(node: &mut Node, cordoned: bool) {
    node.spec.get_or_insert_with(NodeSpec::default).unschedulable = Some(cordoned);
}

/// Labels carried by game-session pods
pub fn game_session_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("sessions".to_string(), "game".to_string());
    labels
}

/// Helper to create one single-container pod per CPU limit
pub fn create_test_pods(cpu_limits: &[&str], game: bool) -> Vec<Pod> {
    cpu_limits
        .iter()
        .enumerate()
        .map(|(i, cpu)| {
            let mut limits = BTreeMap::new();
            limits.insert("cpu".to_string(), Quantity(cpu.to_string()));
            Pod {
                metadata: ObjectMeta {
                    name: Some(format!("pod{}", i)),
                    namespace: Some("default".to_string()),
                    uid: Some(format!("uid-{}-{}", i, cpu)),
                    labels: game.then(game_session_labels),
                    ..Default::default()
                },
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "container".to_string(),
                        resources: Some(ResourceRequirements {
                            limits: Some(limits),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                status: None,
            }
        })
        .collect()
}

/// In-memory cluster for testing
///
/// Updates replace the stored node record and deletes remove it, so the
/// next listing sees the change just like the API server would.
#[derive(Debug, Default)]
pub struct MockClusterClient {
    nodes: Mutex<Vec<Node>>,
    pods: Mutex<HashMap<String, Vec<Pod>>>,
    updates: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    node_list_calls: AtomicUsize,
    fail_node_listing: AtomicBool,
    fail_pod_listing: AtomicBool,
    /// Updates still allowed to succeed, `None` for unlimited
    update_budget: Mutex<Option<usize>>,
    update_attempts: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl MockClusterClient {
    /// Create a new mock cluster holding the given nodes
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            ..Default::default()
        }
    }

    /// Replace the pods scheduled to a node
    pub fn set_pods(&self, node_name: &str, pods: Vec<Pod>) {
        lock(&self.pods).insert(node_name.to_string(), pods);
    }

    /// Overwrite a node's lifecycle annotation
    pub fn stamp(&self, name: &str, ts: DateTime<Utc>) {
        let mut nodes = lock(&self.nodes);
        if let Some(node) = nodes.iter_mut().find(|n| node_name(n) == name) {
            node.metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert(TIMESTAMP_ANNOTATION.to_string(), format_timestamp(ts));
        }
    }

    pub fn fail_node_listing(&self, fail: bool) {
        self.fail_node_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pod_listing(&self, fail: bool) {
        self.fail_pod_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        *lock(&self.update_budget) = fail.then_some(0);
    }

    /// Let the next `n` updates succeed, then fail every later one
    pub fn fail_updates_after(&self, n: usize) {
        *lock(&self.update_budget) = Some(n);
    }

    /// Current record of a node
    pub fn node(&self, name: &str) -> Option<Node> {
        lock(&self.nodes).iter().find(|n| node_name(n) == name).cloned()
    }

    /// Names of all stored nodes, in insertion order
    pub fn node_names(&self) -> Vec<String> {
        lock(&self.nodes).iter().map(|n| node_name(n).to_string()).collect()
    }

    /// Names of successfully updated nodes, in call order
    pub fn updates(&self) -> Vec<String> {
        lock(&self.updates).clone()
    }

    /// Number of `update_node` calls so far, failed ones included
    pub fn update_attempts(&self) -> usize {
        self.update_attempts.load(Ordering::SeqCst)
    }

    /// Names of deleted nodes, in call order
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    /// Number of `list_nodes` calls so far
    pub fn node_list_calls(&self) -> usize {
        self.node_list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, ClusterError> {
        self.node_list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_node_listing.load(Ordering::SeqCst) {
            return Err(ClusterError::Api("node listing failed".to_string()));
        }
        let selector = LabelSelector::parse(label_selector).map_err(|e| ClusterError::Api(e.to_string()))?;
        Ok(lock(&self.nodes)
            .iter()
            .filter(|n| selector.matches(n.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn list_node_pods(&self, node_name: &str) -> Result<Vec<Pod>, ClusterError> {
        if self.fail_pod_listing.load(Ordering::SeqCst) {
            return Err(ClusterError::Api(format!("pod listing for {} failed", node_name)));
        }
        Ok(lock(&self.pods).get(node_name).cloned().unwrap_or_default())
    }

    async fn update_node(&self, node: &Node) -> Result<Node, ClusterError> {
        self.update_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(remaining) = lock(&self.update_budget).as_mut() {
            if *remaining == 0 {
                return Err(ClusterError::Api("node update failed".to_string()));
            }
            *remaining -= 1;
        }
        let name = node_name(node).to_string();
        let mut nodes = lock(&self.nodes);
        let stored = nodes
            .iter_mut()
            .find(|n| node_name(n) == name)
            .ok_or_else(|| ClusterError::Api(format!("node {} not found", name)))?;
        *stored = node.clone();
        lock(&self.updates).push(name);
        Ok(node.clone())
    }

    async fn delete_node(&self, name: &str) -> Result<(), ClusterError> {
        let mut nodes = lock(&self.nodes);
        let before = nodes.len();
        nodes.retain(|n| node_name(n) != name);
        if nodes.len() == before {
            return Err(ClusterError::Api(format!("node {} not found", name)));
        }
        lock(&self.pods).remove(name);
        lock(&self.deleted).push(name.to_string());
        Ok(())
    }
}

/// Whether the mock cluster's record of a node is unschedulable
pub fn is_cordoned_in(cluster: &MockClusterClient, name: &str) -> bool {
    cluster.node(name).is_some_and(|n| is_cordoned(&n))
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Starts at a fixed instant with a non-zero sub-second part
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2017, 6, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
            + Duration::nanoseconds(123_456_789);
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}
