//! Cluster state snapshot.
//!
//! A `NodeList` is the set of managed nodes together with the pods bound to
//! each of them, read fresh on every reconciliation. It is never mutated
//! after construction; all capacity figures are derived from it on demand.

use crate::cluster::ClusterClientTrait;
use crate::error::ControllerError;
use crate::quantity;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::core::{Expression, Selector, SelectorExt};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Resource name of CPU in capacity and limit maps
pub const RESOURCE_CPU: &str = "cpu";

/// The managed nodes and the pods scheduled to each of them
#[derive(Debug, Clone)]
pub struct NodeList {
    nodes: Vec<Node>,
    pods: HashMap<String, Vec<Pod>>,
    /// CPU request of one game server, in milli-CPU
    cpu_request: i64,
}

impl NodeList {
    /// Queries the cluster for nodes matching `node_selector` and their pods.
    ///
    /// Any failed listing discards the whole snapshot.
    pub async fn fetch(
        cluster: &dyn ClusterClientTrait,
        node_selector: &str,
        cpu_request: i64,
    ) -> Result<Self, ControllerError> {
        let nodes = cluster
            .list_nodes(node_selector)
            .await
            .map_err(|e| ControllerError::snapshot("Could not get node list from Kubernetes", e))?;

        let mut pods = HashMap::with_capacity(nodes.len());
        for node in &nodes {
            let name = node_name(node);
            let node_pods = cluster
                .list_node_pods(name)
                .await
                .map_err(|e| ControllerError::snapshot(format!("Could not get pods for Node: {}", name), e))?;
            pods.insert(name.to_string(), node_pods);
        }

        debug!("Fetched node list with {} nodes", nodes.len());
        Ok(Self::new(nodes, pods, cpu_request))
    }

    /// Builds a snapshot from already-fetched state.
    ///
    /// Every node gets a pod entry, empty if `pods` has none for it.
    pub fn new(nodes: Vec<Node>, mut pods: HashMap<String, Vec<Pod>>, cpu_request: i64) -> Self {
        for node in &nodes {
            pods.entry(node_name(node).to_string()).or_default();
        }
        Self {
            nodes,
            pods,
            cpu_request,
        }
    }

    /// All managed nodes, in listing order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Game-server CPU request this snapshot converts capacity with
    pub fn cpu_request(&self) -> i64 {
        self.cpu_request
    }

    /// Pods scheduled to a node
    pub fn node_pods(&self, node: &Node) -> &[Pod] {
        self.pods
            .get(node_name(node))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Nodes that are ready and not cordoned
    pub fn available_nodes(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| node_ready(n) && !is_cordoned(n))
            .collect()
    }

    /// Nodes marked unschedulable
    pub fn cordoned_nodes(&self) -> Vec<&Node> {
        self.nodes.iter().filter(|n| is_cordoned(n)).collect()
    }

    /// Sum of a resource's limits over every container of every pod on the node
    pub fn sum_resource_limit(&self, node: &Node, resource: &str) -> i64 {
        self.node_pods(node)
            .iter()
            .filter_map(|pod| pod.spec.as_ref())
            .flat_map(|spec| spec.containers.iter())
            .filter_map(|container| container.resources.as_ref()?.limits.as_ref()?.get(resource))
            .map(|q| milli_or_zero(&q.0))
            .sum()
    }

    /// Game-server slots left on one node; negative when over-subscribed
    pub fn node_available_slots(&self, node: &Node) -> i64 {
        let free = cpu_capacity(node) - self.sum_resource_limit(node, RESOURCE_CPU);
        free.div_euclid(self.cpu_request)
    }

    /// Game-server slots left across available nodes.
    ///
    /// Cordoned and not-ready nodes contribute nothing.
    pub fn available_slots(&self) -> i64 {
        self.available_nodes()
            .into_iter()
            .map(|n| self.node_available_slots(n))
            .sum()
    }

    /// Number of game-session pods on a node
    pub fn game_session_count(&self, node: &Node, game_selector: &LabelSelector) -> usize {
        self.node_pods(node)
            .iter()
            .filter(|pod| game_selector.matches(pod.metadata.labels.as_ref()))
            .count()
    }
}

/// Name of a node, empty if unset
pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

/// Whether a node reports a `Ready` condition with status `True`
pub fn node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Whether a node is marked unschedulable
pub fn is_cordoned(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false)
}

/// CPU capacity of a node in milli-CPU, zero if unreported
pub fn cpu_capacity(node: &Node) -> i64 {
    node.status
        .as_ref()
        .and_then(|status| status.capacity.as_ref())
        .and_then(|capacity| capacity.get(RESOURCE_CPU))
        .map(|q| milli_or_zero(&q.0))
        .unwrap_or(0)
}

fn milli_or_zero(raw: &str) -> i64 {
    quantity::parse_milli(raw).unwrap_or_else(|e| {
        debug!("Ignoring unparseable quantity: {}", e);
        0
    })
}

/// Equality-based label selector (`key=value,key2=value2`).
///
/// Used to pick game-session pods out of a node's pod list without another
/// API round trip. Matching is delegated to kube's `Selector`, the same
/// semantics the API server applies to list and watch calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    selector: Selector,
}

impl LabelSelector {
    /// Parses `key=value` pairs separated by commas; `==` is accepted too.
    pub fn parse(selector: &str) -> Result<Self, ControllerError> {
        let mut requirements = Vec::new();
        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
                .ok_or_else(|| {
                    ControllerError::InvalidConfig(format!(
                        "Unsupported label selector term {:?} in {:?}",
                        term, selector
                    ))
                })?;
            let key = key.trim();
            if key.is_empty() || key.ends_with('!') {
                return Err(ControllerError::InvalidConfig(format!(
                    "Unsupported label selector term {:?} in {:?}",
                    term, selector
                )));
            }
            requirements.push(Expression::Equal(key.to_string(), value.trim().to_string()));
        }
        if requirements.is_empty() {
            return Err(ControllerError::InvalidConfig(format!(
                "Empty label selector {:?}",
                selector
            )));
        }
        Ok(Self {
            selector: requirements.into_iter().collect(),
        })
    }

    /// Whether a label set satisfies every requirement
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        labels.is_some_and(|labels| self.selector.matches(labels))
    }
}
