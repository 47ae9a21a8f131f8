//! Controller-specific error types.
//!
//! This module defines the error types of the Node Scaler Controller.
//! Every cluster or cloud failure is wrapped with the operation and node it
//! concerns so the reconciliation loop can log it and move on.

use crate::cluster::ClusterError;
use kube::Error as KubeError;
use nodepool_client::NodePoolError;
use thiserror::Error;

/// Errors that can occur in the Node Scaler Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Listing nodes or pods failed; the tick is aborted
    #[error("Could not build node list ({context}): {source}")]
    Snapshot {
        context: String,
        #[source]
        source: ClusterError,
    },

    /// Persisting a cordon/uncordon or deleting a node failed
    #[error("Could not {operation} node {node}: {source}")]
    Update {
        node: String,
        operation: &'static str,
        #[source]
        source: ClusterError,
    },

    /// The node pool could not be resolved or resized
    #[error("Node pool error: {0}")]
    Resize(#[from] NodePoolError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Readiness endpoint I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Wrap a failure to list nodes or pods
    pub fn snapshot(context: impl Into<String>, source: ClusterError) -> Self {
        Self::Snapshot {
            context: context.into(),
            source,
        }
    }

    /// Wrap a failure to persist a node mutation
    pub fn update(node: impl Into<String>, operation: &'static str, source: ClusterError) -> Self {
        Self::Update {
            node: node.into(),
            operation,
            source,
        }
    }
}
