//! NodePool trait
//!
//! What the scaling engine needs from the infrastructure: grow the backing
//! node pool, and remove specific instances from it once their nodes have
//! been drained. Implementations are swappable per deployment target, and
//! tests use `MockNodePool`.

use crate::error::NodePoolError;

/// A pool of nodes that can be grown and shrunk instance by instance.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait NodePool: Send + Sync {
    /// Increase the node pool to `size` instances.
    ///
    /// Requests that are not larger than the current target size are ignored,
    /// so calling this repeatedly with the same or a smaller value is safe.
    async fn increase_to_size(&self, size: i64) -> Result<(), NodePoolError>;

    /// Delete the given instances and shrink the pool's target size by the
    /// number of instances removed.
    ///
    /// Each entry is a node's provider ID (`gce://project/zone/name`) or a
    /// bare instance name. An empty slice is a no-op.
    async fn delete_nodes(&self, instances: &[String]) -> Result<(), NodePoolError>;
}
