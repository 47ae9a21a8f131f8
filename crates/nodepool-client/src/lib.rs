//! Node Pool Client
//!
//! Resizes the managed instance group that backs a Kubernetes node pool.
//!
//! The pool is grown by raising the group's target size, and shrunk only by
//! deleting named instances whose nodes have already been drained.
//!
//! # Example
//!
//! ```no_run
//! use nodepool_client::{GceNodePool, NodePool};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Resolve project, zone and cluster from the GCE metadata server
//! let pool = GceNodePool::connect("game-servers").await?;
//!
//! // Grow the pool to 5 instances (no-op if it is already 5 or larger)
//! pool.increase_to_size(5).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod metadata;
pub mod models;
#[path = "trait.rs"]
pub mod nodepool_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{GceEndpoints, GceNodePool};
pub use error::NodePoolError;
pub use metadata::MetadataClient;
pub use models::*;
pub use nodepool_trait::NodePool;
#[cfg(feature = "test-util")]
pub use mock::MockNodePool;
