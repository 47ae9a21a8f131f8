//! Integration tests for the GCE node pool client
//!
//! These tests require running inside a GKE cluster with a service account
//! allowed to manage instance groups.
//! Set NODE_POOL to the GKE node pool name to run.

use nodepool_client::{GceNodePool, NodePool};

#[tokio::test]
#[ignore] // Requires GCE metadata server
async fn test_connect_to_node_pool() {
    let node_pool = std::env::var("NODE_POOL")
        .expect("NODE_POOL environment variable must be set");

    let pool = GceNodePool::connect(&node_pool).await.expect("Failed to connect");
    let group = pool.get_instance_group().await.expect("Failed to get instance group");

    println!("Instance group {} has target size {}", group.name, group.target_size);
}

#[tokio::test]
#[ignore]
async fn test_increase_to_current_size_is_noop() {
    let node_pool = std::env::var("NODE_POOL")
        .expect("NODE_POOL environment variable must be set");

    let pool = GceNodePool::connect(&node_pool).await.expect("Failed to connect");
    let before = pool.get_instance_group().await.expect("Failed to get instance group");

    pool.increase_to_size(before.target_size).await.expect("Resize failed");

    let after = pool.get_instance_group().await.expect("Failed to get instance group");
    assert_eq!(before.target_size, after.target_size);
}
