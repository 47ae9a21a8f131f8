//! Mock NodePool for unit testing
//!
//! This module provides an in-memory implementation of `NodePool` that can be
//! used in unit tests without a cloud project.

use crate::error::NodePoolError;
use crate::nodepool_trait::NodePool;
use std::sync::{Arc, Mutex};

/// Mock NodePool for testing
///
/// Tracks the current target size, every requested size and every deleted
/// instance, and can be configured to fail.
#[derive(Clone, Debug, Default)]
pub struct MockNodePool {
    size: Arc<Mutex<i64>>,
    requests: Arc<Mutex<Vec<i64>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl MockNodePool {
    /// Create a new mock pool with the given target size
    pub fn new(size: i64) -> Self {
        let pool = Self::default();
        *lock(&pool.size) = size;
        pool
    }

    /// Current target size
    pub fn size(&self) -> i64 {
        *lock(&self.size)
    }

    /// Every size passed to `increase_to_size`, in call order
    pub fn requests(&self) -> Vec<i64> {
        lock(&self.requests).clone()
    }

    /// Every instance passed to `delete_nodes`, in call order
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    /// Make subsequent calls fail with an API error (`None` to recover)
    pub fn set_failure(&self, message: Option<&str>) {
        *lock(&self.fail_with) = message.map(str::to_string);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait::async_trait]
impl NodePool for MockNodePool {
    async fn increase_to_size(&self, size: i64) -> Result<(), NodePoolError> {
        lock(&self.requests).push(size);
        if let Some(message) = lock(&self.fail_with).clone() {
            return Err(NodePoolError::Api(message));
        }

        let mut current = lock(&self.size);
        if size > *current {
            *current = size;
        }
        Ok(())
    }

    async fn delete_nodes(&self, instances: &[String]) -> Result<(), NodePoolError> {
        if instances.is_empty() {
            return Ok(());
        }
        if let Some(message) = lock(&self.fail_with).clone() {
            return Err(NodePoolError::Api(message));
        }

        lock(&self.deleted).extend(instances.iter().cloned());
        let mut current = lock(&self.size);
        let removed = i64::try_from(instances.len()).unwrap_or(i64::MAX);
        *current = current.saturating_sub(removed).max(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increase_to_size_only_grows() {
        let pool = MockNodePool::new(2);
        pool.increase_to_size(5).await.unwrap();
        assert_eq!(pool.size(), 5);

        pool.increase_to_size(5).await.unwrap();
        pool.increase_to_size(3).await.unwrap();
        assert_eq!(pool.size(), 5);
        assert_eq!(pool.requests(), vec![5, 5, 3]);
    }

    #[tokio::test]
    async fn test_failure_leaves_size_unchanged() {
        let pool = MockNodePool::new(1);
        pool.set_failure(Some("quota exceeded"));
        assert!(pool.increase_to_size(4).await.is_err());
        assert_eq!(pool.size(), 1);

        pool.set_failure(None);
        pool.increase_to_size(4).await.unwrap();
        assert_eq!(pool.size(), 4);
    }

    #[tokio::test]
    async fn test_delete_nodes_shrinks_pool() {
        let pool = MockNodePool::new(3);
        pool.delete_nodes(&[]).await.unwrap();
        assert_eq!(pool.size(), 3);

        let instances = vec![
            "gce://p/us-west1-b/node-1".to_string(),
            "gce://p/us-west1-b/node-2".to_string(),
        ];
        pool.delete_nodes(&instances).await.unwrap();
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.deleted(), instances);

        pool.set_failure(Some("instance not in group"));
        assert!(pool.delete_nodes(&["node-3".to_string()]).await.is_err());
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.deleted().len(), 2);
    }
}
