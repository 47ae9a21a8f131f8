//! GCE node pool client
//!
//! Implements `NodePool` on top of a GKE node pool's managed instance group.
//! Based on the Compute Engine API (`instanceGroupManagers.get`, `.resize`
//! and `.deleteInstances`) and the Kubernetes Engine API (`nodePools.get`).

use crate::error::NodePoolError;
use crate::metadata::{MetadataClient, DEFAULT_METADATA_URL};
use crate::models::*;
use crate::nodepool_trait::NodePool;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

/// Base URLs for the Google APIs used by `GceNodePool`
#[derive(Debug, Clone)]
pub struct GceEndpoints {
    pub metadata_url: String,
    pub compute_url: String,
    pub container_url: String,
}

impl Default for GceEndpoints {
    fn default() -> Self {
        Self {
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            compute_url: "https://compute.googleapis.com".to_string(),
            container_url: "https://container.googleapis.com".to_string(),
        }
    }
}

/// Node pool backed by a GCE managed instance group
pub struct GceNodePool {
    client: Client,
    metadata: MetadataClient,
    compute_url: String,
    project: String,
    zone: String,
    instance_group: String,
}

impl std::fmt::Debug for GceNodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GceNodePool")
            .field("project", &self.project)
            .field("zone", &self.zone)
            .field("instance_group", &self.instance_group)
            .finish()
    }
}

impl GceNodePool {
    /// Connect to the instance group backing the given GKE node pool,
    /// using the real Google endpoints
    ///
    /// # Arguments
    /// * `node_pool` - GKE node pool name (the `cloud.google.com/gke-nodepool` node label)
    pub async fn connect(node_pool: &str) -> Result<Self, NodePoolError> {
        Self::connect_with(GceEndpoints::default(), node_pool).await
    }

    /// Connect using explicit endpoints
    pub async fn connect_with(endpoints: GceEndpoints, node_pool: &str) -> Result<Self, NodePoolError> {
        if node_pool.is_empty() {
            return Err(NodePoolError::InvalidRequest("Node pool name must not be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(NodePoolError::Http)?;

        let metadata = MetadataClient::new(client.clone(), endpoints.metadata_url.clone());
        let project = metadata.project_id().await?;
        let zone = metadata.zone().await?;
        let cluster = metadata.cluster_name().await?;

        let url = format!(
            "{}/v1/projects/{}/zones/{}/clusters/{}/nodePools/{}",
            endpoints.container_url.trim_end_matches('/'),
            project,
            zone,
            cluster,
            node_pool
        );
        debug!("Fetching node pool {} of cluster {}", node_pool, cluster);

        let token = metadata.access_token().await?;
        let response = client.get(&url).bearer_auth(token).send().await?;

        if response.status() == 404 {
            return Err(NodePoolError::NotFound(format!(
                "Node pool {} not found in cluster {}",
                node_pool, cluster
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NodePoolError::Api(format!(
                "Failed to get node pool {} from cluster {}: {} - {}",
                node_pool, cluster, status, body
            )));
        }

        let pool: ContainerNodePool = response.json().await?;
        let instance_group = pool
            .instance_group_name()
            .map(str::to_string)
            .ok_or_else(|| {
                NodePoolError::NotFound(format!("No instance group for node pool {}", node_pool))
            })?;

        let node_pool = Self {
            client,
            metadata,
            compute_url: endpoints.compute_url.trim_end_matches('/').to_string(),
            project,
            zone,
            instance_group,
        };
        info!("Connected to node pool: {:?}", node_pool);
        Ok(node_pool)
    }

    /// Name of the managed instance group
    pub fn instance_group(&self) -> &str {
        &self.instance_group
    }

    fn instance_group_url(&self) -> String {
        format!(
            "{}/compute/v1/projects/{}/zones/{}/instanceGroupManagers/{}",
            self.compute_url, self.project, self.zone, self.instance_group
        )
    }

    /// Get the instance group manager, including its current target size
    pub async fn get_instance_group(&self) -> Result<InstanceGroupManager, NodePoolError> {
        let token = self.metadata.access_token().await?;
        let response = self
            .client
            .get(self.instance_group_url())
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == 404 {
            return Err(NodePoolError::NotFound(format!(
                "Instance group {} not found",
                self.instance_group
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NodePoolError::Api(format!(
                "Could not get instance group data for {}: {} - {}",
                self.instance_group, status, body
            )));
        }

        Ok(response.json().await?)
    }

    /// Resize the instance group unconditionally
    async fn resize(&self, size: i64) -> Result<Operation, NodePoolError> {
        let token = self.metadata.access_token().await?;
        let url = format!("{}/resize", self.instance_group_url());
        let response = self
            .client
            .post(&url)
            .query(&[("size", size)])
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NodePoolError::Api(format!(
                "Error resizing {} to size {}: {} - {}",
                self.instance_group, size, status, body
            )));
        }

        Ok(response.json().await?)
    }

    /// Partial instance URL for a provider ID (`gce://project/zone/name`)
    /// or a bare instance name in the group's zone
    fn instance_reference(&self, instance: &str) -> Result<String, NodePoolError> {
        let invalid = || NodePoolError::InvalidRequest(format!("Invalid instance reference {:?}", instance));

        let (zone, name) = match instance.strip_prefix("gce://") {
            Some(rest) => match rest.split('/').collect::<Vec<_>>().as_slice() {
                [project, zone, name] if !project.is_empty() && !zone.is_empty() && !name.is_empty() => {
                    (*zone, *name)
                }
                _ => return Err(invalid()),
            },
            None if !instance.is_empty() && !instance.contains('/') => (self.zone.as_str(), instance),
            None => return Err(invalid()),
        };
        Ok(format!("zones/{}/instances/{}", zone, name))
    }

    /// Delete instances from the group, which also lowers its target size
    async fn delete_instances(&self, request: &DeleteInstancesRequest) -> Result<Operation, NodePoolError> {
        let token = self.metadata.access_token().await?;
        let url = format!("{}/deleteInstances", self.instance_group_url());
        let response = self
            .client
            .post(&url)
            .json(request)
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NodePoolError::Api(format!(
                "Error deleting {} instances from {}: {} - {}",
                request.instances.len(),
                self.instance_group,
                status,
                body
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl NodePool for GceNodePool {
    async fn increase_to_size(&self, size: i64) -> Result<(), NodePoolError> {
        if size < 0 {
            return Err(NodePoolError::InvalidRequest(format!("Invalid node pool size {}", size)));
        }

        info!("Attempting to increase instance group {} to size {}", self.instance_group, size);
        let group = self.get_instance_group().await?;

        if size <= group.target_size {
            info!(
                "Ignoring change to {}'s size, as target size is already {}",
                self.instance_group, group.target_size
            );
            return Ok(());
        }

        let operation = self.resize(size).await?;
        debug!("Resize operation {} started for {}", operation.name, self.instance_group);
        Ok(())
    }

    async fn delete_nodes(&self, instances: &[String]) -> Result<(), NodePoolError> {
        if instances.is_empty() {
            return Ok(());
        }

        let request = DeleteInstancesRequest {
            instances: instances
                .iter()
                .map(|instance| self.instance_reference(instance))
                .collect::<Result<_, _>>()?,
        };

        info!("Deleting instances {:?} from instance group {}", request.instances, self.instance_group);
        let operation = self.delete_instances(&request).await?;
        debug!("Delete operation {} started for {}", operation.name, self.instance_group);
        Ok(())
    }
}
