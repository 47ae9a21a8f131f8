//! Google Cloud API models
//!
//! Only the fields the resize flow reads are modelled.

use serde::{Deserialize, Serialize};

/// Compute Engine managed instance group manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGroupManager {
    pub name: String,
    /// Target size, serialized by the API as a number
    #[serde(default)]
    pub target_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

/// GKE node pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerNodePool {
    pub name: String,
    #[serde(default)]
    pub instance_group_urls: Vec<String>,
}

impl ContainerNodePool {
    /// Name of the first managed instance group backing this node pool.
    ///
    /// The URL looks like
    /// `https://www.googleapis.com/compute/v1/projects/p/zones/z/instanceGroupManagers/gke-...-grp`.
    pub fn instance_group_name(&self) -> Option<&str> {
        self.instance_group_urls
            .first()
            .and_then(|url| url.trim_end_matches('/').rsplit('/').next())
            .filter(|name| !name.is_empty())
    }
}

/// Compute Engine long-running operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub target_link: Option<String>,
}

/// Body of `instanceGroupManagers.deleteInstances`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteInstancesRequest {
    /// Partial instance URLs, `zones/{zone}/instances/{name}`
    pub instances: Vec<String>,
}

/// OAuth2 access token issued by the metadata server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    pub token_type: String,
}
