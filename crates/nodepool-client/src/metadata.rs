//! GCE metadata server client
//!
//! Resolves the project, zone and GKE cluster this process runs in, and
//! issues OAuth2 access tokens for the default service account.

use crate::error::NodePoolError;
use crate::models::AccessToken;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::debug;

/// Default metadata server address inside GCE/GKE
pub const DEFAULT_METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1";

/// Tokens are refreshed this many seconds before they expire
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Cached access token
#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Client for the GCE metadata server
pub struct MetadataClient {
    client: Client,
    base_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl MetadataClient {
    /// Create a new metadata client
    ///
    /// # Arguments
    /// * `client` - Shared HTTP client
    /// * `base_url` - Metadata base URL (usually `DEFAULT_METADATA_URL`)
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch a plain-text metadata value, e.g. `project/project-id`
    pub async fn get(&self, path: &str) -> Result<String, NodePoolError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!("Fetching metadata value {}", path);

        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        if response.status() == 404 {
            return Err(NodePoolError::NotFound(format!("Metadata value {} not found", path)));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NodePoolError::Metadata(format!(
                "Failed to get metadata value {}: {} - {}",
                path, status, body
            )));
        }

        Ok(response.text().await?.trim().to_string())
    }

    /// Project id of the current instance
    pub async fn project_id(&self) -> Result<String, NodePoolError> {
        self.get("project/project-id").await
    }

    /// Zone of the current instance
    ///
    /// The server answers `projects/<number>/zones/<zone>`; only the zone is returned.
    pub async fn zone(&self) -> Result<String, NodePoolError> {
        let raw = self.get("instance/zone").await?;
        raw.rsplit('/')
            .next()
            .filter(|zone| !zone.is_empty())
            .map(str::to_string)
            .ok_or_else(|| NodePoolError::Metadata(format!("Unexpected zone format: {}", raw)))
    }

    /// Name of the GKE cluster the current instance belongs to
    pub async fn cluster_name(&self) -> Result<String, NodePoolError> {
        self.get("instance/attributes/cluster-name").await
    }

    /// Get an access token for the default service account, reusing the
    /// cached one while it is still valid
    pub async fn access_token(&self) -> Result<String, NodePoolError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let body = self.get("instance/service-accounts/default/token").await?;
        let token: AccessToken = serde_json::from_str(&body)?;
        let lifetime = (token.expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(0);
        debug!("Fetched access token valid for {}s", token.expires_in);

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(lifetime),
        });
        Ok(token.access_token)
    }
}
