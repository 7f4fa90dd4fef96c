use crate::error::{DistillError, Result};
use crate::persistence::{check_batch_id, PersistenceGateway};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Body of `POST /api/save-processed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRequest {
    pub content: String,
    pub filename: String,
    /// Batch id, already stripped of `:` and `.`
    pub timestamp: String,
}

/// Reply of `POST /api/save-processed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persistence through a remote save endpoint
pub struct HttpGateway {
    client: Client,
    endpoint: String,
}

impl HttpGateway {
    /// `endpoint` is the full URL of the save route, e.g.
    /// `http://127.0.0.1:3000/api/save-processed`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DistillError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl PersistenceGateway for HttpGateway {
    async fn store(&self, batch_id: &str, filename: &str, content: &str) -> Result<PathBuf> {
        check_batch_id(batch_id)?;

        let request = SaveRequest {
            content: content.to_string(),
            filename: filename.to_string(),
            timestamp: batch_id.to_string(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| DistillError::Storage(format!("Network error: {}", e)))?;

        let status = response.status();
        let reply: Option<SaveResponse> = response.json().await.ok();

        match reply {
            Some(SaveResponse { success: true, path: Some(path), .. }) if status.is_success() => {
                Ok(PathBuf::from(path))
            }
            Some(SaveResponse { error: Some(error), .. }) => Err(DistillError::Storage(format!(
                "Failed to save processed file ({}): {}",
                status, error
            ))),
            _ => Err(DistillError::Storage(format!(
                "Failed to save processed file ({})",
                status
            ))),
        }
    }
}
