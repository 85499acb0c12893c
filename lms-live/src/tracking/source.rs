//! Poll endpoint client

use crate::error::SourceError;
use async_trait::async_trait;
use lms_common::events::PollSnapshot;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Source of full progress snapshots
#[async_trait]
pub trait ProgressSource: Send + Sync {
    async fn fetch_progress(&self, job_id: &str) -> Result<PollSnapshot, SourceError>;
}

/// `GET <base>/api/analysis/<job_id>/progress`
pub struct HttpProgressSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpProgressSource {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn progress_url(&self, job_id: &str) -> String {
        format!("{}/api/analysis/{}/progress", self.base_url, job_id)
    }
}

#[async_trait]
impl ProgressSource for HttpProgressSource {
    async fn fetch_progress(&self, job_id: &str) -> Result<PollSnapshot, SourceError> {
        let url = self.progress_url(job_id);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!("GET {} -> {}", url, status);

        if status.is_success() {
            return Ok(response.json::<PollSnapshot>().await?);
        }
        match status {
            StatusCode::NOT_FOUND => Err(SourceError::NotFound(job_id.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SourceError::Unauthorized),
            other => Err(SourceError::Status {
                status: other.as_u16(),
                url,
            }),
        }
    }
}
