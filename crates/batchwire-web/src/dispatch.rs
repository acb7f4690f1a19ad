//! Hand-off of uploaded artifacts to the external analysis worker.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// An uploaded artifact with its correlation pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisJob {
    pub owner_id: String,
    pub task_id: String,
    pub label: String,
    pub content: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("worker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("worker rejected job with status {0}")]
    Rejected(u16),
}

/// Sends jobs to the analysis worker. Fire-and-forget: the outcome arrives
/// later through `/internal/jobs/finished`.
#[async_trait]
pub trait AnalysisDispatcher: Send + Sync {
    async fn dispatch(&self, job: AnalysisJob) -> Result<(), DispatchError>;
}

#[derive(Serialize)]
struct JobRequest<'a> {
    owner_id: &'a str,
    task_id: &'a str,
    label: &'a str,
    content: String,
}

/// Posts jobs as JSON to a worker endpoint.
pub struct HttpDispatcher {
    client: reqwest::Client,
    url: String,
}

impl HttpDispatcher {
    pub fn new(url: &str) -> Self {
        debug!(url, "HttpDispatcher initialized");
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl AnalysisDispatcher for HttpDispatcher {
    async fn dispatch(&self, job: AnalysisJob) -> Result<(), DispatchError> {
        let body = JobRequest {
            owner_id: &job.owner_id,
            task_id: &job.task_id,
            label: &job.label,
            content: STANDARD.encode(&job.content),
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(task_id = %job.task_id, status_code = %status, "Worker rejected job");
            return Err(DispatchError::Rejected(status.as_u16()));
        }

        info!(
            task_id = %job.task_id,
            owner_id = %job.owner_id,
            bytes = job.content.len(),
            "Job dispatched"
        );
        Ok(())
    }
}

/// Used when no worker is configured: logs the job and drops it.
///
/// Tasks uploaded against it stay `processing`.
pub struct LogDispatcher;

#[async_trait]
impl AnalysisDispatcher for LogDispatcher {
    async fn dispatch(&self, job: AnalysisJob) -> Result<(), DispatchError> {
        warn!(
            task_id = %job.task_id,
            owner_id = %job.owner_id,
            label = %job.label,
            bytes = job.content.len(),
            "No analysis worker configured, job dropped"
        );
        Ok(())
    }
}
