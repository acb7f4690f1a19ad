//! Job reporter for the analysis worker side.
//!
//! The worker calls [`JobReporter::report`] once per finished job; the server
//! records the outcome and relays it to the owner's live connections.

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{BatchwireError, BatchwireResult};
use crate::events::{JobFinished, JobOutcome};

/// Default notification server URL.
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3030";

/// Header carrying the shared secret for internal endpoints.
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Posts "job finished" facts to the notification server.
#[derive(Clone)]
pub struct JobReporter {
    client: reqwest::Client,
    base_url: String,
    internal_token: String,
}

impl JobReporter {
    /// Create a reporter from the environment.
    ///
    /// Uses `BATCHWIRE_SERVER_URL` (default `http://127.0.0.1:3030`) and
    /// `BATCHWIRE_INTERNAL_TOKEN` (default empty).
    pub fn from_env() -> Self {
        let base_url = std::env::var("BATCHWIRE_SERVER_URL")
            .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        let token = std::env::var("BATCHWIRE_INTERNAL_TOKEN").unwrap_or_default();
        Self::with_url(&base_url, &token)
    }

    /// Create a reporter with a custom base URL and internal token.
    pub fn with_url(base_url: &str, internal_token: &str) -> Self {
        debug!(base_url = %base_url, "JobReporter initialized");
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            internal_token: internal_token.to_string(),
        }
    }

    /// Report a finished job.
    pub async fn report(&self, fact: &JobFinished) -> BatchwireResult<()> {
        let url = format!("{}/internal/jobs/finished", self.base_url);
        debug!(
            url = %url,
            task_id = %fact.task_id,
            owner_id = %fact.owner_id,
            "Reporting finished job"
        );

        let response = self
            .client
            .post(&url)
            .header(INTERNAL_TOKEN_HEADER, &self.internal_token)
            .json(fact)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(task_id = %fact.task_id, "Job report accepted");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(task_id = %fact.task_id, status_code = %status, "Job report rejected");
            Err(BatchwireError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Report a successful job.
    pub async fn report_success(
        &self,
        owner_id: &str,
        task_id: &str,
        result: serde_json::Value,
    ) -> BatchwireResult<()> {
        self.report(&JobFinished {
            owner_id: owner_id.to_string(),
            task_id: task_id.to_string(),
            outcome: JobOutcome::Success { result },
        })
        .await
    }

    /// Report a failed job.
    pub async fn report_failure(
        &self,
        owner_id: &str,
        task_id: &str,
        message: &str,
        kind: crate::task::model::ErrorKind,
    ) -> BatchwireResult<()> {
        self.report(&JobFinished {
            owner_id: owner_id.to_string(),
            task_id: task_id.to_string(),
            outcome: JobOutcome::Failure {
                message: message.to_string(),
                kind,
            },
        })
        .await
    }
}

impl Default for JobReporter {
    fn default() -> Self {
        Self::from_env()
    }
}
