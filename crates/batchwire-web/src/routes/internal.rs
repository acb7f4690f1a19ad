//! Internal endpoints, called by the analysis worker.

use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use batchwire_core::notifier::INTERNAL_TOKEN_HEADER;
use batchwire_core::JobFinished;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Receive a finished job, record it for reconciliation and relay it to the owner.
///
/// A repeated report for the same task is acknowledged but not relayed again.
/// Reports are refused while no internal token is configured.
pub async fn job_finished(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(fact): Json<JobFinished>,
) -> Result<StatusCode, ApiError> {
    if state.internal_token.is_empty() {
        warn!(task_id = %fact.task_id, "Job report refused, no internal token configured");
        return Err(ApiError::Forbidden);
    }
    let presented = headers
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != &*state.internal_token {
        warn!(task_id = %fact.task_id, "Job report with bad internal token");
        return Err(ApiError::Forbidden);
    }

    if !state.ledger.record(&fact).await {
        debug!(task_id = %fact.task_id, owner_id = %fact.owner_id, "Duplicate job report ignored");
        return Ok(StatusCode::OK);
    }

    info!(task_id = %fact.task_id, owner_id = %fact.owner_id, "Job finished, relaying to owner");
    // Not relayed means not recorded, so the worker's retry is relayed.
    if let Err(err) = state.facts.send(fact).await {
        let fact = err.0;
        state.ledger.forget(&fact.owner_id, &fact.task_id).await;
        warn!(task_id = %fact.task_id, "Event bridge stopped, job report not relayed");
        return Err(ApiError::Unavailable("event bridge stopped".to_string()));
    }

    Ok(StatusCode::ACCEPTED)
}
