//! Outcome lookup for clients reconciling after a reconnect.

use axum::{
    extract::{Path, State},
    Json,
};
use batchwire_core::{JobOutcome, TaskEvent};
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct JobStatusResponse {
    pub task_id: String,
    pub outcome: JobOutcome,
    /// The outcome in the same shape as a live task event.
    pub event: TaskEvent,
}

pub async fn get_job(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let outcome = state
        .ledger
        .lookup(&owner_id, &task_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no recorded outcome for task {}", task_id)))?;

    let event = TaskEvent::from(&batchwire_core::JobFinished {
        owner_id,
        task_id: task_id.clone(),
        outcome: outcome.clone(),
    });

    Ok(Json(JobStatusResponse {
        task_id,
        outcome,
        event,
    }))
}
