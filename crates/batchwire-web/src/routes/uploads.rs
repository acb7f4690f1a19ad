//! Chunked upload handler.

use axum::{
    extract::{Path, State},
    Json,
};
use batchwire_core::transport::{ChunkAck, UploadChunk};
use tracing::warn;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::staging::{ChunkOutcome, StagingError};
use crate::state::AppState;

/// Accept one chunk. After the last one the artifact goes to the analysis worker.
pub async fn upload_chunk(
    State(state): State<AppState>,
    AuthUser(owner_id): AuthUser,
    Path(task_id): Path<String>,
    Json(chunk): Json<UploadChunk>,
) -> Result<Json<ChunkAck>, ApiError> {
    let outcome = state
        .staging
        .accept(&owner_id, &task_id, chunk)
        .await
        .map_err(|e| match e {
            StagingError::InvalidEncoding => ApiError::BadRequest(e.to_string()),
            StagingError::OutOfOrder { .. } => ApiError::Conflict(e.to_string()),
            StagingError::TooLarge { .. } => ApiError::PayloadTooLarge(e.to_string()),
        })?;

    match outcome {
        ChunkOutcome::Partial { received } => Ok(Json(ChunkAck {
            received,
            complete: false,
        })),
        ChunkOutcome::Complete(job) => {
            let received = job.content.len() as u64;
            state.dispatcher.dispatch(job).await.map_err(|e| {
                warn!(task_id = %task_id, error = %e, "Dispatch to analysis worker failed");
                ApiError::BadGateway(e.to_string())
            })?;
            Ok(Json(ChunkAck {
                received,
                complete: true,
            }))
        }
    }
}
