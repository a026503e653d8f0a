use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use common::models::{CandidateBatch, Snapshot};
use serde::Serialize;

use super::{ErrorResponse, SuccessResponse};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub removed: bool,
}

/// Pending messages keyed by message key
#[tracing::instrument(skip(state))]
pub async fn list_messages(State(state): State<AppState>) -> SuccessResponse<Snapshot> {
    let snapshot = state.scheduler.snapshot();
    SuccessResponse::new(Snapshot::clone(&snapshot))
}

/// Ingest a batch of messages. Any invalid entry rejects the whole batch.
#[tracing::instrument(skip(state, payload))]
pub async fn ingest_messages(
    State(state): State<AppState>,
    payload: Result<Json<CandidateBatch>, JsonRejection>,
) -> Result<SuccessResponse<IngestResponse>, ErrorResponse> {
    let Json(batch) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection, "Rejected malformed ingest body");
        ErrorResponse::from(rejection)
    })?;

    let accepted = state.scheduler.upsert(batch).await?;
    Ok(SuccessResponse::new(IngestResponse { accepted }))
}

/// Remove a pending message and cancel its timer
#[tracing::instrument(skip(state))]
pub async fn delete_message(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<SuccessResponse<DeleteResponse>, ErrorResponse> {
    let removed = state.scheduler.remove(key).await?;
    Ok(SuccessResponse::new(DeleteResponse { removed }))
}
