//! Upload session handlers.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{
    BYTES_ACCEPTED, CHUNK_UPLOAD_DURATION, CHUNKS_ACCEPTED, CHUNKS_DUPLICATE,
    UPLOAD_COMPLETE_DURATION, UPLOAD_SESSIONS_COMPLETED, UPLOAD_SESSIONS_CREATED,
    UPLOAD_SESSIONS_DELETED, set_active_sessions,
};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, JsonRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use parcel_core::{UploadId, UploadRequest, UploadStatus};
use parcel_upload::SessionSnapshot;
use serde::Serialize;
use std::time::Instant;

/// Response to a successful initiation.
#[derive(Debug, Serialize)]
pub struct CreateUploadResponse {
    pub upload_id: UploadId,
    pub chunk_size: u64,
}

/// Response to an accepted chunk.
#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub status: &'static str,
}

/// Response to a successful completion.
#[derive(Debug, Serialize)]
pub struct CompleteUploadResponse {
    pub status: UploadStatus,
    pub upload_id: UploadId,
    pub digest: String,
}

fn parse_upload_id(raw: &str) -> ApiResult<UploadId> {
    UploadId::parse(raw).map_err(|e| ApiError::BadRequest(format!("invalid upload ID: {e}")))
}

fn parse_chunk_index(raw: &str) -> ApiResult<u32> {
    raw.parse::<u32>()
        .map_err(|_| ApiError::BadRequest(format!("invalid chunk index: {raw}")))
}

/// POST /api/fleet/uploads - initiate an upload session.
#[tracing::instrument(skip(state, payload), fields(upload_id))]
pub async fn create_upload(
    State(state): State<AppState>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> ApiResult<Json<CreateUploadResponse>> {
    let Json(request) = payload?;

    let begun = state.uploader.begin(&request).await?;
    tracing::Span::current().record("upload_id", tracing::field::display(begun.upload_id));

    UPLOAD_SESSIONS_CREATED.inc();
    set_active_sessions(state.uploader.open_sessions());

    Ok(Json(CreateUploadResponse {
        upload_id: begun.upload_id,
        chunk_size: begun.chunk_size,
    }))
}

/// PUT /api/fleet/uploads/{upload_id}/{chunk} - submit one chunk as a raw body.
#[tracing::instrument(skip(state, body), fields(upload_id = %upload_id, chunk = %chunk))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((upload_id, chunk)): Path<(String, String)>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<ChunkResponse>> {
    let start_time = Instant::now();
    let upload_id = parse_upload_id(&upload_id)?;
    let index = parse_chunk_index(&chunk)?;
    let payload = body?;

    let receipt = state
        .uploader
        .submit_chunk(&upload_id, index, payload)
        .await?;

    if receipt.duplicate {
        CHUNKS_DUPLICATE.inc();
    } else {
        CHUNKS_ACCEPTED.inc();
        BYTES_ACCEPTED.inc_by(receipt.size);
    }
    CHUNK_UPLOAD_DURATION.observe(start_time.elapsed().as_secs_f64());

    if receipt.first_received {
        tracing::debug!("first chunk received");
    }

    Ok(Json(ChunkResponse { status: "ok" }))
}

/// POST /api/fleet/uploads/{upload_id} - verify the digest and finish the upload.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn complete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<CompleteUploadResponse>> {
    let start_time = Instant::now();
    let upload_id = parse_upload_id(&upload_id)?;

    let result = state.uploader.complete(&upload_id).await;
    set_active_sessions(state.uploader.open_sessions());
    let outcome = result?;

    UPLOAD_SESSIONS_COMPLETED.inc();
    UPLOAD_COMPLETE_DURATION.observe(start_time.elapsed().as_secs_f64());

    Ok(Json(CompleteUploadResponse {
        status: outcome.status,
        upload_id: outcome.upload_id,
        digest: outcome.digest,
    }))
}

/// GET /api/fleet/uploads/{upload_id} - report session progress.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn get_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<SessionSnapshot>> {
    let upload_id = parse_upload_id(&upload_id)?;
    let snapshot = state.uploader.status(&upload_id).await?;
    Ok(Json(snapshot))
}

/// DELETE /api/fleet/uploads/{upload_id} - abandon a session.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn delete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<StatusCode> {
    let upload_id = parse_upload_id(&upload_id)?;

    let result = state.uploader.delete(&upload_id).await;
    set_active_sessions(state.uploader.open_sessions());
    result?;

    UPLOAD_SESSIONS_DELETED.inc();
    Ok(StatusCode::NO_CONTENT)
}
