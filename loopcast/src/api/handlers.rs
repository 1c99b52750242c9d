//! HTTP request handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use loopcast_common::events::{LogEvent, SessionState};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use crate::error::{Error, Result};
use crate::media::{DeleteReport, EraseScope, MediaAsset, MediaKind};
use crate::supervisor::{StartRequest, StartedSession, SupervisorStatus};

/// Upper bound for `?limit=` on log queries
const MAX_LOG_LIMIT: u32 = 1000;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct MediaListResponse {
    pub kind: MediaKind,
    pub assets: Vec<MediaAsset>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub uploaded: Vec<MediaAsset>,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub state: SessionState,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub session_id: String,
    pub events: Vec<LogEvent>,
}

// ============================================================================
// Health
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "loopcast".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Media
// ============================================================================

/// GET /api/media/:kind
pub async fn list_media(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<MediaListResponse>> {
    let kind: MediaKind = kind.parse()?;
    let assets = state.supervisor.media().list(kind).await?;
    Ok(Json(MediaListResponse { kind, assets }))
}

/// POST /api/media/:kind - multipart upload, one or more file fields
///
/// The stored name is the part's file name, falling back to the field name.
pub async fn upload_media(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let kind: MediaKind = kind.parse()?;
    let media = state.supervisor.media();
    let mut uploaded = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidInput(format!("Malformed upload: {}", e)))?
    {
        let Some(name) = field
            .file_name()
            .or_else(|| field.name())
            .map(str::to_string)
        else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidInput(format!("Failed to read upload {}: {}", name, e)))?;

        uploaded.push(media.put(kind, &name, &bytes).await?);
    }

    if uploaded.is_empty() {
        return Err(Error::InvalidInput("Upload contained no files".to_string()));
    }

    info!(kind = %kind, count = uploaded.len(), "Stored uploaded media");
    Ok((StatusCode::CREATED, Json(UploadResponse { uploaded })))
}

/// DELETE /api/media - erase both kinds
pub async fn erase_all_media(State(state): State<AppState>) -> Result<Json<DeleteReport>> {
    let report = state.supervisor.media().erase(EraseScope::All).await?;
    Ok(Json(report))
}

/// DELETE /api/media/:kind
pub async fn erase_media_kind(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<DeleteReport>> {
    let kind: MediaKind = kind.parse()?;
    let report = state.supervisor.media().erase(EraseScope::Kind(kind)).await?;
    Ok(Json(report))
}

/// DELETE /api/media/:kind/:name
pub async fn delete_media(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<StatusCode> {
    let kind: MediaKind = kind.parse()?;
    state.supervisor.media().delete_one(kind, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Streaming
// ============================================================================

/// POST /api/stream/start
pub async fn start_stream(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartedSession>> {
    let started = state.supervisor.start(request).await?;
    Ok(Json(started))
}

/// POST /api/stream/stop
pub async fn stop_stream(State(state): State<AppState>) -> Result<Json<StopResponse>> {
    let state = state.supervisor.stop().await?;
    Ok(Json(StopResponse { state }))
}

/// GET /api/stream/status
pub async fn stream_status(State(state): State<AppState>) -> Json<SupervisorStatus> {
    Json(state.supervisor.status().await)
}

/// GET /api/sessions/:session_id/logs?limit=
pub async fn session_logs(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>> {
    let limit = query
        .limit
        .unwrap_or(state.supervisor.config().recent_event_limit)
        .min(MAX_LOG_LIMIT);
    let events = state
        .supervisor
        .event_log()
        .recent(&session_id, limit)
        .await?;
    Ok(Json(LogsResponse { session_id, events }))
}
