//! HTTP ingest gateway for medscribe.
//!
//! This module exposes a compact Axum router for the upload-and-process
//! lifecycle and the retrieval RPC:
//!
//! - `POST /uploads` – Issue an upload slot: signs an upload URL and creates the artifact row.
//! - `POST /uploads/{id}/complete` – Confirm the upload finished and enqueue the pipeline job.
//! - `GET  /artifacts/{id}` – Current status and structured record of one artifact.
//! - `POST /artifacts/{id}/retry` – Re-queue an artifact stuck in a retryable failure state.
//! - `POST /artifacts/{id}/cancel` – Cancel an artifact no worker has claimed yet.
//! - `POST /retrieval/query` – Owner-scoped similarity search over processed records.
//! - `POST /maintenance/reembed` – Fill embeddings for processed artifacts that lack one.
//! - `GET  /metrics` – Pipeline counters.
//! - `GET  /health` – Liveness, exempt from authentication.
//!
//! When `GATEWAY_API_KEY` is configured, every route except `/health`
//! requires a matching `X-API-Key` header; the comparison goes through
//! SHA-256 digests so it runs in constant time regardless of input length.

use crate::artifact::{Artifact, ArtifactStatus, MediaKind, RecordCategory};
use crate::config::get_config;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{PipelineApi, PipelineError, UploadSlot, UploadSlotRequest};
use crate::retrieval::{self, RetrievalQuery, RetrievedRecord};
use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Build the HTTP router exposing the ingest gateway.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: PipelineApi + 'static,
{
    let guarded = Router::new()
        .route("/uploads", post(create_upload_slot::<S>))
        .route("/uploads/:id/complete", post(confirm_upload::<S>))
        .route("/artifacts/:id", get(get_artifact::<S>))
        .route("/artifacts/:id/retry", post(retry_artifact::<S>))
        .route("/artifacts/:id/cancel", post(cancel_artifact::<S>))
        .route("/retrieval/query", post(retrieval_query::<S>))
        .route("/maintenance/reembed", post(reembed::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route_layer(middleware::from_fn(require_api_key))
        .with_state(service);

    Router::new().route("/health", get(health)).merge(guarded)
}

/// Reject requests lacking the configured `X-API-Key`.
async fn require_api_key(request: Request, next: Next) -> Response {
    let Some(expected) = get_config().gateway_api_key.as_deref() else {
        return next.run(request).await;
    };
    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if digests_match(presented, expected) {
        next.run(request).await
    } else {
        tracing::warn!(path = %request.uri().path(), "Rejected request with a bad API key");
        (StatusCode::UNAUTHORIZED, "invalid API key").into_response()
    }
}

/// Compare two secrets by their SHA-256 digests.
///
/// Hashing first makes the comparison length-independent, so timing
/// reveals nothing about how much of the key matched.
fn digests_match(presented: &str, expected: &str) -> bool {
    hex::encode(Sha256::digest(presented.as_bytes()))
        == hex::encode(Sha256::digest(expected.as_bytes()))
}

/// Issue an upload slot and create the artifact row.
async fn create_upload_slot<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<UploadSlotRequest>,
) -> Result<(StatusCode, Json<UploadSlot>), AppError>
where
    S: PipelineApi,
{
    let slot = service.create_upload_slot(request).await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

/// Confirm the client finished uploading; enqueues the pipeline job.
async fn confirm_upload<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ArtifactView>, AppError>
where
    S: PipelineApi,
{
    let artifact = service.confirm_upload(id).await?;
    Ok(Json(ArtifactView::from(artifact)))
}

/// Current status and structured record of one artifact.
async fn get_artifact<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ArtifactView>, AppError>
where
    S: PipelineApi,
{
    let artifact = service.artifact(id).await?;
    Ok(Json(ArtifactView::from(artifact)))
}

/// Re-queue an artifact stuck in a retryable failure state.
async fn retry_artifact<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ArtifactView>, AppError>
where
    S: PipelineApi,
{
    let artifact = service.retry(id).await?;
    Ok(Json(ArtifactView::from(artifact)))
}

/// Cancel an artifact no worker has claimed yet.
async fn cancel_artifact<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ArtifactView>, AppError>
where
    S: PipelineApi,
{
    let artifact = service.cancel(id).await?;
    Ok(Json(ArtifactView::from(artifact)))
}

/// Request body for `POST /retrieval/query`.
#[derive(Deserialize)]
struct RetrievalRequest {
    /// Profile whose records are searched.
    owner_id: Uuid,
    /// Query vector, same dimension as the stored embeddings.
    embedding: Vec<f32>,
    /// Optional result limit; clamped to the configured maximum.
    #[serde(default)]
    match_count: Option<usize>,
    /// Optional similarity threshold; clamped into `[0, 1]`.
    #[serde(default)]
    match_threshold: Option<f32>,
}

/// Response body for `POST /retrieval/query`.
#[derive(Serialize)]
struct RetrievalResponse {
    matches: Vec<RetrievedRecord>,
}

/// Owner-scoped similarity search over processed records.
async fn retrieval_query<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<RetrievalRequest>,
) -> Result<Json<RetrievalResponse>, AppError>
where
    S: PipelineApi,
{
    let config = get_config();
    let query = RetrievalQuery {
        owner_id: request.owner_id,
        embedding: request.embedding,
        match_count: retrieval::clamp_match_count(
            request.match_count,
            config.retrieval_default_limit,
            config.retrieval_max_limit,
        ),
        match_threshold: retrieval::clamp_threshold(
            request.match_threshold,
            config.retrieval_default_threshold,
        ),
    };
    let matches = service.find_relevant(query).await?;
    Ok(Json(RetrievalResponse { matches }))
}

/// Request body for `POST /maintenance/reembed`.
#[derive(Deserialize, Default)]
struct ReembedRequest {
    /// Limit the pass to one owner's artifacts when set.
    #[serde(default)]
    owner_id: Option<Uuid>,
}

/// Response body for `POST /maintenance/reembed`.
#[derive(Serialize)]
struct ReembedResponse {
    reembedded: usize,
}

/// Fill embeddings for processed artifacts that lack one.
async fn reembed<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<ReembedRequest>,
) -> Result<Json<ReembedResponse>, AppError>
where
    S: PipelineApi,
{
    let reembedded = service.reembed_missing(request.owner_id).await?;
    Ok(Json(ReembedResponse { reembedded }))
}

/// Return the pipeline counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: PipelineApi,
{
    Json(service.metrics_snapshot())
}

/// Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Client-facing projection of an artifact row.
///
/// The raw embedding never leaves the server; clients only learn whether
/// one exists.
#[derive(Serialize)]
struct ArtifactView {
    id: Uuid,
    owner_id: Uuid,
    kind: MediaKind,
    display_name: String,
    media_type: String,
    status: ArtifactStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<RecordCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    header_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    structured_payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    has_embedding: bool,
    retryable: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Artifact> for ArtifactView {
    fn from(artifact: Artifact) -> Self {
        Self {
            id: artifact.id,
            owner_id: artifact.owner_id,
            kind: artifact.kind,
            display_name: artifact.display_name,
            media_type: artifact.media_type,
            status: artifact.status,
            category: artifact.category,
            header_summary: artifact.header_summary,
            structured_payload: artifact.structured_payload,
            error_message: artifact.error_message,
            has_embedding: artifact.embedding.is_some(),
            retryable: artifact.status.is_retryable_failure(),
            created_at: artifact.created_at,
            updated_at: artifact.updated_at,
        }
    }
}

struct AppError(PipelineError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            PipelineError::InvalidState { .. } => StatusCode::CONFLICT,
            PipelineError::DimensionMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Store(_) | PipelineError::Blob(_) => StatusCode::BAD_GATEWAY,
        };
        (status, self.0.to_string()).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self(inner)
    }
}
