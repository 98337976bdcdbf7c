//! Pipeline orchestration: gateway operations and the per-artifact state machine.
//!
//! [`PipelineService`] is the one place artifacts change state. The ingest
//! gateway calls its slot/confirm/retry/cancel operations, and queue workers
//! call [`PipelineService::advance`] to drive one artifact through the
//! download, recognition, analysis and embedding stages. Recording and
//! document artifacts share the orchestrator; the parts that differ live
//! behind the [`MediaStrategy`] trait.

mod error;
mod service;
mod strategy;

pub use error::StageError;
pub use service::PipelineService;
pub use strategy::{DocumentStrategy, MediaStrategy, Recognized, RecordingStrategy, for_kind};

use crate::artifact::{Artifact, ArtifactStatus, MediaKind};
use crate::blob::BlobError;
use crate::metrics::MetricsSnapshot;
use crate::retrieval::{RetrievalQuery, RetrievedRecord};
use crate::store::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Request to create an upload slot for a new artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadSlotRequest {
    /// Profile the artifact will belong to.
    pub owner_id: Uuid,
    /// Pipeline variant the upload is destined for.
    pub kind: MediaKind,
    /// Original file name; becomes the artifact's display name.
    pub file_name: String,
    /// MIME type the client will upload.
    pub media_type: String,
}

/// Issued upload slot: a pending artifact plus a pre-authorized URL.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSlot {
    /// Identifier of the freshly created artifact row.
    pub artifact_id: Uuid,
    /// URL the client uploads the object bytes to.
    pub upload_url: String,
    /// Object key the bytes will land at.
    pub storage_path: String,
}

/// Errors surfaced by gateway-facing pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No artifact row exists for the given id.
    #[error("Artifact {0} not found")]
    NotFound(Uuid),
    /// The declared MIME type is outside the kind's allow-list.
    #[error("Media type {media_type:?} is not accepted for {kind} uploads")]
    UnsupportedMediaType {
        /// Pipeline variant the upload was destined for.
        kind: MediaKind,
        /// MIME type the client declared.
        media_type: String,
    },
    /// The artifact's current status does not permit the requested action.
    #[error("Artifact {id} is {status}; cannot {action}")]
    InvalidState {
        /// Artifact the action targeted.
        id: Uuid,
        /// Status the artifact currently holds.
        status: ArtifactStatus,
        /// Action that was refused.
        action: &'static str,
    },
    /// A retrieval query vector does not match the store's dimension.
    #[error("Query vector has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        /// Dimension the stored embeddings use.
        expected: usize,
        /// Dimension the query supplied.
        actual: usize,
    },
    /// Artifact store read or write failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Blob service call failed.
    #[error(transparent)]
    Blob(#[from] BlobError),
}

/// Pipeline operations the ingest gateway exposes over HTTP.
///
/// The router is generic over this trait so handlers can be exercised with
/// a stub service in tests.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Issue an upload slot and create the artifact row at `pending_upload`.
    async fn create_upload_slot(
        &self,
        request: UploadSlotRequest,
    ) -> Result<UploadSlot, PipelineError>;

    /// Confirm that the client finished uploading; enqueues the pipeline job.
    async fn confirm_upload(&self, id: Uuid) -> Result<Artifact, PipelineError>;

    /// Fetch one artifact.
    async fn artifact(&self, id: Uuid) -> Result<Artifact, PipelineError>;

    /// Re-queue an artifact stuck in a retryable failure state.
    async fn retry(&self, id: Uuid) -> Result<Artifact, PipelineError>;

    /// Cancel an artifact that no worker has claimed yet.
    async fn cancel(&self, id: Uuid) -> Result<Artifact, PipelineError>;

    /// Owner-scoped similarity search over processed records.
    async fn find_relevant(
        &self,
        query: RetrievalQuery,
    ) -> Result<Vec<RetrievedRecord>, PipelineError>;

    /// Fill embeddings for processed artifacts that lack one.
    async fn reembed_missing(&self, owner_id: Option<Uuid>) -> Result<usize, PipelineError>;

    /// Snapshot of the pipeline counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}
