//! Durable artifact persistence behind the [`ArtifactStore`] trait.
//!
//! Two implementations exist: [`RestArtifactStore`] speaks PostgREST-style
//! HTTP to a hosted Postgres, and [`MemoryArtifactStore`] keeps everything
//! in process for tests and local runs. Both enforce the artifact state
//! machine on every status write.

mod http;
mod memory;

pub use http::RestArtifactStore;
pub use memory::MemoryArtifactStore;

use crate::artifact::{Artifact, ArtifactStatus, RecordCategory};
use crate::retrieval::{RetrievalQuery, RetrievedRecord};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned while reading or writing artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid store URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Store responded with an unexpected status code.
    #[error("Unexpected store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from the store.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// No artifact row exists for the given id.
    #[error("Artifact {0} not found")]
    NotFound(Uuid),
    /// The requested status write is not a legal state-machine edge.
    #[error("Artifact {id} cannot move {from} -> {to}")]
    IllegalTransition {
        /// Artifact whose update was refused.
        id: Uuid,
        /// Status the row currently holds.
        from: ArtifactStatus,
        /// Status the write attempted to set.
        to: ArtifactStatus,
    },
}

/// Partial update applied to one artifact row.
///
/// Absent fields are left untouched. `error_message` distinguishes between
/// "leave as is" (`None`) and "clear the column" (`Some(None)`), which the
/// serialized form renders as an explicit `null`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArtifactUpdate {
    /// Status to transition to, guarded by the state machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ArtifactStatus>,
    /// Canonical category assigned by analysis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<RecordCategory>,
    /// Summary text the embedding is generated from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_summary: Option<String>,
    /// Structured record written at terminal success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_payload: Option<Value>,
    /// Semantic vector written by the embedding stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Failure detail; `Some(None)` clears the column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<Option<String>>,
}

impl ArtifactUpdate {
    /// Update that only moves the status.
    pub fn status(next: ArtifactStatus) -> Self {
        Self {
            status: Some(next),
            ..Self::default()
        }
    }

    /// Attach a failure message to the update.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    /// Explicitly clear any stored failure message.
    pub fn clearing_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }
}

/// Persistence operations the pipeline and gateway rely on.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Insert a new artifact row; replaying the same row is a no-op.
    async fn insert(&self, artifact: &Artifact) -> Result<(), StoreError>;

    /// Fetch one artifact by id.
    async fn fetch(&self, id: Uuid) -> Result<Option<Artifact>, StoreError>;

    /// Apply a partial update, returning the row as written.
    ///
    /// When the update carries a status, the write only lands if the current
    /// row status allows that edge; otherwise
    /// [`StoreError::IllegalTransition`] is returned and nothing changes.
    async fn update(&self, id: Uuid, update: ArtifactUpdate) -> Result<Artifact, StoreError>;

    /// Successfully processed artifacts that still lack an embedding.
    async fn missing_embeddings(&self, owner_id: Option<Uuid>)
    -> Result<Vec<Artifact>, StoreError>;

    /// Owner-scoped similarity search over embedded records.
    async fn find_relevant(&self, query: &RetrievalQuery)
    -> Result<Vec<RetrievedRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_serialization_skips_untouched_fields() {
        let update = ArtifactUpdate::status(ArtifactStatus::Queued).clearing_error();
        let value = serde_json::to_value(&update).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["status"], "queued");
        assert!(object["error_message"].is_null());
    }

    #[test]
    fn update_serialization_renders_failure_message() {
        let update = ArtifactUpdate::status(ArtifactStatus::DownloadFailed)
            .with_error("signed URL fetch timed out");
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["status"], "download_failed");
        assert_eq!(value["error_message"], "signed URL fetch timed out");
    }
}
