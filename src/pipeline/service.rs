//! The pipeline service: gateway operations plus the queue-driven orchestrator.

use crate::artifact::{Artifact, ArtifactStatus, MediaKind};
use crate::blob::BlobStore;
use crate::embedding::EmbeddingClient;
use crate::extraction::ExtractionClient;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::pipeline::strategy::{self, MediaStrategy};
use crate::pipeline::{PipelineApi, PipelineError, StageError, UploadSlot, UploadSlotRequest};
use crate::queue::{JobDelivery, JobQueue, PipelineJob};
use crate::retrieval::{RetrievalQuery, RetrievedRecord};
use crate::store::{ArtifactStore, ArtifactUpdate, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Coordinates artifact state across the store, blob service, extraction
/// and embedding providers, and the job queue.
///
/// All collaborators sit behind traits, so tests compose the service from
/// in-memory stores and scripted provider stubs.
pub struct PipelineService {
    store: Arc<dyn ArtifactStore>,
    blob: Arc<dyn BlobStore>,
    extraction: Arc<dyn ExtractionClient>,
    embedding: Arc<dyn EmbeddingClient>,
    queue: Arc<dyn JobQueue>,
    metrics: Arc<PipelineMetrics>,
    embedding_dimension: usize,
}

impl PipelineService {
    /// Compose the service from its collaborators.
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        blob: Arc<dyn BlobStore>,
        extraction: Arc<dyn ExtractionClient>,
        embedding: Arc<dyn EmbeddingClient>,
        queue: Arc<dyn JobQueue>,
        embedding_dimension: usize,
    ) -> Self {
        Self {
            store,
            blob,
            extraction,
            embedding,
            queue,
            metrics: Arc::new(PipelineMetrics::new()),
            embedding_dimension,
        }
    }

    /// Pipeline counters shared with the worker pool.
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Drive one queued job through the stages; the worker entry point.
    ///
    /// Safe under at-least-once delivery: a delivery that finds its artifact
    /// already finished re-confirms without work, and every stage write is
    /// an upsert the state machine lets replay. Returns `Err` only for
    /// retryable failures, so the caller can ask the queue for redelivery;
    /// non-retryable failures are persisted and swallowed.
    pub async fn advance(&self, delivery: &JobDelivery) -> Result<(), StageError> {
        let job = &delivery.job;
        let artifact = self
            .store
            .fetch(job.artifact_id)
            .await
            .map_err(StageError::Store)?;
        let Some(artifact) = artifact else {
            tracing::warn!(artifact = %job.artifact_id, "Delivery for an unknown artifact; dropping");
            return Ok(());
        };

        if artifact.status.is_terminal_success() {
            tracing::debug!(
                artifact = %artifact.id,
                status = %artifact.status,
                "Duplicate delivery for a finished artifact; re-confirming"
            );
            self.metrics.record_duplicate_delivery();
            return Ok(());
        }
        if matches!(
            artifact.status,
            ArtifactStatus::Cancelled | ArtifactStatus::ProcessingFailed
        ) {
            tracing::debug!(
                artifact = %artifact.id,
                status = %artifact.status,
                "Delivery for a dead artifact; dropping"
            );
            return Ok(());
        }

        let strategy = strategy::for_kind(artifact.kind);
        if !self.claim(&artifact).await? {
            return Ok(());
        }

        tracing::info!(
            artifact = %artifact.id,
            kind = %artifact.kind,
            attempt = delivery.attempt,
            "Running pipeline stages"
        );
        match self.run_stages(job, strategy, &artifact).await {
            Ok(()) => {
                self.metrics.record_job_completed();
                tracing::info!(artifact = %artifact.id, "Pipeline run completed");
                Ok(())
            }
            Err(error) => {
                self.fail(artifact.id, artifact.kind, delivery.attempt, error)
                    .await
            }
        }
    }

    /// Move the artifact to `processing`, clearing any stale error.
    ///
    /// Returns `false` when the delivery should be dropped instead. A
    /// redelivery that finds the artifact mid-pipeline (a crash after the
    /// recognition write) cannot take the `processing` edge; it still runs,
    /// and the stage writes below re-confirm as no-ops.
    async fn claim(&self, artifact: &Artifact) -> Result<bool, StageError> {
        let update = ArtifactUpdate::status(ArtifactStatus::Processing).clearing_error();
        match self.store.update(artifact.id, update).await {
            Ok(_) => Ok(true),
            Err(StoreError::IllegalTransition { from, .. })
                if from == artifact.kind.recognized_status() =>
            {
                tracing::debug!(
                    artifact = %artifact.id,
                    status = %from,
                    "Redelivery found a mid-pipeline artifact; resuming"
                );
                Ok(true)
            }
            Err(StoreError::IllegalTransition { from, .. }) => {
                // Another actor moved the row since the fetch; treat the
                // delivery as a duplicate and drop it.
                tracing::warn!(
                    artifact = %artifact.id,
                    status = %from,
                    "Delivery for an unclaimable artifact; dropping"
                );
                self.metrics.record_duplicate_delivery();
                Ok(false)
            }
            Err(err) => Err(StageError::Store(err)),
        }
    }

    async fn run_stages(
        &self,
        job: &PipelineJob,
        strategy: &dyn MediaStrategy,
        artifact: &Artifact,
    ) -> Result<(), StageError> {
        let kind = artifact.kind;
        if !strategy.accepts(&artifact.media_type) {
            return Err(StageError::UnsupportedInput {
                kind,
                media_type: artifact.media_type.clone(),
            });
        }

        let bytes = self
            .blob
            .download(&job.storage_path)
            .await
            .map_err(StageError::from_download)?;
        tracing::debug!(artifact = %artifact.id, bytes = bytes.len(), "Download stage finished");

        let recognized = strategy
            .recognize(self.extraction.as_ref(), &bytes, &artifact.media_type)
            .await?;
        self.store
            .update(artifact.id, ArtifactUpdate::status(kind.recognized_status()))
            .await
            .map_err(StageError::Store)?;
        tracing::debug!(artifact = %artifact.id, status = %kind.recognized_status(), "Recognition stage finished");

        let analyzed = strategy
            .analyze(self.extraction.as_ref(), recognized, &artifact.display_name)
            .await?;

        let embedding = self
            .embed_summary(artifact.id, &analyzed.header_summary)
            .await;

        let update = ArtifactUpdate {
            status: Some(kind.success_status()),
            category: Some(analyzed.category),
            header_summary: Some(analyzed.header_summary),
            structured_payload: Some(analyzed.payload),
            embedding,
            error_message: Some(None),
        };
        self.store
            .update(artifact.id, update)
            .await
            .map_err(StageError::Store)?;
        Ok(())
    }

    /// Embed the header summary; failures are logged and swallowed.
    async fn embed_summary(&self, id: Uuid, summary: &str) -> Option<Vec<f32>> {
        if summary.is_empty() {
            tracing::debug!(artifact = %id, "No summary text to embed");
            return None;
        }
        match self.embedding.embed(summary).await {
            Ok(vector) => {
                self.metrics.record_embedded();
                Some(vector)
            }
            Err(error) => {
                tracing::warn!(
                    artifact = %id,
                    error = %error,
                    "Embedding failed; artifact completes without a vector"
                );
                self.metrics.record_embedding_failure();
                None
            }
        }
    }

    /// Persist a stage failure and decide propagation by its classification.
    async fn fail(
        &self,
        id: Uuid,
        kind: MediaKind,
        attempt: u32,
        error: StageError,
    ) -> Result<(), StageError> {
        self.metrics.record_job_failed();
        let Some(status) = error.failure_status(kind) else {
            tracing::error!(
                artifact = %id,
                attempt,
                error = %error,
                "Store write failed mid-pipeline; nothing persisted for this attempt"
            );
            return Err(error);
        };

        let update = ArtifactUpdate::status(status).with_error(error.to_string());
        if let Err(write_error) = self.store.update(id, update).await {
            tracing::error!(
                artifact = %id,
                error = %write_error,
                "Failed to persist failure status"
            );
        }

        if error.retryable() {
            tracing::warn!(
                artifact = %id,
                attempt,
                status = %status,
                error = %error,
                "Stage failed; eligible for redelivery"
            );
            Err(error)
        } else {
            tracing::warn!(
                artifact = %id,
                status = %status,
                error = %error,
                "Stage failed terminally"
            );
            Ok(())
        }
    }

    /// Write `queued` and hand the job to the queue.
    ///
    /// The status lands before the handoff so a fast worker claim never
    /// races the write; a broken handoff rolls the row to `failed`.
    async fn enqueue_job(&self, artifact: Artifact) -> Result<Artifact, PipelineError> {
        let queued = self
            .store
            .update(
                artifact.id,
                ArtifactUpdate::status(ArtifactStatus::Queued).clearing_error(),
            )
            .await?;

        let job = PipelineJob {
            artifact_id: artifact.id,
            owner_id: artifact.owner_id,
            kind: artifact.kind,
            storage_path: artifact.storage_path.clone(),
            display_name: Some(artifact.display_name.clone()),
        };
        match self.queue.enqueue(job).await {
            Ok(()) => {
                self.metrics.record_job_enqueued();
                Ok(queued)
            }
            Err(error) => {
                tracing::error!(artifact = %artifact.id, error = %error, "Enqueue failed");
                Ok(self
                    .store
                    .update(
                        artifact.id,
                        ArtifactUpdate::status(ArtifactStatus::Failed)
                            .with_error(error.to_string()),
                    )
                    .await?)
            }
        }
    }

    async fn fetch_required(&self, id: Uuid) -> Result<Artifact, PipelineError> {
        self.store
            .fetch(id)
            .await?
            .ok_or(PipelineError::NotFound(id))
    }
}

#[async_trait]
impl PipelineApi for PipelineService {
    async fn create_upload_slot(
        &self,
        request: UploadSlotRequest,
    ) -> Result<UploadSlot, PipelineError> {
        let strategy = strategy::for_kind(request.kind);
        if !strategy.accepts(&request.media_type) {
            return Err(PipelineError::UnsupportedMediaType {
                kind: request.kind,
                media_type: request.media_type,
            });
        }

        let id = Uuid::new_v4();
        let storage_path = format!(
            "{}/{}/{}",
            request.owner_id,
            request.kind.storage_segment(),
            id
        );
        let upload_url = self.blob.create_upload_url(&storage_path).await?;

        let now = Utc::now();
        let artifact = Artifact {
            id,
            owner_id: request.owner_id,
            kind: request.kind,
            storage_path: storage_path.clone(),
            display_name: request.file_name,
            media_type: request.media_type,
            status: ArtifactStatus::PendingUpload,
            category: None,
            header_summary: None,
            structured_payload: None,
            embedding: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&artifact).await?;
        self.metrics.record_slot_created();
        tracing::info!(
            artifact = %id,
            owner = %artifact.owner_id,
            kind = %artifact.kind,
            "Issued upload slot"
        );

        Ok(UploadSlot {
            artifact_id: id,
            upload_url,
            storage_path,
        })
    }

    async fn confirm_upload(&self, id: Uuid) -> Result<Artifact, PipelineError> {
        let artifact = self.fetch_required(id).await?;
        match artifact.status {
            ArtifactStatus::PendingUpload => {
                let uploaded = self
                    .store
                    .update(id, ArtifactUpdate::status(ArtifactStatus::Uploaded))
                    .await?;
                self.enqueue_job(uploaded).await
            }
            // A crash between the `uploaded` write and the queue handoff
            // leaves the row here; the client's replayed confirm is its
            // recovery path, so hand the job over again. A double enqueue
            // is safe under the worker lease and the duplicate-delivery
            // drop.
            ArtifactStatus::Uploaded => self.enqueue_job(artifact).await,
            // Replayed confirmation; the job is already underway.
            ArtifactStatus::Queued => Ok(artifact),
            status => Err(PipelineError::InvalidState {
                id,
                status,
                action: "confirm upload",
            }),
        }
    }

    async fn artifact(&self, id: Uuid) -> Result<Artifact, PipelineError> {
        self.fetch_required(id).await
    }

    async fn retry(&self, id: Uuid) -> Result<Artifact, PipelineError> {
        let artifact = self.fetch_required(id).await?;
        if !artifact.status.is_retryable_failure() {
            return Err(PipelineError::InvalidState {
                id,
                status: artifact.status,
                action: "retry",
            });
        }
        tracing::info!(artifact = %id, from = %artifact.status, "Re-queueing after failure");
        self.enqueue_job(artifact).await
    }

    async fn cancel(&self, id: Uuid) -> Result<Artifact, PipelineError> {
        let artifact = self.fetch_required(id).await?;
        match artifact.status {
            ArtifactStatus::PendingUpload | ArtifactStatus::Uploaded | ArtifactStatus::Queued => {
                Ok(self
                    .store
                    .update(id, ArtifactUpdate::status(ArtifactStatus::Cancelled))
                    .await?)
            }
            ArtifactStatus::Cancelled => Ok(artifact),
            status => Err(PipelineError::InvalidState {
                id,
                status,
                action: "cancel",
            }),
        }
    }

    async fn find_relevant(
        &self,
        query: RetrievalQuery,
    ) -> Result<Vec<RetrievedRecord>, PipelineError> {
        if query.embedding.len() != self.embedding_dimension {
            return Err(PipelineError::DimensionMismatch {
                expected: self.embedding_dimension,
                actual: query.embedding.len(),
            });
        }
        self.metrics.record_retrieval_query();
        Ok(self.store.find_relevant(&query).await?)
    }

    async fn reembed_missing(&self, owner_id: Option<Uuid>) -> Result<usize, PipelineError> {
        let candidates = self.store.missing_embeddings(owner_id).await?;
        let total = candidates.len();
        let mut filled = 0;
        for artifact in candidates {
            let Some(summary) = artifact
                .header_summary
                .as_deref()
                .filter(|summary| !summary.is_empty())
            else {
                continue;
            };
            match self.embedding.embed(summary).await {
                Ok(vector) => {
                    let update = ArtifactUpdate {
                        embedding: Some(vector),
                        ..ArtifactUpdate::default()
                    };
                    self.store.update(artifact.id, update).await?;
                    self.metrics.record_embedded();
                    filled += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        artifact = %artifact.id,
                        error = %error,
                        "Re-embedding failed; leaving the artifact unembedded"
                    );
                    self.metrics.record_embedding_failure();
                }
            }
        }
        tracing::info!(candidates = total, filled, "Re-embedding pass finished");
        Ok(filled)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
