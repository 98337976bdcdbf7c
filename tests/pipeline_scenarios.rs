//! End-to-end pipeline scenarios over in-memory collaborators.
//!
//! Each test composes the real orchestrator, queue and worker pool with the
//! in-memory store/blob implementations and scripted provider stubs, then
//! asserts the exact status sequence the scenario produces.

use async_trait::async_trait;
use chrono::Utc;
use medscribe::artifact::{Artifact, ArtifactStatus, MediaKind, RecordCategory};
use medscribe::blob::MemoryBlobStore;
use medscribe::embedding::{EmbeddingClient, EmbeddingError};
use medscribe::extraction::{ExtractionClient, ExtractionError};
use medscribe::pipeline::{PipelineApi, PipelineService, UploadSlotRequest};
use medscribe::queue::worker::spawn_workers;
use medscribe::queue::{BackoffPolicy, InProcessQueue, JobDelivery, PipelineJob};
use medscribe::store::{ArtifactStore, MemoryArtifactStore};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Extraction stub with a scripted reply and an optional quota budget.
struct ScriptedExtraction {
    transcript: Option<String>,
    structured: Value,
    quota_failures: usize,
    transcribe_calls: AtomicUsize,
    extract_calls: AtomicUsize,
}

impl ScriptedExtraction {
    fn document(structured: Value) -> Self {
        Self {
            transcript: None,
            structured,
            quota_failures: 0,
            transcribe_calls: AtomicUsize::new(0),
            extract_calls: AtomicUsize::new(0),
        }
    }

    fn recording(transcript: &str, structured: Value) -> Self {
        Self {
            transcript: Some(transcript.to_string()),
            structured,
            quota_failures: 0,
            transcribe_calls: AtomicUsize::new(0),
            extract_calls: AtomicUsize::new(0),
        }
    }

    fn with_quota_failures(mut self, failures: usize) -> Self {
        self.quota_failures = failures;
        self
    }
}

#[async_trait]
impl ExtractionClient for ScriptedExtraction {
    async fn transcribe(&self, _audio: &[u8], _mime: &str) -> Result<String, ExtractionError> {
        self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
        self.transcript
            .clone()
            .ok_or(ExtractionError::TranscriptEmpty)
    }

    async fn extract_structured(
        &self,
        _media: &[u8],
        _mime: &str,
        _instruction: &str,
    ) -> Result<Value, ExtractionError> {
        let call = self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.quota_failures {
            return Err(ExtractionError::QuotaExhausted(
                "requests per minute".into(),
            ));
        }
        Ok(self.structured.clone())
    }
}

/// Embedding stub that either returns a fixed vector or always fails.
struct ScriptedEmbedding {
    vector: Option<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for ScriptedEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.vector
            .clone()
            .ok_or_else(|| EmbeddingError::GenerationFailed("model not loaded".into()))
    }
}

struct Harness {
    service: Arc<PipelineService>,
    store: Arc<MemoryArtifactStore>,
    blob: Arc<MemoryBlobStore>,
    extraction: Arc<ScriptedExtraction>,
    queue: Arc<InProcessQueue>,
    receiver: Option<tokio::sync::mpsc::UnboundedReceiver<JobDelivery>>,
}

fn harness(extraction: ScriptedExtraction, embedding: Option<Vec<f32>>) -> Harness {
    let store = Arc::new(MemoryArtifactStore::new());
    let blob = Arc::new(MemoryBlobStore::new());
    let extraction = Arc::new(extraction);
    let (queue, receiver) = InProcessQueue::new(BackoffPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(2),
    });
    let service = Arc::new(PipelineService::new(
        store.clone(),
        blob.clone(),
        extraction.clone(),
        Arc::new(ScriptedEmbedding { vector: embedding }),
        queue.clone(),
        3,
    ));
    Harness {
        service,
        store,
        blob,
        extraction,
        queue,
        receiver: Some(receiver),
    }
}

impl Harness {
    fn start_workers(&mut self) {
        let receiver = self.receiver.take().expect("workers already started");
        spawn_workers(
            2,
            receiver,
            Arc::clone(&self.service),
            Arc::clone(&self.queue),
        );
    }

    /// Issue a slot, stage the object bytes, and confirm the upload.
    async fn submit(&self, kind: MediaKind, file_name: &str, media_type: &str) -> Uuid {
        let slot = self
            .service
            .create_upload_slot(UploadSlotRequest {
                owner_id: Uuid::new_v4(),
                kind,
                file_name: file_name.into(),
                media_type: media_type.into(),
            })
            .await
            .expect("upload slot");
        self.blob.put(slot.storage_path.clone(), b"media-bytes".to_vec());
        self.service
            .confirm_upload(slot.artifact_id)
            .await
            .expect("confirm upload");
        slot.artifact_id
    }

    async fn wait_for_status(&self, id: Uuid, expected: ArtifactStatus) -> Artifact {
        for _ in 0..400 {
            let artifact = self
                .store
                .fetch(id)
                .await
                .expect("fetch")
                .expect("artifact exists");
            if artifact.status == expected {
                return artifact;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let artifact = self.store.fetch(id).await.unwrap().unwrap();
        panic!(
            "artifact never reached {expected}; stuck at {} ({:?})",
            artifact.status, artifact.error_message
        );
    }
}

fn delivery_for(artifact: &Artifact, attempt: u32) -> JobDelivery {
    JobDelivery {
        job: PipelineJob {
            artifact_id: artifact.id,
            owner_id: artifact.owner_id,
            kind: artifact.kind,
            storage_path: artifact.storage_path.clone(),
            display_name: Some(artifact.display_name.clone()),
        },
        attempt,
    }
}

#[tokio::test]
async fn recording_happy_path_walks_every_status() {
    let mut harness = harness(
        ScriptedExtraction::recording(
            "blood pressure was 120 over 80 this morning",
            json!({
                "document_type": "symptom diary",
                "summary": "Morning blood pressure reading of 120/80",
            }),
        ),
        Some(vec![0.1, 0.2, 0.3]),
    );
    harness.start_workers();

    let id = harness
        .submit(MediaKind::Recording, "morning-note.m4a", "audio/mp4")
        .await;
    let artifact = harness.wait_for_status(id, ArtifactStatus::Completed).await;

    assert_eq!(
        harness.store.status_history(id),
        vec![
            ArtifactStatus::PendingUpload,
            ArtifactStatus::Uploaded,
            ArtifactStatus::Queued,
            ArtifactStatus::Processing,
            ArtifactStatus::TranscribingCompleted,
            ArtifactStatus::Completed,
        ]
    );
    assert_eq!(artifact.category, Some(RecordCategory::VoiceNote));
    assert_eq!(artifact.embedding, Some(vec![0.1, 0.2, 0.3]));
    assert_eq!(artifact.error_message, None);
    let payload = artifact.structured_payload.expect("structured payload");
    assert_eq!(
        payload["transcript"],
        "blood pressure was 120 over 80 this morning"
    );
    assert_eq!(
        artifact.header_summary.as_deref(),
        Some("Morning blood pressure reading of 120/80")
    );
}

#[tokio::test]
async fn document_happy_path_classifies_and_embeds() {
    let mut harness = harness(
        ScriptedExtraction::document(json!({
            "document_type": "Complete Blood Count",
            "summary": "CBC panel, all values in range",
            "record_date": "2025-03-14",
            "findings": ["Hemoglobin 14.1 g/dL"],
        })),
        Some(vec![0.4, 0.4, 0.2]),
    );
    harness.start_workers();

    let id = harness
        .submit(MediaKind::Document, "lab-results.pdf", "application/pdf")
        .await;
    let artifact = harness.wait_for_status(id, ArtifactStatus::Processed).await;

    assert_eq!(
        harness.store.status_history(id),
        vec![
            ArtifactStatus::PendingUpload,
            ArtifactStatus::Uploaded,
            ArtifactStatus::Queued,
            ArtifactStatus::Processing,
            ArtifactStatus::Extracted,
            ArtifactStatus::Processed,
        ]
    );
    assert_eq!(artifact.category, Some(RecordCategory::BloodTest));
    assert!(artifact.embedding.is_some());
    let payload = artifact.structured_payload.expect("structured payload");
    assert_eq!(payload["record_date"], "2025-03-14");
    assert_eq!(harness.extraction.extract_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsupported_media_type_fails_fast_without_provider_calls() {
    let harness = harness(ScriptedExtraction::document(json!({})), None);

    // The gateway's own allow-list rejects this at slot creation, so stage
    // the row directly to exercise the pipeline-side re-check.
    let owner = Uuid::new_v4();
    let id = Uuid::new_v4();
    let now = Utc::now();
    let artifact = Artifact {
        id,
        owner_id: owner,
        kind: MediaKind::Document,
        storage_path: format!("{owner}/documents/{id}"),
        display_name: "clip.mp4".into(),
        media_type: "video/mp4".into(),
        status: ArtifactStatus::Queued,
        category: None,
        header_summary: None,
        structured_payload: None,
        embedding: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    };
    harness.store.insert(&artifact).await.unwrap();

    let outcome = harness.service.advance(&delivery_for(&artifact, 1)).await;
    assert!(outcome.is_ok(), "non-retryable failures must not re-throw");

    let row = harness.store.fetch(id).await.unwrap().unwrap();
    assert_eq!(row.status, ArtifactStatus::ProcessingFailed);
    assert!(row.error_message.unwrap().contains("video/mp4"));
    assert_eq!(harness.extraction.extract_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.extraction.transcribe_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn quota_on_first_attempt_succeeds_on_redelivery() {
    let mut harness = harness(
        ScriptedExtraction::document(json!({
            "document_type": "prescription",
            "summary": "Metformin 500mg twice daily",
        }))
        .with_quota_failures(1),
        Some(vec![0.5, 0.5, 0.0]),
    );
    harness.start_workers();

    let id = harness
        .submit(MediaKind::Document, "rx.jpg", "image/jpeg")
        .await;
    let artifact = harness.wait_for_status(id, ArtifactStatus::Processed).await;

    assert_eq!(
        harness.store.status_history(id),
        vec![
            ArtifactStatus::PendingUpload,
            ArtifactStatus::Uploaded,
            ArtifactStatus::Queued,
            ArtifactStatus::Processing,
            ArtifactStatus::QuotaExceeded,
            ArtifactStatus::Processing,
            ArtifactStatus::Extracted,
            ArtifactStatus::Processed,
        ]
    );
    assert_eq!(artifact.category, Some(RecordCategory::Prescription));
    assert_eq!(harness.extraction.extract_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_budget_exhaustion_leaves_the_failure_persisted() {
    let mut harness = harness(
        ScriptedExtraction::document(json!({})).with_quota_failures(usize::MAX),
        None,
    );
    harness.start_workers();

    let id = harness
        .submit(MediaKind::Document, "scan.png", "image/png")
        .await;
    harness
        .wait_for_status(id, ArtifactStatus::QuotaExceeded)
        .await;

    // Give the backoff schedule room to play out all redeliveries.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let row = harness.store.fetch(id).await.unwrap().unwrap();
    assert_eq!(row.status, ArtifactStatus::QuotaExceeded);
    assert!(row.error_message.is_some());
    assert_eq!(
        harness.extraction.extract_calls.load(Ordering::SeqCst),
        3,
        "attempts must stop at the configured budget"
    );
}

#[tokio::test]
async fn embedding_failure_never_blocks_completion() {
    let mut harness = harness(
        ScriptedExtraction::document(json!({
            "document_type": "vaccination record",
            "summary": "Influenza vaccine, second dose",
        })),
        None,
    );
    harness.start_workers();

    let id = harness
        .submit(MediaKind::Document, "vaccine-card.jpg", "image/jpeg")
        .await;
    let artifact = harness.wait_for_status(id, ArtifactStatus::Processed).await;

    assert_eq!(artifact.embedding, None);
    assert_eq!(artifact.category, Some(RecordCategory::Vaccination));
    assert!(artifact.structured_payload.is_some());
    assert!(harness.service.metrics_snapshot().embedding_failures >= 1);

    // A later maintenance pass picks the artifact up once embedding works.
    let missing = harness.store.missing_embeddings(None).await.unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].id, id);
}

#[tokio::test]
async fn empty_transcript_is_a_terminal_transcription_failure() {
    let mut harness = harness(
        ScriptedExtraction {
            transcript: None,
            structured: json!({}),
            quota_failures: 0,
            transcribe_calls: AtomicUsize::new(0),
            extract_calls: AtomicUsize::new(0),
        },
        None,
    );
    harness.start_workers();

    let id = harness
        .submit(MediaKind::Recording, "silence.m4a", "audio/mp4")
        .await;
    let artifact = harness
        .wait_for_status(id, ArtifactStatus::TranscriptionFailed)
        .await;

    assert!(artifact.error_message.is_some());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        harness.extraction.transcribe_calls.load(Ordering::SeqCst),
        1,
        "empty audio is not worth redelivering"
    );
}

#[tokio::test]
async fn duplicate_delivery_reconfirms_without_redoing_work() {
    let harness = harness(
        ScriptedExtraction::document(json!({
            "document_type": "consultation notes",
            "summary": "Follow-up visit, knee healing well",
        })),
        Some(vec![0.2, 0.3, 0.5]),
    );

    let id = harness
        .submit(MediaKind::Document, "visit.pdf", "application/pdf")
        .await;
    let artifact = harness.store.fetch(id).await.unwrap().unwrap();
    let delivery = delivery_for(&artifact, 1);

    harness.service.advance(&delivery).await.unwrap();
    let first = harness.store.fetch(id).await.unwrap().unwrap();
    assert_eq!(first.status, ArtifactStatus::Processed);

    // Same delivery again, as at-least-once queues are allowed to do.
    harness.service.advance(&delivery).await.unwrap();
    let second = harness.store.fetch(id).await.unwrap().unwrap();

    assert_eq!(second.status, ArtifactStatus::Processed);
    assert_eq!(second.structured_payload, first.structured_payload);
    assert_eq!(second.updated_at, first.updated_at, "no second write happened");
    assert_eq!(harness.extraction.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.service.metrics_snapshot().duplicate_deliveries, 1);
}

#[tokio::test]
async fn download_failure_is_retryable_and_user_retry_recovers() {
    let harness = harness(
        ScriptedExtraction::document(json!({
            "document_type": "imaging",
            "summary": "Chest X-ray, clear",
        })),
        Some(vec![1.0, 0.0, 0.0]),
    );

    // Confirm without staging any object bytes.
    let slot = harness
        .service
        .create_upload_slot(UploadSlotRequest {
            owner_id: Uuid::new_v4(),
            kind: MediaKind::Document,
            file_name: "xray.png".into(),
            media_type: "image/png".into(),
        })
        .await
        .unwrap();
    harness.service.confirm_upload(slot.artifact_id).await.unwrap();

    let artifact = harness.store.fetch(slot.artifact_id).await.unwrap().unwrap();
    let error = harness
        .service
        .advance(&delivery_for(&artifact, 1))
        .await
        .expect_err("missing blob is retryable");
    assert!(error.retryable());

    let failed = harness.store.fetch(slot.artifact_id).await.unwrap().unwrap();
    assert_eq!(failed.status, ArtifactStatus::DownloadFailed);
    assert!(failed.error_message.is_some());

    // The object shows up, the user retries, the run completes.
    harness
        .blob
        .put(artifact.storage_path.clone(), b"png bytes".to_vec());
    let requeued = harness.service.retry(slot.artifact_id).await.unwrap();
    assert_eq!(requeued.status, ArtifactStatus::Queued);
    assert_eq!(requeued.error_message, None);

    harness
        .service
        .advance(&delivery_for(&artifact, 1))
        .await
        .unwrap();
    let done = harness.store.fetch(slot.artifact_id).await.unwrap().unwrap();
    assert_eq!(done.status, ArtifactStatus::Processed);
    assert_eq!(done.category, Some(RecordCategory::Imaging));
}

#[tokio::test]
async fn cancelled_artifact_is_dropped_by_the_worker() {
    let mut harness = harness(ScriptedExtraction::document(json!({})), None);

    let slot = harness
        .service
        .create_upload_slot(UploadSlotRequest {
            owner_id: Uuid::new_v4(),
            kind: MediaKind::Document,
            file_name: "scan.pdf".into(),
            media_type: "application/pdf".into(),
        })
        .await
        .unwrap();
    harness
        .blob
        .put(slot.storage_path.clone(), b"pdf bytes".to_vec());
    harness.service.confirm_upload(slot.artifact_id).await.unwrap();
    harness.service.cancel(slot.artifact_id).await.unwrap();

    // Workers start after the cancellation, so the queued delivery finds a
    // dead artifact.
    harness.start_workers();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let row = harness.store.fetch(slot.artifact_id).await.unwrap().unwrap();
    assert_eq!(row.status, ArtifactStatus::Cancelled);
    assert_eq!(harness.extraction.extract_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn processed_records_feed_owner_scoped_retrieval() {
    let mut harness = harness(
        ScriptedExtraction::document(json!({
            "document_type": "blood test",
            "summary": "Fasting glucose 92 mg/dL",
        })),
        Some(vec![1.0, 0.0, 0.0]),
    );
    harness.start_workers();

    let id = harness
        .submit(MediaKind::Document, "glucose.pdf", "application/pdf")
        .await;
    let artifact = harness.wait_for_status(id, ArtifactStatus::Processed).await;

    let hits = harness
        .service
        .find_relevant(medscribe::retrieval::RetrievalQuery {
            owner_id: artifact.owner_id,
            embedding: vec![1.0, 0.0, 0.0],
            match_count: 5,
            match_threshold: 0.7,
        })
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].artifact_id, id);
    assert!(hits[0].similarity > 0.99);

    let stranger = harness
        .service
        .find_relevant(medscribe::retrieval::RetrievalQuery {
            owner_id: Uuid::new_v4(),
            embedding: vec![1.0, 0.0, 0.0],
            match_count: 5,
            match_threshold: 0.0,
        })
        .await
        .unwrap();
    assert!(stranger.is_empty());
}
