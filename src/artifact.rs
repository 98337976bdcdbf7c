//! Artifact entity and its processing state machine.
//!
//! An artifact is one uploaded item (a voice recording or a medical
//! document) tracked from upload-slot issuance through the background
//! pipeline to a terminal status. All status literals live here so that
//! every surface (store, queue, gateway) agrees on the same canonical
//! strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of media behind an artifact; selects the pipeline variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Voice note processed through transcription.
    Recording,
    /// Image or PDF processed through vision extraction.
    Document,
}

impl MediaKind {
    /// Path segment used when composing `{owner}/{segment}/{id}` storage keys.
    pub fn storage_segment(self) -> &'static str {
        match self {
            Self::Recording => "recordings",
            Self::Document => "documents",
        }
    }

    /// Status written once the first recognition stage succeeds.
    pub fn recognized_status(self) -> ArtifactStatus {
        match self {
            Self::Recording => ArtifactStatus::TranscribingCompleted,
            Self::Document => ArtifactStatus::Extracted,
        }
    }

    /// Terminal success status for this kind.
    pub fn success_status(self) -> ArtifactStatus {
        match self {
            Self::Recording => ArtifactStatus::Completed,
            Self::Document => ArtifactStatus::Processed,
        }
    }

    /// Failure status entered when the recognition stage fails upstream.
    pub fn recognition_failure_status(self) -> ArtifactStatus {
        match self {
            Self::Recording => ArtifactStatus::TranscriptionFailed,
            Self::Document => ArtifactStatus::ExtractionFailed,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Recording => "recording",
            Self::Document => "document",
        })
    }
}

/// Canonical processing status of an artifact.
///
/// Transitions move strictly forward except for the explicit retry edges
/// back to [`ArtifactStatus::Queued`] (user retry) or
/// [`ArtifactStatus::Processing`] (queue redelivery claim). Writing the
/// same status twice is a permitted no-op so that duplicate job deliveries
/// re-confirm instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Upload slot issued, bytes not yet confirmed.
    PendingUpload,
    /// Client confirmed the upload; enqueue pending.
    Uploaded,
    /// Job enqueued, waiting for a worker claim.
    Queued,
    /// A worker is driving the artifact through the stages.
    Processing,
    /// Recording variant: transcription succeeded, analysis pending.
    TranscribingCompleted,
    /// Document variant: structured extraction succeeded, analysis pending.
    Extracted,
    /// Recording variant terminal success.
    Completed,
    /// Document variant terminal success.
    Processed,
    /// Fetching the blob failed; eligible for retry.
    DownloadFailed,
    /// Input rejected or unrecoverable extraction output; not retryable.
    ProcessingFailed,
    /// Transcription stage failed upstream; eligible for retry.
    TranscriptionFailed,
    /// Structured extraction stage failed upstream; eligible for retry.
    ExtractionFailed,
    /// Analysis stage failed upstream; eligible for retry.
    AnalysisFailed,
    /// Provider rate limit or quota hit; redelivered by queue backoff.
    QuotaExceeded,
    /// Enqueueing the pipeline job failed; eligible for retry.
    Failed,
    /// Aborted from outside the pipeline before any worker claim.
    Cancelled,
}

impl ArtifactStatus {
    /// Every status, in declaration order.
    pub const ALL: [ArtifactStatus; 16] = [
        Self::PendingUpload,
        Self::Uploaded,
        Self::Queued,
        Self::Processing,
        Self::TranscribingCompleted,
        Self::Extracted,
        Self::Completed,
        Self::Processed,
        Self::DownloadFailed,
        Self::ProcessingFailed,
        Self::TranscriptionFailed,
        Self::ExtractionFailed,
        Self::AnalysisFailed,
        Self::QuotaExceeded,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Statuses from which `next` is reachable, `next` itself included.
    ///
    /// Stores use this to guard conditional writes: an update to `next` only
    /// lands when the current row status is one of these.
    pub fn sources_of(next: ArtifactStatus) -> impl Iterator<Item = ArtifactStatus> {
        Self::ALL.into_iter().filter(move |status| status.allows(next))
    }

    /// Canonical snake_case literal, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingUpload => "pending_upload",
            Self::Uploaded => "uploaded",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::TranscribingCompleted => "transcribing_completed",
            Self::Extracted => "extracted",
            Self::Completed => "completed",
            Self::Processed => "processed",
            Self::DownloadFailed => "download_failed",
            Self::ProcessingFailed => "processing_failed",
            Self::TranscriptionFailed => "transcription_failed",
            Self::ExtractionFailed => "extraction_failed",
            Self::AnalysisFailed => "analysis_failed",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the pipeline finished successfully for this artifact.
    pub fn is_terminal_success(self) -> bool {
        matches!(self, Self::Completed | Self::Processed)
    }

    /// Failure states a user retry or queue redelivery may leave.
    pub fn is_retryable_failure(self) -> bool {
        matches!(
            self,
            Self::DownloadFailed
                | Self::TranscriptionFailed
                | Self::ExtractionFailed
                | Self::AnalysisFailed
                | Self::QuotaExceeded
                | Self::Failed
        )
    }

    /// Any failure state, retryable or not.
    pub fn is_failure(self) -> bool {
        self.is_retryable_failure() || self == Self::ProcessingFailed
    }

    /// True once no further pipeline work will happen without an explicit
    /// retry or redelivery.
    pub fn is_terminal(self) -> bool {
        self.is_terminal_success() || self.is_failure() || self == Self::Cancelled
    }

    /// Whether a transition from `self` to `next` follows a declared edge.
    pub fn allows(self, next: ArtifactStatus) -> bool {
        use ArtifactStatus::*;
        if self == next {
            // Idempotent re-confirmation under at-least-once delivery.
            return true;
        }
        match self {
            PendingUpload => matches!(next, Uploaded | Cancelled),
            Uploaded => matches!(next, Queued | Failed | Cancelled),
            // Failed covers an enqueue handoff that broke after the status
            // write; the row is already Queued by then.
            Queued => matches!(next, Processing | Cancelled | Failed),
            Processing => matches!(
                next,
                TranscribingCompleted
                    | Extracted
                    | DownloadFailed
                    | ProcessingFailed
                    | TranscriptionFailed
                    | ExtractionFailed
                    | QuotaExceeded
            ),
            // A redelivery resumed from a mid-state re-runs the earlier
            // stages, so their failure statuses stay reachable here.
            TranscribingCompleted => matches!(
                next,
                Completed
                    | DownloadFailed
                    | TranscriptionFailed
                    | ProcessingFailed
                    | AnalysisFailed
                    | QuotaExceeded
            ),
            Extracted => matches!(
                next,
                Processed
                    | DownloadFailed
                    | ExtractionFailed
                    | ProcessingFailed
                    | AnalysisFailed
                    | QuotaExceeded
            ),
            DownloadFailed | TranscriptionFailed | ExtractionFailed | AnalysisFailed
            | QuotaExceeded | Failed => matches!(next, Queued | Processing),
            Completed | Processed | ProcessingFailed | Cancelled => false,
        }
    }
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of canonical health-record categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
    /// Lab work and blood panels.
    BloodTest,
    /// X-ray, MRI, CT, ultrasound and similar scans.
    Imaging,
    /// Prescriptions and medication lists.
    Prescription,
    /// Vaccination and immunization records.
    Vaccination,
    /// Consultation notes, referrals and discharge papers.
    Consultation,
    /// Structured voice note without a stronger signal.
    VoiceNote,
    /// Anything that did not match a known bucket.
    Other,
}

impl std::fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::BloodTest => "blood_test",
            Self::Imaging => "imaging",
            Self::Prescription => "prescription",
            Self::Vaccination => "vaccination",
            Self::Consultation => "consultation",
            Self::VoiceNote => "voice_note",
            Self::Other => "other",
        })
    }
}

/// Durable record of one uploaded item as held by the artifact store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Opaque identifier minted at upload-slot issuance.
    pub id: Uuid,
    /// Profile that owns the artifact; retrieval is scoped to it.
    pub owner_id: Uuid,
    /// Pipeline variant for this artifact.
    pub kind: MediaKind,
    /// Object key within the blob service.
    pub storage_path: String,
    /// User-facing title; defaults to the uploaded file name.
    pub display_name: String,
    /// MIME type declared when the upload slot was created.
    pub media_type: String,
    /// Current pipeline status.
    pub status: ArtifactStatus,
    /// Canonical category assigned by the analysis stage.
    pub category: Option<RecordCategory>,
    /// Short text derived from the structured payload; embedding source.
    pub header_summary: Option<String>,
    /// Structured extraction result; written only at terminal success.
    pub structured_payload: Option<Value>,
    /// Fixed-dimension semantic vector; absent while unembedded.
    pub embedding: Option<Vec<f32>>,
    /// Most recent failure detail; cleared on re-queue and on success.
    pub error_message: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_edges_are_allowed() {
        use ArtifactStatus::*;
        assert!(PendingUpload.allows(Uploaded));
        assert!(Uploaded.allows(Queued));
        assert!(Queued.allows(Processing));
        assert!(Processing.allows(TranscribingCompleted));
        assert!(Processing.allows(Extracted));
        assert!(TranscribingCompleted.allows(Completed));
        assert!(Extracted.allows(Processed));
    }

    #[test]
    fn failure_edges_follow_the_stage_map() {
        use ArtifactStatus::*;
        assert!(Uploaded.allows(Failed));
        assert!(Queued.allows(Failed));
        assert!(Processing.allows(DownloadFailed));
        assert!(Processing.allows(ProcessingFailed));
        assert!(Processing.allows(TranscriptionFailed));
        assert!(Processing.allows(ExtractionFailed));
        assert!(Processing.allows(QuotaExceeded));
        assert!(TranscribingCompleted.allows(AnalysisFailed));
        assert!(Extracted.allows(AnalysisFailed));
        assert!(!Processing.allows(AnalysisFailed));
    }

    #[test]
    fn mid_states_accept_the_failures_a_resumed_run_can_hit() {
        use ArtifactStatus::*;
        assert!(TranscribingCompleted.allows(DownloadFailed));
        assert!(TranscribingCompleted.allows(TranscriptionFailed));
        assert!(TranscribingCompleted.allows(ProcessingFailed));
        assert!(Extracted.allows(DownloadFailed));
        assert!(Extracted.allows(ExtractionFailed));
        assert!(Extracted.allows(ProcessingFailed));
        // The mid-states never cross over to the other kind's failure.
        assert!(!TranscribingCompleted.allows(ExtractionFailed));
        assert!(!Extracted.allows(TranscriptionFailed));
    }

    #[test]
    fn retry_edges_reset_to_queued_or_processing() {
        use ArtifactStatus::*;
        for failed in [
            DownloadFailed,
            TranscriptionFailed,
            ExtractionFailed,
            AnalysisFailed,
            QuotaExceeded,
            Failed,
        ] {
            assert!(failed.allows(Queued), "{failed} should re-queue");
            assert!(failed.allows(Processing), "{failed} should accept a redelivery claim");
        }
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        use ArtifactStatus::*;
        for terminal in [Completed, Processed, ProcessingFailed, Cancelled] {
            for next in [Queued, Processing, Uploaded, DownloadFailed] {
                assert!(!terminal.allows(next), "{terminal} must not move to {next}");
            }
        }
    }

    #[test]
    fn backward_transitions_are_rejected() {
        use ArtifactStatus::*;
        assert!(!Processing.allows(Queued));
        assert!(!Processing.allows(Uploaded));
        assert!(!TranscribingCompleted.allows(Processing));
        assert!(!Queued.allows(Uploaded));
    }

    #[test]
    fn duplicate_status_writes_are_idempotent() {
        use ArtifactStatus::*;
        for status in [Queued, Processing, TranscribingCompleted, Completed] {
            assert!(status.allows(status));
        }
    }

    #[test]
    fn cancellation_is_only_reachable_before_a_claim() {
        use ArtifactStatus::*;
        assert!(PendingUpload.allows(Cancelled));
        assert!(Uploaded.allows(Cancelled));
        assert!(Queued.allows(Cancelled));
        assert!(!Processing.allows(Cancelled));
        assert!(!Completed.allows(Cancelled));
    }

    #[test]
    fn serde_literals_are_snake_case() {
        let json = serde_json::to_string(&ArtifactStatus::TranscribingCompleted).unwrap();
        assert_eq!(json, "\"transcribing_completed\"");
        let parsed: ArtifactStatus = serde_json::from_str("\"pending_upload\"").unwrap();
        assert_eq!(parsed, ArtifactStatus::PendingUpload);
        assert_eq!(
            serde_json::to_string(&MediaKind::Recording).unwrap(),
            "\"recording\""
        );
    }

    #[test]
    fn as_str_matches_serde_representation() {
        for status in [
            ArtifactStatus::PendingUpload,
            ArtifactStatus::QuotaExceeded,
            ArtifactStatus::ExtractionFailed,
            ArtifactStatus::Processed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn kind_status_helpers_line_up() {
        assert_eq!(
            MediaKind::Recording.recognized_status(),
            ArtifactStatus::TranscribingCompleted
        );
        assert_eq!(MediaKind::Recording.success_status(), ArtifactStatus::Completed);
        assert_eq!(
            MediaKind::Document.recognition_failure_status(),
            ArtifactStatus::ExtractionFailed
        );
        assert_eq!(MediaKind::Document.storage_segment(), "documents");
    }

    #[test]
    fn sources_of_inverts_the_edge_table() {
        use ArtifactStatus::*;
        let sources: Vec<_> = ArtifactStatus::sources_of(Queued).collect();
        assert!(sources.contains(&Uploaded));
        assert!(sources.contains(&DownloadFailed));
        assert!(sources.contains(&Queued));
        assert!(!sources.contains(&Completed));
        assert!(!sources.contains(&Processing));
    }

    #[test]
    fn classification_helpers_cover_the_failure_set() {
        assert!(ArtifactStatus::QuotaExceeded.is_retryable_failure());
        assert!(ArtifactStatus::Failed.is_retryable_failure());
        assert!(!ArtifactStatus::ProcessingFailed.is_retryable_failure());
        assert!(ArtifactStatus::ProcessingFailed.is_failure());
        assert!(ArtifactStatus::Completed.is_terminal_success());
        assert!(ArtifactStatus::Cancelled.is_terminal());
        assert!(!ArtifactStatus::Processing.is_terminal());
    }
}
