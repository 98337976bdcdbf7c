//! Stage failure taxonomy.
//!
//! Every stage failure carries its retry classification as data, so the
//! orchestrator and workers decide propagation by inspecting the value
//! rather than matching on error text. The mapping to a persisted artifact
//! status lives here too, next to the classification it must agree with.

use crate::artifact::{ArtifactStatus, MediaKind};
use crate::blob::BlobError;
use crate::extraction::ExtractionError;
use crate::store::StoreError;
use thiserror::Error;

/// Failure raised by one pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// Blob fetch failed in a way that may resolve on a later attempt.
    #[error("Download failed: {0}")]
    Download(String),
    /// The stored object holds zero bytes; treated as transient.
    #[error("Downloaded object is empty: {0}")]
    EmptyBlob(String),
    /// Declared MIME type is outside the kind's allow-list.
    #[error("Unsupported media type {media_type:?} for a {kind}")]
    UnsupportedInput {
        /// Pipeline variant that rejected the input.
        kind: MediaKind,
        /// MIME type the artifact declared.
        media_type: String,
    },
    /// The object exceeds the download size cap and never will shrink.
    #[error("Object exceeds the download size cap: {0}")]
    BlobTooLarge(String),
    /// Provider refused the content on safety grounds.
    #[error("Provider blocked the content: {0}")]
    SafetyBlocked(String),
    /// Extraction reply stayed unusable after the repair attempt.
    #[error("Extraction reply could not be parsed: {0}")]
    ExtractionParse(String),
    /// Transcription succeeded but produced no usable text.
    #[error("Transcription produced no usable text")]
    TranscriptEmpty,
    /// Provider rate limit or quota hit; redelivered under queue backoff.
    #[error("Provider quota exhausted: {0}")]
    QuotaExceeded(String),
    /// Recognition stage failed for a transient-looking reason.
    #[error("{kind} recognition failed: {message}")]
    Recognition {
        /// Pipeline variant whose recognition stage failed.
        kind: MediaKind,
        /// Underlying provider error.
        message: String,
    },
    /// Analysis stage failed for a transient-looking reason.
    #[error("Analysis failed: {0}")]
    Analysis(String),
    /// The artifact store itself refused a stage write.
    #[error("Artifact store write failed: {0}")]
    Store(#[from] StoreError),
}

impl StageError {
    /// Whether the queue should schedule another delivery for this failure.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Download(_)
            | Self::EmptyBlob(_)
            | Self::QuotaExceeded(_)
            | Self::Recognition { .. }
            | Self::Analysis(_)
            | Self::Store(_) => true,
            Self::UnsupportedInput { .. }
            | Self::BlobTooLarge(_)
            | Self::SafetyBlocked(_)
            | Self::ExtractionParse(_)
            | Self::TranscriptEmpty => false,
        }
    }

    /// Artifact status persisted when this failure ends a pipeline run.
    ///
    /// `None` means the store write path itself failed, so there is nothing
    /// reliable to persist against.
    pub fn failure_status(&self, kind: MediaKind) -> Option<ArtifactStatus> {
        match self {
            Self::Download(_) | Self::EmptyBlob(_) => Some(ArtifactStatus::DownloadFailed),
            Self::UnsupportedInput { .. }
            | Self::BlobTooLarge(_)
            | Self::SafetyBlocked(_)
            | Self::ExtractionParse(_) => Some(ArtifactStatus::ProcessingFailed),
            Self::TranscriptEmpty => Some(ArtifactStatus::TranscriptionFailed),
            Self::QuotaExceeded(_) => Some(ArtifactStatus::QuotaExceeded),
            Self::Recognition { kind: _, .. } => Some(kind.recognition_failure_status()),
            Self::Analysis(_) => Some(ArtifactStatus::AnalysisFailed),
            Self::Store(_) => None,
        }
    }

    /// Classify a blob failure raised by the download stage.
    pub fn from_download(error: BlobError) -> Self {
        match error {
            BlobError::TooLarge { path, limit } => {
                Self::BlobTooLarge(format!("{path} exceeds {limit} bytes"))
            }
            BlobError::Empty(path) => Self::EmptyBlob(path),
            other => Self::Download(other.to_string()),
        }
    }

    /// Classify an extraction failure raised by the recognition stage.
    pub fn from_recognition(error: ExtractionError, kind: MediaKind) -> Self {
        match error {
            ExtractionError::QuotaExhausted(detail) => Self::QuotaExceeded(detail),
            ExtractionError::Blocked(reason) => Self::SafetyBlocked(reason),
            ExtractionError::TranscriptEmpty => Self::TranscriptEmpty,
            ExtractionError::MalformedReply(preview) => Self::ExtractionParse(preview),
            other => Self::Recognition {
                kind,
                message: other.to_string(),
            },
        }
    }

    /// Classify an extraction failure raised by the analysis stage.
    ///
    /// The artifact already sits past recognition at this point, so only
    /// quota keeps its own status; everything else maps to the retryable
    /// analysis failure.
    pub fn from_analysis(error: ExtractionError) -> Self {
        match error {
            ExtractionError::QuotaExhausted(detail) => Self::QuotaExceeded(detail),
            other => Self::Analysis(other.to_string()),
        }
    }
}
