//! Speech and vision extraction behind the [`ExtractionClient`] trait.
//!
//! Two operations cover both media kinds: `transcribe` turns audio into
//! plain text, `extract_structured` asks a vision model for a JSON record.
//! MIME allow-lists live here too so callers can reject unsupported input
//! before any provider round trip.

mod http;
pub mod json_repair;
mod schema;

pub use http::HttpExtractionClient;
pub use schema::ExtractedRecord;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// MIME types accepted for document extraction.
pub const DOCUMENT_MIME_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/heic",
    "application/pdf",
];

/// Whether `mime` is an accepted document upload type.
pub fn is_supported_document_mime(mime: &str) -> bool {
    let normalized = normalize_mime(mime);
    DOCUMENT_MIME_TYPES.contains(&normalized.as_str())
}

/// Whether `mime` is an accepted recording upload type.
pub fn is_supported_recording_mime(mime: &str) -> bool {
    normalize_mime(mime).starts_with("audio/")
}

/// Lowercase the type and drop any parameters (`; charset=...`).
pub fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Errors raised by extraction providers.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid extraction service URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider rate limit or quota was exhausted.
    #[error("Provider quota exhausted: {0}")]
    QuotaExhausted(String),
    /// Provider refused the content on safety grounds.
    #[error("Provider blocked the content: {0}")]
    Blocked(String),
    /// Provider responded with an unexpected status code.
    #[error("Unexpected provider response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Transcription succeeded but produced no usable text.
    #[error("Transcription produced no usable text")]
    TranscriptEmpty,
    /// Provider reply could not be turned into a JSON record.
    #[error("Provider reply is not usable JSON: {0}")]
    MalformedReply(String),
}

/// Interface implemented by speech and vision extraction backends.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Transcribe an audio object into plain text.
    async fn transcribe(&self, audio: &[u8], mime: &str) -> Result<String, ExtractionError>;

    /// Ask the vision model to read `media` into a structured JSON record.
    async fn extract_structured(
        &self,
        media: &[u8],
        mime: &str,
        instruction: &str,
    ) -> Result<Value, ExtractionError>;
}
