//! Per-kind stage implementations behind the [`MediaStrategy`] trait.
//!
//! The orchestrator runs one state machine for both media kinds; only the
//! recognition and analysis stages differ. Recordings transcribe first and
//! structure the transcript second; documents go straight to structured
//! vision extraction and post-process locally.

use crate::analysis::{self, AnalyzedRecord};
use crate::artifact::MediaKind;
use crate::extraction::{
    ExtractedRecord, ExtractionClient, is_supported_document_mime, is_supported_recording_mime,
};
use crate::pipeline::StageError;
use async_trait::async_trait;
use serde_json::Value;

/// Instruction sent alongside document media.
const DOCUMENT_INSTRUCTION: &str = "You are reading a personal medical document. Return a JSON \
     object with these fields: document_type (what kind of document this is), summary (one or \
     two sentences describing the record), record_date (the date of the underlying event, if \
     visible), provider (the practitioner or facility, if named), findings (array of notable \
     findings, diagnoses or measured values), medications (array of medications with dosage \
     text). Omit fields you cannot determine. Return only the JSON object.";

/// Instruction sent alongside a voice-note transcript.
const TRANSCRIPT_INSTRUCTION: &str = "The following text is a transcript of a personal voice \
     note about the speaker's health. Return a JSON object with these fields: document_type \
     (the kind of note, e.g. symptom diary or medication note), summary (one or two sentences \
     capturing what the speaker reported), record_date (a date, only if the speaker stated \
     one), findings (array of symptoms, measurements or observations mentioned), medications \
     (array of medications mentioned with dosage text). Omit fields you cannot determine. \
     Return only the JSON object.";

/// Intermediate result of the recognition stage.
#[derive(Debug, Clone)]
pub enum Recognized {
    /// Plain transcript text from a recording.
    Transcript(String),
    /// Structured JSON extracted from a document.
    Structured(Value),
}

/// Stage implementations that differ between media kinds.
#[async_trait]
pub trait MediaStrategy: Send + Sync {
    /// Pipeline variant this strategy implements.
    fn kind(&self) -> MediaKind;

    /// Whether the declared MIME type is acceptable for this kind.
    fn accepts(&self, media_type: &str) -> bool;

    /// First stage: turn raw bytes into a transcript or structured object.
    async fn recognize(
        &self,
        client: &dyn ExtractionClient,
        bytes: &[u8],
        media_type: &str,
    ) -> Result<Recognized, StageError>;

    /// Second stage: turn the recognition result into a normalized record.
    async fn analyze(
        &self,
        client: &dyn ExtractionClient,
        recognized: Recognized,
        display_name: &str,
    ) -> Result<AnalyzedRecord, StageError>;
}

/// Strategy for the given media kind.
pub fn for_kind(kind: MediaKind) -> &'static dyn MediaStrategy {
    match kind {
        MediaKind::Recording => &RecordingStrategy,
        MediaKind::Document => &DocumentStrategy,
    }
}

/// Voice-note pipeline: transcription, then structuring of the transcript.
pub struct RecordingStrategy;

#[async_trait]
impl MediaStrategy for RecordingStrategy {
    fn kind(&self) -> MediaKind {
        MediaKind::Recording
    }

    fn accepts(&self, media_type: &str) -> bool {
        is_supported_recording_mime(media_type)
    }

    async fn recognize(
        &self,
        client: &dyn ExtractionClient,
        bytes: &[u8],
        media_type: &str,
    ) -> Result<Recognized, StageError> {
        let transcript = client
            .transcribe(bytes, media_type)
            .await
            .map_err(|error| StageError::from_recognition(error, MediaKind::Recording))?;
        Ok(Recognized::Transcript(transcript))
    }

    async fn analyze(
        &self,
        client: &dyn ExtractionClient,
        recognized: Recognized,
        display_name: &str,
    ) -> Result<AnalyzedRecord, StageError> {
        let Recognized::Transcript(transcript) = recognized else {
            return Err(StageError::Analysis(
                "recording analysis received a non-transcript input".into(),
            ));
        };

        let value = client
            .extract_structured(transcript.as_bytes(), "text/plain", TRANSCRIPT_INSTRUCTION)
            .await
            .map_err(StageError::from_analysis)?;

        let mut record = ExtractedRecord::from_value(&value);
        if record.is_vacant() {
            tracing::warn!(
                "Structuring the transcript returned a vacant record; using the fallback"
            );
            record = ExtractedRecord::fallback(display_name);
        }

        let mut analyzed = analysis::analyze(&record, MediaKind::Recording);
        // The transcript is the primary source; keep it with the record.
        if let Some(payload) = analyzed.payload.as_object_mut() {
            payload.insert("transcript".into(), Value::String(transcript));
        }
        Ok(analyzed)
    }
}

/// Document pipeline: vision extraction, then local post-processing.
pub struct DocumentStrategy;

#[async_trait]
impl MediaStrategy for DocumentStrategy {
    fn kind(&self) -> MediaKind {
        MediaKind::Document
    }

    fn accepts(&self, media_type: &str) -> bool {
        is_supported_document_mime(media_type)
    }

    async fn recognize(
        &self,
        client: &dyn ExtractionClient,
        bytes: &[u8],
        media_type: &str,
    ) -> Result<Recognized, StageError> {
        let value = client
            .extract_structured(bytes, media_type, DOCUMENT_INSTRUCTION)
            .await
            .map_err(|error| StageError::from_recognition(error, MediaKind::Document))?;
        Ok(Recognized::Structured(value))
    }

    async fn analyze(
        &self,
        _client: &dyn ExtractionClient,
        recognized: Recognized,
        display_name: &str,
    ) -> Result<AnalyzedRecord, StageError> {
        let Recognized::Structured(value) = recognized else {
            return Err(StageError::Analysis(
                "document analysis received a non-structured input".into(),
            ));
        };

        let mut record = ExtractedRecord::from_value(&value);
        if record.is_vacant() {
            tracing::warn!("Extraction returned a vacant record; using the fallback");
            record = ExtractedRecord::fallback(display_name);
        }
        Ok(analysis::analyze(&record, MediaKind::Document))
    }
}
