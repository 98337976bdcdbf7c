//! Local post-processing of extracted records.
//!
//! Everything here is deterministic and offline: mapping the model's
//! free-text document type onto the closed category set, normalizing
//! loosely formatted dates, and deriving the bounded header summary the
//! embedding stage consumes. Bad input degrades fields, never the record.

use crate::artifact::{MediaKind, RecordCategory};
use crate::extraction::ExtractedRecord;
use chrono::NaiveDate;
use serde_json::Value;

/// Maximum length of the persisted header summary, in characters.
pub const MAX_SUMMARY_CHARS: usize = 500;

/// Date formats accepted from model output, tried in order.
const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%B %d, %Y",
    "%d %B %Y",
];

/// Normalized outcome of analyzing one extracted record.
#[derive(Debug, Clone)]
pub struct AnalyzedRecord {
    /// Canonical category for the record.
    pub category: RecordCategory,
    /// Bounded text the embedding is generated from.
    pub header_summary: String,
    /// Structured payload to persist at terminal success.
    pub payload: Value,
}

/// Map a free-text document type onto the closed category set.
///
/// Unrecognized or absent types fall back by media kind: recordings become
/// voice notes, documents land in the catch-all bucket.
pub fn classify(document_type: Option<&str>, kind: MediaKind) -> RecordCategory {
    let Some(document_type) = document_type else {
        return fallback_category(kind);
    };
    let lowered = document_type.to_lowercase();
    let matches_any = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));

    if matches_any(&["blood", "lab"]) {
        RecordCategory::BloodTest
    } else if matches_any(&["xray", "x-ray", "mri", "ct", "imaging", "scan", "ultrasound"]) {
        RecordCategory::Imaging
    } else if matches_any(&["prescription", "medication", "pharmacy"]) {
        RecordCategory::Prescription
    } else if matches_any(&["vaccin", "immuni"]) {
        RecordCategory::Vaccination
    } else if matches_any(&["consult", "referral", "discharge", "visit", "clinical note"]) {
        RecordCategory::Consultation
    } else {
        fallback_category(kind)
    }
}

fn fallback_category(kind: MediaKind) -> RecordCategory {
    match kind {
        MediaKind::Recording => RecordCategory::VoiceNote,
        MediaKind::Document => RecordCategory::Other,
    }
}

/// Parse a loosely formatted date, returning `None` when nothing matches.
pub fn parse_record_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}

/// Truncate a summary to [`MAX_SUMMARY_CHARS`], respecting char boundaries.
pub fn truncate_summary(text: &str) -> String {
    text.trim().chars().take(MAX_SUMMARY_CHARS).collect()
}

/// Normalize an extracted record for persistence.
///
/// The record date is rewritten to ISO form when it parses and dropped when
/// it does not; the header summary is derived from the richest available
/// field and bounded.
pub fn analyze(record: &ExtractedRecord, kind: MediaKind) -> AnalyzedRecord {
    let mut normalized = record.clone();
    normalized.record_date = record
        .record_date
        .as_deref()
        .and_then(parse_record_date)
        .map(|date| date.format("%Y-%m-%d").to_string());

    let category = classify(record.document_type.as_deref(), kind);
    let header_summary = truncate_summary(&derive_summary(&normalized));
    let payload = normalized.to_payload();

    AnalyzedRecord {
        category,
        header_summary,
        payload,
    }
}

fn derive_summary(record: &ExtractedRecord) -> String {
    if let Some(summary) = record.summary.as_deref()
        && !summary.trim().is_empty()
    {
        return summary.to_string();
    }
    if !record.findings.is_empty() {
        return record.findings.join("; ");
    }
    if !record.medications.is_empty() {
        return record.medications.join("; ");
    }
    for field in [
        record.document_type.as_deref(),
        record.provider.as_deref(),
        record.record_date.as_deref(),
    ]
    .into_iter()
    .flatten()
    {
        if !field.trim().is_empty() {
            return field.to_string();
        }
    }
    String::new()
}
