//! Structured record schema produced by the extraction model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured health record as the extraction model reports it.
///
/// Every field is optional: the reader is deliberately lenient because
/// model output drifts. [`ExtractedRecord::from_value`] tolerates wrong
/// shapes per field instead of rejecting the whole object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    /// Free-text document type as the model named it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    /// Short summary of the record contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Date of the underlying event, as written in the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_date: Option<String>,
    /// Practitioner or facility named in the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Notable findings, diagnoses or measured values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<String>,
    /// Medications mentioned, with free-form dosage text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medications: Vec<String>,
}

impl ExtractedRecord {
    /// Read a record out of loosely shaped model JSON.
    pub fn from_value(value: &Value) -> Self {
        Self {
            document_type: string_field(value, "document_type"),
            summary: string_field(value, "summary"),
            record_date: string_field(value, "record_date"),
            provider: string_field(value, "provider"),
            findings: string_list(value, "findings"),
            medications: string_list(value, "medications"),
        }
    }

    /// True when the model echoed the schema without filling anything in.
    pub fn is_vacant(&self) -> bool {
        self.document_type.is_none()
            && self.summary.is_none()
            && self.record_date.is_none()
            && self.provider.is_none()
            && self.findings.is_empty()
            && self.medications.is_empty()
    }

    /// Minimal record standing in for a vacant model reply.
    pub fn fallback(display_name: &str) -> Self {
        Self {
            summary: Some(display_name.to_string()),
            ..Self::default()
        }
    }

    /// Serialize to the JSON document persisted as the structured payload.
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => {
                    let trimmed = text.trim();
                    (!trimmed.is_empty()).then(|| trimmed.to_string())
                }
                Value::Null => None,
                // Models sometimes return structured entries; keep them as
                // compact JSON rather than dropping the information.
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        }
        _ => Vec::new(),
    }
}
