//! Owner-scoped semantic retrieval over stored record embeddings.
//!
//! The ranking contract is the same regardless of which store backs it:
//! candidates below the similarity threshold are dropped, survivors are
//! ordered by descending similarity, and the list is truncated to the
//! requested match count.

use crate::artifact::Artifact;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Similarity search request against one owner's records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQuery {
    /// Profile whose records are searched; never crosses owners.
    pub owner_id: Uuid,
    /// Query vector, same dimension as the stored embeddings.
    pub embedding: Vec<f32>,
    /// Maximum number of records to return.
    pub match_count: usize,
    /// Minimum cosine similarity a record must reach to be returned.
    pub match_threshold: f32,
}

/// One scored hit from a retrieval query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedRecord {
    /// Identifier of the matching artifact.
    pub artifact_id: Uuid,
    /// Summary text the embedding was generated from.
    pub header_summary: Option<String>,
    /// Cosine similarity against the query vector.
    pub similarity: f32,
}

/// Cosine similarity of two vectors; zero for mismatched or degenerate input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Score and rank artifacts against a query.
///
/// Only the query owner's successfully processed artifacts with a stored
/// embedding participate. Results at or above the threshold come back in
/// descending similarity order, truncated to `match_count`.
pub fn rank<'a, I>(artifacts: I, query: &RetrievalQuery) -> Vec<RetrievedRecord>
where
    I: IntoIterator<Item = &'a Artifact>,
{
    let mut hits: Vec<RetrievedRecord> = artifacts
        .into_iter()
        .filter(|artifact| artifact.owner_id == query.owner_id)
        .filter(|artifact| artifact.status.is_terminal_success())
        .filter_map(|artifact| {
            let embedding = artifact.embedding.as_ref()?;
            if embedding.len() != query.embedding.len() {
                return None;
            }
            let similarity = cosine_similarity(embedding, &query.embedding);
            if similarity >= query.match_threshold {
                Some(RetrievedRecord {
                    artifact_id: artifact.id,
                    header_summary: artifact.header_summary.clone(),
                    similarity,
                })
            } else {
                None
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(query.match_count);
    hits
}

/// Clamp a requested result count into `[1, max]`, defaulting when absent.
pub fn clamp_match_count(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(1, max)
}

/// Clamp a requested similarity threshold into `[0, 1]`, defaulting when absent.
pub fn clamp_threshold(requested: Option<f32>, default: f32) -> f32 {
    let threshold = requested.unwrap_or(default);
    if threshold.is_nan() {
        return default;
    }
    threshold.clamp(0.0, 1.0)
}
