//! Semantic embedding generation behind the [`EmbeddingClient`] trait.
//!
//! Embeddings are a best-effort enrichment: the pipeline logs and counts
//! failures but never fails an artifact over one, and a maintenance pass
//! can fill missing vectors later.

use crate::config::get_config;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider was unreachable or the endpoint is gone.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate embedding: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// Provider returned a vector of the wrong size.
    #[error("Provider returned {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        /// Dimension the store schema expects.
        expected: usize,
        /// Dimension the provider actually returned.
        actual: usize,
    },
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce the embedding vector for one piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Embedding client speaking the local-runtime `/api/embeddings` shape.
pub struct HttpEmbeddingClient {
    pub(crate) http: Client,
    pub(crate) base_url: String,
    pub(crate) model: String,
    pub(crate) dimension: usize,
}

impl HttpEmbeddingClient {
    /// Construct a new client using configuration derived from the environment.
    pub fn new() -> Result<Self, EmbeddingError> {
        let config = get_config();
        let http = Client::builder()
            .user_agent("medscribe/0.3")
            .build()
            .map_err(|err| EmbeddingError::ProviderUnavailable(err.to_string()))?;

        Ok(Self {
            http,
            base_url: config.embedding_url.clone(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let payload = json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                EmbeddingError::ProviderUnavailable(format!(
                    "failed to reach embedding provider at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EmbeddingError::ProviderUnavailable(format!(
                "embedding endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::GenerationFailed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let body: EmbeddingsResponse = response.json().await.map_err(|error| {
            EmbeddingError::InvalidResponse(format!("failed to decode embedding response: {error}"))
        })?;

        if body.embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: body.embedding.len(),
            });
        }

        Ok(body.embedding)
    }
}
