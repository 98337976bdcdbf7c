//! PostgREST-style HTTP implementation of the artifact store.

use crate::artifact::{Artifact, ArtifactStatus};
use crate::config::get_config;
use crate::retrieval::{RetrievalQuery, RetrievedRecord};
use crate::store::{ArtifactStore, ArtifactUpdate, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method};
use serde_json::json;
use uuid::Uuid;

const ARTIFACTS_TABLE: &str = "artifacts";
const MATCH_RPC: &str = "rpc/match_health_records";

/// Artifact store speaking PostgREST conventions over reqwest.
///
/// Status-carrying updates are guarded server side: the PATCH filters on the
/// set of statuses the state machine accepts as sources of the target, so a
/// stale or illegal write affects zero rows instead of clobbering the row.
pub struct RestArtifactStore {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
}

impl RestArtifactStore {
    /// Construct a new store client using configuration derived from the environment.
    pub fn new() -> Result<Self, StoreError> {
        let config = get_config();
        let client = Client::builder().user_agent("medscribe/0.3").build()?;
        let base_url = normalize_base_url(&config.store_url).map_err(StoreError::InvalidUrl)?;
        tracing::debug!(url = %base_url, "Initialized artifact store HTTP client");

        Ok(Self {
            client,
            base_url,
            api_key: config.store_api_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn decode_rows(&self, response: reqwest::Response) -> Result<Vec<Artifact>, StoreError> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = StoreError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Artifact store request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl ArtifactStore for RestArtifactStore {
    async fn insert(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let response = self
            .request(Method::POST, ARTIFACTS_TABLE)
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&json!([artifact]))
            .send()
            .await?;

        if response.status().is_success() {
            tracing::debug!(artifact = %artifact.id, "Artifact row inserted");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = StoreError::UnexpectedStatus { status, body };
            tracing::error!(artifact = %artifact.id, error = %error, "Artifact insert failed");
            Err(error)
        }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Artifact>, StoreError> {
        let response = self
            .request(Method::GET, ARTIFACTS_TABLE)
            .query(&[("id", format!("eq.{id}")), ("limit", "1".into())])
            .send()
            .await?;

        let rows = self.decode_rows(response).await?;
        Ok(rows.into_iter().next())
    }

    async fn update(&self, id: Uuid, update: ArtifactUpdate) -> Result<Artifact, StoreError> {
        let mut params = vec![("id".to_string(), format!("eq.{id}"))];
        if let Some(next) = update.status {
            // Conditional write: only rows whose status allows the edge match.
            let sources: Vec<&str> = ArtifactStatus::sources_of(next)
                .map(ArtifactStatus::as_str)
                .collect();
            params.push(("status".to_string(), format!("in.({})", sources.join(","))));
        }

        let mut body = serde_json::to_value(&update).expect("update document should serialize");
        if let Some(document) = body.as_object_mut() {
            document.insert("updated_at".into(), json!(Utc::now()));
        }

        let response = self
            .request(Method::PATCH, ARTIFACTS_TABLE)
            .query(&params)
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;

        let rows = self.decode_rows(response).await?;
        if let Some(row) = rows.into_iter().next() {
            return Ok(row);
        }

        // Zero rows matched: either the artifact is gone or the edge was
        // refused. Fetch once to report which.
        match self.fetch(id).await? {
            Some(existing) => {
                let to = update.status.unwrap_or(existing.status);
                Err(StoreError::IllegalTransition {
                    id,
                    from: existing.status,
                    to,
                })
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn missing_embeddings(
        &self,
        owner_id: Option<Uuid>,
    ) -> Result<Vec<Artifact>, StoreError> {
        let mut params = vec![
            ("embedding".to_string(), "is.null".to_string()),
            ("status".to_string(), "in.(completed,processed)".to_string()),
        ];
        if let Some(owner) = owner_id {
            params.push(("owner_id".to_string(), format!("eq.{owner}")));
        }

        let response = self
            .request(Method::GET, ARTIFACTS_TABLE)
            .query(&params)
            .send()
            .await?;

        self.decode_rows(response).await
    }

    async fn find_relevant(
        &self,
        query: &RetrievalQuery,
    ) -> Result<Vec<RetrievedRecord>, StoreError> {
        let body = json!({
            "owner_id": query.owner_id,
            "query_embedding": query.embedding,
            "match_count": query.match_count,
            "match_threshold": query.match_threshold,
        });

        let response = self
            .request(Method::POST, MATCH_RPC)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = StoreError::UnexpectedStatus { status, body };
            tracing::error!(owner = %query.owner_id, error = %error, "Similarity RPC failed");
            Err(error)
        }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
