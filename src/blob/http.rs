//! Signed-URL blob client for a hosted object storage service.

use crate::blob::{BlobError, BlobStore};
use crate::config::get_config;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Blob client that signs object paths and streams downloads.
///
/// Downloads run under a hard wall-clock timeout and a byte cap enforced
/// while streaming, so a runaway object cannot stall a worker or exhaust
/// memory.
pub struct HttpBlobStore {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) bucket: String,
    pub(crate) download_timeout: Duration,
    pub(crate) max_bytes: usize,
    pub(crate) signed_url_ttl: Duration,
}

#[derive(Deserialize)]
struct SignedUploadResponse {
    url: String,
}

#[derive(Deserialize)]
struct SignedDownloadResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

impl HttpBlobStore {
    /// Construct a new blob client using configuration derived from the environment.
    pub fn new() -> Result<Self, BlobError> {
        let config = get_config();
        let client = Client::builder().user_agent("medscribe/0.3").build()?;
        let base_url = normalize_base_url(&config.blob_url).map_err(BlobError::InvalidUrl)?;
        tracing::debug!(url = %base_url, bucket = %config.blob_bucket, "Initialized blob HTTP client");

        Ok(Self {
            client,
            base_url,
            api_key: config.blob_api_key.clone(),
            bucket: config.blob_bucket.clone(),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
            max_bytes: config.download_max_bytes,
            signed_url_ttl: Duration::from_secs(config.signed_url_ttl_secs),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn create_upload_url(&self, path: &str) -> Result<String, BlobError> {
        let endpoint = format!("object/upload/sign/{}/{path}", self.bucket);
        let response = self.request(Method::POST, &endpoint).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = BlobError::UnexpectedStatus { status, body };
            tracing::error!(path, error = %error, "Upload URL signing failed");
            return Err(error);
        }

        let SignedUploadResponse { url } = response.json().await?;
        Ok(format_endpoint(&self.base_url, &url))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        let endpoint = format!("object/sign/{}/{path}", self.bucket);
        let response = self
            .request(Method::POST, &endpoint)
            .json(&json!({ "expiresIn": self.signed_url_ttl.as_secs() }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BlobError::Missing(path.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = BlobError::UnexpectedStatus { status, body };
            tracing::error!(path, error = %error, "Download URL signing failed");
            return Err(error);
        }

        let SignedDownloadResponse { signed_url } = response.json().await?;
        let url = format_endpoint(&self.base_url, &signed_url);

        let response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BlobError::Missing(path.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BlobError::UnexpectedStatus { status, body });
        }

        let mut bytes: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(BlobError::TooLarge {
                    path: path.to_string(),
                    limit: self.max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(BlobError::Empty(path.to_string()));
        }

        tracing::debug!(path, size = bytes.len(), "Blob downloaded");
        Ok(bytes)
    }

    async fn remove(&self, path: &str) -> Result<(), BlobError> {
        let endpoint = format!("object/{}/{path}", self.bucket);
        let response = self.request(Method::DELETE, &endpoint).send().await?;

        match response.status() {
            status if status.is_success() => {
                tracing::debug!(path, "Blob removed");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(BlobError::Missing(path.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BlobError::UnexpectedStatus { status, body })
            }
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
