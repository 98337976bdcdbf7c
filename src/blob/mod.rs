//! Object storage access behind the [`BlobStore`] trait.
//!
//! The pipeline never receives raw bytes from clients. Uploads go directly
//! to the blob service through a pre-authorized URL, and workers fetch the
//! object back through a short-lived signed link when a job runs.

mod http;
mod memory;

pub use http::HttpBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors returned while signing or fetching objects.
#[derive(Debug, Error)]
pub enum BlobError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid blob service URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Blob service responded with an unexpected status code.
    #[error("Unexpected blob service response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from the blob service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// No object exists at the given path.
    #[error("No object stored at {0}")]
    Missing(String),
    /// The object exists but holds zero bytes.
    #[error("Object at {0} is empty")]
    Empty(String),
    /// The object exceeds the configured download cap.
    #[error("Object at {path} exceeds the {limit} byte download cap")]
    TooLarge {
        /// Path of the oversized object.
        path: String,
        /// Configured cap in bytes.
        limit: usize,
    },
}

impl BlobError {
    /// Whether waiting and fetching again could plausibly succeed.
    ///
    /// An oversized object never shrinks, so [`BlobError::TooLarge`] is the
    /// one download failure retrying cannot fix.
    pub fn retryable(&self) -> bool {
        !matches!(self, Self::TooLarge { .. })
    }
}

/// Object storage operations the gateway and pipeline rely on.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Pre-authorized URL a client can upload the object bytes to.
    async fn create_upload_url(&self, path: &str) -> Result<String, BlobError>;

    /// Fetch the object at `path`, honoring the download timeout and size cap.
    async fn download(&self, path: &str) -> Result<Vec<u8>, BlobError>;

    /// Delete the object at `path`; removing an absent object is an error.
    async fn remove(&self, path: &str) -> Result<(), BlobError>;
}
