//! In-process blob store used by tests and local development runs.

use crate::blob::{BlobError, BlobStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Blob store keeping object bytes in a `HashMap`.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place object bytes at `path`, replacing any previous object.
    pub fn put(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .expect("objects mutex poisoned")
            .insert(path.into(), bytes.into());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create_upload_url(&self, path: &str) -> Result<String, BlobError> {
        Ok(format!("memory://{path}"))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        let objects = self.objects.lock().expect("objects mutex poisoned");
        let bytes = objects
            .get(path)
            .ok_or_else(|| BlobError::Missing(path.to_string()))?;
        if bytes.is_empty() {
            return Err(BlobError::Empty(path.to_string()));
        }
        Ok(bytes.clone())
    }

    async fn remove(&self, path: &str) -> Result<(), BlobError> {
        let removed = self
            .objects
            .lock()
            .expect("objects mutex poisoned")
            .remove(path);
        match removed {
            Some(_) => Ok(()),
            None => Err(BlobError::Missing(path.to_string())),
        }
    }
}
