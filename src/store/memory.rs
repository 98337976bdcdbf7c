//! In-process artifact store used by tests and local development runs.

use crate::artifact::{Artifact, ArtifactStatus};
use crate::retrieval::{self, RetrievalQuery, RetrievedRecord};
use crate::store::{ArtifactStore, ArtifactUpdate, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Artifact store backed by a plain `HashMap`.
///
/// Besides implementing [`ArtifactStore`] it records every status an
/// artifact has held, so tests can assert the exact transition sequence a
/// scenario produced. Similarity search is computed locally with the same
/// ranking contract the REST store delegates to its RPC.
#[derive(Default)]
pub struct MemoryArtifactStore {
    rows: Mutex<HashMap<Uuid, Artifact>>,
    history: Mutex<HashMap<Uuid, Vec<ArtifactStatus>>>,
}

impl MemoryArtifactStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status the artifact has held, in write order.
    ///
    /// Idempotent same-status writes are not repeated in the log.
    pub fn status_history(&self, id: Uuid) -> Vec<ArtifactStatus> {
        self.history
            .lock()
            .expect("history mutex poisoned")
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every stored artifact.
    pub fn all(&self) -> Vec<Artifact> {
        self.rows
            .lock()
            .expect("rows mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn insert(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().expect("rows mutex poisoned");
        if rows.contains_key(&artifact.id) {
            // Replayed slot creation; the original row wins.
            return Ok(());
        }
        rows.insert(artifact.id, artifact.clone());
        self.history
            .lock()
            .expect("history mutex poisoned")
            .entry(artifact.id)
            .or_default()
            .push(artifact.status);
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Artifact>, StoreError> {
        Ok(self
            .rows
            .lock()
            .expect("rows mutex poisoned")
            .get(&id)
            .cloned())
    }

    async fn update(&self, id: Uuid, update: ArtifactUpdate) -> Result<Artifact, StoreError> {
        let mut rows = self.rows.lock().expect("rows mutex poisoned");
        let row = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if let Some(next) = update.status {
            if !row.status.allows(next) {
                return Err(StoreError::IllegalTransition {
                    id,
                    from: row.status,
                    to: next,
                });
            }
            if row.status != next {
                self.history
                    .lock()
                    .expect("history mutex poisoned")
                    .entry(id)
                    .or_default()
                    .push(next);
            }
            row.status = next;
        }
        if let Some(category) = update.category {
            row.category = Some(category);
        }
        if let Some(summary) = update.header_summary {
            row.header_summary = Some(summary);
        }
        if let Some(payload) = update.structured_payload {
            row.structured_payload = Some(payload);
        }
        if let Some(embedding) = update.embedding {
            row.embedding = Some(embedding);
        }
        if let Some(message) = update.error_message {
            row.error_message = message;
        }
        row.updated_at = Utc::now();

        Ok(row.clone())
    }

    async fn missing_embeddings(
        &self,
        owner_id: Option<Uuid>,
    ) -> Result<Vec<Artifact>, StoreError> {
        Ok(self
            .rows
            .lock()
            .expect("rows mutex poisoned")
            .values()
            .filter(|artifact| artifact.status.is_terminal_success())
            .filter(|artifact| artifact.embedding.is_none())
            .filter(|artifact| owner_id.is_none_or(|owner| artifact.owner_id == owner))
            .cloned()
            .collect())
    }

    async fn find_relevant(
        &self,
        query: &RetrievalQuery,
    ) -> Result<Vec<RetrievedRecord>, StoreError> {
        let rows = self.rows.lock().expect("rows mutex poisoned");
        Ok(retrieval::rank(rows.values(), query))
    }
}
