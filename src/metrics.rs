use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    slots_created: AtomicU64,
    jobs_enqueued: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    duplicate_deliveries: AtomicU64,
    embedding_failures: AtomicU64,
    records_embedded: AtomicU64,
    retrieval_queries: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an issued upload slot.
    pub fn record_slot_created(&self) {
        self.slots_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job handed to the queue.
    pub fn record_job_enqueued(&self) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an artifact reaching terminal success.
    pub fn record_job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pipeline run ending in a persisted failure status.
    pub fn record_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivery for an artifact that was already finished.
    pub fn record_duplicate_delivery(&self) {
        self.duplicate_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a swallowed embedding failure.
    pub fn record_embedding_failure(&self) {
        self.embedding_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successfully stored embedding.
    pub fn record_embedded(&self) {
        self.records_embedded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retrieval query served.
    pub fn record_retrieval_query(&self) {
        self.retrieval_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            slots_created: self.slots_created.load(Ordering::Relaxed),
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            duplicate_deliveries: self.duplicate_deliveries.load(Ordering::Relaxed),
            embedding_failures: self.embedding_failures.load(Ordering::Relaxed),
            records_embedded: self.records_embedded.load(Ordering::Relaxed),
            retrieval_queries: self.retrieval_queries.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Upload slots issued since startup.
    pub slots_created: u64,
    /// Jobs handed to the queue since startup.
    pub jobs_enqueued: u64,
    /// Artifacts that reached terminal success.
    pub jobs_completed: u64,
    /// Pipeline runs that ended in a persisted failure status.
    pub jobs_failed: u64,
    /// Deliveries that found their artifact already finished.
    pub duplicate_deliveries: u64,
    /// Embedding attempts that failed and were swallowed.
    pub embedding_failures: u64,
    /// Embeddings stored, including maintenance re-embeds.
    pub records_embedded: u64,
    /// Retrieval queries served.
    pub retrieval_queries: u64,
}
