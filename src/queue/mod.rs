//! Pipeline job queue with at-least-once delivery semantics.
//!
//! The external contract is tiny: [`JobQueue::enqueue`] hands over a job
//! and workers later receive [`JobDelivery`] values carrying a 1-based
//! attempt counter. [`InProcessQueue`] fulfills the contract over a tokio
//! channel, scheduling delayed redeliveries under a bounded-attempt
//! exponential backoff policy.

pub mod worker;

use crate::artifact::MediaKind;
use crate::config::get_config;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Payload describing one artifact's pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    /// Artifact the run belongs to.
    pub artifact_id: Uuid,
    /// Profile owning the artifact.
    pub owner_id: Uuid,
    /// Pipeline variant to run.
    pub kind: MediaKind,
    /// Object key within the blob service.
    pub storage_path: String,
    /// User-facing title, when known at enqueue time.
    pub display_name: Option<String>,
}

/// One delivery of a job to a worker.
#[derive(Debug, Clone)]
pub struct JobDelivery {
    /// The job being delivered.
    pub job: PipelineJob,
    /// 1-based attempt counter; redeliveries increment it.
    pub attempt: u32,
}

/// Errors raised while handing jobs to the queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue is shut down or its consumer side is gone.
    #[error("Job queue unavailable: {0}")]
    Unavailable(String),
}

/// Producer-side contract of the durable job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Hand a job to the queue for eventual delivery to a worker.
    async fn enqueue(&self, job: PipelineJob) -> Result<(), QueueError>;
}

/// Bounded-attempt exponential backoff policy.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delivery attempts before a job is abandoned.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per subsequent attempt.
    pub base_delay: Duration,
}

impl BackoffPolicy {
    /// Build the policy from the loaded configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            max_attempts: config.queue_max_attempts.max(1),
            base_delay: Duration::from_millis(config.queue_backoff_base_ms),
        }
    }

    /// Delay scheduled before delivering `next_attempt`.
    ///
    /// The first attempt is immediate; attempt 2 waits the base delay, and
    /// each later attempt doubles it. The exponent is clamped so pathological
    /// configurations cannot overflow.
    pub fn delay_for(self, next_attempt: u32) -> Duration {
        let exponent = next_attempt.saturating_sub(2).min(16);
        self.base_delay * 2_u32.pow(exponent)
    }
}

/// In-process fulfillment of the durable queue contract.
///
/// Deliveries flow through an unbounded channel shared by the worker pool.
/// Redelivery after a retryable failure is scheduled on a detached task
/// that sleeps out the backoff delay first.
pub struct InProcessQueue {
    sender: mpsc::UnboundedSender<JobDelivery>,
    policy: BackoffPolicy,
}

impl InProcessQueue {
    /// Create a queue plus the receiver its workers will consume.
    pub fn new(policy: BackoffPolicy) -> (Arc<Self>, mpsc::UnboundedReceiver<JobDelivery>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender, policy }), receiver)
    }

    /// Policy governing redelivery of this queue's jobs.
    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Schedule a redelivery after the backoff delay for `failed_attempt`.
    ///
    /// Returns `false` when the attempt budget is already spent; the job is
    /// then abandoned and the artifact stays in its persisted failure state.
    pub fn redeliver_later(&self, job: PipelineJob, failed_attempt: u32) -> bool {
        let next_attempt = failed_attempt + 1;
        if next_attempt > self.policy.max_attempts {
            tracing::warn!(
                artifact = %job.artifact_id,
                attempts = failed_attempt,
                "Retry budget exhausted; abandoning job"
            );
            return false;
        }

        let delay = self.policy.delay_for(next_attempt);
        let sender = self.sender.clone();
        tracing::debug!(
            artifact = %job.artifact_id,
            next_attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling redelivery"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(JobDelivery { job, attempt: next_attempt }).is_err() {
                tracing::warn!("Queue consumer is gone; redelivery dropped");
            }
        });
        true
    }
}

#[async_trait]
impl JobQueue for InProcessQueue {
    async fn enqueue(&self, job: PipelineJob) -> Result<(), QueueError> {
        tracing::debug!(artifact = %job.artifact_id, kind = %job.kind, "Enqueueing pipeline job");
        self.sender
            .send(JobDelivery { job, attempt: 1 })
            .map_err(|err| QueueError::Unavailable(err.to_string()))
    }
}
