//! Worker pool consuming pipeline job deliveries.
//!
//! Workers share the queue receiver and run one delivery at a time through
//! [`PipelineService::advance`]. A per-artifact lease keeps two workers from
//! processing the same artifact concurrently: the second delivery is dropped
//! rather than raced, since queue redelivery will bring it back if needed.

use crate::pipeline::PipelineService;
use crate::queue::{InProcessQueue, JobDelivery};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Tracks which artifacts currently have a pipeline run in flight.
#[derive(Default)]
pub struct LeaseRegistry {
    in_flight: Mutex<HashSet<Uuid>>,
}

impl LeaseRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the lease for `artifact_id`, or `None` if one is already held.
    pub fn acquire(self: &Arc<Self>, artifact_id: Uuid) -> Option<Lease> {
        let mut in_flight = self.in_flight.lock().expect("lease mutex poisoned");
        if in_flight.insert(artifact_id) {
            Some(Lease {
                registry: Arc::clone(self),
                artifact_id,
            })
        } else {
            None
        }
    }

    /// Number of leases currently held.
    pub fn active(&self) -> usize {
        self.in_flight.lock().expect("lease mutex poisoned").len()
    }
}

/// Held lease for one artifact; released on drop.
pub struct Lease {
    registry: Arc<LeaseRegistry>,
    artifact_id: Uuid,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.registry
            .in_flight
            .lock()
            .expect("lease mutex poisoned")
            .remove(&self.artifact_id);
    }
}

/// Spawn `count` workers consuming `receiver`.
///
/// The handles run until the queue's sender side closes.
pub fn spawn_workers(
    count: usize,
    receiver: UnboundedReceiver<JobDelivery>,
    service: Arc<PipelineService>,
    queue: Arc<InProcessQueue>,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(AsyncMutex::new(receiver));
    let leases = LeaseRegistry::new();
    (0..count.max(1))
        .map(|worker| {
            let receiver = Arc::clone(&receiver);
            let service = Arc::clone(&service);
            let queue = Arc::clone(&queue);
            let leases = Arc::clone(&leases);
            tokio::spawn(async move {
                run_worker(worker, receiver, service, queue, leases).await;
            })
        })
        .collect()
}

async fn run_worker(
    worker: usize,
    receiver: Arc<AsyncMutex<UnboundedReceiver<JobDelivery>>>,
    service: Arc<PipelineService>,
    queue: Arc<InProcessQueue>,
    leases: Arc<LeaseRegistry>,
) {
    tracing::debug!(worker, "Pipeline worker started");
    loop {
        let delivery = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(delivery) = delivery else {
            tracing::debug!(worker, "Queue closed; worker exiting");
            break;
        };

        let artifact = delivery.job.artifact_id;
        let Some(_lease) = leases.acquire(artifact) else {
            tracing::warn!(
                worker,
                artifact = %artifact,
                "Dropping delivery for an artifact already in flight"
            );
            service.metrics().record_duplicate_delivery();
            continue;
        };

        tracing::debug!(
            worker,
            artifact = %artifact,
            attempt = delivery.attempt,
            "Claimed pipeline job"
        );
        if let Err(error) = service.advance(&delivery).await {
            tracing::warn!(
                worker,
                artifact = %artifact,
                attempt = delivery.attempt,
                error = %error,
                "Pipeline run failed with a retryable error"
            );
            queue.redeliver_later(delivery.job, delivery.attempt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_exclusive_per_artifact() {
        let registry = LeaseRegistry::new();
        let artifact = Uuid::new_v4();

        let lease = registry.acquire(artifact).expect("first lease");
        assert!(registry.acquire(artifact).is_none());
        assert_eq!(registry.active(), 1);

        drop(lease);
        assert_eq!(registry.active(), 0);
        assert!(registry.acquire(artifact).is_some());
    }

    #[test]
    fn distinct_artifacts_lease_independently() {
        let registry = LeaseRegistry::new();
        let _a = registry.acquire(Uuid::new_v4()).expect("lease a");
        let _b = registry.acquire(Uuid::new_v4()).expect("lease b");
        assert_eq!(registry.active(), 2);
    }
}
