//! Queue service shared by producers and the consumer.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::info;

use super::{QueueError, StoreLease, Submission, SubmissionStore};

/// Exclusive right to consume the store behind a [`SubmissionQueue`].
///
/// Released when dropped.
#[derive(Debug)]
pub struct ConsumerLease {
    _lease: StoreLease,
}

/// Durable submission queue plus the signalling needed around it.
///
/// Construct one per store at startup and hand clones to every producer and
/// to the processor. Clones share the store and the wake-up signal.
#[derive(Clone)]
pub struct SubmissionQueue {
    store: Arc<dyn SubmissionStore>,
    wake: Arc<Notify>,
}

impl SubmissionQueue {
    pub fn new(store: Arc<dyn SubmissionStore>) -> Self {
        Self {
            store,
            wake: Arc::new(Notify::new()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn SubmissionStore> {
        &self.store
    }

    /// Durably append a submission and wake the consumer.
    pub fn enqueue(&self, submission: Submission) -> Result<Submission, QueueError> {
        let stored = self.store.enqueue(&submission)?;
        info!(
            submission_id = %stored.id,
            user_id = %stored.user_id,
            destination = %stored.destination_folder,
            "Submission enqueued"
        );
        self.wake.notify_one();
        Ok(stored)
    }

    /// Wait until something is enqueued.
    ///
    /// An enqueue that happened while nobody was waiting is remembered, so the
    /// next call returns immediately.
    pub async fn wait_for_work(&self) {
        self.wake.notified().await;
    }

    /// Take the consumer lease. The store enforces it, so only one lease
    /// exists per underlying storage no matter how many queues wrap it.
    pub fn acquire_consumer(&self) -> Result<ConsumerLease, QueueError> {
        let lease = self.store.lock_consumer()?;
        Ok(ConsumerLease { _lease: lease })
    }
}
