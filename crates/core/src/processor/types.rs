//! Types for the queue processor.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::QueueError;

/// Errors returned by processor lifecycle operations.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Another processor is consuming the same queue.
    #[error("queue already has an active consumer")]
    ConsumerBusy,

    /// This processor is already running.
    #[error("processor already running")]
    AlreadyRunning,

    /// Startup recovery could not read or update the queue.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Current status of the processor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessorStatus {
    /// Whether the processor is running.
    pub running: bool,
    /// Submission currently being delivered.
    pub current_submission: Option<String>,
    /// Submissions waiting for delivery (queued, retrying or in flight).
    pub pending: usize,
    /// Submissions delivered since start.
    pub delivered: u64,
    /// Submissions failed since start.
    pub failed: u64,
    /// Transient failures scheduled for retry since start.
    pub retried: u64,
}
