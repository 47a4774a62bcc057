//! Submission storage trait and types.

use std::fmt;

use thiserror::Error;

use super::types::{Submission, SubmissionState};

/// Error type for queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The identifier already has a live (non-terminal) entry.
    #[error("submission already queued: {0}")]
    DuplicateSubmission(String),

    /// No entry exists for the identifier.
    #[error("submission not found: {0}")]
    NotFound(String),

    /// Another consumer already holds the queue.
    #[error("queue already has an active consumer")]
    ConsumerBusy,

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Database(e.to_string())
    }
}

/// Exclusive consumer access to a store's storage. Released when dropped.
pub struct StoreLease {
    _held: Box<dyn Send>,
}

impl StoreLease {
    /// Wrap whatever keeps the lease alive: a lock guard, a connection
    /// holding a lock, ...
    pub fn new(held: impl Send + 'static) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

impl fmt::Debug for StoreLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLease").finish_non_exhaustive()
    }
}

/// Filter for listing submissions.
#[derive(Debug, Clone, Default)]
pub struct SubmissionFilter {
    /// Filter by state.
    pub state: Option<SubmissionState>,
    /// Filter by owner.
    pub user_id: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl SubmissionFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            state: None,
            user_id: None,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by state.
    pub fn with_state(mut self, state: SubmissionState) -> Self {
        self.state = Some(state);
        self
    }

    /// Filter by owner.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for durable submission queue backends.
///
/// Every method is atomic with respect to the submission id. Ordering is
/// FIFO by enqueue time.
pub trait SubmissionStore: Send + Sync {
    /// Take the single consumer lease of the underlying storage.
    ///
    /// Fails with `ConsumerBusy` while a lease is held through any store
    /// instance over the same storage, in this process or another one.
    fn lock_consumer(&self) -> Result<StoreLease, QueueError>;

    /// Append a submission. Fails with `DuplicateSubmission` if the id has a
    /// live entry; a leftover terminal entry for the id is replaced.
    fn enqueue(&self, submission: &Submission) -> Result<Submission, QueueError>;

    /// Oldest non-terminal submission, without removing it.
    fn peek_next(&self) -> Result<Option<Submission>, QueueError>;

    /// Persist state, attempt count, error and timestamps of an existing entry.
    fn update(&self, submission: &Submission) -> Result<Submission, QueueError>;

    /// Remove an entry, returning it.
    fn remove(&self, id: &str) -> Result<Submission, QueueError>;

    /// Get a submission by id.
    fn get(&self, id: &str) -> Result<Option<Submission>, QueueError>;

    /// List submissions matching the filter, in queue order.
    fn list(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>, QueueError>;

    /// Count submissions matching the filter.
    fn count(&self, filter: &SubmissionFilter) -> Result<i64, QueueError>;

    /// Turn every durable `InFlight` entry into a due `Retrying` entry.
    /// Returns the recovered submissions.
    fn recover_in_flight(&self) -> Result<Vec<Submission>, QueueError>;
}
