use thiserror::Error;

use super::StatusEvent;
use crate::queue::SubmissionState;

#[derive(Debug, Error)]
pub enum StatusStoreError {
    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StatusStoreError {
    fn from(e: rusqlite::Error) -> Self {
        StatusStoreError::Database(e.to_string())
    }
}

/// A persisted status event
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub id: i64,
    pub event: StatusEvent,
}

/// Filter for querying status events
#[derive(Debug, Clone, Default)]
pub struct StatusEventFilter {
    pub submission_id: Option<String>,
    pub user_id: Option<String>,
    pub state: Option<SubmissionState>,
    pub limit: i64,
    pub offset: i64,
}

impl StatusEventFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            offset: 0,
            ..Default::default()
        }
    }

    pub fn with_submission_id(mut self, submission_id: impl Into<String>) -> Self {
        self.submission_id = Some(submission_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_state(mut self, state: SubmissionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for status event storage
pub trait StatusEventStore: Send + Sync {
    /// Insert an event, returns the assigned ID
    fn insert(&self, event: &StatusEvent) -> Result<i64, StatusStoreError>;

    /// Query events, newest first
    fn query(&self, filter: &StatusEventFilter) -> Result<Vec<StatusRecord>, StatusStoreError>;

    /// Count matching events
    fn count(&self, filter: &StatusEventFilter) -> Result<i64, StatusStoreError>;
}
