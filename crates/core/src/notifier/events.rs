use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::{Submission, SubmissionState, SubmissionType};

/// A state change of a submission, as reported to the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub submission_id: String,
    pub user_id: String,
    pub submission_type: SubmissionType,
    pub state: SubmissionState,
    /// Error or receipt detail, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Delivery attempts made so far.
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    /// Event describing the submission's current state.
    pub fn for_submission(submission: &Submission, detail: Option<String>) -> Self {
        Self {
            submission_id: submission.id.clone(),
            user_id: submission.user_id.clone(),
            submission_type: submission.submission_type,
            state: submission.state,
            detail,
            attempt: submission.attempt_count,
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Status channel is full")]
    ChannelFull,

    #[error("Status channel is closed")]
    ChannelClosed,

    #[error("Notification failed: {0}")]
    Failed(String),
}

/// Receives submission status changes.
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    /// Report one status change. Must not wait on slow downstream work.
    async fn notify(&self, event: StatusEvent) -> Result<(), NotifyError>;
}
