//! Mock status notifier for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::notifier::{NotifyError, StatusEvent, StatusNotifier};
use crate::queue::SubmissionState;

/// Mock implementation of the StatusNotifier trait.
///
/// Records every accepted event. When set to failing, events are rejected
/// with `NotifyError::Failed` and only counted. When set to panicking, every
/// call panics after being counted.
#[derive(Clone, Default)]
pub struct MockStatusNotifier {
    events: Arc<RwLock<Vec<StatusEvent>>>,
    failing: Arc<RwLock<bool>>,
    panicking: Arc<RwLock<bool>>,
    rejected: Arc<RwLock<usize>>,
}

impl MockStatusNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following notification fail.
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.write().await = failing;
    }

    /// Make every following notification panic.
    pub async fn set_panicking(&self, panicking: bool) {
        *self.panicking.write().await = panicking;
    }

    /// Get all recorded events.
    pub async fn events(&self) -> Vec<StatusEvent> {
        self.events.read().await.clone()
    }

    /// Recorded events of one submission, in order.
    pub async fn events_for(&self, submission_id: &str) -> Vec<StatusEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.submission_id == submission_id)
            .cloned()
            .collect()
    }

    /// Recorded terminal states of one submission.
    pub async fn terminal_states_for(&self, submission_id: &str) -> Vec<SubmissionState> {
        self.events_for(submission_id)
            .await
            .into_iter()
            .filter(|e| e.is_terminal())
            .map(|e| e.state)
            .collect()
    }

    /// Number of rejected notifications.
    pub async fn rejected_count(&self) -> usize {
        *self.rejected.read().await
    }
}

#[async_trait]
impl StatusNotifier for MockStatusNotifier {
    async fn notify(&self, event: StatusEvent) -> Result<(), NotifyError> {
        let panicking = *self.panicking.read().await;
        if panicking {
            *self.rejected.write().await += 1;
            panic!("mock notifier panic for {}", event.submission_id);
        }
        if *self.failing.read().await {
            *self.rejected.write().await += 1;
            return Err(NotifyError::Failed("mock notifier failure".to_string()));
        }
        self.events.write().await.push(event);
        Ok(())
    }
}
