use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{NotifyError, StatusEvent, StatusNotifier};
use crate::queue::SubmissionState;

/// Notifier that writes each status change to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StatusNotifier for LogNotifier {
    async fn notify(&self, event: StatusEvent) -> Result<(), NotifyError> {
        let detail = event.detail.as_deref().unwrap_or("");
        match event.state {
            SubmissionState::Failed | SubmissionState::Retrying => warn!(
                submission_id = %event.submission_id,
                user_id = %event.user_id,
                repository = event.submission_type.label(),
                state = %event.state,
                attempt = event.attempt,
                detail,
                "Submission status changed"
            ),
            _ => info!(
                submission_id = %event.submission_id,
                user_id = %event.user_id,
                repository = event.submission_type.label(),
                state = %event.state,
                attempt = event.attempt,
                detail,
                "Submission status changed"
            ),
        }
        Ok(())
    }
}

/// Forwards every event to several notifiers.
///
/// All notifiers are called even if one fails; the first error is returned.
#[derive(Clone, Default)]
pub struct MultiNotifier {
    notifiers: Vec<Arc<dyn StatusNotifier>>,
}

impl MultiNotifier {
    pub fn new(notifiers: Vec<Arc<dyn StatusNotifier>>) -> Self {
        Self { notifiers }
    }
}

#[async_trait]
impl StatusNotifier for MultiNotifier {
    async fn notify(&self, event: StatusEvent) -> Result<(), NotifyError> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(event.clone()).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockStatusNotifier};

    #[tokio::test]
    async fn test_log_notifier_accepts_events() {
        let notifier = LogNotifier::new();
        assert!(notifier.notify(fixtures::status_event("S1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_multi_notifier_reaches_all_despite_failure() {
        let failing = Arc::new(MockStatusNotifier::new());
        failing.set_failing(true).await;
        let recording = Arc::new(MockStatusNotifier::new());

        let multi = MultiNotifier::new(vec![
            failing.clone() as Arc<dyn StatusNotifier>,
            Arc::new(LogNotifier::new()),
            recording.clone() as Arc<dyn StatusNotifier>,
        ]);

        let result = multi.notify(fixtures::status_event("S1")).await;
        assert!(matches!(result, Err(NotifyError::Failed(_))));
        assert_eq!(recording.events().await.len(), 1);
    }
}
