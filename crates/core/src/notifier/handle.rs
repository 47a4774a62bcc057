use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{NotifyError, StatusEvent, StatusNotifier};

/// Channel-backed notifier feeding a [`StatusWriter`](super::StatusWriter).
///
/// This is cheaply cloneable and can be shared across tasks. Sending never
/// waits: a full or closed channel is reported as an error.
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::Sender<StatusEvent>,
}

impl NotifierHandle {
    pub fn new(tx: mpsc::Sender<StatusEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event for the writer without waiting.
    pub fn try_notify(&self, event: StatusEvent) -> Result<(), NotifyError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::ChannelClosed,
        })
    }
}

#[async_trait]
impl StatusNotifier for NotifierHandle {
    async fn notify(&self, event: StatusEvent) -> Result<(), NotifyError> {
        self.try_notify(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_notify_sends_event() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = NotifierHandle::new(tx);

        handle.notify(fixtures::status_event("S1")).await.unwrap();

        let event = rx.recv().await.expect("Should receive event");
        assert_eq!(event.submission_id, "S1");
    }

    #[test]
    fn test_full_channel_is_reported() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = NotifierHandle::new(tx);

        assert!(handle.try_notify(fixtures::status_event("S1")).is_ok());
        assert!(matches!(
            handle.try_notify(fixtures::status_event("S2")),
            Err(NotifyError::ChannelFull)
        ));
    }

    #[tokio::test]
    async fn test_closed_channel_is_reported() {
        let (tx, rx) = mpsc::channel(10);
        let handle = NotifierHandle::new(tx);
        drop(rx);

        assert!(matches!(
            handle.notify(fixtures::status_event("S1")).await,
            Err(NotifyError::ChannelClosed)
        ));
    }
}
