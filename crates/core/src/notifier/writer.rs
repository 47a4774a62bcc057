use std::sync::Arc;

use tokio::sync::mpsc;

use super::{NotifierHandle, StatusEvent, StatusEventStore};

/// Background task that receives status events and writes them to storage
pub struct StatusWriter {
    rx: mpsc::Receiver<StatusEvent>,
    store: Arc<dyn StatusEventStore>,
}

impl StatusWriter {
    pub fn new(rx: mpsc::Receiver<StatusEvent>, store: Arc<dyn StatusEventStore>) -> Self {
        Self { rx, store }
    }

    /// Run the writer, consuming events until every handle is dropped
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        tracing::info!("Status writer started");

        while let Some(event) = self.rx.recv().await {
            if let Err(e) = self.store.insert(&event) {
                tracing::error!(
                    submission_id = %event.submission_id,
                    state = %event.state,
                    "Failed to write status event: {}",
                    e
                );
            }
        }

        tracing::info!("Status writer shutting down");
    }
}

/// Create a complete status notification system
///
/// Returns:
/// - `NotifierHandle` - pass (clones of) this to the processor
/// - `StatusWriter` - spawn this as a background task with `tokio::spawn(writer.run())`
///
/// Events are dropped with an error once `buffer_size` events are pending.
pub fn create_status_system(
    store: Arc<dyn StatusEventStore>,
    buffer_size: usize,
) -> (NotifierHandle, StatusWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = NotifierHandle::new(tx);
    let writer = StatusWriter::new(rx, store);
    (handle, writer)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::notifier::{
        SqliteStatusStore, StatusEventFilter, StatusNotifier, StatusRecord, StatusStoreError,
    };
    use crate::testing::fixtures;

    /// Store that fails every insert
    struct FailingStore {
        attempts: Mutex<usize>,
    }

    impl StatusEventStore for FailingStore {
        fn insert(&self, _event: &StatusEvent) -> Result<i64, StatusStoreError> {
            *self.attempts.lock().unwrap() += 1;
            Err(StatusStoreError::Database("Mock failure".to_string()))
        }

        fn query(
            &self,
            _filter: &StatusEventFilter,
        ) -> Result<Vec<StatusRecord>, StatusStoreError> {
            Ok(Vec::new())
        }

        fn count(&self, _filter: &StatusEventFilter) -> Result<i64, StatusStoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_writer_persists_events() {
        let store = Arc::new(SqliteStatusStore::in_memory().unwrap());
        let (handle, writer) = create_status_system(store.clone(), 10);
        let writer_task = tokio::spawn(writer.run());

        for i in 0..3 {
            handle
                .notify(fixtures::status_event(&format!("S{}", i)))
                .await
                .unwrap();
        }

        drop(handle);
        writer_task.await.unwrap();

        assert_eq!(store.count(&StatusEventFilter::new()).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_writer_continues_on_insert_failure() {
        let store = Arc::new(FailingStore {
            attempts: Mutex::new(0),
        });
        let (handle, writer) = create_status_system(store.clone(), 10);
        let writer_task = tokio::spawn(writer.run());

        handle.notify(fixtures::status_event("S1")).await.unwrap();
        handle.notify(fixtures::status_event("S2")).await.unwrap();
        drop(handle);

        writer_task.await.unwrap();
        assert_eq!(*store.attempts.lock().unwrap(), 2);
    }
}
