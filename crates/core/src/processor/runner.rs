//! Queue processor implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::delivery::{DeliveryClient, DeliveryError, DeliveryReceipt, DeliveryRequest};
use crate::notifier::{NotifyError, StatusEvent, StatusNotifier};
use crate::queue::{
    ConsumerLease, QueueError, Submission, SubmissionFilter, SubmissionQueue, SubmissionState,
};

use super::config::ProcessorConfig;
use super::types::{ProcessorError, ProcessorStatus};

/// Outcome of one delivery attempt.
enum Attempt {
    Delivered(DeliveryReceipt),
    Failed { error: String, transient: bool },
}

/// Aborts the delivery task if the attempt is dropped before it finishes.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Clears the running flag however the loop ends, panics included.
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Counters {
    current: RwLock<Option<String>>,
    delivered: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// Everything the processing loop needs, cloned into the spawned task.
#[derive(Clone)]
struct Worker {
    config: ProcessorConfig,
    queue: SubmissionQueue,
    delivery: Arc<dyn DeliveryClient>,
    notifier: Arc<dyn StatusNotifier>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

/// The single consumer of a [`SubmissionQueue`].
pub struct QueueProcessor {
    worker: Worker,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl QueueProcessor {
    /// Create a new processor. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: ProcessorConfig,
        queue: SubmissionQueue,
        delivery: Arc<dyn DeliveryClient>,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            worker: Worker {
                config,
                queue,
                delivery,
                notifier,
                running: Arc::new(AtomicBool::new(false)),
                counters: Arc::new(Counters::default()),
            },
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Take the consumer lease, recover leftovers from a previous run and
    /// spawn the processing loop.
    pub async fn start(&self) -> Result<(), ProcessorError> {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return Err(ProcessorError::AlreadyRunning);
            }
            warn!("Previous processing loop ended unexpectedly, restarting");
            task.take();
        }

        let lease = match self.worker.queue.acquire_consumer() {
            Ok(lease) => lease,
            Err(QueueError::ConsumerBusy) => return Err(ProcessorError::ConsumerBusy),
            Err(e) => return Err(e.into()),
        };

        info!(delivery = self.worker.delivery.name(), "Starting queue processor");

        self.worker.recover().await?;

        self.worker.running.store(true, Ordering::SeqCst);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let worker = self.worker.clone();
        *task = Some(tokio::spawn(worker.run(lease, shutdown_rx)));

        info!("Queue processor started");
        Ok(())
    }

    /// Stop the processor.
    ///
    /// A delivery in progress gets `shutdown_grace` to finish. After that the
    /// loop is aborted and the interrupted submission is set back to
    /// `Retrying`.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(mut handle) = task.take() else {
            warn!("Queue processor not running");
            return;
        };

        info!("Stopping queue processor");
        self.worker.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let grace = self.worker.config.shutdown_grace();
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!(
                grace_secs = grace.as_secs(),
                "Shutdown grace elapsed, aborting delivery"
            );
            handle.abort();
            let _ = handle.await;
            self.worker.release_interrupted().await;
        }

        *self.worker.counters.current.write().await = None;
        info!("Queue processor stopped");
    }

    /// Whether the processing loop is running.
    pub fn is_running(&self) -> bool {
        self.worker.running.load(Ordering::Relaxed)
    }

    /// Get current processor status.
    pub async fn status(&self) -> ProcessorStatus {
        let store = self.worker.queue.store();
        let pending: usize = [
            SubmissionState::Queued,
            SubmissionState::InFlight,
            SubmissionState::Retrying,
        ]
        .into_iter()
        .map(|state| {
            store
                .count(&SubmissionFilter::new().with_state(state))
                .unwrap_or(0) as usize
        })
        .sum();

        let counters = &self.worker.counters;
        ProcessorStatus {
            running: self.is_running(),
            current_submission: counters.current.read().await.clone(),
            pending,
            delivered: counters.delivered.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
        }
    }
}

impl Worker {
    /// Startup recovery.
    ///
    /// `InFlight` rows become `Retrying` (due now). Terminal rows left behind
    /// by a crash between persisting and removal are reported and removed.
    async fn recover(&self) -> Result<(), QueueError> {
        let store = self.queue.store();

        let recovered = store.recover_in_flight()?;
        for submission in &recovered {
            warn!(
                submission_id = %submission.id,
                attempt = submission.attempt_count,
                "Recovered submission with unknown delivery outcome"
            );
            self.notify(submission, submission.last_error.clone()).await;
        }

        for state in [SubmissionState::Delivered, SubmissionState::Failed] {
            let filter = SubmissionFilter::new()
                .with_state(state)
                .with_limit(i64::MAX);
            let lingering = store.list(&filter)?;
            for submission in lingering {
                info!(
                    submission_id = %submission.id,
                    state = %submission.state,
                    "Finishing terminal submission left from previous run"
                );
                self.notify(&submission, submission.last_error.clone()).await;
                store.remove(&submission.id)?;
            }
        }

        if !recovered.is_empty() {
            info!(count = recovered.len(), "Recovered in-flight submissions");
        }
        Ok(())
    }

    async fn run(self, _lease: ConsumerLease, mut shutdown_rx: broadcast::Receiver<()>) {
        let _running = RunningFlag(Arc::clone(&self.running));
        info!("Processing loop started");
        let poll = self.config.poll_interval();

        loop {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }

            let head = match self.queue.store().peek_next() {
                Ok(head) => head,
                Err(e) => {
                    error!(error = %e, "Failed to read queue head");
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(poll) => continue,
                    }
                }
            };

            let Some(submission) = head else {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = self.queue.wait_for_work() => {}
                    _ = tokio::time::sleep(poll) => {}
                }
                continue;
            };

            if let Some(wait) = Self::retry_wait(&submission) {
                debug!(
                    submission_id = %submission.id,
                    wait_ms = wait.as_millis() as u64,
                    "Head of queue waiting for retry"
                );
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(wait.min(poll)) => {}
                }
                continue;
            }

            if let Err(stop) = self.process(submission, &mut shutdown_rx).await {
                debug!("{}", stop);
                break;
            }
        }

        info!("Processing loop stopped");
    }

    /// Remaining wait before a `Retrying` submission is due.
    fn retry_wait(submission: &Submission) -> Option<Duration> {
        let at = submission.next_attempt_at?;
        if submission.state != SubmissionState::Retrying {
            return None;
        }
        (at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Run one delivery attempt and record its outcome.
    ///
    /// Returns `Err` only when shutdown interrupted persisting the outcome.
    async fn process(
        &self,
        mut submission: Submission,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), &'static str> {
        let now = Utc::now();
        submission.attempt_count += 1;
        submission.state = SubmissionState::InFlight;
        submission.next_attempt_at = None;
        submission.last_attempt_at = Some(now);
        submission.updated_at = now;

        *self.counters.current.write().await = Some(submission.id.clone());
        if let Err(e) = self.queue.store().update(&submission) {
            error!(
                submission_id = %submission.id,
                error = %e,
                "Failed to mark submission in flight"
            );
            *self.counters.current.write().await = None;
            tokio::select! {
                _ = shutdown_rx.recv() => return Err("shutdown while store unavailable"),
                _ = tokio::time::sleep(self.config.poll_interval()) => return Ok(()),
            }
        }

        info!(
            submission_id = %submission.id,
            attempt = submission.attempt_count,
            destination = %submission.destination_folder,
            "Delivering submission"
        );

        let attempt = self.attempt_delivery(&submission).await;
        let detail = match attempt {
            Attempt::Delivered(receipt) => {
                info!(
                    submission_id = %submission.id,
                    remote = %receipt.remote_location,
                    files = receipt.files_transferred,
                    already_delivered = receipt.already_delivered,
                    "Submission delivered"
                );
                submission.state = SubmissionState::Delivered;
                submission.last_error = None;
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                Some(receipt.remote_location)
            }
            Attempt::Failed { error, transient }
                if transient && self.config.retry.allows_retry(submission.attempt_count) =>
            {
                let delay = self.config.retry.backoff(submission.attempt_count);
                warn!(
                    submission_id = %submission.id,
                    attempt = submission.attempt_count,
                    max_attempts = self.config.retry.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient delivery failure, will retry"
                );
                let now = Utc::now();
                submission.state = SubmissionState::Retrying;
                submission.next_attempt_at = Some(
                    TimeDelta::from_std(delay)
                        .ok()
                        .and_then(|d| now.checked_add_signed(d))
                        .unwrap_or(now),
                );
                submission.last_error = Some(error.clone());
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                Some(error)
            }
            Attempt::Failed { error, transient } => {
                error!(
                    submission_id = %submission.id,
                    attempt = submission.attempt_count,
                    transient,
                    error = %error,
                    "Submission failed"
                );
                submission.state = SubmissionState::Failed;
                submission.last_error = Some(error.clone());
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Some(error)
            }
        };
        submission.updated_at = Utc::now();

        let persisted = self.persist(&submission, shutdown_rx).await;
        *self.counters.current.write().await = None;
        if !persisted {
            return Err("shutdown while persisting delivery outcome");
        }

        self.notify(&submission, detail).await;

        if submission.state.is_terminal() {
            if let Err(e) = self.queue.store().remove(&submission.id) {
                // Left as a terminal row; the next start reports and removes it.
                warn!(
                    submission_id = %submission.id,
                    error = %e,
                    "Failed to remove finished submission"
                );
            }
        }
        Ok(())
    }

    /// Invoke the delivery client in its own task, bounded by the timeout.
    async fn attempt_delivery(&self, submission: &Submission) -> Attempt {
        let client = Arc::clone(&self.delivery);
        let request = DeliveryRequest::from_submission(submission);
        let timeout = self.config.delivery_timeout();

        let handle = tokio::spawn(async move {
            tokio::time::timeout(timeout, client.deliver(&request)).await
        });
        let _guard = AbortOnDrop(handle.abort_handle());

        match handle.await {
            Ok(Ok(Ok(receipt))) => Attempt::Delivered(receipt),
            Ok(Ok(Err(e))) => Attempt::Failed {
                transient: e.is_transient(),
                error: e.to_string(),
            },
            Ok(Err(_elapsed)) => Attempt::Failed {
                error: DeliveryError::Timeout(timeout).to_string(),
                transient: true,
            },
            Err(join_error) if join_error.is_panic() => Attempt::Failed {
                error: format!("delivery client panicked: {}", panic_message(join_error)),
                transient: false,
            },
            Err(join_error) => Attempt::Failed {
                error: format!("delivery task cancelled: {}", join_error),
                transient: true,
            },
        }
    }

    /// Persist the submission, retrying on store errors until shutdown.
    async fn persist(
        &self,
        submission: &Submission,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> bool {
        loop {
            match self.queue.store().update(submission) {
                Ok(_) => return true,
                Err(e) => {
                    error!(
                        submission_id = %submission.id,
                        state = %submission.state,
                        error = %e,
                        "Failed to persist delivery outcome, retrying"
                    );
                }
            }
            tokio::select! {
                _ = shutdown_rx.recv() => return false,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }

    /// Report a state change. Runs the notifier in its own task so a
    /// panicking notifier is reported like any other notification failure.
    async fn notify(&self, submission: &Submission, detail: Option<String>) {
        let event = StatusEvent::for_submission(submission, detail);
        let notifier = Arc::clone(&self.notifier);
        let handle = tokio::spawn(async move { notifier.notify(event).await });
        let _guard = AbortOnDrop(handle.abort_handle());

        let result = match handle.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => Err(NotifyError::Failed(format!(
                "notifier panicked: {}",
                panic_message(join_error)
            ))),
            Err(join_error) => Err(NotifyError::Failed(format!(
                "notification cancelled: {}",
                join_error
            ))),
        };
        if let Err(e) = result {
            warn!(
                submission_id = %submission.id,
                state = %submission.state,
                error = %e,
                "Failed to notify status change"
            );
        }
    }

    /// Move the submission an aborted loop was working on back to `Retrying`.
    async fn release_interrupted(&self) {
        let Some(id) = self.counters.current.write().await.take() else {
            return;
        };
        let store = self.queue.store();
        match store.get(&id) {
            Ok(Some(mut submission)) if submission.state == SubmissionState::InFlight => {
                submission.state = SubmissionState::Retrying;
                submission.next_attempt_at = None;
                submission.last_error = Some("delivery interrupted by shutdown".to_string());
                submission.updated_at = Utc::now();
                match store.update(&submission) {
                    Ok(_) => {
                        info!(submission_id = %id, "Interrupted submission set back to retrying");
                        self.notify(&submission, submission.last_error.clone()).await;
                    }
                    Err(e) => error!(
                        submission_id = %id,
                        error = %e,
                        "Failed to release interrupted submission"
                    ),
                }
            }
            Ok(_) => {}
            Err(e) => error!(
                submission_id = %id,
                error = %e,
                "Failed to load interrupted submission"
            ),
        }
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
