//! Mock delivery client for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::delivery::{DeliveryClient, DeliveryError, DeliveryReceipt, DeliveryRequest};

/// Scripted result of one mock delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Success,
    /// Fail with a transient session error.
    Transient(String),
    /// Fail with a permanent rejection.
    Permanent(String),
    /// Panic inside the client.
    Panic,
}

/// A recorded delivery attempt for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedDelivery {
    pub request: DeliveryRequest,
    pub outcome: MockOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock implementation of the DeliveryClient trait.
///
/// Provides controllable behavior for testing:
/// - Script outcomes per attempt (FIFO), falling back to a default outcome
/// - Record every attempt with its timing
/// - Track the maximum number of concurrent deliveries
/// - Simulate slow transfers
///
/// # Example
///
/// ```rust,ignore
/// use submitter_core::testing::{MockDeliveryClient, MockOutcome};
///
/// let client = MockDeliveryClient::new();
/// client.push_outcome(MockOutcome::Transient("reset".into())).await;
///
/// // first attempt fails, second succeeds
/// ```
#[derive(Clone)]
pub struct MockDeliveryClient {
    script: Arc<RwLock<VecDeque<MockOutcome>>>,
    default_outcome: Arc<RwLock<MockOutcome>>,
    deliveries: Arc<RwLock<Vec<RecordedDelivery>>>,
    delay: Arc<RwLock<Duration>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Default for MockDeliveryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeliveryClient {
    /// Create a mock client where every delivery succeeds.
    pub fn new() -> Self {
        Self {
            script: Arc::new(RwLock::new(VecDeque::new())),
            default_outcome: Arc::new(RwLock::new(MockOutcome::Success)),
            deliveries: Arc::new(RwLock::new(Vec::new())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue the outcome of the next unscripted attempt.
    pub async fn push_outcome(&self, outcome: MockOutcome) {
        self.script.write().await.push_back(outcome);
    }

    /// Queue several outcomes in order.
    pub async fn push_outcomes(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.script.write().await.extend(outcomes);
    }

    /// Outcome used once the script is exhausted.
    pub async fn set_default_outcome(&self, outcome: MockOutcome) {
        *self.default_outcome.write().await = outcome;
    }

    /// Set the simulated transfer duration.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Get all recorded (finished) attempts.
    pub async fn recorded_deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.read().await.clone()
    }

    /// Get the number of finished attempts.
    pub async fn delivery_count(&self) -> usize {
        self.deliveries.read().await.len()
    }

    /// Submission ids of successful deliveries, in order.
    pub async fn delivered_ids(&self) -> Vec<String> {
        self.deliveries
            .read()
            .await
            .iter()
            .filter(|d| d.outcome == MockOutcome::Success)
            .map(|d| d.request.submission_id.clone())
            .collect()
    }

    /// Number of attempts made for one submission.
    pub async fn attempts_for(&self, submission_id: &str) -> usize {
        self.deliveries
            .read()
            .await
            .iter()
            .filter(|d| d.request.submission_id == submission_id)
            .count()
    }

    /// Highest number of deliveries observed running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn next_outcome(&self) -> MockOutcome {
        match self.script.write().await.pop_front() {
            Some(outcome) => outcome,
            None => self.default_outcome.read().await.clone(),
        }
    }
}

#[async_trait]
impl DeliveryClient for MockDeliveryClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryReceipt, DeliveryError> {
        let started_at = Utc::now();
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let _guard = InFlightGuard(Arc::clone(&self.in_flight));

        let outcome = self.next_outcome().await;
        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.deliveries.write().await.push(RecordedDelivery {
            request: request.clone(),
            outcome: outcome.clone(),
            started_at,
            finished_at: Utc::now(),
        });

        match outcome {
            MockOutcome::Success => Ok(DeliveryReceipt {
                submission_id: request.submission_id.clone(),
                remote_location: format!("mock://{}", request.destination_folder),
                files_transferred: 1,
                bytes_transferred: 1024,
                already_delivered: false,
            }),
            MockOutcome::Transient(message) => Err(DeliveryError::Session(message)),
            MockOutcome::Permanent(message) => Err(DeliveryError::Rejected(message)),
            MockOutcome::Panic => panic!("mock delivery client panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(id: &str) -> DeliveryRequest {
        DeliveryRequest {
            submission_id: id.to_string(),
            package_location: PathBuf::from("/tmp/pkg"),
            destination_folder: "folder".to_string(),
        }
    }

    #[tokio::test]
    async fn test_scripted_outcomes_then_default() {
        let client = MockDeliveryClient::new();
        client
            .push_outcomes([
                MockOutcome::Transient("reset".into()),
                MockOutcome::Permanent("schema".into()),
            ])
            .await;

        let first = client.deliver(&request("S1")).await.unwrap_err();
        assert!(first.is_transient());
        let second = client.deliver(&request("S1")).await.unwrap_err();
        assert!(!second.is_transient());
        assert!(client.deliver(&request("S1")).await.is_ok());

        assert_eq!(client.attempts_for("S1").await, 3);
        assert_eq!(client.delivered_ids().await, vec!["S1".to_string()]);
        assert_eq!(client.max_concurrent(), 1);
    }
}
