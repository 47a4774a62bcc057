//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the pipeline's external
//! collaborators, allowing end-to-end tests without a remote repository.
//!
//! # Example
//!
//! ```rust,ignore
//! use submitter_core::testing::{MockDeliveryClient, MockOutcome, MockStatusNotifier};
//!
//! let delivery = MockDeliveryClient::new();
//! let notifier = MockStatusNotifier::new();
//!
//! // Configure mock responses
//! delivery.push_outcome(MockOutcome::Transient("session reset".into())).await;
//!
//! // Hand them to a QueueProcessor...
//! ```

mod mock_delivery;
mod mock_notifier;
mod mock_package_builder;

pub use mock_delivery::{MockDeliveryClient, MockOutcome, RecordedDelivery};
pub use mock_notifier::MockStatusNotifier;
pub use mock_package_builder::MockPackageBuilder;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;
    use std::path::PathBuf;

    use crate::notifier::StatusEvent;
    use crate::queue::{destination_folder_name, Submission, SubmissionState, SubmissionType};
    use crate::upload::{ChunkUpload, FileKind};

    /// A single-chunk upload of `file` owned by `alice`.
    pub fn single_chunk(
        submission_id: &str,
        file: &str,
        kind: FileKind,
        total_files: u32,
    ) -> ChunkUpload {
        ChunkUpload {
            submission_id: submission_id.to_string(),
            user_id: "alice".to_string(),
            submission_type: SubmissionType::Ncbi,
            file_id: file.to_string(),
            file_name: file.to_string(),
            kind,
            offset: 0,
            data: format!("content of {}", file).into_bytes(),
            chunk_number: 1,
            total_chunks: 1,
            total_files,
        }
    }

    /// A queued submission with a placeholder package location.
    pub fn submission(id: &str) -> Submission {
        Submission::new(
            id,
            "alice",
            SubmissionType::Ncbi,
            destination_folder_name(Utc::now(), id),
            PathBuf::from("/tmp/packages").join(id),
        )
    }

    /// A `Delivered` status event.
    pub fn status_event(submission_id: &str) -> StatusEvent {
        let mut submission = submission(submission_id);
        submission.state = SubmissionState::Delivered;
        submission.attempt_count = 1;
        StatusEvent::for_submission(&submission, None)
    }
}
