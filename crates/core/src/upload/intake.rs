//! Completion hand-off: assembled upload -> package -> queue.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{info, warn};

use super::assembler::UploadAssembler;
use super::error::UploadError;
use super::types::{ChunkReceipt, ChunkUpload};
use crate::package::PackageBuilder;
use crate::queue::{destination_folder_name, QueueError, Submission, SubmissionQueue};

/// What happened to a received chunk.
#[derive(Debug, Clone)]
pub enum IntakeOutcome {
    /// The upload is still missing files.
    InProgress(ChunkReceipt),
    /// The chunk completed the upload and the package is queued.
    Enqueued(Submission),
}

/// Entry point for uploaded chunks.
///
/// A submission id is refused for a new upload while its previous upload is
/// being packaged or still has a live queue entry.
pub struct SubmissionIntake {
    assembler: Arc<UploadAssembler>,
    builder: Arc<dyn PackageBuilder>,
    queue: SubmissionQueue,
    /// Ids between leaving the assembler and landing in the queue.
    handoffs: StdMutex<HashSet<String>>,
}

/// Keeps an id reserved while its upload is handed off.
struct Handoff<'a> {
    handoffs: &'a StdMutex<HashSet<String>>,
    submission_id: String,
}

impl Drop for Handoff<'_> {
    fn drop(&mut self) {
        self.handoffs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.submission_id);
    }
}

impl SubmissionIntake {
    pub fn new(
        assembler: Arc<UploadAssembler>,
        builder: Arc<dyn PackageBuilder>,
        queue: SubmissionQueue,
    ) -> Self {
        Self {
            assembler,
            builder,
            queue,
            handoffs: StdMutex::new(HashSet::new()),
        }
    }

    pub fn assembler(&self) -> &Arc<UploadAssembler> {
        &self.assembler
    }

    /// Register a chunk; when it completes the upload, build and enqueue it.
    pub async fn receive_chunk(&self, chunk: ChunkUpload) -> Result<IntakeOutcome, UploadError> {
        let submission_id = chunk.submission_id.clone();

        let receipt = self
            .assembler
            .register_chunk_admitted(chunk, |first| self.admit(first))
            .await?;
        if !receipt.became_complete {
            return Ok(IntakeOutcome::InProgress(receipt));
        }

        // Reserved before the session leaves the assembler, released once the
        // queue entry exists or the hand-off failed.
        let _handoff = self.begin_handoff(&submission_id);
        let assembled = self.assembler.take_completed(&submission_id).await?;
        let package = match self.builder.build(&assembled).await {
            Ok(package) => package,
            Err(e) => {
                warn!(
                    submission_id = %submission_id,
                    builder = self.builder.name(),
                    error = %e,
                    "Package build failed"
                );
                remove_folder(&assembled.folder).await;
                return Err(e.into());
            }
        };

        let destination = destination_folder_name(Utc::now(), &assembled.submission_id);
        let submission = Submission::new(
            assembled.submission_id,
            assembled.user_id,
            assembled.submission_type,
            destination,
            package.location,
        );
        let submission = self.queue.enqueue(submission)?;

        info!(
            submission_id = %submission.id,
            package_files = package.files.len(),
            "Upload handed off for delivery"
        );
        Ok(IntakeOutcome::Enqueued(submission))
    }
}

impl SubmissionIntake {
    fn handoffs(&self) -> MutexGuard<'_, HashSet<String>> {
        self.handoffs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_handoff(&self, submission_id: &str) -> Handoff<'_> {
        self.handoffs().insert(submission_id.to_string());
        Handoff {
            handoffs: &self.handoffs,
            submission_id: submission_id.to_string(),
        }
    }

    /// Admission of a new upload session. A new upload must not reuse the
    /// folder of a submission that is being handed off or still queued.
    fn admit(&self, first: &ChunkUpload) -> Result<(), UploadError> {
        let submission_id = &first.submission_id;
        if self.handoffs().contains(submission_id) {
            return Err(QueueError::DuplicateSubmission(submission_id.clone()).into());
        }
        if let Some(existing) = self.queue.store().get(submission_id)? {
            if !existing.state.is_terminal() {
                return Err(QueueError::DuplicateSubmission(submission_id.clone()).into());
            }
        }
        Ok(())
    }
}

async fn remove_folder(folder: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_dir_all(folder).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(folder = %folder.display(), error = %e, "Failed to remove upload folder");
        }
    }
}
