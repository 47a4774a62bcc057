//! Trait definitions for delivery.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::DeliveryError;
use crate::queue::Submission;

/// What to deliver and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub submission_id: String,
    /// Local directory holding the package.
    pub package_location: PathBuf,
    /// Remote folder name the package goes into.
    pub destination_folder: String,
}

impl DeliveryRequest {
    pub fn from_submission(submission: &Submission) -> Self {
        Self {
            submission_id: submission.id.clone(),
            package_location: submission.package_location.clone(),
            destination_folder: submission.destination_folder.clone(),
        }
    }
}

/// Proof of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub submission_id: String,
    /// Where the package ended up on the remote side.
    pub remote_location: String,
    pub files_transferred: usize,
    pub bytes_transferred: u64,
    /// The remote already had the package from an earlier attempt.
    pub already_delivered: bool,
}

/// Transfers a package to the remote repository.
///
/// Implementations must be safe to call again for a package whose previous
/// attempt had an unknown outcome.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Returns the name of this client implementation.
    fn name(&self) -> &str;

    /// Deliver one package.
    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryReceipt, DeliveryError>;
}
