//! Error types for upload assembly.

use std::path::PathBuf;
use thiserror::Error;

use crate::package::PackageError;
use crate::queue::QueueError;

/// Errors returned to the uploading client.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The chunk contradicts the session or is malformed.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A completed upload does not carry exactly one metadata file.
    #[error("Malformed submission: expected exactly one metadata file, found {metadata_files}")]
    MalformedSubmission { metadata_files: usize },

    /// No upload session is tracked for the identifier.
    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    /// Local storage failed. The session has been discarded.
    #[error("Storage failure at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The package builder rejected the completed upload.
    #[error("Package build failed: {0}")]
    PackageBuild(#[from] PackageError),

    /// The built package could not be enqueued.
    #[error("Enqueue failed: {0}")]
    Queue(#[from] QueueError),
}

impl UploadError {
    pub(crate) fn violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    /// Whether the client may resend the same chunk and expect progress.
    ///
    /// Only storage failures qualify; the session is gone, so the client
    /// restarts the upload from the first chunk.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}
