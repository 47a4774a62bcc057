//! Error types for delivery.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while delivering a package.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Could not reach the remote endpoint.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The transfer session broke or could not be established.
    #[error("Transfer session error: {0}")]
    Session(String),

    /// The delivery did not finish in time.
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Local or remote storage failure.
    #[error("I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote refused the package.
    #[error("Rejected by remote: {0}")]
    Rejected(String),

    /// The package cannot be delivered as it is.
    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    /// The destination folder already holds another submission.
    #[error("Destination folder {folder} already holds submission {owner}")]
    DestinationConflict { folder: String, owner: String },
}

impl DeliveryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same package may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Session(_) | Self::Timeout(_) | Self::Io { .. }
        )
    }
}
