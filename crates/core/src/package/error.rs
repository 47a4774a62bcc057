//! Error types for package building.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building a package.
#[derive(Debug, Error)]
pub enum PackageError {
    /// An assembled file disappeared before it could be packaged.
    #[error("Assembled file missing: {path}")]
    MissingFile { path: PathBuf },

    /// The submission content could not be converted.
    #[error("Conversion failed: {0}")]
    Conversion(String),

    /// An assembled file uses a name the package format reserves.
    #[error("File name {0} is reserved")]
    ReservedName(String),

    /// Failed to read or write package files.
    #[error("I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize the manifest.
    #[error("Failed to serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl PackageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::MissingFile { path: path.into() }
        } else {
            Self::Io {
                path: path.into(),
                source,
            }
        }
    }
}
