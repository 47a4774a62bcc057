//! Trait definitions for package building.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::PackageError;
use crate::upload::{AssembledSubmission, FileKind};

/// One file inside a built package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFile {
    /// File name relative to the package location.
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    /// Lowercase hex SHA-256 of the content.
    pub sha256: String,
}

/// Output of a [`PackageBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Directory holding the transfer-ready files.
    pub location: PathBuf,
    pub files: Vec<PackageFile>,
}

/// Converts an assembled submission into a transfer-ready package.
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    /// Returns the name of this builder implementation.
    fn name(&self) -> &str;

    /// Builds the package for a completed upload.
    async fn build(&self, submission: &AssembledSubmission) -> Result<Package, PackageError>;
}
