//! Mock package builder for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::package::{Package, PackageBuilder, PackageError, PackageFile};
use crate::upload::AssembledSubmission;

/// Mock implementation of the PackageBuilder trait.
///
/// Packages the assembly folder as-is without touching the filesystem.
#[derive(Clone, Default)]
pub struct MockPackageBuilder {
    built: Arc<RwLock<Vec<AssembledSubmission>>>,
    next_error: Arc<RwLock<Option<String>>>,
}

impl MockPackageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the next build to fail with a conversion error.
    pub async fn set_next_error(&self, message: impl Into<String>) {
        *self.next_error.write().await = Some(message.into());
    }

    /// Get all successfully built submissions.
    pub async fn built(&self) -> Vec<AssembledSubmission> {
        self.built.read().await.clone()
    }
}

#[async_trait]
impl PackageBuilder for MockPackageBuilder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn build(&self, submission: &AssembledSubmission) -> Result<Package, PackageError> {
        if let Some(message) = self.next_error.write().await.take() {
            return Err(PackageError::Conversion(message));
        }

        self.built.write().await.push(submission.clone());
        Ok(Package {
            location: submission.folder.clone(),
            files: submission
                .files
                .iter()
                .map(|f| PackageFile {
                    name: f.file_name.clone(),
                    kind: f.kind,
                    size: f.size,
                    sha256: "mock-checksum".to_string(),
                })
                .collect(),
        })
    }
}
