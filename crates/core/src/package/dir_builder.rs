//! Directory-based package builder.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, BufReader};
use tracing::debug;

use super::error::PackageError;
use super::traits::{Package, PackageBuilder, PackageFile};
use crate::upload::AssembledSubmission;

/// Name of the manifest written next to the packaged files. Uploads may not
/// use it.
pub const MANIFEST_FILE_NAME: &str = ".package-manifest.json";

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Serialize)]
struct Manifest<'a> {
    submission_id: &'a str,
    user_id: &'a str,
    submission_type: &'a str,
    files: &'a [PackageFile],
}

/// Packages the assembled folder in place.
///
/// Every assembled file is checksummed and listed in
/// [`MANIFEST_FILE_NAME`]; the package location is the assembly folder
/// itself.
#[derive(Debug, Default, Clone)]
pub struct DirectoryPackageBuilder;

impl DirectoryPackageBuilder {
    pub fn new() -> Self {
        Self
    }

    async fn sha256_file(path: &Path) -> Result<(u64, String), PackageError> {
        let file = File::open(path)
            .await
            .map_err(|e| PackageError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut total = 0u64;

        loop {
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| PackageError::io(path, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            total += read as u64;
        }

        Ok((total, format!("{:x}", hasher.finalize())))
    }
}

#[async_trait]
impl PackageBuilder for DirectoryPackageBuilder {
    fn name(&self) -> &str {
        "directory"
    }

    async fn build(&self, submission: &AssembledSubmission) -> Result<Package, PackageError> {
        if let Some(clash) = submission
            .files
            .iter()
            .find(|f| f.file_name == MANIFEST_FILE_NAME)
        {
            return Err(PackageError::ReservedName(clash.file_name.clone()));
        }

        let mut files = Vec::with_capacity(submission.files.len());
        for assembled in &submission.files {
            let (size, sha256) = Self::sha256_file(&assembled.path).await?;
            files.push(PackageFile {
                name: assembled.file_name.clone(),
                kind: assembled.kind,
                size,
                sha256,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let manifest = Manifest {
            submission_id: &submission.submission_id,
            user_id: &submission.user_id,
            submission_type: submission.submission_type.as_str(),
            files: &files,
        };
        let manifest_path = submission.folder.join(MANIFEST_FILE_NAME);
        fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?)
            .await
            .map_err(|e| PackageError::io(&manifest_path, e))?;

        debug!(
            submission_id = %submission.submission_id,
            files = files.len(),
            "Package manifest written"
        );

        Ok(Package {
            location: submission.folder.clone(),
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::SubmissionType;
    use crate::upload::{AssembledFile, FileKind};
    use tempfile::TempDir;

    async fn assembled(dir: &TempDir, files: &[(&str, FileKind, &[u8])]) -> AssembledSubmission {
        let mut assembled_files = Vec::new();
        for (name, kind, content) in files {
            let path = dir.path().join(name);
            fs::write(&path, content).await.unwrap();
            assembled_files.push(AssembledFile {
                file_id: format!("id-{}", name),
                file_name: name.to_string(),
                kind: *kind,
                path,
                size: content.len() as u64,
            });
        }
        AssembledSubmission {
            submission_id: "S1".to_string(),
            user_id: "alice".to_string(),
            submission_type: SubmissionType::Ncbi,
            folder: dir.path().to_path_buf(),
            files: assembled_files,
        }
    }

    #[tokio::test]
    async fn test_build_writes_manifest_with_checksums() {
        let dir = TempDir::new().unwrap();
        let submission = assembled(
            &dir,
            &[
                ("reads.fastq", FileKind::Data, b"ACGT"),
                ("template.json", FileKind::Metadata, b"{}"),
            ],
        )
        .await;

        let package = DirectoryPackageBuilder::new().build(&submission).await.unwrap();

        assert_eq!(package.location, dir.path());
        assert_eq!(package.files.len(), 2);
        assert_eq!(package.files[0].name, "reads.fastq");
        assert_eq!(package.files[0].size, 4);
        assert_eq!(
            package.files[1].sha256,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );

        let manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join(MANIFEST_FILE_NAME)).await.unwrap())
                .unwrap();
        assert_eq!(manifest["submission_id"], "S1");
        assert_eq!(manifest["files"].as_array().unwrap().len(), 2);
        assert_eq!(manifest["files"][1]["kind"], "metadata");
    }

    #[tokio::test]
    async fn test_uploaded_manifest_named_file_is_kept() {
        let dir = TempDir::new().unwrap();
        let submission = assembled(
            &dir,
            &[("manifest.json", FileKind::Metadata, b"USER TEMPLATE INSTANCE")],
        )
        .await;

        let package = DirectoryPackageBuilder::new().build(&submission).await.unwrap();

        assert_eq!(
            fs::read(package.location.join("manifest.json")).await.unwrap(),
            b"USER TEMPLATE INSTANCE"
        );
        assert!(package.location.join(MANIFEST_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_reserved_file_name_is_refused() {
        let dir = TempDir::new().unwrap();
        let submission = assembled(
            &dir,
            &[(MANIFEST_FILE_NAME, FileKind::Metadata, b"user bytes")],
        )
        .await;

        let result = DirectoryPackageBuilder::new().build(&submission).await;

        assert!(matches!(result, Err(PackageError::ReservedName(_))));
        assert_eq!(
            fs::read(dir.path().join(MANIFEST_FILE_NAME)).await.unwrap(),
            b"user bytes"
        );
    }

    #[tokio::test]
    async fn test_build_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let mut submission = assembled(&dir, &[("template.json", FileKind::Metadata, b"{}")]).await;
        fs::remove_file(&submission.files[0].path).await.unwrap();
        submission.files[0].size = 0;

        let result = DirectoryPackageBuilder::new().build(&submission).await;
        assert!(matches!(result, Err(PackageError::MissingFile { .. })));
    }
}
