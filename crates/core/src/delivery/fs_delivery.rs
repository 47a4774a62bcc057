//! Drop-box delivery into a watched outbox directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::FsDeliveryConfig;
use super::error::DeliveryError;
use super::traits::{DeliveryClient, DeliveryReceipt, DeliveryRequest};

/// Delivers packages by copying them into `<outbox>/<destination_folder>/`.
///
/// Files are copied into a staging directory inside the outbox and renamed
/// into place in one step, then the ready marker is written. A destination
/// whose marker names the same submission counts as delivered; a marker of
/// any other submission is a conflict.
pub struct FsDeliveryClient {
    config: FsDeliveryConfig,
}

impl FsDeliveryClient {
    pub fn new(config: FsDeliveryConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(FsDeliveryConfig::default())
    }

    pub fn outbox_dir(&self) -> &Path {
        &self.config.outbox_dir
    }

    /// Submission id recorded in an existing ready marker.
    async fn marker_owner(marker: &Path) -> Result<Option<String>, DeliveryError> {
        let content = match fs::read_to_string(marker).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DeliveryError::io(marker, e)),
        };
        Ok(Some(
            content
                .lines()
                .find_map(|line| line.strip_prefix("submission_id="))
                .unwrap_or_default()
                .trim()
                .to_string(),
        ))
    }

    /// Regular files at the top of the package directory, sorted by name.
    async fn package_files(location: &Path) -> Result<Vec<PathBuf>, DeliveryError> {
        let mut entries = match fs::read_dir(location).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeliveryError::InvalidPackage(format!(
                    "package location {} does not exist",
                    location.display()
                )));
            }
            Err(e) => return Err(DeliveryError::io(location, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DeliveryError::io(location, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| DeliveryError::io(entry.path(), e))?;
            if file_type.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    async fn stage(
        &self,
        staging: &Path,
        files: &[PathBuf],
    ) -> Result<u64, DeliveryError> {
        fs::create_dir_all(staging)
            .await
            .map_err(|e| DeliveryError::io(staging, e))?;

        let mut total_bytes = 0u64;
        for source in files {
            let Some(name) = source.file_name() else {
                continue;
            };
            let destination = staging.join(name);
            total_bytes += fs::copy(source, &destination)
                .await
                .map_err(|e| DeliveryError::io(source, e))?;
        }
        Ok(total_bytes)
    }
}

#[async_trait]
impl DeliveryClient for FsDeliveryClient {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryReceipt, DeliveryError> {
        let folder = &request.destination_folder;
        if folder.is_empty() || folder.contains(['/', '\\']) || folder == "." || folder == ".." {
            return Err(DeliveryError::InvalidPackage(format!(
                "destination folder {:?} is not a plain name",
                folder
            )));
        }

        let target = self.config.outbox_dir.join(folder);
        let marker = target.join(&self.config.ready_marker);
        let remote_location = target.display().to_string();

        if let Some(owner) = Self::marker_owner(&marker).await? {
            if owner != request.submission_id {
                warn!(
                    submission_id = %request.submission_id,
                    owner = %owner,
                    target = %remote_location,
                    "Destination folder holds another submission"
                );
                return Err(DeliveryError::DestinationConflict {
                    folder: folder.clone(),
                    owner,
                });
            }
            info!(
                submission_id = %request.submission_id,
                target = %remote_location,
                "Package already delivered"
            );
            return Ok(DeliveryReceipt {
                submission_id: request.submission_id.clone(),
                remote_location,
                files_transferred: 0,
                bytes_transferred: 0,
                already_delivered: true,
            });
        }

        let files = Self::package_files(&request.package_location).await?;
        if files.is_empty() {
            return Err(DeliveryError::InvalidPackage(format!(
                "package location {} has no files",
                request.package_location.display()
            )));
        }

        let marker_name = self.config.ready_marker.as_str();
        if files
            .iter()
            .any(|file| file.file_name().is_some_and(|name| name == marker_name))
        {
            return Err(DeliveryError::InvalidPackage(format!(
                "package contains a file named {}",
                marker_name
            )));
        }

        let staging = self
            .config
            .outbox_dir
            .join(format!(".staging-{}", Uuid::new_v4()));
        let bytes = match self.stage(&staging, &files).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(e);
            }
        };

        // A target without the marker is left over from an interrupted attempt.
        match fs::remove_dir_all(&target).await {
            Ok(()) => debug!(target = %remote_location, "Replaced incomplete delivery"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(DeliveryError::io(&target, e));
            }
        }

        if let Err(e) = fs::rename(&staging, &target).await {
            warn!(
                staging = %staging.display(),
                target = %remote_location,
                error = %e,
                "Failed to move staged package into place"
            );
            let _ = fs::remove_dir_all(&staging).await;
            return Err(DeliveryError::io(&target, e));
        }

        let marker_content = format!(
            "submission_id={}\ndelivered_at={}\n",
            request.submission_id,
            Utc::now().to_rfc3339()
        );
        fs::write(&marker, marker_content)
            .await
            .map_err(|e| DeliveryError::io(&marker, e))?;

        info!(
            submission_id = %request.submission_id,
            target = %remote_location,
            files = files.len(),
            bytes,
            "Package delivered to outbox"
        );

        Ok(DeliveryReceipt {
            submission_id: request.submission_id.clone(),
            remote_location,
            files_transferred: files.len(),
            bytes_transferred: bytes,
            already_delivered: false,
        })
    }
}
