//! Upload data types.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::SubmissionType;

/// Role of a file within a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// The template instance describing the submission.
    Metadata,
    /// Sequencing or sample data.
    Data,
}

/// One uploaded chunk of one file.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub submission_id: String,
    pub user_id: String,
    pub submission_type: SubmissionType,
    /// Client-side identifier of the file this chunk belongs to.
    pub file_id: String,
    /// Plain file name the file is stored under.
    pub file_name: String,
    pub kind: FileKind,
    /// Byte offset of `data` within the file.
    pub offset: u64,
    pub data: Vec<u8>,
    /// 1-based chunk number.
    pub chunk_number: u32,
    /// Number of chunks the file is split into.
    pub total_chunks: u32,
    /// Number of files the submission consists of.
    pub total_files: u32,
}

/// Result of registering one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub submission_id: String,
    pub files_received: usize,
    pub files_expected: usize,
    /// All files of the submission are received.
    pub complete: bool,
    /// This chunk is the one that completed the submission.
    pub became_complete: bool,
}

/// Progress of a single file within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProgress {
    pub file_name: String,
    pub kind: FileKind,
    pub total_chunks: u32,
    pub written_chunks: BTreeSet<u32>,
}

impl FileProgress {
    /// Whether every chunk of the file has been written.
    pub fn is_received(&self) -> bool {
        self.written_chunks.len() == self.total_chunks as usize
    }
}

/// Read-only view of an upload session.
#[derive(Debug, Clone)]
pub struct UploadSessionSnapshot {
    pub submission_id: String,
    pub user_id: String,
    pub submission_type: SubmissionType,
    pub folder: PathBuf,
    pub files_expected: usize,
    pub files_received: usize,
    pub files: Vec<(String, FileProgress)>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// A file of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFile {
    pub file_id: String,
    pub file_name: String,
    pub kind: FileKind,
    pub path: PathBuf,
    pub size: u64,
}

/// A completed upload handed to the package builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledSubmission {
    pub submission_id: String,
    pub user_id: String,
    pub submission_type: SubmissionType,
    pub folder: PathBuf,
    pub files: Vec<AssembledFile>,
}

impl AssembledSubmission {
    /// The submission's metadata file.
    pub fn metadata_file(&self) -> Option<&AssembledFile> {
        self.files.iter().find(|f| f.kind == FileKind::Metadata)
    }
}
