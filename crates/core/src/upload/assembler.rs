//! Upload session tracking and chunk assembly.

use std::collections::{BTreeSet, HashMap};
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::config::UploadConfig;
use super::error::UploadError;
use super::types::{
    AssembledFile, AssembledSubmission, ChunkReceipt, ChunkUpload, FileKind, FileProgress,
    UploadSessionSnapshot,
};
use crate::package::MANIFEST_FILE_NAME;
use crate::queue::SubmissionType;

struct UploadSession {
    submission_id: String,
    user_id: String,
    submission_type: SubmissionType,
    total_files: u32,
    /// File id -> progress.
    files: HashMap<String, FileProgress>,
    folder: PathBuf,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    /// Set once the session is taken or discarded; late chunks are rejected.
    closed: bool,
    /// Whether the first chunk passed the caller's admission check.
    admitted: bool,
}

impl UploadSession {
    fn open(chunk: &ChunkUpload, folder: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            submission_id: chunk.submission_id.clone(),
            user_id: chunk.user_id.clone(),
            submission_type: chunk.submission_type,
            total_files: chunk.total_files,
            files: HashMap::new(),
            folder,
            created_at: now,
            last_activity: now,
            closed: false,
            admitted: false,
        }
    }

    fn files_received(&self) -> usize {
        self.files.values().filter(|f| f.is_received()).count()
    }

    fn is_complete(&self) -> bool {
        self.files_received() == self.total_files as usize
    }

    /// Check a chunk against what earlier chunks established.
    fn check_chunk(&self, chunk: &ChunkUpload) -> Result<(), UploadError> {
        if chunk.user_id != self.user_id {
            return Err(UploadError::violation(format!(
                "submission {} belongs to another user",
                self.submission_id
            )));
        }
        if chunk.total_files != self.total_files {
            return Err(UploadError::violation(format!(
                "submission {} expects {} files, chunk says {}",
                self.submission_id, self.total_files, chunk.total_files
            )));
        }
        if chunk.submission_type != self.submission_type {
            return Err(UploadError::violation(format!(
                "submission {} is a {} submission",
                self.submission_id,
                self.submission_type.label()
            )));
        }

        match self.files.get(&chunk.file_id) {
            Some(progress) => {
                if progress.kind != chunk.kind
                    || progress.total_chunks != chunk.total_chunks
                    || progress.file_name != chunk.file_name
                {
                    return Err(UploadError::violation(format!(
                        "chunk {} of file {} conflicts with earlier chunks",
                        chunk.chunk_number, chunk.file_id
                    )));
                }
            }
            None => {
                if self.files.len() >= self.total_files as usize {
                    return Err(UploadError::violation(format!(
                        "submission {} already has all {} files",
                        self.submission_id, self.total_files
                    )));
                }
                if self.files.values().any(|f| f.file_name == chunk.file_name) {
                    return Err(UploadError::violation(format!(
                        "file name {} is already used in submission {}",
                        chunk.file_name, self.submission_id
                    )));
                }
            }
        }

        Ok(())
    }

    fn snapshot(&self) -> UploadSessionSnapshot {
        let mut files: Vec<_> = self
            .files
            .iter()
            .map(|(id, progress)| (id.clone(), progress.clone()))
            .collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));

        UploadSessionSnapshot {
            submission_id: self.submission_id.clone(),
            user_id: self.user_id.clone(),
            submission_type: self.submission_type,
            folder: self.folder.clone(),
            files_expected: self.total_files as usize,
            files_received: self.files_received(),
            files,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

type SessionHandle = Arc<Mutex<UploadSession>>;

/// Rebuilds submissions from independently uploaded chunks.
///
/// Each submission id has its own session lock, so chunks of one submission
/// are written one at a time while different submissions proceed in
/// parallel. The session map lock is only held to look up or remove handles.
pub struct UploadAssembler {
    root: PathBuf,
    sessions: StdMutex<HashMap<String, SessionHandle>>,
}

impl UploadAssembler {
    /// Creates an assembler writing below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.root_dir.clone())
    }

    /// Root of the local assembly area.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder a submission is assembled into.
    pub fn folder_for(&self, user_id: &str, submission_id: &str) -> PathBuf {
        self.root.join(user_id).join(submission_id)
    }

    /// Write one chunk and update the session it belongs to.
    ///
    /// A storage failure discards the whole session and its folder.
    pub async fn register_chunk(&self, chunk: ChunkUpload) -> Result<ChunkReceipt, UploadError> {
        self.register_chunk_admitted(chunk, |_| Ok(())).await
    }

    /// Like [`register_chunk`](Self::register_chunk), but a new session is
    /// only opened if `admit` accepts its first chunk. `admit` runs under the
    /// session lock before anything is written, so no other chunk of the
    /// submission can slip in while it decides. A rejected session is
    /// dropped and its folder left untouched.
    pub async fn register_chunk_admitted<F>(
        &self,
        chunk: ChunkUpload,
        admit: F,
    ) -> Result<ChunkReceipt, UploadError>
    where
        F: FnOnce(&ChunkUpload) -> Result<(), UploadError>,
    {
        validate_chunk(&chunk)?;

        let handle = self.session_for(&chunk);
        let mut session = handle.lock().await;
        if session.closed {
            return Err(UploadError::violation(format!(
                "upload session {} is closed",
                chunk.submission_id
            )));
        }
        if !session.admitted {
            if let Err(e) = admit(&chunk) {
                debug!(
                    submission_id = %chunk.submission_id,
                    error = %e,
                    "Upload session refused"
                );
                session.closed = true;
                self.forget(&chunk.submission_id, &handle);
                return Err(e);
            }
            session.admitted = true;
        }
        session.check_chunk(&chunk)?;

        let was_complete = session.is_complete();
        let path = session.folder.join(&chunk.file_name);
        if let Err(source) = write_chunk(&session.folder, &path, chunk.offset, &chunk.data).await {
            warn!(
                submission_id = %chunk.submission_id,
                path = %path.display(),
                error = %source,
                "Chunk write failed, discarding upload session"
            );
            session.closed = true;
            self.forget(&chunk.submission_id, &handle);
            remove_folder(&session.folder).await;
            return Err(UploadError::Io { path, source });
        }

        session
            .files
            .entry(chunk.file_id.clone())
            .or_insert_with(|| FileProgress {
                file_name: chunk.file_name.clone(),
                kind: chunk.kind,
                total_chunks: chunk.total_chunks,
                written_chunks: BTreeSet::new(),
            })
            .written_chunks
            .insert(chunk.chunk_number);
        session.last_activity = Utc::now();

        let files_received = session.files_received();
        let complete = session.is_complete();
        debug!(
            submission_id = %chunk.submission_id,
            file_id = %chunk.file_id,
            chunk = chunk.chunk_number,
            total_chunks = chunk.total_chunks,
            files_received,
            files_expected = session.total_files,
            "Chunk written"
        );

        Ok(ChunkReceipt {
            submission_id: chunk.submission_id,
            files_received,
            files_expected: session.total_files as usize,
            complete,
            became_complete: complete && !was_complete,
        })
    }

    /// Whether every expected file of the submission has been received.
    pub async fn is_complete(&self, submission_id: &str) -> bool {
        match self.get(submission_id) {
            Some(handle) => {
                let session = handle.lock().await;
                !session.closed && session.is_complete()
            }
            None => false,
        }
    }

    /// Stop tracking a complete session and return its files.
    ///
    /// Fails with `MalformedSubmission` unless exactly one file is metadata;
    /// in that case the session folder is removed.
    pub async fn take_completed(
        &self,
        submission_id: &str,
    ) -> Result<AssembledSubmission, UploadError> {
        let handle = self
            .get(submission_id)
            .ok_or_else(|| UploadError::SessionNotFound(submission_id.to_string()))?;
        let mut session = handle.lock().await;
        if session.closed {
            return Err(UploadError::SessionNotFound(submission_id.to_string()));
        }
        if !session.is_complete() {
            return Err(UploadError::violation(format!(
                "upload {} is incomplete: {} of {} files received",
                submission_id,
                session.files_received(),
                session.total_files
            )));
        }

        session.closed = true;
        self.forget(submission_id, &handle);

        let metadata_files = session
            .files
            .values()
            .filter(|f| f.kind == FileKind::Metadata)
            .count();
        if metadata_files != 1 {
            warn!(
                submission_id = %submission_id,
                metadata_files,
                "Rejecting upload without exactly one metadata file"
            );
            remove_folder(&session.folder).await;
            return Err(UploadError::MalformedSubmission { metadata_files });
        }

        let mut files = Vec::with_capacity(session.files.len());
        for (file_id, progress) in &session.files {
            let path = session.folder.join(&progress.file_name);
            let size = match fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(source) => {
                    remove_folder(&session.folder).await;
                    return Err(UploadError::Io { path, source });
                }
            };
            files.push(AssembledFile {
                file_id: file_id.clone(),
                file_name: progress.file_name.clone(),
                kind: progress.kind,
                path,
                size,
            });
        }
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        info!(
            submission_id = %submission_id,
            user_id = %session.user_id,
            files = files.len(),
            "Upload assembled"
        );

        Ok(AssembledSubmission {
            submission_id: session.submission_id.clone(),
            user_id: session.user_id.clone(),
            submission_type: session.submission_type,
            folder: session.folder.clone(),
            files,
        })
    }

    /// Drop a session and remove its folder. Returns false if none was tracked.
    pub async fn discard(&self, submission_id: &str) -> bool {
        let Some(handle) = self.get(submission_id) else {
            return false;
        };
        let mut session = handle.lock().await;
        if session.closed {
            return false;
        }
        session.closed = true;
        self.forget(submission_id, &handle);
        remove_folder(&session.folder).await;
        info!(submission_id = %submission_id, "Upload session discarded");
        true
    }

    /// Discard every session idle for at least `max_idle`.
    ///
    /// Returns the ids of the expired sessions.
    pub async fn expire_idle(&self, max_idle: Duration) -> Vec<String> {
        let Some(cutoff) = TimeDelta::from_std(max_idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
        else {
            return Vec::new();
        };

        let handles: Vec<(String, SessionHandle)> = self
            .sessions()
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect();

        let mut expired = Vec::new();
        for (submission_id, handle) in handles {
            let mut session = handle.lock().await;
            if session.closed || session.last_activity > cutoff {
                continue;
            }
            session.closed = true;
            self.forget(&submission_id, &handle);
            remove_folder(&session.folder).await;
            expired.push(submission_id);
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired idle upload sessions");
        }
        expired
    }

    /// Run [`expire_idle`](Self::expire_idle) every `every` in a background
    /// task. The task ends when the assembler is dropped or the handle is
    /// aborted.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        max_idle: Duration,
        every: Duration,
    ) -> JoinHandle<()> {
        let assembler = Arc::downgrade(self);
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(assembler) = assembler.upgrade() else {
                    break;
                };
                assembler.expire_idle(max_idle).await;
            }
            debug!("Upload idle sweeper stopped");
        })
    }

    /// Snapshot of a tracked session.
    pub async fn session(&self, submission_id: &str) -> Option<UploadSessionSnapshot> {
        let handle = self.get(submission_id)?;
        let session = handle.lock().await;
        if session.closed {
            return None;
        }
        Some(session.snapshot())
    }

    /// Number of tracked sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions().len()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        // The map only holds handles, so a poisoned lock is still consistent.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, submission_id: &str) -> Option<SessionHandle> {
        self.sessions().get(submission_id).cloned()
    }

    fn session_for(&self, chunk: &ChunkUpload) -> SessionHandle {
        let folder = self.folder_for(&chunk.user_id, &chunk.submission_id);
        let mut sessions = self.sessions();
        let handle = sessions
            .entry(chunk.submission_id.clone())
            .or_insert_with(|| {
                debug!(
                    submission_id = %chunk.submission_id,
                    user_id = %chunk.user_id,
                    total_files = chunk.total_files,
                    "Upload session opened"
                );
                Arc::new(Mutex::new(UploadSession::open(chunk, folder)))
            });
        Arc::clone(handle)
    }

    fn forget(&self, submission_id: &str, handle: &SessionHandle) {
        let mut sessions = self.sessions();
        if sessions
            .get(submission_id)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            sessions.remove(submission_id);
        }
    }
}

fn validate_chunk(chunk: &ChunkUpload) -> Result<(), UploadError> {
    for (field, value) in [
        ("submission id", &chunk.submission_id),
        ("user id", &chunk.user_id),
        ("file name", &chunk.file_name),
    ] {
        if !is_plain_name(value) {
            return Err(UploadError::violation(format!(
                "{} {:?} is not a plain name",
                field, value
            )));
        }
    }
    if chunk.file_name == MANIFEST_FILE_NAME {
        return Err(UploadError::violation(format!(
            "file name {} is reserved",
            MANIFEST_FILE_NAME
        )));
    }
    if chunk.file_id.is_empty() {
        return Err(UploadError::violation("file id is empty"));
    }
    if chunk.total_files == 0 {
        return Err(UploadError::violation("total file count is zero"));
    }
    if chunk.total_chunks == 0 {
        return Err(UploadError::violation("total chunk count is zero"));
    }
    if chunk.chunk_number == 0 || chunk.chunk_number > chunk.total_chunks {
        return Err(UploadError::violation(format!(
            "chunk number {} outside 1..={}",
            chunk.chunk_number, chunk.total_chunks
        )));
    }
    Ok(())
}

/// A single normal path component with no separators.
fn is_plain_name(name: &str) -> bool {
    if name.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

async fn write_chunk(folder: &Path, path: &Path, offset: u64, data: &[u8]) -> std::io::Result<()> {
    fs::create_dir_all(folder).await?;
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

async fn remove_folder(folder: &Path) {
    match fs::remove_dir_all(folder).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            folder = %folder.display(),
            error = %e,
            "Failed to remove upload folder"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(submission: &str, file: &str, kind: FileKind, total_files: u32) -> ChunkUpload {
        ChunkUpload {
            submission_id: submission.to_string(),
            user_id: "alice".to_string(),
            submission_type: SubmissionType::Ncbi,
            file_id: file.to_string(),
            file_name: file.to_string(),
            kind,
            offset: 0,
            data: format!("content of {}", file).into_bytes(),
            chunk_number: 1,
            total_chunks: 1,
            total_files,
        }
    }

    fn create_assembler() -> (TempDir, UploadAssembler) {
        let dir = TempDir::new().unwrap();
        let assembler = UploadAssembler::new(dir.path());
        (dir, assembler)
    }

    #[tokio::test]
    async fn test_two_file_submission_completes() {
        let (_dir, assembler) = create_assembler();

        let first = assembler
            .register_chunk(chunk("S1", "manifest.json", FileKind::Metadata, 2))
            .await
            .unwrap();
        assert_eq!(first.files_received, 1);
        assert!(!first.complete);
        assert!(!assembler.is_complete("S1").await);

        let second = assembler
            .register_chunk(chunk("S1", "reads.fastq", FileKind::Data, 2))
            .await
            .unwrap();
        assert!(second.complete);
        assert!(second.became_complete);
        assert!(assembler.is_complete("S1").await);

        let assembled = assembler.take_completed("S1").await.unwrap();
        assert_eq!(assembled.files.len(), 2);
        assert_eq!(assembled.metadata_file().unwrap().file_name, "manifest.json");
        assert_eq!(assembled.folder, assembler.folder_for("alice", "S1"));
        assert_eq!(assembler.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_file_id_counts_once() {
        let (_dir, assembler) = create_assembler();

        assembler
            .register_chunk(chunk("S1", "manifest.json", FileKind::Metadata, 2))
            .await
            .unwrap();
        let receipt = assembler
            .register_chunk(chunk("S1", "manifest.json", FileKind::Metadata, 2))
            .await
            .unwrap();

        assert_eq!(receipt.files_received, 1);
        assert!(!receipt.complete);
        assert!(!assembler.is_complete("S1").await);
    }

    #[tokio::test]
    async fn test_file_received_only_after_all_chunks() {
        let (_dir, assembler) = create_assembler();

        let mut second = chunk("S1", "reads.fastq", FileKind::Data, 1);
        second.file_name = "manifest.json".to_string();
        second.kind = FileKind::Metadata;
        second.chunk_number = 2;
        second.total_chunks = 2;
        second.offset = 5;
        second.data = b"world".to_vec();

        let mut first = second.clone();
        first.chunk_number = 1;
        first.offset = 0;
        first.data = b"hello".to_vec();

        let receipt = assembler.register_chunk(second).await.unwrap();
        assert_eq!(receipt.files_received, 0);

        let receipt = assembler.register_chunk(first).await.unwrap();
        assert!(receipt.became_complete);

        let assembled = assembler.take_completed("S1").await.unwrap();
        let content = fs::read(&assembled.files[0].path).await.unwrap();
        assert_eq!(content, b"helloworld");
        assert_eq!(assembled.files[0].size, 10);
    }

    #[tokio::test]
    async fn test_conflicting_total_files_is_violation() {
        let (_dir, assembler) = create_assembler();
        assembler
            .register_chunk(chunk("S1", "manifest.json", FileKind::Metadata, 2))
            .await
            .unwrap();

        let result = assembler
            .register_chunk(chunk("S1", "reads.fastq", FileKind::Data, 3))
            .await;
        assert!(matches!(result, Err(UploadError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_other_user_is_violation() {
        let (_dir, assembler) = create_assembler();
        assembler
            .register_chunk(chunk("S1", "manifest.json", FileKind::Metadata, 2))
            .await
            .unwrap();

        let mut intruder = chunk("S1", "reads.fastq", FileKind::Data, 2);
        intruder.user_id = "mallory".to_string();
        let result = assembler.register_chunk(intruder).await;
        assert!(matches!(result, Err(UploadError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_extra_file_is_violation() {
        let (_dir, assembler) = create_assembler();
        assembler
            .register_chunk(chunk("S1", "manifest.json", FileKind::Metadata, 1))
            .await
            .unwrap();

        let result = assembler
            .register_chunk(chunk("S1", "reads.fastq", FileKind::Data, 1))
            .await;
        assert!(matches!(result, Err(UploadError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_conflicting_kind_is_violation() {
        let (_dir, assembler) = create_assembler();
        let mut first = chunk("S1", "reads.fastq", FileKind::Data, 2);
        first.total_chunks = 2;
        assembler.register_chunk(first.clone()).await.unwrap();

        let mut second = first;
        second.chunk_number = 2;
        second.kind = FileKind::Metadata;
        let result = assembler.register_chunk(second).await;
        assert!(matches!(result, Err(UploadError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_invalid_chunk_fields_are_violations() {
        let (_dir, assembler) = create_assembler();

        let mut traversal = chunk("S1", "x", FileKind::Data, 1);
        traversal.file_name = "../escape".to_string();
        let mut bad_number = chunk("S1", "x", FileKind::Data, 1);
        bad_number.chunk_number = 2;
        let mut zero_files = chunk("S1", "x", FileKind::Data, 1);
        zero_files.total_files = 0;
        let mut dotdot_user = chunk("S1", "x", FileKind::Data, 1);
        dotdot_user.user_id = "..".to_string();
        let reserved = chunk("S1", MANIFEST_FILE_NAME, FileKind::Metadata, 1);

        for bad in [traversal, bad_number, zero_files, dotdot_user, reserved] {
            let result = assembler.register_chunk(bad).await;
            assert!(matches!(result, Err(UploadError::ProtocolViolation(_))));
        }
        assert_eq!(assembler.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_missing_metadata_is_malformed() {
        let (_dir, assembler) = create_assembler();
        assembler
            .register_chunk(chunk("S1", "a.fastq", FileKind::Data, 2))
            .await
            .unwrap();
        assembler
            .register_chunk(chunk("S1", "b.fastq", FileKind::Data, 2))
            .await
            .unwrap();
        let folder = assembler.folder_for("alice", "S1");
        assert!(folder.exists());

        let result = assembler.take_completed("S1").await;
        assert!(matches!(
            result,
            Err(UploadError::MalformedSubmission { metadata_files: 0 })
        ));
        assert!(!folder.exists());
        assert_eq!(assembler.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_two_metadata_files_is_malformed() {
        let (_dir, assembler) = create_assembler();
        assembler
            .register_chunk(chunk("S1", "a.json", FileKind::Metadata, 2))
            .await
            .unwrap();
        assembler
            .register_chunk(chunk("S1", "b.json", FileKind::Metadata, 2))
            .await
            .unwrap();

        let result = assembler.take_completed("S1").await;
        assert!(matches!(
            result,
            Err(UploadError::MalformedSubmission { metadata_files: 2 })
        ));
    }

    #[tokio::test]
    async fn test_take_incomplete_or_unknown_fails() {
        let (_dir, assembler) = create_assembler();
        assembler
            .register_chunk(chunk("S1", "manifest.json", FileKind::Metadata, 2))
            .await
            .unwrap();

        assert!(matches!(
            assembler.take_completed("S1").await,
            Err(UploadError::ProtocolViolation(_))
        ));
        assert!(matches!(
            assembler.take_completed("nope").await,
            Err(UploadError::SessionNotFound(_))
        ));
        assert_eq!(assembler.active_sessions(), 1);
    }

    #[tokio::test]
    async fn test_discard_removes_folder() {
        let (_dir, assembler) = create_assembler();
        assembler
            .register_chunk(chunk("S1", "manifest.json", FileKind::Metadata, 2))
            .await
            .unwrap();
        let folder = assembler.folder_for("alice", "S1");

        assert!(assembler.discard("S1").await);
        assert!(!folder.exists());
        assert!(!assembler.discard("S1").await);
        assert!(assembler.session("S1").await.is_none());
    }

    #[tokio::test]
    async fn test_expire_idle_sessions() {
        let (_dir, assembler) = create_assembler();
        assembler
            .register_chunk(chunk("S1", "manifest.json", FileKind::Metadata, 2))
            .await
            .unwrap();

        assert!(assembler
            .expire_idle(Duration::from_secs(3600))
            .await
            .is_empty());
        assert_eq!(assembler.active_sessions(), 1);

        let expired = assembler.expire_idle(Duration::ZERO).await;
        assert_eq!(expired, vec!["S1".to_string()]);
        assert_eq!(assembler.active_sessions(), 0);
        assert!(!assembler.folder_for("alice", "S1").exists());
    }

    #[tokio::test]
    async fn test_refused_session_writes_nothing() {
        let (_dir, assembler) = create_assembler();

        let result = assembler
            .register_chunk_admitted(chunk("S1", "manifest.json", FileKind::Metadata, 2), |c| {
                Err(UploadError::violation(format!("{} is busy", c.submission_id)))
            })
            .await;

        assert!(matches!(result, Err(UploadError::ProtocolViolation(_))));
        assert_eq!(assembler.active_sessions(), 0);
        assert!(!assembler.folder_for("alice", "S1").exists());
    }

    #[tokio::test]
    async fn test_admission_runs_once_per_session() {
        let (_dir, assembler) = create_assembler();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let admit = |_: &ChunkUpload| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        };

        assembler
            .register_chunk_admitted(chunk("S1", "manifest.json", FileKind::Metadata, 2), admit)
            .await
            .unwrap();
        let receipt = assembler
            .register_chunk_admitted(chunk("S1", "reads.fastq", FileKind::Data, 2), admit)
            .await
            .unwrap();

        assert!(receipt.became_complete);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_sweeper_expires_abandoned_sessions() {
        let (_dir, assembler) = create_assembler();
        let assembler = Arc::new(assembler);
        assembler
            .register_chunk(chunk("S1", "manifest.json", FileKind::Metadata, 2))
            .await
            .unwrap();

        let sweeper = assembler
            .spawn_idle_sweeper(Duration::from_millis(50), Duration::from_millis(10));

        let mut expired = false;
        for _ in 0..100 {
            if assembler.active_sessions() == 0 {
                expired = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(expired, "idle session was never swept");
        assert!(!assembler.folder_for("alice", "S1").exists());

        drop(assembler);
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .expect("sweeper should stop once the assembler is gone")
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_discards_session() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let assembler = UploadAssembler::new(&blocker);

        let result = assembler
            .register_chunk(chunk("S1", "manifest.json", FileKind::Metadata, 1))
            .await;

        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, UploadError::Io { .. }));
        assert_eq!(assembler.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_session_snapshot() {
        let (_dir, assembler) = create_assembler();
        let mut upload = chunk("S1", "manifest.json", FileKind::Metadata, 3);
        upload.submission_type = SubmissionType::ImmPort;
        assembler.register_chunk(upload).await.unwrap();

        let snapshot = assembler.session("S1").await.unwrap();
        assert_eq!(snapshot.user_id, "alice");
        assert_eq!(snapshot.submission_type, SubmissionType::ImmPort);
        assert_eq!(snapshot.files_expected, 3);
        assert_eq!(snapshot.files_received, 1);
        assert_eq!(snapshot.files[0].0, "manifest.json");
    }

    #[tokio::test]
    async fn test_concurrent_chunks_complete_exactly_once() {
        let dir = TempDir::new().unwrap();
        let assembler = Arc::new(UploadAssembler::new(dir.path()));
        let total_files = 8u32;

        let mut tasks = Vec::new();
        for i in 0..total_files {
            let assembler = Arc::clone(&assembler);
            tasks.push(tokio::spawn(async move {
                let kind = if i == 0 {
                    FileKind::Metadata
                } else {
                    FileKind::Data
                };
                let mut results = Vec::new();
                for n in 1..=4u32 {
                    let mut upload = chunk("S1", &format!("file-{}", i), kind, total_files);
                    upload.total_chunks = 4;
                    upload.chunk_number = n;
                    upload.offset = u64::from(n - 1) * 4;
                    upload.data = vec![b'a' + n as u8; 4];
                    results.push(assembler.register_chunk(upload).await.unwrap());
                }
                results
            }));
        }

        let mut completions = 0;
        for task in tasks {
            completions += task
                .await
                .unwrap()
                .iter()
                .filter(|r| r.became_complete)
                .count();
        }
        assert_eq!(completions, 1);

        let assembled = assembler.take_completed("S1").await.unwrap();
        assert_eq!(assembled.files.len(), total_files as usize);
        assert!(assembled.files.iter().all(|f| f.size == 16));
    }
}
