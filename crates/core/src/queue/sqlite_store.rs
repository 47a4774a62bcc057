//! SQLite-backed submission queue.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, warn};

use super::{
    QueueError, StoreLease, Submission, SubmissionFilter, SubmissionState, SubmissionStore,
    SubmissionType,
};

const SELECT_COLUMNS: &str = "id, user_id, submission_type, destination_folder, package_location, state, attempt_count, last_error, next_attempt_at, created_at, last_attempt_at, updated_at";

/// SQLite-backed submission store.
///
/// Insertion order (the `seq` column) is the delivery order.
///
/// The consumer lease of a file-backed store is an exclusive transaction on
/// a `<db>-consumer` lock file next to the database, so it spans every
/// connection and process and is released by the OS if the holder dies.
pub struct SqliteSubmissionStore {
    conn: Mutex<Connection>,
    lease_path: Option<PathBuf>,
    memory_lease: Arc<tokio::sync::Mutex<()>>,
}

impl SqliteSubmissionStore {
    /// Open (or create) a store at `path`.
    pub fn new(path: &Path) -> Result<Self, QueueError> {
        let conn = Connection::open(path)?;
        // The status log may share the database file through its own connection.
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;

        let mut lease_path = path.as_os_str().to_owned();
        lease_path.push("-consumer");
        Ok(Self {
            conn: Mutex::new(conn),
            lease_path: Some(PathBuf::from(lease_path)),
            memory_lease: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lease_path: None,
            memory_lease: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    fn lock_file(path: &Path) -> Result<StoreLease, QueueError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::ZERO)?;
        match conn.execute_batch("BEGIN EXCLUSIVE") {
            Ok(()) => {
                debug!(lock = %path.display(), "Consumer lease taken");
                Ok(StoreLease::new(conn))
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                Err(QueueError::ConsumerBusy)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn initialize_schema(conn: &Connection) -> Result<(), QueueError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS submissions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                submission_type TEXT NOT NULL,
                destination_folder TEXT NOT NULL,
                package_location TEXT NOT NULL,
                state TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                next_attempt_at TEXT,
                created_at TEXT NOT NULL,
                last_attempt_at TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_submissions_state ON submissions(state);
            CREATE INDEX IF NOT EXISTS idx_submissions_user_id ON submissions(user_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, QueueError> {
        self.conn
            .lock()
            .map_err(|_| QueueError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &SubmissionFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(state) = filter.state {
            conditions.push("state = ?");
            params.push(Box::new(state.as_str()));
        }

        if let Some(ref user_id) = filter.user_id {
            conditions.push("user_id = ?");
            params.push(Box::new(user_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_submission(row: &rusqlite::Row) -> rusqlite::Result<Submission> {
        let id: String = row.get(0)?;
        let user_id: String = row.get(1)?;
        let submission_type: String = row.get(2)?;
        let destination_folder: String = row.get(3)?;
        let package_location: String = row.get(4)?;
        let state: String = row.get(5)?;
        let attempt_count: u32 = row.get(6)?;
        let last_error: Option<String> = row.get(7)?;
        let next_attempt_at: Option<String> = row.get(8)?;
        let created_at: String = row.get(9)?;
        let last_attempt_at: Option<String> = row.get(10)?;
        let updated_at: String = row.get(11)?;

        // Unreadable state: last outcome unknown, so it gets retried.
        let state = SubmissionState::parse(&state).unwrap_or_else(|| {
            warn!("Unknown state {:?} for submission {}, treating as retrying", state, id);
            SubmissionState::Retrying
        });

        Ok(Submission {
            submission_type: SubmissionType::parse(&submission_type).unwrap_or_default(),
            destination_folder,
            package_location: PathBuf::from(package_location),
            state,
            attempt_count,
            last_error,
            next_attempt_at: next_attempt_at.as_deref().map(parse_timestamp),
            created_at: parse_timestamp(&created_at),
            last_attempt_at: last_attempt_at.as_deref().map(parse_timestamp),
            updated_at: parse_timestamp(&updated_at),
            id,
            user_id,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Submission>, QueueError> {
        let sql = format!("SELECT {} FROM submissions WHERE id = ?", SELECT_COLUMNS);
        let submission = conn
            .query_row(&sql, params![id], Self::row_to_submission)
            .optional()?;
        Ok(submission)
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SubmissionStore for SqliteSubmissionStore {
    fn lock_consumer(&self) -> Result<StoreLease, QueueError> {
        match &self.lease_path {
            Some(path) => Self::lock_file(path),
            None => Arc::clone(&self.memory_lease)
                .try_lock_owned()
                .map(StoreLease::new)
                .map_err(|_| QueueError::ConsumerBusy),
        }
    }

    fn enqueue(&self, submission: &Submission) -> Result<Submission, QueueError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT state FROM submissions WHERE id = ?",
                params![submission.id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(state) = existing {
            let terminal = SubmissionState::parse(&state)
                .map(|s| s.is_terminal())
                .unwrap_or(false);
            if !terminal {
                return Err(QueueError::DuplicateSubmission(submission.id.clone()));
            }
            debug!(
                "Replacing leftover {} entry for submission {}",
                state, submission.id
            );
            tx.execute("DELETE FROM submissions WHERE id = ?", params![submission.id])?;
        }

        let now = Utc::now();
        tx.execute(
            "INSERT INTO submissions (id, user_id, submission_type, destination_folder, package_location, state, attempt_count, last_error, next_attempt_at, created_at, last_attempt_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                submission.id,
                submission.user_id,
                submission.submission_type.as_str(),
                submission.destination_folder,
                submission.package_location.to_string_lossy().into_owned(),
                submission.state.as_str(),
                submission.attempt_count,
                submission.last_error,
                submission.next_attempt_at.map(|t| t.to_rfc3339()),
                submission.created_at.to_rfc3339(),
                submission.last_attempt_at.map(|t| t.to_rfc3339()),
                now.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        Ok(Submission {
            updated_at: now,
            ..submission.clone()
        })
    }

    fn peek_next(&self) -> Result<Option<Submission>, QueueError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM submissions WHERE state NOT IN (?, ?) ORDER BY seq ASC LIMIT 1",
            SELECT_COLUMNS
        );
        let submission = conn
            .query_row(
                &sql,
                params![
                    SubmissionState::Delivered.as_str(),
                    SubmissionState::Failed.as_str()
                ],
                Self::row_to_submission,
            )
            .optional()?;
        Ok(submission)
    }

    fn update(&self, submission: &Submission) -> Result<Submission, QueueError> {
        let conn = self.lock()?;
        let now = Utc::now();

        let changed = conn.execute(
            "UPDATE submissions SET state = ?, attempt_count = ?, last_error = ?, next_attempt_at = ?, last_attempt_at = ?, updated_at = ? WHERE id = ?",
            params![
                submission.state.as_str(),
                submission.attempt_count,
                submission.last_error,
                submission.next_attempt_at.map(|t| t.to_rfc3339()),
                submission.last_attempt_at.map(|t| t.to_rfc3339()),
                now.to_rfc3339(),
                submission.id,
            ],
        )?;

        if changed == 0 {
            return Err(QueueError::NotFound(submission.id.clone()));
        }

        Ok(Submission {
            updated_at: now,
            ..submission.clone()
        })
    }

    fn remove(&self, id: &str) -> Result<Submission, QueueError> {
        let conn = self.lock()?;

        let submission =
            Self::fetch(&conn, id)?.ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        conn.execute("DELETE FROM submissions WHERE id = ?", params![id])?;

        Ok(submission)
    }

    fn get(&self, id: &str) -> Result<Option<Submission>, QueueError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn list(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>, QueueError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM submissions {} ORDER BY seq ASC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_submission)?;

        let mut submissions = Vec::new();
        for row in rows {
            submissions.push(row?);
        }
        Ok(submissions)
    }

    fn count(&self, filter: &SubmissionFilter) -> Result<i64, QueueError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM submissions {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    fn recover_in_flight(&self) -> Result<Vec<Submission>, QueueError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let sql = format!(
            "SELECT {} FROM submissions WHERE state = ? ORDER BY seq ASC",
            SELECT_COLUMNS
        );
        let stranded = {
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(
                params![SubmissionState::InFlight.as_str()],
                Self::row_to_submission,
            )?;
            let mut stranded = Vec::new();
            for row in rows {
                stranded.push(row?);
            }
            stranded
        };

        let now = Utc::now();
        let reason = "delivery outcome unknown after restart".to_string();
        let mut recovered = Vec::with_capacity(stranded.len());
        for submission in stranded {
            tx.execute(
                "UPDATE submissions SET state = ?, last_error = ?, next_attempt_at = NULL, updated_at = ? WHERE id = ?",
                params![
                    SubmissionState::Retrying.as_str(),
                    reason,
                    now.to_rfc3339(),
                    submission.id,
                ],
            )?;
            recovered.push(Submission {
                state: SubmissionState::Retrying,
                last_error: Some(reason.clone()),
                next_attempt_at: None,
                updated_at: now,
                ..submission
            });
        }
        tx.commit()?;

        Ok(recovered)
    }
}
