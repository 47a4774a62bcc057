use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::warn;

use super::{StatusEvent, StatusEventFilter, StatusEventStore, StatusRecord, StatusStoreError};
use crate::queue::{SubmissionState, SubmissionType};

/// SQLite-backed status event log
pub struct SqliteStatusStore {
    conn: Mutex<Connection>,
}

impl SqliteStatusStore {
    /// Open (or create) the status log at `path`
    pub fn new(path: &Path) -> Result<Self, StatusStoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory status log (useful for testing)
    pub fn in_memory() -> Result<Self, StatusStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StatusStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS status_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                submission_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                submission_type TEXT NOT NULL,
                state TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                detail TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_status_events_submission_id ON status_events(submission_id);
            CREATE INDEX IF NOT EXISTS idx_status_events_user_id ON status_events(user_id);
            CREATE INDEX IF NOT EXISTS idx_status_events_state ON status_events(state);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StatusStoreError> {
        self.conn
            .lock()
            .map_err(|_| StatusStoreError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &StatusEventFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref submission_id) = filter.submission_id {
            conditions.push("submission_id = ?");
            params.push(Box::new(submission_id.clone()));
        }

        if let Some(ref user_id) = filter.user_id {
            conditions.push("user_id = ?");
            params.push(Box::new(user_id.clone()));
        }

        if let Some(state) = filter.state {
            conditions.push("state = ?");
            params.push(Box::new(state.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<StatusRecord> {
        let timestamp: String = row.get(1)?;
        let submission_type: String = row.get(4)?;
        let state: String = row.get(5)?;

        Ok(StatusRecord {
            id: row.get(0)?,
            event: StatusEvent {
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                submission_id: row.get(2)?,
                user_id: row.get(3)?,
                submission_type: SubmissionType::parse(&submission_type).unwrap_or_default(),
                state: SubmissionState::parse(&state).unwrap_or_else(|| {
                    warn!(state = %state, "Unknown state in status log");
                    SubmissionState::Failed
                }),
                attempt: row.get(6)?,
                detail: row.get(7)?,
            },
        })
    }
}

impl StatusEventStore for SqliteStatusStore {
    fn insert(&self, event: &StatusEvent) -> Result<i64, StatusStoreError> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO status_events (timestamp, submission_id, user_id, submission_type, state, attempt, detail) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                event.timestamp.to_rfc3339(),
                event.submission_id,
                event.user_id,
                event.submission_type.as_str(),
                event.state.as_str(),
                event.attempt,
                event.detail,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &StatusEventFilter) -> Result<Vec<StatusRecord>, StatusStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT id, timestamp, submission_id, user_id, submission_type, state, attempt, detail FROM status_events {} ORDER BY id DESC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let records = stmt
            .query_map(param_refs.as_slice(), Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn count(&self, filter: &StatusEventFilter) -> Result<i64, StatusStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM status_events {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Submission;

    fn event(id: &str, user: &str, state: SubmissionState) -> StatusEvent {
        let mut submission = Submission::new(id, user, SubmissionType::Ncbi, "folder", "/pkg");
        submission.state = state;
        submission.attempt_count = 1;
        StatusEvent::for_submission(&submission, None)
    }

    #[test]
    fn test_insert_and_query() {
        let store = SqliteStatusStore::in_memory().unwrap();
        let mut delivered = event("S1", "alice", SubmissionState::Delivered);
        delivered.detail = Some("outbox/2024-01-01".to_string());

        let id = store.insert(&delivered).unwrap();
        assert!(id > 0);

        let records = store.query(&StatusEventFilter::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].event.submission_id, "S1");
        assert_eq!(records[0].event.state, SubmissionState::Delivered);
        assert_eq!(records[0].event.detail.as_deref(), Some("outbox/2024-01-01"));
        assert_eq!(records[0].event.attempt, 1);
    }

    #[test]
    fn test_query_newest_first() {
        let store = SqliteStatusStore::in_memory().unwrap();
        store.insert(&event("S1", "alice", SubmissionState::Retrying)).unwrap();
        store.insert(&event("S1", "alice", SubmissionState::Failed)).unwrap();

        let records = store
            .query(&StatusEventFilter::new().with_submission_id("S1"))
            .unwrap();
        assert_eq!(records[0].event.state, SubmissionState::Failed);
        assert_eq!(records[1].event.state, SubmissionState::Retrying);
    }

    #[test]
    fn test_filters() {
        let store = SqliteStatusStore::in_memory().unwrap();
        store.insert(&event("S1", "alice", SubmissionState::Delivered)).unwrap();
        store.insert(&event("S2", "bob", SubmissionState::Failed)).unwrap();
        store.insert(&event("S3", "bob", SubmissionState::Delivered)).unwrap();

        let bob = StatusEventFilter::new().with_user_id("bob");
        assert_eq!(store.count(&bob).unwrap(), 2);

        let bob_delivered = bob.with_state(SubmissionState::Delivered);
        let records = store.query(&bob_delivered).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event.submission_id, "S3");

        let page = store
            .query(&StatusEventFilter::new().with_limit(1).with_offset(1))
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].event.submission_id, "S2");
    }
}
