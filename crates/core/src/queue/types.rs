//! Core submission data types.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued submission.
///
/// `Queued -> InFlight -> {Delivered | Retrying | Failed}` and
/// `Retrying -> InFlight`. `Delivered` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    /// Waiting for its first delivery attempt.
    Queued,
    /// A delivery attempt is running (or its outcome is unknown).
    InFlight,
    /// Last attempt failed transiently; waiting for `next_attempt_at`.
    Retrying,
    /// Delivered to the remote repository (terminal).
    Delivered,
    /// Gave up (terminal).
    Failed,
}

impl SubmissionState {
    /// Stable string form used for persistence and filtering.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InFlight => "in_flight",
            Self::Retrying => "retrying",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "in_flight" => Some(Self::InFlight),
            "retrying" => Some(Self::Retrying),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this state ends the submission's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target repository pipeline of a submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionType {
    /// NCBI (AIRR sequencing data).
    #[default]
    Ncbi,
    /// ImmPort.
    ImmPort,
}

impl SubmissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ncbi => "ncbi",
            Self::ImmPort => "imm_port",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ncbi" => Some(Self::Ncbi),
            "imm_port" => Some(Self::ImmPort),
            _ => None,
        }
    }

    /// Human readable label shown in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ncbi => "AIRR",
            Self::ImmPort => "ImmPort",
        }
    }
}

/// A unit of delivery work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    /// Client-assigned submission identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    pub submission_type: SubmissionType,
    /// Remote folder the package is delivered into.
    pub destination_folder: String,
    /// Local directory holding the transfer-ready package.
    pub package_location: PathBuf,
    pub state: SubmissionState,
    /// Number of delivery attempts started so far.
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Earliest time a `Retrying` submission may be attempted again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    /// Create a new `Queued` submission.
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        submission_type: SubmissionType,
        destination_folder: impl Into<String>,
        package_location: impl Into<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            submission_type,
            destination_folder: destination_folder.into(),
            package_location: package_location.into(),
            state: SubmissionState::Queued,
            attempt_count: 0,
            last_error: None,
            next_attempt_at: None,
            created_at: now,
            last_attempt_at: None,
            updated_at: now,
        }
    }

    /// Whether the submission may be attempted at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match (self.state, self.next_attempt_at) {
            (SubmissionState::Retrying, Some(at)) => at <= now,
            (state, _) => !state.is_terminal(),
        }
    }
}

/// Time-partitioned destination folder name, e.g. `2024-03-07-14-05-09-042`.
pub fn date_based_folder_name(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d-%H-%M-%S-%3f").to_string()
}

/// Destination folder of one submission: the time partition followed by the
/// submission id, so two submissions never share a folder.
pub fn destination_folder_name(at: DateTime<Utc>, submission_id: &str) -> String {
    format!("{}-{}", date_based_folder_name(at), submission_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_state_string_roundtrip() {
        for state in [
            SubmissionState::Queued,
            SubmissionState::InFlight,
            SubmissionState::Retrying,
            SubmissionState::Delivered,
            SubmissionState::Failed,
        ] {
            assert_eq!(SubmissionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SubmissionState::parse("cancelled"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(SubmissionState::Delivered.is_terminal());
        assert!(SubmissionState::Failed.is_terminal());
        assert!(!SubmissionState::Queued.is_terminal());
        assert!(!SubmissionState::InFlight.is_terminal());
        assert!(!SubmissionState::Retrying.is_terminal());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&SubmissionState::InFlight).unwrap();
        assert_eq!(json, "\"in_flight\"");
    }

    #[test]
    fn test_submission_type_labels() {
        assert_eq!(SubmissionType::Ncbi.label(), "AIRR");
        assert_eq!(SubmissionType::ImmPort.label(), "ImmPort");
        assert_eq!(SubmissionType::parse("imm_port"), Some(SubmissionType::ImmPort));
    }

    #[test]
    fn test_new_submission_is_queued() {
        let submission = Submission::new("S1", "alice", SubmissionType::Ncbi, "f", "/tmp/p");
        assert_eq!(submission.state, SubmissionState::Queued);
        assert_eq!(submission.attempt_count, 0);
        assert!(submission.is_due(Utc::now()));
    }

    #[test]
    fn test_retrying_is_due_only_after_next_attempt() {
        let now = Utc::now();
        let mut submission = Submission::new("S1", "alice", SubmissionType::Ncbi, "f", "/tmp/p");
        submission.state = SubmissionState::Retrying;
        submission.next_attempt_at = Some(now + Duration::seconds(30));
        assert!(!submission.is_due(now));
        assert!(submission.is_due(now + Duration::seconds(31)));

        submission.next_attempt_at = None;
        assert!(submission.is_due(now));
    }

    #[test]
    fn test_date_based_folder_name() {
        let at = Utc
            .with_ymd_and_hms(2024, 3, 7, 14, 5, 9)
            .unwrap()
            .checked_add_signed(Duration::milliseconds(42))
            .unwrap();
        assert_eq!(date_based_folder_name(at), "2024-03-07-14-05-09-042");
    }

    #[test]
    fn test_destination_folders_differ_within_one_millisecond() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        let a = destination_folder_name(at, "A");
        let b = destination_folder_name(at, "B");

        assert_eq!(a, "2024-03-07-14-05-09-000-A");
        assert_ne!(a, b);
    }
}
