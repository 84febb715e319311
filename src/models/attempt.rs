//! Backup attempt history records
//!
//! Attempts are append-only: a record is created as `pending`, transitioned
//! to `in_progress` by a worker, and ends in exactly one terminal state.
//! Terminal records are never mutated; corrections require a new attempt.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Engine, Tier};
use crate::error::{BackhaulError, Result};

/// Attempt lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Created by the evaluator, waiting in the queue
    Pending,
    /// Claimed by a worker, execution underway
    InProgress,
    /// Artifact written and recorded
    Completed,
    /// Execution failed; see the failure kind and message
    Failed,
    /// Cancelled before reaching a terminal state
    Cancelled,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(BackhaulError::Database(format!(
                "Unknown attempt status: {}",
                other
            ))),
        }
    }

    /// Whether the status is final (terminal records are never mutated)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Machine-readable failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Source database unreachable
    Connection,
    /// Credentials rejected
    Auth,
    /// Dump tool not installed or not on PATH
    ToolMissing,
    /// Dump produced zero bytes
    EmptyResult,
    /// Object storage write failed
    StorageWrite,
    /// Execution or upload exceeded its bound
    Timeout,
    /// Anything else
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Auth => "auth",
            Self::ToolMissing => "tool_missing",
            Self::EmptyResult => "empty_result",
            Self::StorageWrite => "storage_write",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "connection" => Ok(Self::Connection),
            "auth" => Ok(Self::Auth),
            "tool_missing" => Ok(Self::ToolMissing),
            "empty_result" => Ok(Self::EmptyResult),
            "storage_write" => Ok(Self::StorageWrite),
            "timeout" => Ok(Self::Timeout),
            "other" => Ok(Self::Other),
            other => Err(BackhaulError::Database(format!(
                "Unknown failure kind: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What caused an attempt to be created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Created by the schedule evaluator
    Scheduled,
    /// Created by an explicit trigger-now request
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "manual" => Ok(Self::Manual),
            other => Err(BackhaulError::Database(format!(
                "Unknown trigger source: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One execution record of a backup for a (target, tier) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupAttempt {
    /// Unique attempt identifier (UUID string)
    pub id: String,

    /// Target being backed up
    pub target_id: String,

    /// The single tier this execution is tagged with
    pub tier: Tier,

    /// Lifecycle status
    pub status: AttemptStatus,

    /// What created this attempt
    pub trigger: TriggerSource,

    /// Engine kind, denormalized for filtering and key derivation
    pub engine: Engine,

    /// Creation timestamp (unix millis)
    pub created_at: i64,

    /// When a worker claimed the attempt (unix millis)
    pub started_at: Option<i64>,

    /// When the attempt reached a terminal state (unix millis)
    pub completed_at: Option<i64>,

    /// Object storage key of the artifact (set on completion)
    pub artifact_key: Option<String>,

    /// Artifact size in bytes (set on completion)
    pub artifact_size: Option<i64>,

    /// SHA-256 of the stored artifact (set on completion)
    pub artifact_checksum: Option<String>,

    /// Failure classification (set on failure)
    pub error_kind: Option<FailureKind>,

    /// Human-readable failure message (set on failure)
    pub error_message: Option<String>,
}

impl BackupAttempt {
    /// Create a new pending attempt
    pub fn new(
        target_id: impl Into<String>,
        tier: Tier,
        engine: Engine,
        trigger: TriggerSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_id: target_id.into(),
            tier,
            status: AttemptStatus::Pending,
            trigger,
            engine,
            created_at: Utc::now().timestamp_millis(),
            started_at: None,
            completed_at: None,
            artifact_key: None,
            artifact_size: None,
            artifact_checksum: None,
            error_kind: None,
            error_message: None,
        }
    }

    /// Sort key yielding newest-first order under an ascending index scan
    ///
    /// The key is the zero-padded inversion of the creation timestamp with
    /// the attempt id appended as a uniqueness suffix to break ties.
    pub fn sort_key(&self) -> String {
        sort_key(self.created_at, &self.id)
    }
}

/// Derive the inverted sort key for a creation timestamp and attempt id
pub fn sort_key(created_at_millis: i64, id: &str) -> String {
    format!("{:019}-{}", i64::MAX - created_at_millis, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!AttemptStatus::Pending.is_terminal());
        assert!(!AttemptStatus::InProgress.is_terminal());
        assert!(AttemptStatus::Completed.is_terminal());
        assert!(AttemptStatus::Failed.is_terminal());
        assert!(AttemptStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            AttemptStatus::Pending,
            AttemptStatus::InProgress,
            AttemptStatus::Completed,
            AttemptStatus::Failed,
            AttemptStatus::Cancelled,
        ] {
            assert_eq!(AttemptStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(AttemptStatus::parse("done").is_err());
    }

    #[test]
    fn test_sort_key_inverts_chronology() {
        // Later creation must produce a lexicographically smaller key.
        let earlier = sort_key(1_000, "a");
        let later = sort_key(2_000, "a");
        assert!(later < earlier);
    }

    #[test]
    fn test_sort_key_breaks_ties_by_id() {
        let a = sort_key(1_000, "aaaa");
        let b = sort_key(1_000, "bbbb");
        assert_ne!(a, b);
        assert_eq!(&a[..20], &b[..20]);
    }
}
