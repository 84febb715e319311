//! Attempt history repository
//!
//! The append-only History Store. Rows are inserted as `pending` and move
//! through guarded transitions only; every state-changing statement carries
//! a `WHERE status = ...` clause and reports whether it won, so concurrent
//! workers, the watchdog, and cancellation can never clobber a terminal row.
//!
//! Newest-first retrieval rides the inverted sort key: ascending order over
//! `sort_key` is descending chronological order, so listing never scans the
//! full history.

use crate::db::Database;
use crate::error::{BackhaulError, Result};
use crate::models::{AttemptStatus, BackupAttempt, Engine, FailureKind, Tier, TriggerSource};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};
use std::sync::Arc;

const ATTEMPT_COLUMNS: &str = "id, target_id, tier, status, trigger_source, engine, created_at, \
     started_at, completed_at, artifact_key, artifact_size, artifact_checksum, \
     error_kind, error_message";

/// Conjunctive filters for history queries
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub target_id: Option<String>,
    pub tier: Option<Tier>,
    pub status: Option<AttemptStatus>,
    pub trigger: Option<TriggerSource>,
    pub engine: Option<Engine>,
    /// Inclusive lower bound on created_at (unix millis)
    pub created_after: Option<i64>,
    /// Exclusive upper bound on created_at (unix millis)
    pub created_before: Option<i64>,
}

impl HistoryFilter {
    pub fn for_target(target_id: impl Into<String>) -> Self {
        Self {
            target_id: Some(target_id.into()),
            ..Self::default()
        }
    }
}

/// How to page through history
#[derive(Debug, Clone)]
pub enum PageRequest {
    /// Continuation-token mode; efficient at any depth
    Cursor { cursor: Option<String>, limit: u32 },
    /// Page-number mode for bounded UI consumption; walks the index from the
    /// start, so deep pages are not cheap
    Offset { page: u32, per_page: u32 },
}

/// One page of history results, newest first
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub attempts: Vec<BackupAttempt>,
    /// Continuation token for the next page (cursor mode only)
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Repository for backup attempt history
#[derive(Clone, Debug)]
pub struct AttemptRepository {
    db: Arc<Database>,
}

impl AttemptRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a pending attempt, guarded by the non-terminal invariant
    ///
    /// Returns `false` without inserting when a pending or in-progress
    /// attempt already exists for the (target, tier) pair. The guard lives
    /// in the statement itself so concurrent evaluators stay safe.
    pub async fn insert_pending(&self, attempt: &BackupAttempt) -> Result<bool> {
        if attempt.status != AttemptStatus::Pending {
            return Err(BackhaulError::Conflict(format!(
                "Attempt {} must be inserted as pending, got {}",
                attempt.id, attempt.status
            )));
        }

        let result = sqlx::query(
            "INSERT INTO attempts (id, target_id, tier, status, trigger_source, engine,
                                   created_at, sort_key)
             SELECT ?, ?, ?, ?, ?, ?, ?, ?
             WHERE NOT EXISTS (
                 SELECT 1 FROM attempts
                 WHERE target_id = ? AND tier = ? AND status IN ('pending', 'in_progress')
             )",
        )
        .bind(&attempt.id)
        .bind(&attempt.target_id)
        .bind(attempt.tier.as_str())
        .bind(attempt.status.as_str())
        .bind(attempt.trigger.as_str())
        .bind(attempt.engine.as_str())
        .bind(attempt.created_at)
        .bind(attempt.sort_key())
        .bind(&attempt.target_id)
        .bind(attempt.tier.as_str())
        .execute(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to insert attempt: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    /// Load an attempt by ID
    pub async fn find_by_id(&self, id: &str) -> Result<BackupAttempt> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM attempts WHERE id = ?",
            ATTEMPT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to load attempt: {}", e)))?
        .ok_or_else(|| BackhaulError::NotFound(format!("Attempt not found: {}", id)))?;

        row_to_attempt(&row)
    }

    /// Transition pending -> in_progress; `false` means the race was lost
    pub async fn mark_in_progress(&self, id: &str, started_at: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE attempts SET status = 'in_progress', started_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(started_at)
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to start attempt: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition in_progress -> completed with the artifact facts
    pub async fn mark_completed(
        &self,
        id: &str,
        completed_at: i64,
        artifact_key: &str,
        artifact_size: i64,
        artifact_checksum: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE attempts
             SET status = 'completed', completed_at = ?, artifact_key = ?,
                 artifact_size = ?, artifact_checksum = ?
             WHERE id = ? AND status = 'in_progress'",
        )
        .bind(completed_at)
        .bind(artifact_key)
        .bind(artifact_size)
        .bind(artifact_checksum)
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to complete attempt: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition pending/in_progress -> failed with a classified error
    pub async fn mark_failed(
        &self,
        id: &str,
        completed_at: i64,
        kind: FailureKind,
        message: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE attempts
             SET status = 'failed', completed_at = ?, error_kind = ?, error_message = ?
             WHERE id = ? AND status IN ('pending', 'in_progress')",
        )
        .bind(completed_at)
        .bind(kind.as_str())
        .bind(message)
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to fail attempt: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition pending/in_progress -> cancelled; terminal rows are untouched
    pub async fn mark_cancelled(&self, id: &str, completed_at: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE attempts SET status = 'cancelled', completed_at = ?
             WHERE id = ? AND status IN ('pending', 'in_progress')",
        )
        .bind(completed_at)
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to cancel attempt: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    /// The single non-terminal attempt for a (target, tier) pair, if any
    pub async fn find_non_terminal(
        &self,
        target_id: &str,
        tier: Tier,
    ) -> Result<Option<BackupAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM attempts
             WHERE target_id = ? AND tier = ? AND status IN ('pending', 'in_progress')
             LIMIT 1",
            ATTEMPT_COLUMNS
        ))
        .bind(target_id)
        .bind(tier.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to query attempts: {}", e)))?;

        row.map(|r| row_to_attempt(&r)).transpose()
    }

    /// Most recent completed attempt for a (target, tier) pair
    ///
    /// This is the derived "last successful run"; it is always computed from
    /// the history rather than cached anywhere it could desync.
    pub async fn last_completed(
        &self,
        target_id: &str,
        tier: Tier,
    ) -> Result<Option<BackupAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM attempts
             WHERE target_id = ? AND tier = ? AND status = 'completed'
             ORDER BY completed_at DESC LIMIT 1",
            ATTEMPT_COLUMNS
        ))
        .bind(target_id)
        .bind(tier.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to query attempts: {}", e)))?;

        row.map(|r| row_to_attempt(&r)).transpose()
    }

    /// All completed attempts for a (target, tier) pair, newest first
    pub async fn completed_for_pair(
        &self,
        target_id: &str,
        tier: Tier,
    ) -> Result<Vec<BackupAttempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM attempts
             WHERE target_id = ? AND tier = ? AND status = 'completed'
             ORDER BY completed_at DESC",
            ATTEMPT_COLUMNS
        ))
        .bind(target_id)
        .bind(tier.as_str())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to query attempts: {}", e)))?;

        rows.iter().map(row_to_attempt).collect()
    }

    /// List history newest-first with conjunctive filters and pagination
    pub async fn list(&self, filter: &HistoryFilter, page: &PageRequest) -> Result<HistoryPage> {
        let mut sql = format!("SELECT {} FROM attempts WHERE 1=1", ATTEMPT_COLUMNS);
        push_filter_sql(&mut sql, filter);

        match page {
            PageRequest::Cursor { cursor, limit } => {
                if cursor.is_some() {
                    sql.push_str(" AND sort_key > ?");
                }
                sql.push_str(" ORDER BY sort_key ASC LIMIT ?");

                let mut query = sqlx::query(&sql);
                query = bind_filter(query, filter);
                if let Some(cursor) = cursor {
                    query = query.bind(cursor);
                }
                // Fetch one extra row to learn whether another page exists.
                query = query.bind(i64::from(*limit) + 1);

                let rows = query
                    .fetch_all(self.db.pool())
                    .await
                    .map_err(|e| BackhaulError::Database(format!("Failed to list history: {}", e)))?;

                let has_more = rows.len() > *limit as usize;
                let attempts: Vec<BackupAttempt> = rows
                    .iter()
                    .take(*limit as usize)
                    .map(row_to_attempt)
                    .collect::<Result<_>>()?;

                let next_cursor = if has_more {
                    attempts.last().map(|a| a.sort_key())
                } else {
                    None
                };

                Ok(HistoryPage {
                    attempts,
                    next_cursor,
                    has_more,
                })
            }
            PageRequest::Offset { page, per_page } => {
                sql.push_str(" ORDER BY sort_key ASC LIMIT ? OFFSET ?");

                let mut query = sqlx::query(&sql);
                query = bind_filter(query, filter);
                query = query
                    .bind(i64::from(*per_page) + 1)
                    .bind(i64::from(*page) * i64::from(*per_page));

                let rows = query
                    .fetch_all(self.db.pool())
                    .await
                    .map_err(|e| BackhaulError::Database(format!("Failed to list history: {}", e)))?;

                let has_more = rows.len() > *per_page as usize;
                let attempts: Vec<BackupAttempt> = rows
                    .iter()
                    .take(*per_page as usize)
                    .map(row_to_attempt)
                    .collect::<Result<_>>()?;

                Ok(HistoryPage {
                    attempts,
                    next_cursor: None,
                    has_more,
                })
            }
        }
    }

    /// Pending attempts created before `older_than` (unix millis)
    pub async fn stale_pending(&self, older_than: i64) -> Result<Vec<BackupAttempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM attempts WHERE status = 'pending' AND created_at < ?",
            ATTEMPT_COLUMNS
        ))
        .bind(older_than)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to query stale attempts: {}", e)))?;

        rows.iter().map(row_to_attempt).collect()
    }

    /// In-progress attempts claimed before `older_than` (unix millis)
    ///
    /// Staleness is measured from `started_at`, not `created_at`: an attempt
    /// that waited a long time in the queue but was claimed recently is
    /// still running within its execution bound.
    pub async fn stale_in_progress(&self, older_than: i64) -> Result<Vec<BackupAttempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM attempts WHERE status = 'in_progress' AND started_at < ?",
            ATTEMPT_COLUMNS
        ))
        .bind(older_than)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to query stale attempts: {}", e)))?;

        rows.iter().map(row_to_attempt).collect()
    }

    /// Count of consecutive failed attempts, newest first
    ///
    /// Walks terminal attempts for the target in reverse chronological order
    /// and counts failures until the first completion. Cancelled attempts
    /// neither extend nor break the streak.
    pub async fn consecutive_failures(&self, target_id: &str) -> Result<i64> {
        let rows = sqlx::query(
            "SELECT status FROM attempts
             WHERE target_id = ? AND status IN ('completed', 'failed')
             ORDER BY sort_key ASC LIMIT 1000",
        )
        .bind(target_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to query failures: {}", e)))?;

        let mut count = 0i64;
        for row in rows {
            let status: String = row.get("status");
            if status == "failed" {
                count += 1;
            } else {
                break;
            }
        }

        Ok(count)
    }

    /// Delete an attempt record
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM attempts WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(|e| BackhaulError::Database(format!("Failed to delete attempt: {}", e)))?;

        Ok(())
    }
}

fn push_filter_sql(sql: &mut String, filter: &HistoryFilter) {
    if filter.target_id.is_some() {
        sql.push_str(" AND target_id = ?");
    }
    if filter.tier.is_some() {
        sql.push_str(" AND tier = ?");
    }
    if filter.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if filter.trigger.is_some() {
        sql.push_str(" AND trigger_source = ?");
    }
    if filter.engine.is_some() {
        sql.push_str(" AND engine = ?");
    }
    if filter.created_after.is_some() {
        sql.push_str(" AND created_at >= ?");
    }
    if filter.created_before.is_some() {
        sql.push_str(" AND created_at < ?");
    }
}

fn bind_filter<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    filter: &'q HistoryFilter,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    if let Some(target_id) = &filter.target_id {
        query = query.bind(target_id);
    }
    if let Some(tier) = filter.tier {
        query = query.bind(tier.as_str());
    }
    if let Some(status) = filter.status {
        query = query.bind(status.as_str());
    }
    if let Some(trigger) = filter.trigger {
        query = query.bind(trigger.as_str());
    }
    if let Some(engine) = filter.engine {
        query = query.bind(engine.as_str());
    }
    if let Some(after) = filter.created_after {
        query = query.bind(after);
    }
    if let Some(before) = filter.created_before {
        query = query.bind(before);
    }
    query
}

fn row_to_attempt(row: &SqliteRow) -> Result<BackupAttempt> {
    let tier: String = row.get("tier");
    let status: String = row.get("status");
    let trigger: String = row.get("trigger_source");
    let engine: String = row.get("engine");
    let error_kind: Option<String> = row.get("error_kind");

    Ok(BackupAttempt {
        id: row.get("id"),
        target_id: row.get("target_id"),
        tier: Tier::parse(&tier)?,
        status: AttemptStatus::parse(&status)?,
        trigger: TriggerSource::parse(&trigger)?,
        engine: Engine::parse(&engine)?,
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        artifact_key: row.get("artifact_key"),
        artifact_size: row.get("artifact_size"),
        artifact_checksum: row.get("artifact_checksum"),
        error_kind: error_kind.as_deref().map(FailureKind::parse).transpose()?,
        error_message: row.get("error_message"),
    })
}
