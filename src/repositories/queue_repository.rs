//! Durable job queue repository
//!
//! An at-least-once message channel over a SQLite table. Dequeue atomically
//! claims the oldest deliverable job and stamps a lease (visibility
//! timeout); a consumer that crashes or misses its ack simply lets the
//! lease expire, after which the job is redelivered with an incremented
//! delivery count. Consumers must therefore be idempotent, which the worker
//! pool guarantees by checking the attempt's terminal state before acting.

use crate::db::Database;
use crate::error::{BackhaulError, Result};
use crate::models::{BackupJob, Tier, TriggerSource};
use sqlx::Row;
use std::sync::Arc;

/// Repository for the durable job queue
#[derive(Clone, Debug)]
pub struct QueueRepository {
    db: Arc<Database>,
}

impl QueueRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Enqueue a job descriptor for a pending attempt
    pub async fn enqueue(
        &self,
        attempt_id: &str,
        target_id: &str,
        tier: Tier,
        trigger: TriggerSource,
        now: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO jobs (attempt_id, target_id, tier, trigger_source,
                               enqueued_at, available_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(attempt_id)
        .bind(target_id)
        .bind(tier.as_str())
        .bind(trigger.as_str())
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to enqueue job: {}", e)))?;

        Ok(result.last_insert_rowid())
    }

    /// Claim the oldest deliverable job, stamping a lease
    ///
    /// Returns `None` when nothing is deliverable. The claim is a single
    /// UPDATE so concurrent workers cannot claim the same delivery.
    pub async fn dequeue(&self, now: i64, lease_millis: i64) -> Result<Option<BackupJob>> {
        let row = sqlx::query(
            "UPDATE jobs
             SET lease_expires_at = ?, delivery_count = delivery_count + 1
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE acked = 0
                   AND available_at <= ?
                   AND (lease_expires_at IS NULL OR lease_expires_at <= ?)
                 ORDER BY id
                 LIMIT 1
             )
             RETURNING id, attempt_id, target_id, tier, trigger_source, delivery_count",
        )
        .bind(now + lease_millis)
        .bind(now)
        .bind(now)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to dequeue job: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let tier: String = row.get("tier");
        let trigger: String = row.get("trigger_source");

        Ok(Some(BackupJob {
            id: row.get("id"),
            attempt_id: row.get("attempt_id"),
            target_id: row.get("target_id"),
            tier: Tier::parse(&tier)?,
            trigger: TriggerSource::parse(&trigger)?,
            delivery_count: row.get("delivery_count"),
        }))
    }

    /// Acknowledge a delivery, removing the job from circulation
    pub async fn ack(&self, job_id: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET acked = 1 WHERE id = ?")
            .bind(job_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| BackhaulError::Database(format!("Failed to ack job: {}", e)))?;

        Ok(())
    }

    /// Acknowledge every outstanding job for an attempt (watchdog path)
    pub async fn ack_for_attempt(&self, attempt_id: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET acked = 1 WHERE attempt_id = ? AND acked = 0")
            .bind(attempt_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| BackhaulError::Database(format!("Failed to ack jobs: {}", e)))?;

        Ok(())
    }

    /// Whether an unacked job exists for the attempt
    ///
    /// Used by the watchdog to distinguish "enqueue never happened" from
    /// "job is still circulating".
    pub async fn has_live_job(&self, attempt_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM jobs WHERE attempt_id = ? AND acked = 0")
            .bind(attempt_id)
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| BackhaulError::Database(format!("Failed to query jobs: {}", e)))?;

        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    /// Number of unacked jobs
    pub async fn outstanding_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM jobs WHERE acked = 0")
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| BackhaulError::Database(format!("Failed to count jobs: {}", e)))?;

        Ok(row.get("count"))
    }
}
