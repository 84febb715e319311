//! Administrative operations: manual triggers, cancellation, history
//! queries, and record deletion
//!
//! Manual triggers bypass the tier clock but nothing else: they flow through
//! the same non-terminal guard, queue, and worker path as scheduled backups,
//! tagged `TriggerSource::Manual`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{BackhaulError, Result};
use crate::models::{BackupAttempt, Tier, TriggerSource};
use crate::repositories::{
    AttemptRepository, HistoryFilter, HistoryPage, PageRequest, QueueRepository, TargetRepository,
};
use crate::storage::ObjectStore;
use crate::worker::CancelRegistry;

/// Outcome of a bulk delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkDeleteSummary {
    pub deleted: usize,
    pub failed: usize,
}

/// Facade for administrative operations
#[derive(Clone)]
pub struct AdminService {
    targets: TargetRepository,
    attempts: AttemptRepository,
    queue: QueueRepository,
    store: Arc<dyn ObjectStore>,
    cancels: Arc<CancelRegistry>,
}

impl AdminService {
    pub fn new(
        targets: TargetRepository,
        attempts: AttemptRepository,
        queue: QueueRepository,
        store: Arc<dyn ObjectStore>,
        cancels: Arc<CancelRegistry>,
    ) -> Self {
        Self {
            targets,
            attempts,
            queue,
            store,
            cancels,
        }
    }

    /// Trigger a backup immediately, bypassing the tier clock
    ///
    /// The non-terminal guard still applies: a second trigger while one is
    /// in flight for the same (target, tier) is a conflict.
    pub async fn trigger_now(&self, target_id: &str, tier: Tier) -> Result<String> {
        let target = self.targets.find_target(target_id).await?;

        let attempt = BackupAttempt::new(&target.id, tier, target.engine, TriggerSource::Manual);
        if !self.attempts.insert_pending(&attempt).await? {
            return Err(BackhaulError::Conflict(format!(
                "A backup for target {} tier {} is already pending or running",
                target_id, tier
            )));
        }

        self.queue
            .enqueue(
                &attempt.id,
                &target.id,
                tier,
                TriggerSource::Manual,
                attempt.created_at,
            )
            .await?;

        info!(
            target_id = %target.id,
            tier = %tier,
            attempt_id = %attempt.id,
            "Manual backup triggered"
        );
        Ok(attempt.id)
    }

    /// Cancel a pending or in-progress attempt
    ///
    /// Cancelling an attempt that already reached a terminal state is a
    /// no-op, not an error.
    pub async fn cancel(&self, attempt_id: &str) -> Result<()> {
        let attempt = self.attempts.find_by_id(attempt_id).await?;
        if attempt.status.is_terminal() {
            return Ok(());
        }

        self.attempts
            .mark_cancelled(attempt_id, Utc::now().timestamp_millis())
            .await?;
        // Wake the executing worker, if any, so it abandons the dump.
        self.cancels.cancel(attempt_id);

        info!(attempt_id = %attempt_id, "Attempt cancelled");
        Ok(())
    }

    /// List attempt history, newest first
    pub async fn list_history(
        &self,
        filter: &HistoryFilter,
        page: &PageRequest,
    ) -> Result<HistoryPage> {
        self.attempts.list(filter, page).await
    }

    /// Delete one attempt record and its artifact
    ///
    /// Artifact first: a failed object delete keeps the record so the
    /// artifact is never orphaned silently.
    pub async fn delete_attempt(&self, attempt_id: &str) -> Result<()> {
        let attempt = self.attempts.find_by_id(attempt_id).await?;

        if let Some(key) = &attempt.artifact_key {
            self.store.delete(key).await?;
        }
        self.attempts.delete(attempt_id).await?;

        info!(attempt_id = %attempt_id, "Attempt deleted");
        Ok(())
    }

    /// Delete a set of attempts, continuing past individual failures
    pub async fn bulk_delete(&self, attempt_ids: &[String]) -> Result<BulkDeleteSummary> {
        let mut summary = BulkDeleteSummary::default();

        for id in attempt_ids {
            match self.delete_attempt(id).await {
                Ok(()) => summary.deleted += 1,
                Err(e) => {
                    warn!(attempt_id = %id, error = %e, "Bulk delete entry failed");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

impl std::fmt::Debug for AdminService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminService").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{
        AttemptStatus, Credentials, Engine, RetentionPolicy, Target,
    };
    use crate::repositories::PolicyRepository;
    use crate::storage::FilesystemStore;
    use bytes::Bytes;

    struct Fixture {
        _dir: tempfile::TempDir,
        attempts: AttemptRepository,
        queue: QueueRepository,
        store: Arc<FilesystemStore>,
        admin: AdminService,
        target: Target,
    }

    async fn setup() -> Fixture {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.init_schema().await.unwrap();
        let targets = TargetRepository::new(db.clone());
        let policies = PolicyRepository::new(db.clone());
        let attempts = AttemptRepository::new(db.clone());
        let queue = QueueRepository::new(db);

        let policy = RetentionPolicy::standard("default");
        policies.save(&policy).await.unwrap();
        let target = Target::new(
            "orders",
            "orders_db",
            Engine::Postgres,
            Credentials {
                host: "localhost".to_string(),
                port: 5432,
                username: "backup".to_string(),
                password: "secret".to_string(),
            },
            &policy.id,
        );
        targets.save_target(&target).await.unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(FilesystemStore::new(dir.path()));
        let admin = AdminService::new(
            targets,
            attempts.clone(),
            queue.clone(),
            store.clone(),
            Arc::new(CancelRegistry::new()),
        );

        Fixture {
            _dir: dir,
            attempts,
            queue,
            store,
            admin,
            target,
        }
    }

    #[tokio::test]
    async fn test_trigger_now_enqueues_manual_attempt() {
        let fixture = setup().await;
        let attempt_id = fixture
            .admin
            .trigger_now(&fixture.target.id, Tier::Daily)
            .await
            .unwrap();

        let attempt = fixture.attempts.find_by_id(&attempt_id).await.unwrap();
        assert_eq!(attempt.status, AttemptStatus::Pending);
        assert_eq!(attempt.trigger, TriggerSource::Manual);
        assert!(fixture.queue.has_live_job(&attempt_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_trigger_now_conflicts_while_in_flight() {
        let fixture = setup().await;
        fixture
            .admin
            .trigger_now(&fixture.target.id, Tier::Daily)
            .await
            .unwrap();

        let err = fixture
            .admin
            .trigger_now(&fixture.target.id, Tier::Daily)
            .await
            .unwrap_err();
        assert!(matches!(err, BackhaulError::Conflict(_)));

        // A different tier is independent.
        fixture
            .admin
            .trigger_now(&fixture.target.id, Tier::Weekly)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_trigger_now_unknown_target() {
        let fixture = setup().await;
        let err = fixture
            .admin
            .trigger_now("ghost", Tier::Daily)
            .await
            .unwrap_err();
        assert!(matches!(err, BackhaulError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_pending_attempt() {
        let fixture = setup().await;
        let attempt_id = fixture
            .admin
            .trigger_now(&fixture.target.id, Tier::Daily)
            .await
            .unwrap();

        fixture.admin.cancel(&attempt_id).await.unwrap();
        let attempt = fixture.attempts.find_by_id(&attempt_id).await.unwrap();
        assert_eq!(attempt.status, AttemptStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_terminal_attempt_is_no_op() {
        let fixture = setup().await;
        let attempt_id = fixture
            .admin
            .trigger_now(&fixture.target.id, Tier::Daily)
            .await
            .unwrap();
        let now = Utc::now().timestamp_millis();
        assert!(fixture.attempts.mark_in_progress(&attempt_id, now).await.unwrap());
        assert!(fixture
            .attempts
            .mark_completed(&attempt_id, now, "key", 1, "sum")
            .await
            .unwrap());

        fixture.admin.cancel(&attempt_id).await.unwrap();
        let attempt = fixture.attempts.find_by_id(&attempt_id).await.unwrap();
        assert_eq!(attempt.status, AttemptStatus::Completed);
    }

    #[tokio::test]
    async fn test_delete_attempt_removes_artifact_first() {
        let fixture = setup().await;
        let attempt_id = fixture
            .admin
            .trigger_now(&fixture.target.id, Tier::Daily)
            .await
            .unwrap();
        let key = "postgres/t/1.sql.gz";
        fixture.store.put(key, Bytes::from_static(b"x")).await.unwrap();
        let now = Utc::now().timestamp_millis();
        assert!(fixture.attempts.mark_in_progress(&attempt_id, now).await.unwrap());
        assert!(fixture
            .attempts
            .mark_completed(&attempt_id, now, key, 1, "sum")
            .await
            .unwrap());

        fixture.admin.delete_attempt(&attempt_id).await.unwrap();
        assert!(!fixture.store.exists(key).await.unwrap());
        assert!(fixture.attempts.find_by_id(&attempt_id).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_attempt_keeps_record_when_object_delete_fails() {
        let fixture = setup().await;
        let attempt_id = fixture
            .admin
            .trigger_now(&fixture.target.id, Tier::Daily)
            .await
            .unwrap();
        let now = Utc::now().timestamp_millis();
        assert!(fixture.attempts.mark_in_progress(&attempt_id, now).await.unwrap());
        // Artifact key points at an object that is not there.
        assert!(fixture
            .attempts
            .mark_completed(&attempt_id, now, "postgres/ghost/1.sql.gz", 1, "sum")
            .await
            .unwrap());

        assert!(fixture.admin.delete_attempt(&attempt_id).await.is_err());
        assert!(fixture.attempts.find_by_id(&attempt_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_bulk_delete_continues_past_failures() {
        let fixture = setup().await;
        let good = fixture
            .admin
            .trigger_now(&fixture.target.id, Tier::Daily)
            .await
            .unwrap();

        let summary = fixture
            .admin
            .bulk_delete(&[good.clone(), "missing-id".to_string()])
            .await
            .unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.failed, 1);
        assert!(fixture.attempts.find_by_id(&good).await.is_err());
    }
}
