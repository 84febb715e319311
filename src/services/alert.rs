//! Consecutive-failure alerting
//!
//! A target is alerting once its most recent terminal attempts are failures,
//! `ALERT_THRESHOLD` or more in a row. Cancelled attempts neither extend nor
//! break a streak; any completion resets it.

use crate::error::Result;
use crate::repositories::{AttemptRepository, TargetRepository};

/// Consecutive failures at which a target starts alerting
pub const ALERT_THRESHOLD: i64 = 2;

/// One alerting target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAlert {
    pub target_id: String,
    pub target_name: String,
    pub consecutive_failures: i64,
}

/// Aggregates failure streaks across targets
#[derive(Clone, Debug)]
pub struct AlertService {
    targets: TargetRepository,
    attempts: AttemptRepository,
}

impl AlertService {
    pub fn new(targets: TargetRepository, attempts: AttemptRepository) -> Self {
        Self { targets, attempts }
    }

    /// Current failure streak for one target
    pub async fn consecutive_failure_count(&self, target_id: &str) -> Result<i64> {
        self.attempts.consecutive_failures(target_id).await
    }

    /// Enabled targets at or above the alert threshold
    pub async fn alerting_targets(&self) -> Result<Vec<TargetAlert>> {
        let mut alerts = Vec::new();

        for target in self.targets.list_enabled().await? {
            let streak = self.attempts.consecutive_failures(&target.id).await?;
            if streak >= ALERT_THRESHOLD {
                alerts.push(TargetAlert {
                    target_id: target.id,
                    target_name: target.name,
                    consecutive_failures: streak,
                });
            }
        }

        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{
        BackupAttempt, Credentials, Engine, FailureKind, RetentionPolicy, Target, Tier,
        TriggerSource,
    };
    use crate::repositories::PolicyRepository;
    use std::sync::Arc;

    struct Fixture {
        attempts: AttemptRepository,
        targets: TargetRepository,
        alerts: AlertService,
        policy_id: String,
    }

    async fn setup() -> Fixture {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.init_schema().await.unwrap();
        let targets = TargetRepository::new(db.clone());
        let policies = PolicyRepository::new(db.clone());
        let attempts = AttemptRepository::new(db);

        let policy = RetentionPolicy::standard("default");
        policies.save(&policy).await.unwrap();

        let alerts = AlertService::new(targets.clone(), attempts.clone());
        Fixture {
            attempts,
            targets,
            alerts,
            policy_id: policy.id,
        }
    }

    async fn seed_target(fixture: &Fixture, name: &str) -> Target {
        let target = Target::new(
            name,
            format!("{}_db", name),
            Engine::Postgres,
            Credentials {
                host: "localhost".to_string(),
                port: 5432,
                username: "backup".to_string(),
                password: "secret".to_string(),
            },
            &fixture.policy_id,
        );
        fixture.targets.save_target(&target).await.unwrap();
        target
    }

    async fn record_failure(fixture: &Fixture, target_id: &str, created_at: i64) {
        let mut attempt = BackupAttempt::new(
            target_id,
            Tier::Daily,
            Engine::Postgres,
            TriggerSource::Scheduled,
        );
        attempt.created_at = created_at;
        assert!(fixture.attempts.insert_pending(&attempt).await.unwrap());
        assert!(fixture
            .attempts
            .mark_failed(&attempt.id, created_at + 1, FailureKind::Connection, "down")
            .await
            .unwrap());
    }

    async fn record_success(fixture: &Fixture, target_id: &str, created_at: i64) {
        let mut attempt = BackupAttempt::new(
            target_id,
            Tier::Daily,
            Engine::Postgres,
            TriggerSource::Scheduled,
        );
        attempt.created_at = created_at;
        assert!(fixture.attempts.insert_pending(&attempt).await.unwrap());
        assert!(fixture
            .attempts
            .mark_in_progress(&attempt.id, created_at + 1)
            .await
            .unwrap());
        assert!(fixture
            .attempts
            .mark_completed(&attempt.id, created_at + 2, "key", 1, "sum")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_alerting_targets_honors_threshold() {
        let fixture = setup().await;
        let noisy = seed_target(&fixture, "noisy").await;
        let quiet = seed_target(&fixture, "quiet").await;
        let flapping = seed_target(&fixture, "flapping").await;

        record_failure(&fixture, &noisy.id, 1_000).await;
        record_failure(&fixture, &noisy.id, 2_000).await;

        record_success(&fixture, &quiet.id, 1_000).await;

        // One failure only, below the threshold.
        record_failure(&fixture, &flapping.id, 1_000).await;

        let alerts = fixture.alerts.alerting_targets().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].target_id, noisy.id);
        assert_eq!(alerts[0].consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_success_resets_streak() {
        let fixture = setup().await;
        let target = seed_target(&fixture, "recovering").await;

        record_failure(&fixture, &target.id, 1_000).await;
        record_failure(&fixture, &target.id, 2_000).await;
        assert_eq!(
            fixture
                .alerts
                .consecutive_failure_count(&target.id)
                .await
                .unwrap(),
            2
        );

        record_success(&fixture, &target.id, 3_000).await;
        assert_eq!(
            fixture
                .alerts
                .consecutive_failure_count(&target.id)
                .await
                .unwrap(),
            0
        );
        assert!(fixture.alerts.alerting_targets().await.unwrap().is_empty());
    }
}
