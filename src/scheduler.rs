//! Schedule evaluator and stale-attempt watchdog
//!
//! On every tick the evaluator walks the enabled targets, resolves each
//! target's effective policy, asks the tier clock which tiers are due, and
//! for each due tier inserts a `pending` attempt before enqueuing its job.
//! Targets are evaluated in isolation: one target's configuration error or
//! database hiccup is logged and skipped, never propagated out of the tick.
//!
//! The watchdog repairs the two crash windows the pipeline has: a `pending`
//! attempt whose job never reached the queue is re-enqueued, and an
//! `in_progress` attempt that outlived the execution timeout is failed as
//! timed out and its job acked.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::models::{BackupAttempt, FailureKind, Target, Tier, TriggerSource};
use crate::repositories::{AttemptRepository, QueueRepository, TargetRepository};
use crate::resolver::PolicyResolver;
use crate::shutdown::ShutdownCoordinator;
use crate::tier;

/// Outcome of one evaluator tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Enabled targets considered
    pub targets_seen: usize,
    /// Attempts inserted and enqueued
    pub attempts_scheduled: usize,
    /// Targets skipped because resolution or evaluation failed
    pub targets_skipped: usize,
}

/// Outcome of one watchdog pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapSummary {
    /// Pending attempts re-enqueued
    pub requeued: usize,
    /// In-progress attempts failed as timed out
    pub timed_out: usize,
}

/// Watchdog timeouts
#[derive(Debug, Clone, Copy)]
pub struct ReapTimeouts {
    /// Age after which a pending attempt with no live job is re-enqueued
    pub pending: Duration,
    /// Age after which an in-progress attempt is failed as timed out
    pub in_progress: Duration,
}

/// Evaluates tier due-ness and feeds the job queue
#[derive(Clone, Debug)]
pub struct ScheduleEvaluator {
    targets: TargetRepository,
    attempts: AttemptRepository,
    queue: QueueRepository,
    resolver: Arc<PolicyResolver>,
}

impl ScheduleEvaluator {
    pub fn new(
        targets: TargetRepository,
        attempts: AttemptRepository,
        queue: QueueRepository,
        resolver: Arc<PolicyResolver>,
    ) -> Self {
        Self {
            targets,
            attempts,
            queue,
            resolver,
        }
    }

    /// Evaluate every enabled target once
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let targets = self.targets.list_enabled().await?;
        let mut summary = TickSummary {
            targets_seen: targets.len(),
            ..Default::default()
        };

        for target in &targets {
            match self.evaluate_target(target, now).await {
                Ok(scheduled) => summary.attempts_scheduled += scheduled,
                Err(e) => {
                    warn!(
                        target_id = %target.id,
                        target_name = %target.name,
                        error = %e,
                        "Skipping target this tick"
                    );
                    summary.targets_skipped += 1;
                }
            }
        }

        debug!(
            targets = summary.targets_seen,
            scheduled = summary.attempts_scheduled,
            skipped = summary.targets_skipped,
            "Evaluator tick complete"
        );
        Ok(summary)
    }

    /// Evaluate one target's active tiers, returning how many attempts were
    /// scheduled
    async fn evaluate_target(&self, target: &Target, now: DateTime<Utc>) -> Result<usize> {
        let policy = self.resolver.resolve_policy(target).await?;
        let mut scheduled = 0;

        for (tier, config) in policy.value.active_tiers() {
            // At most one non-terminal attempt per (target, tier); this also
            // deduplicates overlapping ticks.
            if self
                .attempts
                .find_non_terminal(&target.id, tier)
                .await?
                .is_some()
            {
                continue;
            }

            let last_success = self.last_success(&target.id, tier).await?;
            let status = tier::is_due(config, last_success, now);
            if !status.due {
                continue;
            }

            if self.schedule_attempt(target, tier, now).await? {
                scheduled += 1;
            }
        }

        Ok(scheduled)
    }

    /// Completion time of the most recent completed attempt for the pair
    async fn last_success(
        &self,
        target_id: &str,
        tier: Tier,
    ) -> Result<Option<DateTime<Utc>>> {
        let last = self.attempts.last_completed(target_id, tier).await?;
        Ok(last
            .and_then(|a| a.completed_at)
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()))
    }

    /// Insert the pending attempt, then enqueue its job
    ///
    /// The attempt row goes in first so a crash between the two operations
    /// leaves a record the watchdog can re-enqueue, never a job without a
    /// record.
    async fn schedule_attempt(
        &self,
        target: &Target,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut attempt =
            BackupAttempt::new(&target.id, tier, target.engine, TriggerSource::Scheduled);
        attempt.created_at = now.timestamp_millis();

        // A concurrent evaluator may have won the insert; that is not an error.
        if !self.attempts.insert_pending(&attempt).await? {
            debug!(target_id = %target.id, tier = %tier, "Lost scheduling race, skipping");
            return Ok(false);
        }

        self.queue
            .enqueue(
                &attempt.id,
                &target.id,
                tier,
                TriggerSource::Scheduled,
                now.timestamp_millis(),
            )
            .await?;

        info!(
            target_id = %target.id,
            target_name = %target.name,
            tier = %tier,
            attempt_id = %attempt.id,
            "Scheduled backup"
        );
        Ok(true)
    }

    /// Repair attempts stuck in a non-terminal state
    pub async fn reap_stale_attempts(
        &self,
        now: DateTime<Utc>,
        timeouts: ReapTimeouts,
    ) -> Result<ReapSummary> {
        let now_millis = now.timestamp_millis();
        let mut summary = ReapSummary::default();

        let pending_cutoff = now_millis - timeouts.pending.as_millis() as i64;
        for attempt in self.attempts.stale_pending(pending_cutoff).await? {
            // A live job means the queue is just backed up; leave it alone.
            if self.queue.has_live_job(&attempt.id).await? {
                continue;
            }
            warn!(
                attempt_id = %attempt.id,
                target_id = %attempt.target_id,
                tier = %attempt.tier,
                "Re-enqueuing pending attempt with no queued job"
            );
            self.queue
                .enqueue(
                    &attempt.id,
                    &attempt.target_id,
                    attempt.tier,
                    attempt.trigger,
                    now_millis,
                )
                .await?;
            summary.requeued += 1;
        }

        let in_progress_cutoff = now_millis - timeouts.in_progress.as_millis() as i64;
        for attempt in self.attempts.stale_in_progress(in_progress_cutoff).await? {
            let message = format!(
                "Execution exceeded {} seconds",
                timeouts.in_progress.as_secs()
            );
            if self
                .attempts
                .mark_failed(&attempt.id, now_millis, FailureKind::Timeout, &message)
                .await?
            {
                error!(
                    attempt_id = %attempt.id,
                    target_id = %attempt.target_id,
                    "Failing attempt stuck in progress"
                );
                self.queue.ack_for_attempt(&attempt.id).await?;
                summary.timed_out += 1;
            }
        }

        Ok(summary)
    }

    /// Run the evaluator and watchdog on a fixed interval until shutdown
    pub fn spawn(
        self: Arc<Self>,
        tick_interval: Duration,
        timeouts: ReapTimeouts,
        shutdown: ShutdownCoordinator,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.wait_for_shutdown() => {
                        info!("Evaluator stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        if let Err(e) = self.run_tick(now).await {
                            error!(error = %e, "Evaluator tick failed");
                        }
                        if let Err(e) = self.reap_stale_attempts(now, timeouts).await {
                            error!(error = %e, "Watchdog pass failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{
        AttemptStatus, Credentials, Engine, RetentionPolicy, Target, TierConfig, TierSchedule,
    };
    use crate::repositories::PolicyRepository;

    struct Fixture {
        targets: TargetRepository,
        policies: PolicyRepository,
        attempts: AttemptRepository,
        queue: QueueRepository,
        evaluator: ScheduleEvaluator,
    }

    async fn setup() -> Fixture {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.init_schema().await.unwrap();
        let targets = TargetRepository::new(db.clone());
        let policies = PolicyRepository::new(db.clone());
        let attempts = AttemptRepository::new(db.clone());
        let queue = QueueRepository::new(db);
        let resolver = PolicyResolver::from_repositories(&targets, &policies);
        let evaluator = ScheduleEvaluator::new(
            targets.clone(),
            attempts.clone(),
            queue.clone(),
            resolver,
        );
        Fixture {
            targets,
            policies,
            attempts,
            queue,
            evaluator,
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            host: "localhost".to_string(),
            port: 5432,
            username: "backup".to_string(),
            password: "secret".to_string(),
        }
    }

    /// Hourly-only policy: due immediately when there is no prior run
    fn hourly_policy() -> RetentionPolicy {
        RetentionPolicy::new("hourly").with_tier(
            Tier::Hourly,
            TierConfig::new(12, TierSchedule::EveryHours { interval: 6 }),
        )
    }

    async fn seed_target(fixture: &Fixture, policy: &RetentionPolicy) -> Target {
        fixture.policies.save(policy).await.unwrap();
        let target = Target::new("orders", "orders_db", Engine::Postgres, credentials(), &policy.id);
        fixture.targets.save_target(&target).await.unwrap();
        target
    }

    #[tokio::test]
    async fn test_tick_schedules_due_tier_and_enqueues() {
        let fixture = setup().await;
        let target = seed_target(&fixture, &hourly_policy()).await;

        let now = Utc::now();
        let summary = fixture.evaluator.run_tick(now).await.unwrap();
        assert_eq!(summary.targets_seen, 1);
        assert_eq!(summary.attempts_scheduled, 1);
        assert_eq!(summary.targets_skipped, 0);

        let pending = fixture
            .attempts
            .find_non_terminal(&target.id, Tier::Hourly)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.status, AttemptStatus::Pending);
        assert_eq!(pending.trigger, TriggerSource::Scheduled);
        assert!(fixture.queue.has_live_job(&pending.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_overlapping_ticks_schedule_once() {
        // Two evaluations at the same instant; the non-terminal guard makes
        // the second a no-op.
        let fixture = setup().await;
        seed_target(&fixture, &hourly_policy()).await;

        let now = Utc::now();
        let first = fixture.evaluator.run_tick(now).await.unwrap();
        let second = fixture.evaluator.run_tick(now).await.unwrap();

        assert_eq!(first.attempts_scheduled, 1);
        assert_eq!(second.attempts_scheduled, 0);
        assert_eq!(fixture.queue.outstanding_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_not_due_tier_is_not_scheduled() {
        let fixture = setup().await;
        let target = seed_target(&fixture, &hourly_policy()).await;

        // A fresh success one hour ago keeps the 6h tier quiet.
        let now = Utc::now();
        let earlier = now - chrono::Duration::hours(1);
        let mut done = BackupAttempt::new(
            &target.id,
            Tier::Hourly,
            Engine::Postgres,
            TriggerSource::Scheduled,
        );
        done.created_at = earlier.timestamp_millis();
        assert!(fixture.attempts.insert_pending(&done).await.unwrap());
        assert!(fixture
            .attempts
            .mark_in_progress(&done.id, earlier.timestamp_millis())
            .await
            .unwrap());
        assert!(fixture
            .attempts
            .mark_completed(&done.id, earlier.timestamp_millis(), "key", 1, "sum")
            .await
            .unwrap());

        let summary = fixture.evaluator.run_tick(now).await.unwrap();
        assert_eq!(summary.attempts_scheduled, 0);
    }

    #[tokio::test]
    async fn test_broken_target_is_isolated() {
        let fixture = setup().await;
        seed_target(&fixture, &hourly_policy()).await;

        // Second target references a policy that does not exist.
        let broken = Target::new("ghost", "ghost_db", Engine::MySql, credentials(), "missing");
        fixture.targets.save_target(&broken).await.unwrap();

        let summary = fixture.evaluator.run_tick(Utc::now()).await.unwrap();
        assert_eq!(summary.targets_seen, 2);
        assert_eq!(summary.attempts_scheduled, 1);
        assert_eq!(summary.targets_skipped, 1);
    }

    #[tokio::test]
    async fn test_watchdog_requeues_dangling_pending() {
        let fixture = setup().await;
        let target = seed_target(&fixture, &hourly_policy()).await;

        // Simulate a crash between insert and enqueue: pending row, no job.
        let now = Utc::now();
        let mut attempt = BackupAttempt::new(
            &target.id,
            Tier::Hourly,
            Engine::Postgres,
            TriggerSource::Scheduled,
        );
        attempt.created_at = now.timestamp_millis() - 100_000;
        assert!(fixture.attempts.insert_pending(&attempt).await.unwrap());
        assert!(!fixture.queue.has_live_job(&attempt.id).await.unwrap());

        let timeouts = ReapTimeouts {
            pending: Duration::from_secs(60),
            in_progress: Duration::from_secs(3600),
        };
        let summary = fixture
            .evaluator
            .reap_stale_attempts(now, timeouts)
            .await
            .unwrap();
        assert_eq!(summary.requeued, 1);
        assert!(fixture.queue.has_live_job(&attempt.id).await.unwrap());

        // Attempt with a live job is left alone on the next pass.
        let again = fixture
            .evaluator
            .reap_stale_attempts(now, timeouts)
            .await
            .unwrap();
        assert_eq!(again.requeued, 0);
    }

    #[tokio::test]
    async fn test_watchdog_fails_stuck_in_progress() {
        let fixture = setup().await;
        let target = seed_target(&fixture, &hourly_policy()).await;

        let now = Utc::now();
        let stale_millis = now.timestamp_millis() - 10_000_000;
        let mut attempt = BackupAttempt::new(
            &target.id,
            Tier::Hourly,
            Engine::Postgres,
            TriggerSource::Scheduled,
        );
        attempt.created_at = stale_millis;
        assert!(fixture.attempts.insert_pending(&attempt).await.unwrap());
        fixture
            .queue
            .enqueue(
                &attempt.id,
                &target.id,
                Tier::Hourly,
                TriggerSource::Scheduled,
                stale_millis,
            )
            .await
            .unwrap();
        assert!(fixture
            .attempts
            .mark_in_progress(&attempt.id, stale_millis)
            .await
            .unwrap());

        let timeouts = ReapTimeouts {
            pending: Duration::from_secs(60),
            in_progress: Duration::from_secs(3600),
        };
        let summary = fixture
            .evaluator
            .reap_stale_attempts(now, timeouts)
            .await
            .unwrap();
        assert_eq!(summary.timed_out, 1);

        let failed = fixture.attempts.find_by_id(&attempt.id).await.unwrap();
        assert_eq!(failed.status, AttemptStatus::Failed);
        assert_eq!(failed.error_kind, Some(FailureKind::Timeout));
        assert!(!fixture.queue.has_live_job(&attempt.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_watchdog_spares_recently_claimed_attempt() {
        // An attempt that waited in the queue for hours but was claimed a
        // moment ago is still within its execution window; the watchdog
        // times out on the claim, not the enqueue.
        let fixture = setup().await;
        let target = seed_target(&fixture, &hourly_policy()).await;

        let now = Utc::now();
        let created_millis = (now - chrono::Duration::hours(3)).timestamp_millis();
        let mut attempt = BackupAttempt::new(
            &target.id,
            Tier::Hourly,
            Engine::Postgres,
            TriggerSource::Scheduled,
        );
        attempt.created_at = created_millis;
        assert!(fixture.attempts.insert_pending(&attempt).await.unwrap());
        fixture
            .queue
            .enqueue(
                &attempt.id,
                &target.id,
                Tier::Hourly,
                TriggerSource::Scheduled,
                created_millis,
            )
            .await
            .unwrap();
        assert!(fixture
            .attempts
            .mark_in_progress(&attempt.id, now.timestamp_millis() - 1_000)
            .await
            .unwrap());

        let timeouts = ReapTimeouts {
            pending: Duration::from_secs(60),
            in_progress: Duration::from_secs(7200),
        };
        let summary = fixture
            .evaluator
            .reap_stale_attempts(now, timeouts)
            .await
            .unwrap();
        assert_eq!(summary.timed_out, 0);

        let untouched = fixture.attempts.find_by_id(&attempt.id).await.unwrap();
        assert_eq!(untouched.status, AttemptStatus::InProgress);
    }
}
