//! Retention enforcer
//!
//! Prunes completed attempts beyond each tier's keep count, newest first.
//! Deletion is object-first: when the object delete fails the record is kept
//! so the next sweep retries, and a record never outlives knowledge of its
//! artifact. Every failure is logged and the sweep continues; one target can
//! never abort enforcement for the rest.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::models::Tier;
use crate::repositories::{AttemptRepository, TargetRepository};
use crate::resolver::PolicyResolver;
use crate::shutdown::ShutdownCoordinator;
use crate::storage::ObjectStore;

/// Outcome of one retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Targets whose tiers were enforced
    pub targets_swept: usize,
    /// Attempt records pruned (object and record both removed)
    pub pruned: usize,
    /// Object or record deletions that failed and were deferred
    pub failures: usize,
}

/// Enforces per-tier keep counts over completed attempts
#[derive(Clone)]
pub struct RetentionEnforcer {
    targets: TargetRepository,
    attempts: AttemptRepository,
    resolver: Arc<PolicyResolver>,
    store: Arc<dyn ObjectStore>,
}

impl RetentionEnforcer {
    pub fn new(
        targets: TargetRepository,
        attempts: AttemptRepository,
        resolver: Arc<PolicyResolver>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            targets,
            attempts,
            resolver,
            store,
        }
    }

    /// Enforce every enabled target's active tiers
    ///
    /// A disabled tier or a keep count of zero stops new backups; it does not
    /// mass-delete existing history, so such tiers are skipped here.
    pub async fn enforce_all(&self) -> Result<SweepSummary> {
        let targets = self.targets.list_enabled().await?;
        let mut summary = SweepSummary::default();

        for target in &targets {
            let policy = match self.resolver.resolve_policy(target).await {
                Ok(resolved) => resolved.value,
                Err(e) => {
                    warn!(
                        target_id = %target.id,
                        error = %e,
                        "Skipping retention for unresolvable target"
                    );
                    summary.failures += 1;
                    continue;
                }
            };

            summary.targets_swept += 1;
            for (tier, config) in policy.active_tiers() {
                match self.enforce_pair(&target.id, tier, config.keep_count).await {
                    Ok((pruned, failures)) => {
                        summary.pruned += pruned;
                        summary.failures += failures;
                    }
                    Err(e) => {
                        warn!(
                            target_id = %target.id,
                            tier = %tier,
                            error = %e,
                            "Retention enforcement failed for tier"
                        );
                        summary.failures += 1;
                    }
                }
            }
        }

        info!(
            targets = summary.targets_swept,
            pruned = summary.pruned,
            failures = summary.failures,
            "Retention sweep complete"
        );
        Ok(summary)
    }

    /// Prune one (target, tier) pair down to its keep count
    ///
    /// Returns (pruned, deferred failures).
    pub async fn enforce_pair(
        &self,
        target_id: &str,
        tier: Tier,
        keep_count: u32,
    ) -> Result<(usize, usize)> {
        let completed = self.attempts.completed_for_pair(target_id, tier).await?;
        let mut pruned = 0;
        let mut failures = 0;

        for attempt in completed.iter().skip(keep_count as usize) {
            if let Some(key) = &attempt.artifact_key {
                if let Err(e) = self.store.delete(key).await {
                    // Keep the record so the next sweep retries; the key is
                    // logged for external reconciliation.
                    warn!(
                        attempt_id = %attempt.id,
                        key = %key,
                        error = %e,
                        "Artifact delete failed, keeping record for retry"
                    );
                    failures += 1;
                    continue;
                }
            }

            match self.attempts.delete(&attempt.id).await {
                Ok(()) => {
                    debug!(
                        attempt_id = %attempt.id,
                        target_id,
                        tier = %tier,
                        "Pruned expired backup"
                    );
                    pruned += 1;
                }
                Err(e) => {
                    warn!(attempt_id = %attempt.id, error = %e, "Record delete failed");
                    failures += 1;
                }
            }
        }

        Ok((pruned, failures))
    }

    /// Run the sweep on a fixed interval until shutdown
    pub fn spawn(
        self: Arc<Self>,
        sweep_interval: Duration,
        shutdown: ShutdownCoordinator,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.wait_for_shutdown() => {
                        info!("Retention sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.enforce_all().await {
                            error!(error = %e, "Retention sweep failed");
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for RetentionEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionEnforcer").finish()
    }
}
