//! End-to-end pipeline test: seed, evaluate, execute, list, retain.

use std::sync::Arc;
use std::time::Duration;

use backhaul::executor::stub::StaticExecutor;
use backhaul::repositories::{HistoryFilter, PageRequest};
use backhaul::{
    AdminService, AttemptRepository, AttemptStatus, CancelRegistry, Credentials, Database, Engine,
    ExecutorRegistry, FilesystemStore, ObjectStore, Owner, PolicyRepository, PolicyResolver,
    QueueRepository, RetentionEnforcer, RetentionPolicy, ScheduleEvaluator, Target,
    TargetRepository, Tier, TierConfig, TierSchedule, TriggerSource, WorkerPool,
};
use chrono::Utc;

struct Pipeline {
    _dir: tempfile::TempDir,
    attempts: AttemptRepository,
    queue: QueueRepository,
    store: Arc<FilesystemStore>,
    evaluator: ScheduleEvaluator,
    pool: WorkerPool,
    enforcer: RetentionEnforcer,
    admin: AdminService,
    target: Target,
}

/// Wire the full pipeline over an in-memory database and a temp store,
/// with an owner-inheriting target and a 6-hourly keep-1 policy.
async fn pipeline() -> Pipeline {
    let db = Arc::new(Database::in_memory().await.unwrap());
    db.init_schema().await.unwrap();

    let targets = TargetRepository::new(db.clone());
    let policies = PolicyRepository::new(db.clone());
    let attempts = AttemptRepository::new(db.clone());
    let queue = QueueRepository::new(db);
    let resolver = PolicyResolver::from_repositories(&targets, &policies);

    let policy = RetentionPolicy::new("e2e").with_tier(
        Tier::Hourly,
        TierConfig::new(1, TierSchedule::EveryHours { interval: 6 }),
    );
    policies.save(&policy).await.unwrap();

    let owner = Owner::new(
        "db-host-1",
        Credentials {
            host: "localhost".to_string(),
            port: 5432,
            username: "backup".to_string(),
            password: "secret".to_string(),
        },
    )
    .with_default_policy(&policy.id);
    targets.save_owner(&owner).await.unwrap();

    let target = Target::inheriting("orders", "orders_db", Engine::Postgres, &owner.id);
    targets.save_target(&target).await.unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FilesystemStore::new(dir.path()));
    let cancels = Arc::new(CancelRegistry::new());

    let mut executors = ExecutorRegistry::new();
    executors.register(
        Engine::Postgres,
        Arc::new(StaticExecutor::new(b"pg dump payload".to_vec())),
    );

    let evaluator = ScheduleEvaluator::new(
        targets.clone(),
        attempts.clone(),
        queue.clone(),
        resolver.clone(),
    );
    let pool = WorkerPool::new(
        attempts.clone(),
        queue.clone(),
        targets.clone(),
        resolver.clone(),
        executors,
        store.clone(),
        cancels.clone(),
        backhaul::config::WorkerConfig {
            count: 1,
            poll_interval_secs: 1,
            lease_secs: 60,
            execution_timeout_secs: 10,
            upload_timeout_secs: 10,
        },
    );
    let enforcer = RetentionEnforcer::new(
        targets.clone(),
        attempts.clone(),
        resolver,
        store.clone(),
    );
    let admin = AdminService::new(
        targets,
        attempts.clone(),
        queue.clone(),
        store.clone(),
        cancels,
    );

    Pipeline {
        _dir: dir,
        attempts,
        queue,
        store,
        evaluator,
        pool,
        enforcer,
        admin,
        target,
    }
}

#[tokio::test]
async fn test_scheduled_backup_flows_end_to_end() {
    let pipeline = pipeline().await;

    // Tick: the hourly tier has no prior run, so one attempt is scheduled.
    let now = Utc::now();
    let summary = pipeline.evaluator.run_tick(now).await.unwrap();
    assert_eq!(summary.attempts_scheduled, 1);

    // Worker drains the queue and completes the attempt.
    assert!(pipeline.pool.poll_once(now).await.unwrap());
    assert_eq!(pipeline.queue.outstanding_count().await.unwrap(), 0);

    let page = pipeline
        .admin
        .list_history(
            &HistoryFilter::for_target(&pipeline.target.id),
            &PageRequest::Cursor {
                cursor: None,
                limit: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.attempts.len(), 1);
    let first = &page.attempts[0];
    assert_eq!(first.status, AttemptStatus::Completed);
    assert_eq!(first.trigger, TriggerSource::Scheduled);
    let first_key = first.artifact_key.clone().unwrap();
    assert!(pipeline.store.exists(&first_key).await.unwrap());

    // Same instant again: not due, nothing scheduled.
    let summary = pipeline.evaluator.run_tick(now).await.unwrap();
    assert_eq!(summary.attempts_scheduled, 0);

    // Seven hours later the 6h tier is due again.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let later = Utc::now() + chrono::Duration::hours(7);
    let summary = pipeline.evaluator.run_tick(later).await.unwrap();
    assert_eq!(summary.attempts_scheduled, 1);
    assert!(pipeline.pool.poll_once(later).await.unwrap());

    // History is newest first and both runs completed.
    let page = pipeline
        .admin
        .list_history(
            &HistoryFilter::for_target(&pipeline.target.id),
            &PageRequest::Cursor {
                cursor: None,
                limit: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.attempts.len(), 2);
    assert!(page.attempts[0].created_at > page.attempts[1].created_at);
    assert!(page
        .attempts
        .iter()
        .all(|a| a.status == AttemptStatus::Completed));
    let second_key = page.attempts[0].artifact_key.clone().unwrap();

    // Retention with keep_count 1 prunes the older artifact and record.
    let sweep = pipeline.enforcer.enforce_all().await.unwrap();
    assert_eq!(sweep.pruned, 1);
    assert_eq!(sweep.failures, 0);
    assert!(!pipeline.store.exists(&first_key).await.unwrap());
    assert!(pipeline.store.exists(&second_key).await.unwrap());
    assert_eq!(
        pipeline
            .attempts
            .completed_for_pair(&pipeline.target.id, Tier::Hourly)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_manual_trigger_uses_same_path() {
    let pipeline = pipeline().await;

    let attempt_id = pipeline
        .admin
        .trigger_now(&pipeline.target.id, Tier::Hourly)
        .await
        .unwrap();

    // The manual attempt blocks a scheduled one for the same pair.
    let summary = pipeline.evaluator.run_tick(Utc::now()).await.unwrap();
    assert_eq!(summary.attempts_scheduled, 0);

    assert!(pipeline.pool.poll_once(Utc::now()).await.unwrap());
    let attempt = pipeline.attempts.find_by_id(&attempt_id).await.unwrap();
    assert_eq!(attempt.status, AttemptStatus::Completed);
    assert_eq!(attempt.trigger, TriggerSource::Manual);
    assert!(attempt.artifact_key.is_some());
}
