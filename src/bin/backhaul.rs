//! Backhaul CLI - tiered database backup scheduler
//!
//! Main entry point for the backhaul command-line tool.

use std::path::PathBuf;
use std::sync::Arc;

use backhaul::repositories::{HistoryFilter, PageRequest};
use backhaul::{
    AdminService, AlertService, AttemptRepository, BackhaulConfig, CancelRegistry, ConfigLoader,
    Database, ExecutorRegistry, FilesystemStore, PolicyRepository, PolicyResolver,
    QueueRepository, RetentionEnforcer, ScheduleEvaluator, ShutdownCoordinator, TargetRepository,
    Tier, WorkerPool,
};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "backhaul")]
#[command(about = "Backhaul - tiered database backup scheduler", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Config file path (defaults to ~/.backhaul/backhaul.toml)
    #[arg(short, long, global = true, env = "BACKHAUL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backup daemon (evaluator, workers, watchdog, retention)
    Run,

    /// Trigger a backup immediately for a target and tier
    Trigger {
        /// Target ID
        target_id: String,
        /// Tier: hourly, daily, weekly, monthly, yearly
        tier: String,
    },

    /// List backup history, newest first
    History {
        /// Filter by target ID
        #[arg(short, long)]
        target: Option<String>,
        /// Filter by tier
        #[arg(long)]
        tier: Option<String>,
        /// Filter by status: pending, in_progress, completed, failed, cancelled
        #[arg(short, long)]
        status: Option<String>,
        /// Page size
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
        /// Continuation cursor from a previous page
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Run a one-shot retention sweep
    Retention,

    /// List targets with consecutive-failure alerts
    Alerts,
}

/// Everything the subcommands need, wired over one database handle
struct Context {
    db: Arc<Database>,
    targets: TargetRepository,
    attempts: AttemptRepository,
    queue: QueueRepository,
    resolver: Arc<PolicyResolver>,
    store: Arc<FilesystemStore>,
    cancels: Arc<CancelRegistry>,
    config: BackhaulConfig,
}

impl Context {
    async fn open(config: BackhaulConfig) -> anyhow::Result<Self> {
        let db = Arc::new(
            Database::with_max_connections(
                config.database_path(),
                config.database.max_connections,
            )
            .await?,
        );
        db.init_schema().await?;

        let targets = TargetRepository::new(db.clone());
        let policies = PolicyRepository::new(db.clone());
        let attempts = AttemptRepository::new(db.clone());
        let queue = QueueRepository::new(db.clone());
        let resolver = PolicyResolver::from_repositories(&targets, &policies);
        let store = Arc::new(FilesystemStore::new(config.storage_root()));
        let cancels = Arc::new(CancelRegistry::new());

        Ok(Self {
            db,
            targets,
            attempts,
            queue,
            resolver,
            store,
            cancels,
            config,
        })
    }

    fn admin(&self) -> AdminService {
        AdminService::new(
            self.targets.clone(),
            self.attempts.clone(),
            self.queue.clone(),
            self.store.clone(),
            self.cancels.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().await?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run => run_daemon(config).await,
        Commands::Trigger { target_id, tier } => {
            let context = Context::open(config).await?;
            let tier = Tier::parse(&tier)?;
            let attempt_id = context.admin().trigger_now(&target_id, tier).await?;
            println!("Triggered attempt {}", attempt_id);
            context.db.close().await;
            Ok(())
        }
        Commands::History {
            target,
            tier,
            status,
            limit,
            cursor,
        } => {
            let context = Context::open(config).await?;
            let filter = HistoryFilter {
                target_id: target,
                tier: tier.as_deref().map(Tier::parse).transpose()?,
                status: status
                    .as_deref()
                    .map(backhaul::AttemptStatus::parse)
                    .transpose()?,
                ..Default::default()
            };
            let page = context
                .admin()
                .list_history(&filter, &PageRequest::Cursor { cursor, limit })
                .await?;

            println!(
                "{:<36} {:<8} {:<12} {:<10} {}",
                "ATTEMPT", "TIER", "STATUS", "TRIGGER", "ARTIFACT"
            );
            for attempt in &page.attempts {
                println!(
                    "{:<36} {:<8} {:<12} {:<10} {}",
                    attempt.id,
                    attempt.tier,
                    attempt.status,
                    attempt.trigger,
                    attempt.artifact_key.as_deref().unwrap_or("-")
                );
            }
            if let Some(next) = page.next_cursor {
                println!("\nMore results: --cursor {}", next);
            }
            context.db.close().await;
            Ok(())
        }
        Commands::Retention => {
            let context = Context::open(config).await?;
            let enforcer = RetentionEnforcer::new(
                context.targets.clone(),
                context.attempts.clone(),
                context.resolver.clone(),
                context.store.clone(),
            );
            let summary = enforcer.enforce_all().await?;
            println!(
                "Swept {} targets: pruned {}, deferred {}",
                summary.targets_swept, summary.pruned, summary.failures
            );
            context.db.close().await;
            Ok(())
        }
        Commands::Alerts => {
            let context = Context::open(config).await?;
            let alerts = AlertService::new(context.targets.clone(), context.attempts.clone())
                .alerting_targets()
                .await?;
            if alerts.is_empty() {
                println!("No alerting targets");
            } else {
                for alert in alerts {
                    println!(
                        "{} ({}): {} consecutive failures",
                        alert.target_name, alert.target_id, alert.consecutive_failures
                    );
                }
            }
            context.db.close().await;
            Ok(())
        }
    }
}

async fn run_daemon(config: BackhaulConfig) -> anyhow::Result<()> {
    let context = Context::open(config).await?;
    let config = &context.config;

    let shutdown = ShutdownCoordinator::new();
    let _signal_handler = shutdown.install_signal_handlers();

    let evaluator = Arc::new(ScheduleEvaluator::new(
        context.targets.clone(),
        context.attempts.clone(),
        context.queue.clone(),
        context.resolver.clone(),
    ));
    let timeouts = backhaul::ReapTimeouts {
        pending: std::time::Duration::from_secs(config.scheduler.pending_timeout_secs),
        in_progress: std::time::Duration::from_secs(config.scheduler.in_progress_timeout_secs),
    };
    let evaluator_handle =
        evaluator.spawn(config.tick_interval(), timeouts, shutdown.clone());

    let pool = Arc::new(WorkerPool::new(
        context.attempts.clone(),
        context.queue.clone(),
        context.targets.clone(),
        context.resolver.clone(),
        ExecutorRegistry::with_command_executors(),
        context.store.clone(),
        context.cancels.clone(),
        config.workers.clone(),
    ));
    let worker_handles = pool.spawn(shutdown.clone());

    let enforcer = Arc::new(RetentionEnforcer::new(
        context.targets.clone(),
        context.attempts.clone(),
        context.resolver.clone(),
        context.store.clone(),
    ));
    let retention_handle = enforcer.spawn(config.sweep_interval(), shutdown.clone());

    info!(
        workers = config.workers.count,
        tick_secs = config.scheduler.tick_interval_secs,
        "Backhaul daemon started"
    );

    shutdown.wait_for_shutdown().await;

    evaluator_handle.await?;
    for handle in worker_handles {
        handle.await?;
    }
    retention_handle.await?;

    context.db.close().await;
    info!("Backhaul daemon stopped");
    Ok(())
}
