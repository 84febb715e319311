//! # Backhaul - Tiered Database Backup Scheduler
//!
//! Backhaul schedules, executes, and retains database backups across
//! independent retention tiers (hourly through yearly). A single process
//! runs the whole pipeline over a SQLite state store:
//!
//! - **Tier Clock** - pure per-tier due-ness evaluation
//! - **Schedule Evaluator** - periodic tick that turns due tiers into
//!   pending attempts and queued jobs
//! - **Durable Queue** - at-least-once delivery with lease-based
//!   visibility timeouts
//! - **Worker Pool** - bounded consumers running pluggable dump executors,
//!   compressing and checksumming artifacts into object storage
//! - **History Store** - append-only attempt records with newest-first
//!   cursor pagination
//! - **Retention Enforcer** - per-tier keep counts, object-first deletion
//!
//! State lives in `~/.backhaul` by default; artifacts go to any
//! [`storage::ObjectStore`] implementation.

// Core modules
pub mod config;
pub mod db;
pub mod executor;
pub mod models;
pub mod repositories;
pub mod resolver;
pub mod retention;
pub mod scheduler;
pub mod services;
pub mod shutdown;
pub mod storage;
pub mod tier;
pub mod worker;

// Error types and utilities
mod error;

// Re-export key types for convenience
pub use error::{BackhaulError, Result};

pub use config::{BackhaulConfig, ConfigLoader};
pub use db::Database;
pub use shutdown::ShutdownCoordinator;

pub use models::{
    AttemptStatus, BackupAttempt, BackupJob, Credentials, Engine, FailureKind, Owner,
    RetentionPolicy, Target, Tier, TierConfig, TierSchedule, TriggerSource,
};

pub use repositories::{
    AttemptRepository, HistoryFilter, HistoryPage, PageRequest, PolicyRepository, QueueRepository,
    TargetRepository,
};

pub use executor::{CommandExecutor, DumpExecutor, DumpOutput, DumpRequest, ExecutorRegistry};
pub use resolver::{PolicyResolver, ResolutionSource, Resolved, ResolvedTarget};
pub use retention::RetentionEnforcer;
pub use scheduler::{ReapTimeouts, ScheduleEvaluator, TickSummary};
pub use services::{AdminService, AlertService, TargetAlert, ALERT_THRESHOLD};
pub use storage::{FilesystemStore, ObjectStore};
pub use tier::{is_due, DueStatus};
pub use worker::{CancelRegistry, WorkerPool};
