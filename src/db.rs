//! Database management and schema initialization
//!
//! Provides the SQLite connection pool and the embedded schema for targets,
//! owners, policies, the attempt history, and the durable job queue.

use crate::error::{BackhaulError, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Type alias for the database connection pool
pub type DatabasePool = SqlitePool;

/// Embedded schema, applied idempotently at startup
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS owners (
        id                TEXT PRIMARY KEY,
        name              TEXT NOT NULL,
        credentials_json  TEXT NOT NULL,
        default_policy_id TEXT,
        created_at        INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS targets (
        id                    TEXT PRIMARY KEY,
        name                  TEXT NOT NULL,
        database_name         TEXT NOT NULL,
        engine                TEXT NOT NULL,
        owner_id              TEXT,
        enabled               INTEGER NOT NULL DEFAULT 1,
        use_owner_credentials INTEGER NOT NULL DEFAULT 0,
        credentials_json      TEXT,
        use_owner_policy      INTEGER NOT NULL DEFAULT 0,
        policy_id             TEXT,
        created_at            INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS policies (
        id         TEXT PRIMARY KEY,
        name       TEXT NOT NULL,
        tiers_json TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS attempts (
        id                TEXT PRIMARY KEY,
        target_id         TEXT NOT NULL,
        tier              TEXT NOT NULL,
        status            TEXT NOT NULL,
        trigger_source    TEXT NOT NULL,
        engine            TEXT NOT NULL,
        created_at        INTEGER NOT NULL,
        started_at        INTEGER,
        completed_at      INTEGER,
        artifact_key      TEXT,
        artifact_size     INTEGER,
        artifact_checksum TEXT,
        error_kind        TEXT,
        error_message     TEXT,
        sort_key          TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_attempts_sort_key ON attempts (sort_key)",
    "CREATE INDEX IF NOT EXISTS idx_attempts_target_tier_status
        ON attempts (target_id, tier, status)",
    "CREATE TABLE IF NOT EXISTS jobs (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        attempt_id       TEXT NOT NULL,
        target_id        TEXT NOT NULL,
        tier             TEXT NOT NULL,
        trigger_source   TEXT NOT NULL,
        enqueued_at      INTEGER NOT NULL,
        available_at     INTEGER NOT NULL,
        lease_expires_at INTEGER,
        delivery_count   INTEGER NOT NULL DEFAULT 0,
        acked            INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_pending ON jobs (acked, available_at)",
];

/// Database connection wrapper
#[derive(Clone, Debug)]
pub struct Database {
    pub(crate) pool: Arc<DatabasePool>,
}

impl Database {
    /// Create a new database connection
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        Self::with_max_connections(database_path, 5).await
    }

    /// Create a new database connection with custom pool size
    pub async fn with_max_connections<P: AsRef<Path>>(
        database_path: P,
        max_connections: u32,
    ) -> Result<Self> {
        let path = database_path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| BackhaulError::Database("Invalid database path".to_string()))?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    BackhaulError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let database_url = format!("sqlite:{}?mode=rwc", path_str);
        debug!(url = %database_url, "Connecting to database");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&database_url)
            .await
            .map_err(|e| {
                BackhaulError::Database(format!("Failed to connect to database: {}", e))
            })?;

        info!(path = %path.display(), "Database connection established");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Open an in-memory database (used by tests and the one-shot CLI modes)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                BackhaulError::Database(format!("Failed to open in-memory database: {}", e))
            })?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Apply the embedded schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(self.pool.as_ref())
                .await
                .map_err(|e| {
                    BackhaulError::Database(format!("Schema initialization failed: {}", e))
                })?;
        }

        info!("Database schema initialized");
        Ok(())
    }

    /// Perform a health check by running a simple query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| BackhaulError::Database(format!("Health check failed: {}", e)))?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }

    /// Initialize the database file with the embedded schema
    pub async fn initialize<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let db = Self::new(database_path).await?;
        db.init_schema().await?;
        Ok(db)
    }
}
