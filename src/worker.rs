//! Worker pool and cancellation registry
//!
//! A bounded set of tasks polling the durable queue. Each delivery runs the
//! full execution path: idempotency check, guarded claim, fresh credential
//! resolution, dump execution under a timeout and a cancellation watch, gzip
//! plus checksum, upload with its own timeout, and a guarded finalize.
//!
//! Deliveries are always acked, success or failure. There is no worker-level
//! retry; a failed attempt is retried naturally the next time its tier comes
//! due. Redelivery after a lease expiry is harmless because a terminal
//! attempt short-circuits to an ack.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{BackhaulError, Result};
use crate::executor::{DumpError, DumpOutput, DumpRequest, ExecutorRegistry};
use crate::models::{BackupAttempt, BackupJob, Engine, FailureKind};
use crate::repositories::{AttemptRepository, QueueRepository, TargetRepository};
use crate::resolver::PolicyResolver;
use crate::shutdown::ShutdownCoordinator;
use crate::storage::ObjectStore;

/// In-process cancellation registry
///
/// Maps attempt ids to notifiers. A worker registers its attempt before
/// executing; the cancel operation notifies the handle so the execution
/// future is dropped mid-flight.
#[derive(Default)]
pub struct CancelRegistry {
    handles: Mutex<HashMap<String, Arc<Notify>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attempt and return its cancellation handle
    pub fn register(&self, attempt_id: &str) -> Arc<Notify> {
        let mut handles = self.handles.lock();
        handles
            .entry(attempt_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Signal cancellation for an attempt, if a worker is executing it
    ///
    /// notify_one stores a permit, so a signal that races the worker's wait
    /// registration is not lost.
    pub fn cancel(&self, attempt_id: &str) {
        if let Some(handle) = self.handles.lock().get(attempt_id) {
            handle.notify_one();
        }
    }

    /// Drop the handle once the attempt leaves the worker
    pub fn remove(&self, attempt_id: &str) {
        self.handles.lock().remove(attempt_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }
}

impl std::fmt::Debug for CancelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelRegistry")
            .field("registered", &self.handles.lock().len())
            .finish()
    }
}

/// What the execution phase produced
enum ExecOutcome {
    Dump(DumpOutput),
    Failed(DumpError),
    TimedOut,
    Cancelled,
}

/// Bounded pool of queue consumers
#[derive(Clone)]
pub struct WorkerPool {
    attempts: AttemptRepository,
    queue: QueueRepository,
    targets: TargetRepository,
    resolver: Arc<PolicyResolver>,
    executors: ExecutorRegistry,
    store: Arc<dyn ObjectStore>,
    cancels: Arc<CancelRegistry>,
    config: WorkerConfig,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        attempts: AttemptRepository,
        queue: QueueRepository,
        targets: TargetRepository,
        resolver: Arc<PolicyResolver>,
        executors: ExecutorRegistry,
        store: Arc<dyn ObjectStore>,
        cancels: Arc<CancelRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            attempts,
            queue,
            targets,
            resolver,
            executors,
            store,
            cancels,
            config,
        }
    }

    /// Poll the queue once; returns whether a delivery was processed
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<bool> {
        let lease_millis = self.config.lease_secs as i64 * 1000;
        let Some(job) = self.queue.dequeue(now.timestamp_millis(), lease_millis).await? else {
            return Ok(false);
        };
        self.process_delivery(&job).await?;
        Ok(true)
    }

    /// Run one delivery end to end; always acks
    pub async fn process_delivery(&self, job: &BackupJob) -> Result<()> {
        debug!(
            job_id = job.id,
            attempt_id = %job.attempt_id,
            delivery = job.delivery_count,
            "Processing delivery"
        );

        let attempt = match self.attempts.find_by_id(&job.attempt_id).await {
            Ok(attempt) => attempt,
            // The record was deleted out from under the job; nothing to do.
            Err(BackhaulError::NotFound(_)) => {
                warn!(attempt_id = %job.attempt_id, "Job references a deleted attempt");
                return self.queue.ack(job.id).await;
            }
            Err(e) => return Err(e),
        };

        // Idempotency guard: a redelivered job whose attempt already finished
        // is discarded without side effects.
        if attempt.status.is_terminal() {
            debug!(
                attempt_id = %attempt.id,
                status = %attempt.status,
                "Attempt already terminal, discarding redelivery"
            );
            return self.queue.ack(job.id).await;
        }

        let now = Utc::now();
        if !self
            .attempts
            .mark_in_progress(&attempt.id, now.timestamp_millis())
            .await?
        {
            // Another worker holds the attempt; this delivery is stale.
            debug!(attempt_id = %attempt.id, "Lost the claim race, discarding delivery");
            return self.queue.ack(job.id).await;
        }

        if let Err(e) = self.execute_attempt(&attempt, now).await {
            // Infrastructure failure after the claim; record it so the
            // attempt does not dangle in_progress.
            error!(attempt_id = %attempt.id, error = %e, "Attempt execution errored");
            self.attempts
                .mark_failed(
                    &attempt.id,
                    Utc::now().timestamp_millis(),
                    FailureKind::Other,
                    &e.to_string(),
                )
                .await?;
        }

        self.cancels.remove(&attempt.id);
        self.queue.ack(job.id).await
    }

    /// Resolve, execute, compress, upload, finalize
    async fn execute_attempt(&self, attempt: &BackupAttempt, now: DateTime<Utc>) -> Result<()> {
        let target = self.targets.find_target(&attempt.target_id).await?;
        let credentials = match self.resolver.resolve_credentials(&target).await {
            Ok(resolved) => resolved.value,
            Err(e) => {
                warn!(attempt_id = %attempt.id, error = %e, "Credential resolution failed");
                self.attempts
                    .mark_failed(
                        &attempt.id,
                        Utc::now().timestamp_millis(),
                        FailureKind::Other,
                        &e.to_string(),
                    )
                    .await?;
                return Ok(());
            }
        };

        let executor = match self.executors.get(target.engine) {
            Ok(executor) => executor,
            Err(e) => {
                self.attempts
                    .mark_failed(
                        &attempt.id,
                        Utc::now().timestamp_millis(),
                        e.kind,
                        &e.message,
                    )
                    .await?;
                return Ok(());
            }
        };

        let request = DumpRequest {
            engine: target.engine,
            database: target.database.clone(),
            credentials,
        };
        let cancel = self.cancels.register(&attempt.id);
        let exec_timeout = Duration::from_secs(self.config.execution_timeout_secs);

        let outcome = tokio::select! {
            _ = cancel.notified() => ExecOutcome::Cancelled,
            result = tokio::time::timeout(exec_timeout, executor.execute(&request)) => {
                match result {
                    Err(_) => ExecOutcome::TimedOut,
                    Ok(Err(e)) => ExecOutcome::Failed(e),
                    Ok(Ok(output)) => ExecOutcome::Dump(output),
                }
            }
        };

        match outcome {
            ExecOutcome::Cancelled => {
                info!(attempt_id = %attempt.id, "Execution cancelled mid-flight");
                // The cancel operation performs the status transition; the
                // guarded update makes a second one here a harmless no-op.
                self.attempts
                    .mark_cancelled(&attempt.id, Utc::now().timestamp_millis())
                    .await?;
                Ok(())
            }
            ExecOutcome::TimedOut => {
                let message = format!(
                    "Execution exceeded {} seconds",
                    self.config.execution_timeout_secs
                );
                warn!(attempt_id = %attempt.id, "{}", message);
                self.attempts
                    .mark_failed(
                        &attempt.id,
                        Utc::now().timestamp_millis(),
                        FailureKind::Timeout,
                        &message,
                    )
                    .await?;
                Ok(())
            }
            ExecOutcome::Failed(e) => {
                warn!(attempt_id = %attempt.id, kind = %e.kind, error = %e.message, "Dump failed");
                self.attempts
                    .mark_failed(
                        &attempt.id,
                        Utc::now().timestamp_millis(),
                        e.kind,
                        &e.message,
                    )
                    .await?;
                Ok(())
            }
            ExecOutcome::Dump(output) => self.store_artifact(attempt, &target.id, output, now).await,
        }
    }

    /// Compress, checksum, upload, and finalize the attempt
    ///
    /// The dump stream is buffered fully in memory before compression;
    /// `ObjectStore::put` takes a single payload, so peak memory per worker
    /// is on the order of the uncompressed dump size.
    async fn store_artifact(
        &self,
        attempt: &BackupAttempt,
        target_id: &str,
        mut output: DumpOutput,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut raw = Vec::new();
        if let Err(e) = output.stream.read_to_end(&mut raw).await {
            self.attempts
                .mark_failed(
                    &attempt.id,
                    Utc::now().timestamp_millis(),
                    FailureKind::Other,
                    &format!("Failed to read dump stream: {}", e),
                )
                .await?;
            return Ok(());
        }

        let compressed = gzip(&raw)?;
        let checksum = format!("{:x}", Sha256::digest(&compressed));
        let size = compressed.len() as i64;
        let key = artifact_key(attempt.engine, target_id, now, &output.format);

        let upload_timeout = Duration::from_secs(self.config.upload_timeout_secs);
        let uploaded =
            tokio::time::timeout(upload_timeout, self.store.put(&key, Bytes::from(compressed)))
                .await;
        match uploaded {
            Err(_) => {
                let message = format!(
                    "Upload exceeded {} seconds",
                    self.config.upload_timeout_secs
                );
                warn!(attempt_id = %attempt.id, key = %key, "{}", message);
                self.attempts
                    .mark_failed(
                        &attempt.id,
                        Utc::now().timestamp_millis(),
                        FailureKind::Timeout,
                        &message,
                    )
                    .await?;
                return Ok(());
            }
            Ok(Err(e)) => {
                warn!(attempt_id = %attempt.id, key = %key, error = %e, "Upload failed");
                self.attempts
                    .mark_failed(
                        &attempt.id,
                        Utc::now().timestamp_millis(),
                        FailureKind::StorageWrite,
                        &e.to_string(),
                    )
                    .await?;
                return Ok(());
            }
            Ok(Ok(())) => {}
        }

        let finalized = self
            .attempts
            .mark_completed(&attempt.id, Utc::now().timestamp_millis(), &key, size, &checksum)
            .await?;
        if !finalized {
            // The attempt was cancelled between execution and finalize; the
            // uploaded object must not outlive its record.
            warn!(attempt_id = %attempt.id, key = %key, "Finalize lost, removing orphan object");
            if let Err(e) = self.store.delete(&key).await {
                error!(key = %key, error = %e, "Failed to remove orphan object");
            }
            return Ok(());
        }

        info!(
            attempt_id = %attempt.id,
            key = %key,
            size,
            "Backup completed"
        );
        Ok(())
    }

    /// Spawn the configured number of polling workers
    pub fn spawn(
        self: Arc<Self>,
        shutdown: ShutdownCoordinator,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.count)
            .map(|worker_id| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let poll_interval = Duration::from_secs(pool.config.poll_interval_secs);
                    loop {
                        if shutdown.is_shutdown_requested() {
                            debug!(worker_id, "Worker stopping");
                            break;
                        }
                        match pool.poll_once(Utc::now()).await {
                            Ok(true) => {}
                            Ok(false) => {
                                tokio::select! {
                                    _ = shutdown.wait_for_shutdown() => {}
                                    _ = tokio::time::sleep(poll_interval) => {}
                                }
                            }
                            Err(e) => {
                                error!(worker_id, error = %e, "Worker poll failed");
                                tokio::select! {
                                    _ = shutdown.wait_for_shutdown() => {}
                                    _ = tokio::time::sleep(poll_interval) => {}
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.config.count)
            .finish()
    }
}

/// Deterministic artifact key: `{engine}/{target_id}/{timestamp}.{format}.gz`
fn artifact_key(engine: Engine, target_id: &str, now: DateTime<Utc>, format: &str) -> String {
    format!(
        "{}/{}/{}.{}.gz",
        engine,
        target_id,
        now.format("%Y%m%dT%H%M%S%3f"),
        format
    )
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| BackhaulError::Execution(format!("Compression failed: {}", e)))
}
