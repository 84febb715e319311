//! Test-support executors
//!
//! Deterministic executors used by the crate's own tests and available to
//! downstream integration tests that need a worker pool without a real
//! database to dump.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{DumpError, DumpExecutor, DumpOutput, DumpRequest};
use crate::models::FailureKind;

/// Returns a fixed payload and counts invocations
#[derive(Debug, Default)]
pub struct StaticExecutor {
    payload: Vec<u8>,
    calls: Arc<AtomicUsize>,
}

impl StaticExecutor {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle for asserting how many executions actually ran
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl DumpExecutor for StaticExecutor {
    async fn execute(&self, _request: &DumpRequest) -> Result<DumpOutput, DumpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DumpOutput::from_bytes(self.payload.clone(), "sql"))
    }
}

/// Always fails with the given kind
#[derive(Debug)]
pub struct FailingExecutor {
    kind: FailureKind,
    message: String,
}

impl FailingExecutor {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[async_trait]
impl DumpExecutor for FailingExecutor {
    async fn execute(&self, _request: &DumpRequest) -> Result<DumpOutput, DumpError> {
        Err(DumpError::new(self.kind, self.message.clone()))
    }
}

/// Sleeps for the configured duration before returning, for timeout and
/// cancellation tests
#[derive(Debug)]
pub struct SlowExecutor {
    delay: Duration,
}

impl SlowExecutor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl DumpExecutor for SlowExecutor {
    async fn execute(&self, _request: &DumpRequest) -> Result<DumpOutput, DumpError> {
        tokio::time::sleep(self.delay).await;
        Ok(DumpOutput::from_bytes(b"slow dump".to_vec(), "sql"))
    }
}
