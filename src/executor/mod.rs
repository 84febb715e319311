//! Dump executor contract
//!
//! The worker pool is engine-agnostic: it hands an executor the connection
//! parameters and receives a byte stream plus a format extension. Engine
//! specifics (pg_dump vs mysqldump argument shapes) live behind this seam.

mod command;
pub mod stub;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::error::BackhaulError;
use crate::models::{Credentials, Engine, FailureKind};

pub use command::CommandExecutor;

/// Connection parameters for one dump execution
#[derive(Debug, Clone)]
pub struct DumpRequest {
    pub engine: Engine,
    pub database: String,
    pub credentials: Credentials,
}

/// Result of a dump execution: a byte stream and its format extension
pub struct DumpOutput {
    pub stream: Box<dyn AsyncRead + Send + Unpin>,
    /// File extension without a leading dot, e.g. "sql" or "archive"
    pub format: String,
}

impl DumpOutput {
    pub fn from_bytes(data: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            stream: Box::new(std::io::Cursor::new(data)),
            format: format.into(),
        }
    }
}

impl std::fmt::Debug for DumpOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpOutput")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// A classified executor failure
///
/// Executors know why they failed; carrying the kind here lets the worker
/// record it on the attempt without sniffing message strings.
#[derive(Debug, Clone)]
pub struct DumpError {
    pub kind: FailureKind,
    pub message: String,
}

impl DumpError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DumpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for DumpError {}

impl From<DumpError> for BackhaulError {
    fn from(err: DumpError) -> Self {
        BackhaulError::Execution(err.to_string())
    }
}

/// Pluggable dump executor
#[async_trait]
pub trait DumpExecutor: Send + Sync {
    async fn execute(&self, request: &DumpRequest) -> Result<DumpOutput, DumpError>;
}

/// Maps engine kinds to their executors
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Engine, Arc<dyn DumpExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the command executor wired for every known engine
    pub fn with_command_executors() -> Self {
        let mut registry = Self::new();
        for engine in [
            Engine::Postgres,
            Engine::MySql,
            Engine::MariaDb,
            Engine::MongoDb,
            Engine::Redis,
        ] {
            registry.register(engine, Arc::new(CommandExecutor::for_engine(engine)));
        }
        registry
    }

    pub fn register(&mut self, engine: Engine, executor: Arc<dyn DumpExecutor>) {
        self.executors.insert(engine, executor);
    }

    pub fn get(&self, engine: Engine) -> Result<Arc<dyn DumpExecutor>, DumpError> {
        self.executors.get(&engine).cloned().ok_or_else(|| {
            DumpError::new(
                FailureKind::ToolMissing,
                format!("No executor registered for engine {}", engine),
            )
        })
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("engines", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}
