//! Command-line dump executor
//!
//! Shells out to the engine-native dump tool and captures stdout as the
//! artifact stream. Exit status and stderr are mapped to the failure
//! taxonomy so the worker can record a classified kind.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{DumpError, DumpExecutor, DumpOutput, DumpRequest};
use crate::models::{Engine, FailureKind};

/// Executes backups by invoking the engine's dump tool
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    engine: Engine,
}

impl CommandExecutor {
    pub fn for_engine(engine: Engine) -> Self {
        Self { engine }
    }

    /// The dump tool and artifact format for this engine
    fn tool(&self) -> (&'static str, &'static str) {
        match self.engine {
            Engine::Postgres => ("pg_dump", "sql"),
            Engine::MySql | Engine::MariaDb => ("mysqldump", "sql"),
            Engine::MongoDb => ("mongodump", "archive"),
            Engine::Redis => ("redis-cli", "rdb"),
        }
    }

    fn build_command(&self, request: &DumpRequest) -> Command {
        let (program, _) = self.tool();
        let creds = &request.credentials;
        let mut cmd = Command::new(program);

        match self.engine {
            Engine::Postgres => {
                cmd.arg("--host")
                    .arg(&creds.host)
                    .arg("--port")
                    .arg(creds.port.to_string())
                    .arg("--username")
                    .arg(&creds.username)
                    .arg("--dbname")
                    .arg(&request.database)
                    .env("PGPASSWORD", &creds.password);
            }
            Engine::MySql | Engine::MariaDb => {
                cmd.arg("--host")
                    .arg(&creds.host)
                    .arg("--port")
                    .arg(creds.port.to_string())
                    .arg("--user")
                    .arg(&creds.username)
                    .arg(&request.database)
                    .env("MYSQL_PWD", &creds.password);
            }
            Engine::MongoDb => {
                cmd.arg("--host")
                    .arg(&creds.host)
                    .arg("--port")
                    .arg(creds.port.to_string())
                    .arg("--username")
                    .arg(&creds.username)
                    .arg("--password")
                    .arg(&creds.password)
                    .arg("--db")
                    .arg(&request.database)
                    .arg("--archive");
            }
            Engine::Redis => {
                cmd.arg("-h")
                    .arg(&creds.host)
                    .arg("-p")
                    .arg(creds.port.to_string())
                    .arg("--rdb")
                    .arg("-")
                    .env("REDISCLI_AUTH", &creds.password);
            }
        }

        cmd
    }
}

#[async_trait]
impl DumpExecutor for CommandExecutor {
    async fn execute(&self, request: &DumpRequest) -> Result<DumpOutput, DumpError> {
        let (program, format) = self.tool();
        debug!(engine = %self.engine, database = %request.database, tool = program, "Running dump tool");

        let output = self.build_command(request).output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DumpError::new(
                    FailureKind::ToolMissing,
                    format!("{} not found on PATH", program),
                )
            } else {
                DumpError::new(FailureKind::Other, format!("Failed to run {}: {}", program, e))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(program, &stderr));
        }

        if output.stdout.is_empty() {
            return Err(DumpError::new(
                FailureKind::EmptyResult,
                format!("{} produced no output for {}", program, request.database),
            ));
        }

        Ok(DumpOutput::from_bytes(output.stdout, format))
    }
}

/// Map a dump tool's stderr to the failure taxonomy
fn classify_failure(program: &str, stderr: &str) -> DumpError {
    let lower = stderr.to_lowercase();
    let kind = if lower.contains("password")
        || lower.contains("authentication")
        || lower.contains("access denied")
        || lower.contains("permission denied")
    {
        FailureKind::Auth
    } else if lower.contains("could not connect")
        || lower.contains("connection refused")
        || lower.contains("no route to host")
        || lower.contains("unknown host")
        || lower.contains("timed out")
    {
        FailureKind::Connection
    } else {
        FailureKind::Other
    };

    let summary = stderr.lines().next().unwrap_or("unknown error").trim();
    DumpError::new(kind, format!("{} failed: {}", program, summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_failures() {
        let err = classify_failure("pg_dump", "FATAL: password authentication failed");
        assert_eq!(err.kind, FailureKind::Auth);

        let err = classify_failure("mysqldump", "Access denied for user 'backup'@'%'");
        assert_eq!(err.kind, FailureKind::Auth);
    }

    #[test]
    fn test_classify_connection_failures() {
        let err = classify_failure("pg_dump", "could not connect to server: Connection refused");
        assert_eq!(err.kind, FailureKind::Connection);
    }

    #[test]
    fn test_classify_unknown_failures() {
        let err = classify_failure("pg_dump", "unexpected relation layout");
        assert_eq!(err.kind, FailureKind::Other);
        assert!(err.message.contains("pg_dump failed"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_tool_missing() {
        // Point the executor at an engine whose tool will not exist by
        // spawning with an unlikely PATH entry.
        let executor = CommandExecutor {
            engine: Engine::Postgres,
        };
        let request = DumpRequest {
            engine: Engine::Postgres,
            database: "db".to_string(),
            credentials: crate::models::Credentials {
                host: "localhost".to_string(),
                port: 5432,
                username: "u".to_string(),
                password: "p".to_string(),
            },
        };

        // Only assert the classification when pg_dump is genuinely absent;
        // on hosts with postgres installed this would attempt a connection.
        if which_missing("pg_dump") {
            let err = executor.execute(&request).await.unwrap_err();
            assert_eq!(err.kind, FailureKind::ToolMissing);
        }
    }

    fn which_missing(program: &str) -> bool {
        std::env::var_os("PATH")
            .map(|paths| {
                !std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
            })
            .unwrap_or(true)
    }
}
