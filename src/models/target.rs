//! Backup targets and the servers that own them

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BackhaulError, Result};

/// Database engine kind
///
/// Determines which dump executor handles a target and the artifact key
/// prefix. Unknown engine strings are a configuration error, not a
/// pass-through, so a typo cannot route to a missing executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgres,
    MySql,
    MariaDb,
    MongoDb,
    Redis,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::MariaDb => "mariadb",
            Self::MongoDb => "mongodb",
            Self::Redis => "redis",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "postgres" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            "mariadb" => Ok(Self::MariaDb),
            "mongodb" => Ok(Self::MongoDb),
            "redis" => Ok(Self::Redis),
            other => Err(BackhaulError::Config(format!("Unknown engine: {}", other))),
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection credentials for a database server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// A server/engine grouping targets that share a host
///
/// Owners carry credentials and a default retention policy that their
/// targets may inherit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    /// Unique owner identifier (UUID string)
    pub id: String,

    /// Display name
    pub name: String,

    /// Server credentials, inheritable by owned targets
    pub credentials: Credentials,

    /// Default retention policy for owned targets
    pub default_policy_id: Option<String>,

    /// Creation timestamp (unix millis)
    pub created_at: i64,
}

impl Owner {
    pub fn new(name: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            credentials,
            default_policy_id: None,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_default_policy(mut self, policy_id: impl Into<String>) -> Self {
        self.default_policy_id = Some(policy_id.into());
        self
    }
}

/// A database to back up
///
/// Credentials and retention policy resolve through the owner when the
/// corresponding `use_owner_*` flag is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Unique target identifier (UUID string)
    pub id: String,

    /// Display name
    pub name: String,

    /// Database name passed to the dump executor
    pub database: String,

    /// Engine kind
    pub engine: Engine,

    /// Owning server, if any
    pub owner_id: Option<String>,

    /// Whether the scheduler considers this target at all
    pub enabled: bool,

    /// Resolve credentials through the owner instead of `credentials`
    pub use_owner_credentials: bool,

    /// Own credentials (used when `use_owner_credentials` is false)
    pub credentials: Option<Credentials>,

    /// Resolve the policy through the owner instead of `policy_id`
    pub use_owner_policy: bool,

    /// Own retention policy (used when `use_owner_policy` is false)
    pub policy_id: Option<String>,

    /// Creation timestamp (unix millis)
    pub created_at: i64,
}

impl Target {
    /// Create an enabled target with its own credentials and policy
    pub fn new(
        name: impl Into<String>,
        database: impl Into<String>,
        engine: Engine,
        credentials: Credentials,
        policy_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            database: database.into(),
            engine,
            owner_id: None,
            enabled: true,
            use_owner_credentials: false,
            credentials: Some(credentials),
            use_owner_policy: false,
            policy_id: Some(policy_id.into()),
            created_at: Utc::now().timestamp_millis(),
        }
    }

    /// Create an enabled target that inherits credentials and policy from an owner
    pub fn inheriting(
        name: impl Into<String>,
        database: impl Into<String>,
        engine: Engine,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            database: database.into(),
            engine,
            owner_id: Some(owner_id.into()),
            enabled: true,
            use_owner_credentials: true,
            credentials: None,
            use_owner_policy: true,
            policy_id: None,
            created_at: Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_round_trip() {
        for engine in [
            Engine::Postgres,
            Engine::MySql,
            Engine::MariaDb,
            Engine::MongoDb,
            Engine::Redis,
        ] {
            assert_eq!(Engine::parse(engine.as_str()).unwrap(), engine);
        }
    }

    #[test]
    fn test_engine_unknown_is_config_error() {
        let err = Engine::parse("oracle").unwrap_err();
        assert!(matches!(err, BackhaulError::Config(_)));
    }

    #[test]
    fn test_inheriting_target_flags() {
        let target = Target::inheriting("orders", "orders_db", Engine::Postgres, "owner-1");
        assert!(target.use_owner_credentials);
        assert!(target.use_owner_policy);
        assert!(target.credentials.is_none());
        assert!(target.policy_id.is_none());
        assert_eq!(target.owner_id.as_deref(), Some("owner-1"));
    }
}
