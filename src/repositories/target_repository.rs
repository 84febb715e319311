//! Target and owner repository
//!
//! Read models for the administrative layer's targets and owners. The core
//! only writes through the seed helpers; create/update/delete belongs to
//! the administrative layer.

use crate::db::Database;
use crate::error::{BackhaulError, Result};
use crate::models::{Credentials, Engine, Owner, Target};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;

/// Repository for target and owner read models
#[derive(Clone, Debug)]
pub struct TargetRepository {
    db: Arc<Database>,
}

impl TargetRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Save a target (seed/admin helper)
    pub async fn save_target(&self, target: &Target) -> Result<()> {
        let credentials_json = target
            .credentials
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT OR REPLACE INTO targets
             (id, name, database_name, engine, owner_id, enabled,
              use_owner_credentials, credentials_json, use_owner_policy, policy_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&target.id)
        .bind(&target.name)
        .bind(&target.database)
        .bind(target.engine.as_str())
        .bind(&target.owner_id)
        .bind(target.enabled as i64)
        .bind(target.use_owner_credentials as i64)
        .bind(credentials_json)
        .bind(target.use_owner_policy as i64)
        .bind(&target.policy_id)
        .bind(target.created_at)
        .execute(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to save target: {}", e)))?;

        Ok(())
    }

    /// Save an owner (seed/admin helper)
    pub async fn save_owner(&self, owner: &Owner) -> Result<()> {
        let credentials_json = serde_json::to_string(&owner.credentials)?;

        sqlx::query(
            "INSERT OR REPLACE INTO owners
             (id, name, credentials_json, default_policy_id, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&owner.id)
        .bind(&owner.name)
        .bind(credentials_json)
        .bind(&owner.default_policy_id)
        .bind(owner.created_at)
        .execute(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to save owner: {}", e)))?;

        Ok(())
    }

    /// Load a target by ID
    pub async fn find_target(&self, id: &str) -> Result<Target> {
        let row = sqlx::query("SELECT * FROM targets WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| BackhaulError::Database(format!("Failed to load target: {}", e)))?
            .ok_or_else(|| BackhaulError::NotFound(format!("Target not found: {}", id)))?;

        row_to_target(&row)
    }

    /// Load an owner by ID
    pub async fn find_owner(&self, id: &str) -> Result<Owner> {
        let row = sqlx::query("SELECT * FROM owners WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| BackhaulError::Database(format!("Failed to load owner: {}", e)))?
            .ok_or_else(|| BackhaulError::NotFound(format!("Owner not found: {}", id)))?;

        row_to_owner(&row)
    }

    /// All enabled targets, the evaluator's working set
    pub async fn list_enabled(&self) -> Result<Vec<Target>> {
        let rows = sqlx::query("SELECT * FROM targets WHERE enabled = 1 ORDER BY created_at")
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| BackhaulError::Database(format!("Failed to list targets: {}", e)))?;

        rows.iter().map(row_to_target).collect()
    }
}

fn row_to_target(row: &SqliteRow) -> Result<Target> {
    let engine: String = row.get("engine");
    let enabled: i64 = row.get("enabled");
    let use_owner_credentials: i64 = row.get("use_owner_credentials");
    let use_owner_policy: i64 = row.get("use_owner_policy");
    let credentials_json: Option<String> = row.get("credentials_json");
    let credentials: Option<Credentials> = credentials_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(Target {
        id: row.get("id"),
        name: row.get("name"),
        database: row.get("database_name"),
        engine: Engine::parse(&engine)?,
        owner_id: row.get("owner_id"),
        enabled: enabled != 0,
        use_owner_credentials: use_owner_credentials != 0,
        credentials,
        use_owner_policy: use_owner_policy != 0,
        policy_id: row.get("policy_id"),
        created_at: row.get("created_at"),
    })
}

fn row_to_owner(row: &SqliteRow) -> Result<Owner> {
    let credentials_json: String = row.get("credentials_json");
    let credentials: Credentials = serde_json::from_str(&credentials_json)?;

    Ok(Owner {
        id: row.get("id"),
        name: row.get("name"),
        credentials,
        default_policy_id: row.get("default_policy_id"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            host: "db.internal".to_string(),
            port: 5432,
            username: "backup".to_string(),
            password: "secret".to_string(),
        }
    }

    async fn setup() -> TargetRepository {
        let db = Database::in_memory().await.unwrap();
        db.init_schema().await.unwrap();
        TargetRepository::new(Arc::new(db))
    }

    #[tokio::test]
    async fn test_save_and_find_target() {
        let repo = setup().await;
        let target = Target::new("orders", "orders_db", Engine::Postgres, credentials(), "p1");
        repo.save_target(&target).await.unwrap();

        let loaded = repo.find_target(&target.id).await.unwrap();
        assert_eq!(loaded.database, "orders_db");
        assert_eq!(loaded.engine, Engine::Postgres);
        assert_eq!(loaded.credentials, target.credentials);
        assert_eq!(loaded.policy_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_save_and_find_owner() {
        let repo = setup().await;
        let owner = Owner::new("db-host-1", credentials()).with_default_policy("p1");
        repo.save_owner(&owner).await.unwrap();

        let loaded = repo.find_owner(&owner.id).await.unwrap();
        assert_eq!(loaded.name, "db-host-1");
        assert_eq!(loaded.default_policy_id.as_deref(), Some("p1"));
        assert_eq!(loaded.credentials, owner.credentials);
    }

    #[tokio::test]
    async fn test_list_enabled_skips_disabled() {
        let repo = setup().await;
        let enabled = Target::new("a", "a_db", Engine::Postgres, credentials(), "p1");
        let mut disabled = Target::new("b", "b_db", Engine::MySql, credentials(), "p1");
        disabled.enabled = false;

        repo.save_target(&enabled).await.unwrap();
        repo.save_target(&disabled).await.unwrap();

        let listed = repo.list_enabled().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, enabled.id);
    }

    #[tokio::test]
    async fn test_find_missing_is_not_found() {
        let repo = setup().await;
        assert!(matches!(
            repo.find_target("missing").await,
            Err(BackhaulError::NotFound(_))
        ));
        assert!(matches!(
            repo.find_owner("missing").await,
            Err(BackhaulError::NotFound(_))
        ));
    }
}
