//! Retention policy repository

use crate::db::Database;
use crate::error::{BackhaulError, Result};
use crate::models::RetentionPolicy;
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Repository for retention policies
#[derive(Clone, Debug)]
pub struct PolicyRepository {
    db: Arc<Database>,
}

impl PolicyRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Save a policy after validating its tier configurations
    pub async fn save(&self, policy: &RetentionPolicy) -> Result<()> {
        policy.validate()?;
        let tiers_json = serde_json::to_string(&policy.tiers)?;

        sqlx::query(
            "INSERT OR REPLACE INTO policies (id, name, tiers_json, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&policy.id)
        .bind(&policy.name)
        .bind(tiers_json)
        .bind(policy.created_at)
        .execute(self.db.pool())
        .await
        .map_err(|e| BackhaulError::Database(format!("Failed to save policy: {}", e)))?;

        Ok(())
    }

    /// Load a policy by ID
    pub async fn find_by_id(&self, id: &str) -> Result<RetentionPolicy> {
        let row = sqlx::query("SELECT id, name, tiers_json, created_at FROM policies WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| BackhaulError::Database(format!("Failed to load policy: {}", e)))?
            .ok_or_else(|| BackhaulError::NotFound(format!("Policy not found: {}", id)))?;

        let tiers_json: String = row.get("tiers_json");
        let tiers: BTreeMap<_, _> = serde_json::from_str(&tiers_json)?;

        Ok(RetentionPolicy {
            id: row.get("id"),
            name: row.get("name"),
            tiers,
            created_at: row.get("created_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Tier, TierConfig, TierSchedule};

    async fn setup() -> PolicyRepository {
        let db = Database::in_memory().await.unwrap();
        db.init_schema().await.unwrap();
        PolicyRepository::new(Arc::new(db))
    }

    #[tokio::test]
    async fn test_save_and_find_round_trip() {
        let repo = setup().await;
        let policy = RetentionPolicy::standard("default");
        repo.save(&policy).await.unwrap();

        let loaded = repo.find_by_id(&policy.id).await.unwrap();
        assert_eq!(loaded.name, "default");
        assert_eq!(loaded.tiers, policy.tiers);
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_policy() {
        let repo = setup().await;
        let bad = RetentionPolicy::new("broken").with_tier(
            Tier::Hourly,
            TierConfig::new(3, TierSchedule::EveryHours { interval: 48 }),
        );
        assert!(matches!(
            repo.save(&bad).await,
            Err(BackhaulError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_find_missing_is_not_found() {
        let repo = setup().await;
        assert!(matches!(
            repo.find_by_id("missing").await,
            Err(BackhaulError::NotFound(_))
        ));
    }
}
