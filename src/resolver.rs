//! Policy and credential resolution
//!
//! Targets either carry their own retention policy and credentials or
//! inherit them from their owner, one flag per concern. Resolution is an
//! explicit two-level lookup returning tagged provenance, so callers can
//! audit where a value came from. The resolver is invoked fresh on every
//! evaluator tick and again on every worker dequeue; administrative changes
//! take effect on the next cycle without a restart.

use std::sync::Arc;

use crate::error::{BackhaulError, Result};
use crate::models::{Credentials, RetentionPolicy, Target};
use crate::repositories::{PolicyRepository, TargetRepository};

/// Where a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// The target's own configuration
    Own,
    /// Inherited from the target's owner
    Inherited,
}

/// A resolved value with its provenance
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ResolutionSource,
}

/// Effective policy and credentials for a target
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub policy: Resolved<RetentionPolicy>,
    pub credentials: Resolved<Credentials>,
}

/// Resolves effective retention policy and credentials for targets
#[derive(Clone, Debug)]
pub struct PolicyResolver {
    targets: TargetRepository,
    policies: PolicyRepository,
}

impl PolicyResolver {
    pub fn new(targets: TargetRepository, policies: PolicyRepository) -> Self {
        Self { targets, policies }
    }

    pub fn from_repositories(
        targets: &TargetRepository,
        policies: &PolicyRepository,
    ) -> Arc<Self> {
        Arc::new(Self::new(targets.clone(), policies.clone()))
    }

    /// Resolve both concerns for a target
    pub async fn resolve(&self, target: &Target) -> Result<ResolvedTarget> {
        let credentials = self.resolve_credentials(target).await?;
        let policy = self.resolve_policy(target).await?;
        Ok(ResolvedTarget {
            policy,
            credentials,
        })
    }

    /// Resolve the effective credentials for a target
    pub async fn resolve_credentials(&self, target: &Target) -> Result<Resolved<Credentials>> {
        if target.use_owner_credentials {
            let owner = self.load_owner(target).await?;
            Ok(Resolved {
                value: owner.credentials,
                source: ResolutionSource::Inherited,
            })
        } else {
            let credentials = target.credentials.clone().ok_or_else(|| {
                BackhaulError::Config(format!(
                    "Target {} has no credentials and does not inherit from an owner",
                    target.id
                ))
            })?;
            Ok(Resolved {
                value: credentials,
                source: ResolutionSource::Own,
            })
        }
    }

    /// Resolve the effective retention policy for a target
    pub async fn resolve_policy(&self, target: &Target) -> Result<Resolved<RetentionPolicy>> {
        let (policy_id, source) = if target.use_owner_policy {
            let owner = self.load_owner(target).await?;
            let policy_id = owner.default_policy_id.ok_or_else(|| {
                BackhaulError::Config(format!(
                    "Owner {} of target {} has no default policy",
                    owner.id, target.id
                ))
            })?;
            (policy_id, ResolutionSource::Inherited)
        } else {
            let policy_id = target.policy_id.clone().ok_or_else(|| {
                BackhaulError::Config(format!(
                    "Target {} has no policy and does not inherit from an owner",
                    target.id
                ))
            })?;
            (policy_id, ResolutionSource::Own)
        };

        let policy = match self.policies.find_by_id(&policy_id).await {
            Ok(policy) => policy,
            Err(BackhaulError::NotFound(_)) => {
                return Err(BackhaulError::Config(format!(
                    "Target {} references missing policy {}",
                    target.id, policy_id
                )))
            }
            Err(e) => return Err(e),
        };

        Ok(Resolved {
            value: policy,
            source,
        })
    }

    async fn load_owner(&self, target: &Target) -> Result<crate::models::Owner> {
        let owner_id = target.owner_id.as_deref().ok_or_else(|| {
            BackhaulError::Config(format!(
                "Target {} inherits from an owner but has no owner reference",
                target.id
            ))
        })?;

        match self.targets.find_owner(owner_id).await {
            Ok(owner) => Ok(owner),
            Err(BackhaulError::NotFound(_)) => Err(BackhaulError::Config(format!(
                "Target {} references missing owner {}",
                target.id, owner_id
            ))),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Engine, Owner, Target};

    fn credentials(host: &str) -> Credentials {
        Credentials {
            host: host.to_string(),
            port: 5432,
            username: "backup".to_string(),
            password: "secret".to_string(),
        }
    }

    async fn setup() -> (TargetRepository, PolicyRepository, PolicyResolver) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.init_schema().await.unwrap();
        let targets = TargetRepository::new(db.clone());
        let policies = PolicyRepository::new(db);
        let resolver = PolicyResolver::new(targets.clone(), policies.clone());
        (targets, policies, resolver)
    }

    #[tokio::test]
    async fn test_resolves_own_policy_and_credentials() {
        let (_, policies, resolver) = setup().await;
        let policy = crate::models::RetentionPolicy::standard("own");
        policies.save(&policy).await.unwrap();

        let target = Target::new("t", "db", Engine::Postgres, credentials("own-host"), &policy.id);
        let resolved = resolver.resolve(&target).await.unwrap();

        assert_eq!(resolved.policy.source, ResolutionSource::Own);
        assert_eq!(resolved.policy.value.id, policy.id);
        assert_eq!(resolved.credentials.source, ResolutionSource::Own);
        assert_eq!(resolved.credentials.value.host, "own-host");
    }

    #[tokio::test]
    async fn test_resolves_inherited_policy_and_credentials() {
        let (targets, policies, resolver) = setup().await;
        let policy = crate::models::RetentionPolicy::standard("shared");
        policies.save(&policy).await.unwrap();

        let owner = Owner::new("host-1", credentials("owner-host")).with_default_policy(&policy.id);
        targets.save_owner(&owner).await.unwrap();

        let target = Target::inheriting("t", "db", Engine::Postgres, &owner.id);
        let resolved = resolver.resolve(&target).await.unwrap();

        assert_eq!(resolved.policy.source, ResolutionSource::Inherited);
        assert_eq!(resolved.policy.value.id, policy.id);
        assert_eq!(resolved.credentials.source, ResolutionSource::Inherited);
        assert_eq!(resolved.credentials.value.host, "owner-host");
    }

    #[tokio::test]
    async fn test_missing_owner_is_config_error() {
        let (_, _, resolver) = setup().await;
        let target = Target::inheriting("t", "db", Engine::Postgres, "ghost");
        assert!(matches!(
            resolver.resolve(&target).await,
            Err(BackhaulError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_policy_reference_is_config_error() {
        let (_, _, resolver) = setup().await;
        let target = Target::new("t", "db", Engine::Postgres, credentials("h"), "ghost-policy");
        assert!(matches!(
            resolver.resolve(&target).await,
            Err(BackhaulError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_owner_without_default_policy_is_config_error() {
        let (targets, _, resolver) = setup().await;
        let owner = Owner::new("host-1", credentials("h"));
        targets.save_owner(&owner).await.unwrap();

        let target = Target::inheriting("t", "db", Engine::Postgres, &owner.id);
        assert!(matches!(
            resolver.resolve(&target).await,
            Err(BackhaulError::Config(_))
        ));
    }
}
