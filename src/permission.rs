//! Permission aggregation and the per-user permission cache
//!
//! `aggregate` turns a principal into permission strings and role keys.
//! `PermissionCache` keeps those results in a Casbin enforcer (one policy per
//! permission, one grouping per role key) so request-time checks never touch
//! storage. Admin handlers that change grants recompute affected entries
//! before they return.

use std::collections::BTreeSet;
use std::sync::Arc;

use casbin::{CoreApi, DefaultModel, Enforcer, MgmtApi};
use dashmap::DashMap;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::principal::{load_principal, Principal};

/// Wildcard permission; satisfies every check
pub const ALL_PERMISSION: &str = "*:*:*";

/// Role key reported for the super admin
pub const SUPER_ADMIN_ROLE: &str = "admin";

const MODEL: &str = r#"
[request_definition]
r = sub, obj

[policy_definition]
p = sub, obj

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && (p.obj == "*:*:*" || r.obj == p.obj)
"#;

/// Splits a stored comma-joined permission field into trimmed tokens.
pub fn split_perms(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Authorities {
    pub permissions: BTreeSet<String>,
    pub roles: BTreeSet<String>,
}

impl Authorities {
    pub fn super_admin() -> Self {
        Self {
            permissions: BTreeSet::from([ALL_PERMISSION.to_string()]),
            roles: BTreeSet::from([SUPER_ADMIN_ROLE.to_string()]),
        }
    }
}

/// Union of permissions and role keys over the principal's enabled roles.
pub fn aggregate(principal: &Principal) -> Authorities {
    if principal.is_super_admin {
        return Authorities::super_admin();
    }

    let mut out = Authorities::default();
    for role in principal.roles.iter().filter(|r| r.is_enabled()) {
        out.permissions.extend(role.permissions.iter().cloned());
        out.roles.insert(role.key.clone());
    }
    out
}

fn subject(user_id: i64) -> String {
    format!("user:{user_id}")
}

/// Process-wide permission cache, owned by `AppState`
#[derive(Clone)]
pub struct PermissionCache {
    enforcer: Arc<RwLock<Enforcer>>,
    principals: Arc<DashMap<i64, Arc<Principal>>>,
    db: DatabaseConnection,
    super_admin_id: i64,
}

impl PermissionCache {
    pub async fn new(db: DatabaseConnection, super_admin_id: i64) -> anyhow::Result<Self> {
        let model = DefaultModel::from_str(MODEL).await?;
        let enforcer = Enforcer::new(model, ()).await?;

        Ok(Self {
            enforcer: Arc::new(RwLock::new(enforcer)),
            principals: Arc::new(DashMap::new()),
            db,
            super_admin_id,
        })
    }

    pub fn super_admin_id(&self) -> i64 {
        self.super_admin_id
    }

    /// Reloads one user from storage and replaces its cached entry.
    /// Disabled users keep a principal but get no policies.
    pub async fn refresh_user(&self, user_id: i64) -> AppResult<Arc<Principal>> {
        let principal = match load_principal(&self.db, user_id, self.super_admin_id).await {
            Ok(p) => p,
            Err(AppError::NotFound(msg)) => {
                self.evict(user_id).await;
                return Err(AppError::NotFound(msg));
            }
            Err(e) => return Err(e),
        };
        let authorities = aggregate(&principal);
        let sub = subject(user_id);

        {
            let mut enforcer = self.enforcer.write().await;
            enforcer.remove_filtered_policy(0, vec![sub.clone()]).await?;
            enforcer
                .remove_filtered_grouping_policy(0, vec![sub.clone()])
                .await?;

            if principal.is_enabled() {
                let rules: Vec<Vec<String>> = authorities
                    .permissions
                    .iter()
                    .map(|p| vec![sub.clone(), p.clone()])
                    .collect();
                if !rules.is_empty() {
                    enforcer.add_policies(rules).await?;
                }

                let groups: Vec<Vec<String>> = authorities
                    .roles
                    .iter()
                    .map(|r| vec![sub.clone(), r.clone()])
                    .collect();
                if !groups.is_empty() {
                    enforcer.add_grouping_policies(groups).await?;
                }
            }
        }

        debug!(
            user = user_id,
            permissions = authorities.permissions.len(),
            roles = authorities.roles.len(),
            "refreshed permission cache entry"
        );

        let principal = Arc::new(principal);
        self.principals.insert(user_id, principal.clone());
        Ok(principal)
    }

    /// Cached principal, loaded on first use.
    pub async fn principal(&self, user_id: i64) -> AppResult<Arc<Principal>> {
        if let Some(p) = self.principals.get(&user_id) {
            return Ok(p.clone());
        }
        self.refresh_user(user_id).await
    }

    pub async fn evict(&self, user_id: i64) {
        self.principals.remove(&user_id);

        let sub = subject(user_id);
        let mut enforcer = self.enforcer.write().await;
        if let Err(e) = enforcer.remove_filtered_policy(0, vec![sub.clone()]).await {
            warn!(user = user_id, error = %e, "failed to drop cached policies");
        }
        if let Err(e) = enforcer.remove_filtered_grouping_policy(0, vec![sub]).await {
            warn!(user = user_id, error = %e, "failed to drop cached role keys");
        }
    }

    /// Recomputes the given users if they are cached. A user that fails to
    /// reload is evicted.
    pub async fn invalidate_users(&self, user_ids: &[i64]) {
        for &id in user_ids {
            if !self.principals.contains_key(&id) {
                continue;
            }
            if let Err(e) = self.refresh_user(id).await {
                warn!(user = id, error = %e, "evicting user after failed refresh");
                self.evict(id).await;
            }
        }
    }

    /// Recomputes every cached user; called after role or menu changes.
    pub async fn invalidate_all(&self) {
        let ids: Vec<i64> = self.principals.iter().map(|e| *e.key()).collect();
        self.invalidate_users(&ids).await;
        info!(users = ids.len(), "permission cache recomputed");
    }

    pub async fn check(&self, user_id: i64, permission: &str) -> bool {
        let enforcer = self.enforcer.read().await;
        enforcer
            .enforce((subject(user_id).as_str(), permission))
            .unwrap_or(false)
    }

    pub async fn has_role(&self, user_id: i64, role_key: &str) -> bool {
        let enforcer = self.enforcer.read().await;
        enforcer.has_grouping_policy(vec![subject(user_id), role_key.to_string()])
    }

    /// Authorities as currently cached
    pub async fn authorities(&self, user_id: i64) -> Authorities {
        let sub = subject(user_id);
        let enforcer = self.enforcer.read().await;

        let permissions = enforcer
            .get_filtered_policy(0, vec![sub.clone()])
            .into_iter()
            .filter_map(|rule| rule.get(1).cloned())
            .collect();
        let roles = enforcer
            .get_filtered_grouping_policy(0, vec![sub])
            .into_iter()
            .filter_map(|rule| rule.get(1).cloned())
            .collect();

        Authorities { permissions, roles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association;
    use crate::db::test_support::{memory_db, seed_menu, seed_role, seed_user};
    use crate::entity::{user, Status};
    use crate::principal::RoleGrant;
    use crate::scope::DataScope;
    use sea_orm::{ActiveModelTrait, EntityTrait, IntoActiveModel, Set};

    fn grant(key: &str, status: Status, perms: &[&str]) -> RoleGrant {
        RoleGrant {
            id: 1,
            key: key.to_string(),
            data_scope: Some(DataScope::Dept),
            status,
            permissions: perms.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn principal(is_super_admin: bool, roles: Vec<RoleGrant>) -> Principal {
        Principal {
            id: 2,
            user_name: "ry".to_string(),
            own_dept_id: 105,
            status: Status::Enabled,
            is_super_admin,
            roles,
        }
    }

    #[test]
    fn test_split_perms() {
        let tokens: Vec<String> = split_perms(" system:user:list ,,system:user:add, ").collect();
        assert_eq!(tokens, vec!["system:user:list", "system:user:add"]);
        assert_eq!(split_perms("").count(), 0);
    }

    #[test]
    fn test_aggregate_super_admin_ignores_roles() {
        let p = principal(true, vec![grant("common", Status::Enabled, &["a:b:c"])]);
        let out = aggregate(&p);
        assert_eq!(out, Authorities::super_admin());
    }

    #[test]
    fn test_aggregate_unions_enabled_roles() {
        let p = principal(
            false,
            vec![
                grant("common", Status::Enabled, &["system:user:list", "system:dept:list"]),
                grant("editor", Status::Enabled, &["system:user:list", "system:user:edit"]),
                grant("auditor", Status::Disabled, &["monitor:log:list"]),
            ],
        );
        let out = aggregate(&p);
        assert_eq!(
            out.permissions,
            BTreeSet::from([
                "system:dept:list".to_string(),
                "system:user:edit".to_string(),
                "system:user:list".to_string(),
            ])
        );
        assert_eq!(
            out.roles,
            BTreeSet::from(["common".to_string(), "editor".to_string()])
        );
    }

    #[tokio::test]
    async fn test_cache_checks_and_revocation() {
        let db = memory_db().await;
        seed_user(&db, 2, "ry", 105).await;
        seed_role(&db, 20, "common", DataScope::Dept, Status::Enabled).await;
        seed_menu(&db, 1, 0, "system:user:list", Status::Enabled).await;
        seed_menu(&db, 2, 0, "system:user:add", Status::Enabled).await;
        association::replace_user_roles(&db, 2, &[20]).await.unwrap();
        association::replace_role_menus(&db, 20, &[1, 2]).await.unwrap();

        let cache = PermissionCache::new(db.clone(), 1).await.unwrap();
        cache.principal(2).await.unwrap();
        assert!(cache.check(2, "system:user:list").await);
        assert!(cache.check(2, "system:user:add").await);
        assert!(!cache.check(2, "system:role:list").await);
        assert!(cache.has_role(2, "common").await);
        assert_eq!(cache.authorities(2).await.permissions.len(), 2);

        // Revoked grant is gone as soon as the invalidation returns
        association::replace_role_menus(&db, 20, &[1]).await.unwrap();
        cache.invalidate_all().await;
        assert!(cache.check(2, "system:user:list").await);
        assert!(!cache.check(2, "system:user:add").await);

        let mut active = user::Entity::find_by_id(2)
            .one(&db)
            .await
            .unwrap()
            .unwrap()
            .into_active_model();
        active.status = Set(Status::Disabled.into());
        active.update(&db).await.unwrap();
        cache.invalidate_users(&[2]).await;
        assert!(!cache.check(2, "system:user:list").await);
        assert!(cache.authorities(2).await.roles.is_empty());
    }

    #[tokio::test]
    async fn test_super_admin_wildcard() {
        let db = memory_db().await;
        seed_user(&db, 1, "admin", 100).await;

        let cache = PermissionCache::new(db, 1).await.unwrap();
        cache.refresh_user(1).await.unwrap();
        assert!(cache.check(1, "system:anything:remove").await);
        assert!(cache.has_role(1, SUPER_ADMIN_ROLE).await);
        assert_eq!(cache.authorities(1).await, Authorities::super_admin());
    }

    #[tokio::test]
    async fn test_missing_user_is_evicted() {
        let db = memory_db().await;
        let cache = PermissionCache::new(db, 1).await.unwrap();
        assert!(matches!(
            cache.principal(7).await,
            Err(AppError::NotFound(_))
        ));
        assert!(!cache.check(7, "system:user:list").await);
    }
}
