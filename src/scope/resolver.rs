//! Principal + permission key → row-visibility predicate
//!
//! Resolution is stateless and fails closed: a storage error while looking up
//! grants yields [`Predicate::AlwaysFalse`], never a wider predicate.

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use tracing::{debug, error, warn};

use super::predicate::{Predicate, ScopeTarget};
use super::DataScope;
use crate::association;
use crate::entity::dept;
use crate::error::AppResult;
use crate::hierarchy::{maintainer, ROOT_PARENT_ID};
use crate::principal::Principal;

/// Storage lookups the resolver needs
#[async_trait]
pub trait ScopeSource: Send + Sync {
    /// Departments granted to a CUSTOM-scope role
    async fn granted_depts(&self, role_id: i64) -> AppResult<Vec<i64>>;

    /// Strict descendants of a department, matched on whole path tokens
    async fn dept_subtree(&self, dept_id: i64) -> AppResult<Vec<i64>>;
}

#[async_trait]
impl ScopeSource for DatabaseConnection {
    async fn granted_depts(&self, role_id: i64) -> AppResult<Vec<i64>> {
        association::granted_dept_ids(self, role_id).await
    }

    async fn dept_subtree(&self, dept_id: i64) -> AppResult<Vec<i64>> {
        maintainer::descendant_ids::<dept::Entity, _>(self, dept_id).await
    }
}

/// Combines the data scopes of every role that qualifies for `permission`.
pub async fn resolve_scope<S>(
    source: &S,
    principal: &Principal,
    permission: &str,
    target: &ScopeTarget,
) -> Predicate
where
    S: ScopeSource + ?Sized,
{
    if principal.is_super_admin {
        return Predicate::Unrestricted;
    }

    match combine_roles(source, principal, permission, target).await {
        Ok(predicate) => {
            debug!(user = principal.id, permission, ?predicate, "resolved data scope");
            predicate
        }
        Err(e) => {
            error!(user = principal.id, permission, error = %e, "data scope resolution failed, denying");
            Predicate::AlwaysFalse
        }
    }
}

async fn combine_roles<S>(
    source: &S,
    principal: &Principal,
    permission: &str,
    target: &ScopeTarget,
) -> AppResult<Predicate>
where
    S: ScopeSource + ?Sized,
{
    let mut clauses = Vec::new();

    for role in principal.roles.iter().filter(|r| r.qualifies(permission)) {
        let clause = match role.data_scope {
            Some(DataScope::All) => return Ok(Predicate::Unrestricted),
            Some(DataScope::Custom) => Predicate::dept_in(source.granted_depts(role.id).await?),
            Some(DataScope::Dept | DataScope::DeptAndChild)
                if principal.own_dept_id == ROOT_PARENT_ID =>
            {
                warn!(role = %role.key, user = principal.id, "principal has no department, denying");
                Predicate::AlwaysFalse
            }
            Some(DataScope::Dept) => Predicate::DeptEquals(principal.own_dept_id),
            Some(DataScope::DeptAndChild) => {
                let mut ids = source.dept_subtree(principal.own_dept_id).await?;
                ids.push(principal.own_dept_id);
                Predicate::dept_in(ids)
            }
            Some(DataScope::SelfOnly) if target.has_owner() => {
                Predicate::UserEquals(principal.id)
            }
            Some(DataScope::SelfOnly) => {
                warn!(role = %role.key, permission, "SELF scope without owner column, denying");
                Predicate::AlwaysFalse
            }
            None => {
                warn!(role = %role.key, "unknown data scope code, denying");
                Predicate::AlwaysFalse
            }
        };
        clauses.push(clause);
    }

    if clauses.is_empty() {
        debug!(user = principal.id, permission, "no role qualifies");
    }
    Ok(Predicate::any(clauses))
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use super::*;
    use crate::db::test_support::{memory_db, seed_dept};
    use crate::entity::{user, Status};
    use crate::error::AppError;
    use crate::principal::RoleGrant;

    const PERM: &str = "system:user:list";

    #[derive(Default)]
    struct MapSource {
        grants: HashMap<i64, Vec<i64>>,
        subtrees: HashMap<i64, Vec<i64>>,
    }

    #[async_trait]
    impl ScopeSource for MapSource {
        async fn granted_depts(&self, role_id: i64) -> AppResult<Vec<i64>> {
            Ok(self.grants.get(&role_id).cloned().unwrap_or_default())
        }

        async fn dept_subtree(&self, dept_id: i64) -> AppResult<Vec<i64>> {
            Ok(self.subtrees.get(&dept_id).cloned().unwrap_or_default())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl ScopeSource for BrokenSource {
        async fn granted_depts(&self, _role_id: i64) -> AppResult<Vec<i64>> {
            Err(AppError::Internal("connection reset".to_string()))
        }

        async fn dept_subtree(&self, _dept_id: i64) -> AppResult<Vec<i64>> {
            Err(AppError::Internal("connection reset".to_string()))
        }
    }

    fn role(id: i64, scope: DataScope) -> RoleGrant {
        RoleGrant {
            id,
            key: format!("role{id}"),
            data_scope: Some(scope),
            status: Status::Enabled,
            permissions: BTreeSet::from([PERM.to_string()]),
        }
    }

    fn principal(roles: Vec<RoleGrant>) -> Principal {
        Principal {
            id: 42,
            user_name: "ry".to_string(),
            own_dept_id: 103,
            status: Status::Enabled,
            is_super_admin: false,
            roles,
        }
    }

    fn user_target() -> ScopeTarget {
        ScopeTarget::new((user::Entity, user::Column::DeptId))
            .with_owner((user::Entity, user::Column::Id))
    }

    fn dept_target() -> ScopeTarget {
        ScopeTarget::new((dept::Entity, dept::Column::Id))
    }

    async fn resolve(source: &MapSource, p: &Principal) -> Predicate {
        resolve_scope(source, p, PERM, &user_target()).await
    }

    #[tokio::test]
    async fn test_super_admin_is_unrestricted() {
        let mut p = principal(vec![role(1, DataScope::SelfOnly)]);
        p.is_super_admin = true;
        assert_eq!(resolve(&MapSource::default(), &p).await, Predicate::Unrestricted);
        assert_eq!(
            resolve_scope(&BrokenSource, &p, PERM, &dept_target()).await,
            Predicate::Unrestricted
        );
    }

    #[tokio::test]
    async fn test_no_qualifying_role_denies() {
        let source = MapSource::default();
        assert_eq!(resolve(&source, &principal(vec![])).await, Predicate::AlwaysFalse);

        let mut disabled = role(1, DataScope::All);
        disabled.status = Status::Disabled;
        assert_eq!(
            resolve(&source, &principal(vec![disabled])).await,
            Predicate::AlwaysFalse
        );

        let mut other_perm = role(2, DataScope::All);
        other_perm.permissions = BTreeSet::from(["system:role:list".to_string()]);
        assert_eq!(
            resolve(&source, &principal(vec![other_perm])).await,
            Predicate::AlwaysFalse
        );
    }

    #[tokio::test]
    async fn test_wildcard_qualifies() {
        let mut r = role(1, DataScope::Dept);
        r.permissions = BTreeSet::from([crate::permission::ALL_PERMISSION.to_string()]);
        assert_eq!(
            resolve(&MapSource::default(), &principal(vec![r])).await,
            Predicate::DeptEquals(103)
        );
    }

    #[tokio::test]
    async fn test_all_wins_in_any_order() {
        let source = MapSource::default();
        let a = principal(vec![role(1, DataScope::Dept), role(2, DataScope::All)]);
        let b = principal(vec![role(2, DataScope::All), role(1, DataScope::Dept)]);
        assert_eq!(resolve(&source, &a).await, Predicate::Unrestricted);
        assert_eq!(resolve(&source, &b).await, Predicate::Unrestricted);
    }

    #[tokio::test]
    async fn test_custom_is_union_of_own_grants() {
        let source = MapSource {
            grants: HashMap::from([(1, vec![10, 11]), (2, vec![11, 12]), (3, vec![99])]),
            ..Default::default()
        };
        let p = principal(vec![role(1, DataScope::Custom), role(2, DataScope::Custom)]);
        assert_eq!(
            resolve(&source, &p).await,
            Predicate::DeptIn(BTreeSet::from([10, 11, 12]))
        );

        let empty = principal(vec![role(4, DataScope::Custom)]);
        assert_eq!(resolve(&source, &empty).await, Predicate::AlwaysFalse);
    }

    #[tokio::test]
    async fn test_dept_and_child() {
        let source = MapSource {
            subtrees: HashMap::from([(103, vec![104, 105])]),
            ..Default::default()
        };
        let p = principal(vec![role(1, DataScope::DeptAndChild)]);
        assert_eq!(
            resolve(&source, &p).await,
            Predicate::DeptIn(BTreeSet::from([103, 104, 105]))
        );
    }

    #[tokio::test]
    async fn test_self_scope() {
        let source = MapSource::default();
        let p = principal(vec![role(1, DataScope::SelfOnly)]);
        assert_eq!(resolve(&source, &p).await, Predicate::UserEquals(42));
        assert_eq!(
            resolve_scope(&source, &p, PERM, &dept_target()).await,
            Predicate::AlwaysFalse
        );
    }

    #[tokio::test]
    async fn test_mixed_roles_are_order_independent() {
        let source = MapSource::default();
        let a = principal(vec![role(1, DataScope::SelfOnly), role(2, DataScope::Dept)]);
        let b = principal(vec![role(2, DataScope::Dept), role(1, DataScope::SelfOnly)]);
        let expected = Predicate::AnyOf(vec![Predicate::DeptEquals(103), Predicate::UserEquals(42)]);
        assert_eq!(resolve(&source, &a).await, expected);
        assert_eq!(resolve(&source, &b).await, expected);
    }

    #[tokio::test]
    async fn test_unknown_code_denies() {
        let mut r = role(1, DataScope::All);
        r.data_scope = None;
        assert_eq!(
            resolve(&MapSource::default(), &principal(vec![r])).await,
            Predicate::AlwaysFalse
        );
    }

    #[tokio::test]
    async fn test_storage_failure_fails_closed() {
        let p = principal(vec![role(1, DataScope::Dept), role(2, DataScope::Custom)]);
        assert_eq!(
            resolve_scope(&BrokenSource, &p, PERM, &user_target()).await,
            Predicate::AlwaysFalse
        );
    }

    #[tokio::test]
    async fn test_root_sentinel_department_denies() {
        let db = memory_db().await;
        seed_dept(&db, 100, 0, "0", Status::Enabled).await;
        seed_dept(&db, 200, 0, "0", Status::Enabled).await;
        seed_dept(&db, 201, 200, "0,200", Status::Enabled).await;

        for scope in [DataScope::Dept, DataScope::DeptAndChild] {
            let mut p = principal(vec![role(1, scope)]);
            p.own_dept_id = 0;
            assert_eq!(
                resolve_scope(&db, &p, PERM, &user_target()).await,
                Predicate::AlwaysFalse
            );
        }
        assert!(db.dept_subtree(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subtree_uses_whole_tokens() {
        let db = memory_db().await;
        seed_dept(&db, 1, 0, "0", Status::Enabled).await;
        seed_dept(&db, 10, 0, "0", Status::Enabled).await;
        seed_dept(&db, 11, 10, "0,10", Status::Enabled).await;
        seed_dept(&db, 12, 1, "0,1", Status::Enabled).await;

        let mut p = principal(vec![role(1, DataScope::DeptAndChild)]);
        p.own_dept_id = 1;
        assert_eq!(
            resolve_scope(&db, &p, PERM, &user_target()).await,
            Predicate::DeptIn(BTreeSet::from([1, 12]))
        );
    }
}
