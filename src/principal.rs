//! Authenticated principal and its role set

use std::collections::BTreeSet;

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;

use crate::association;
use crate::entity::{role, user, Status};
use crate::error::{AppResult, OptionExt};
use crate::permission::ALL_PERMISSION;
use crate::scope::DataScope;

/// One role as seen by scope resolution and permission checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGrant {
    pub id: i64,
    pub key: String,
    /// `None` when the stored code is unknown
    pub data_scope: Option<DataScope>,
    pub status: Status,
    /// Tokens of the enabled menus granted to this role
    pub permissions: BTreeSet<String>,
}

impl RoleGrant {
    pub fn is_enabled(&self) -> bool {
        self.status.is_enabled()
    }

    /// Enabled and holding `permission` or the wildcard. An empty key
    /// qualifies every enabled role.
    pub fn qualifies(&self, permission: &str) -> bool {
        self.is_enabled()
            && (permission.is_empty()
                || self.permissions.contains(ALL_PERMISSION)
                || self.permissions.contains(permission))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: i64,
    pub user_name: String,
    pub own_dept_id: i64,
    pub status: Status,
    pub is_super_admin: bool,
    pub roles: Vec<RoleGrant>,
}

impl Principal {
    pub fn is_enabled(&self) -> bool {
        self.status.is_enabled()
    }
}

/// Loads a user with roles and menu permissions.
pub async fn load_principal<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    super_admin_id: i64,
) -> AppResult<Principal> {
    let user = user::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_not_found(format!("user {user_id} not found"))?;

    let role_ids = association::role_ids_for_user(db, user_id).await?;
    let roles = if role_ids.is_empty() {
        Vec::new()
    } else {
        role::Entity::find()
            .filter(role::Column::Id.is_in(role_ids.iter().copied()))
            .order_by_asc(role::Column::RoleSort)
            .all(db)
            .await?
    };
    let mut perms = association::role_permissions(db, &role_ids).await?;

    let roles = roles
        .into_iter()
        .map(|r| RoleGrant {
            id: r.id,
            data_scope: r.data_scope(),
            status: r.status(),
            permissions: perms.remove(&r.id).unwrap_or_default(),
            key: r.role_key,
        })
        .collect();

    Ok(Principal {
        id: user.id,
        own_dept_id: user.dept_id,
        status: user.status(),
        is_super_admin: user.id == super_admin_id,
        user_name: user.user_name,
        roles,
    })
}
