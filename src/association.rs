//! Role-owned association tables
//!
//! sys_role_dept, sys_role_menu and sys_user_role are written only through
//! the role and user sides. The `replace_*` helpers take the caller's
//! connection so they can run inside its transaction.

use std::collections::{BTreeSet, HashMap, HashSet};

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};

use crate::entity::{menu, role_dept, role_menu, user, user_role, Status};
use crate::error::AppResult;
use crate::hierarchy::HierarchyNode;
use crate::permission::split_perms;

pub async fn role_ids_for_user<C: ConnectionTrait>(db: &C, user_id: i64) -> AppResult<Vec<i64>> {
    let rows = user_role::Entity::find()
        .filter(user_role::Column::UserId.eq(user_id))
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|r| r.role_id).collect())
}

pub async fn user_ids_for_role<C: ConnectionTrait>(db: &C, role_id: i64) -> AppResult<Vec<i64>> {
    let rows = user_role::Entity::find()
        .filter(user_role::Column::RoleId.eq(role_id))
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|r| r.user_id).collect())
}

/// Departments explicitly granted to a CUSTOM-scope role
pub async fn granted_dept_ids<C: ConnectionTrait>(db: &C, role_id: i64) -> AppResult<Vec<i64>> {
    let rows = role_dept::Entity::find()
        .filter(role_dept::Column::RoleId.eq(role_id))
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|r| r.dept_id).collect())
}

pub async fn granted_menu_ids<C: ConnectionTrait>(db: &C, role_id: i64) -> AppResult<Vec<i64>> {
    menu_ids_for_roles(db, &[role_id]).await
}

pub async fn menu_ids_for_roles<C: ConnectionTrait>(db: &C, role_ids: &[i64]) -> AppResult<Vec<i64>> {
    if role_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = role_menu::Entity::find()
        .filter(role_menu::Column::RoleId.is_in(role_ids.iter().copied()))
        .all(db)
        .await?;

    let mut seen = HashSet::new();
    Ok(rows
        .into_iter()
        .map(|r| r.menu_id)
        .filter(|id| seen.insert(*id))
        .collect())
}

/// Permission tokens of the enabled menus granted to each role
pub async fn role_permissions<C: ConnectionTrait>(
    db: &C,
    role_ids: &[i64],
) -> AppResult<HashMap<i64, BTreeSet<String>>> {
    let mut by_role: HashMap<i64, BTreeSet<String>> =
        role_ids.iter().map(|id| (*id, BTreeSet::new())).collect();
    if role_ids.is_empty() {
        return Ok(by_role);
    }

    let grants = role_menu::Entity::find()
        .filter(role_menu::Column::RoleId.is_in(role_ids.iter().copied()))
        .all(db)
        .await?;
    if grants.is_empty() {
        return Ok(by_role);
    }

    let menu_ids: HashSet<i64> = grants.iter().map(|g| g.menu_id).collect();
    let perms: HashMap<i64, String> = menu::Entity::find()
        .filter(menu::Column::Id.is_in(menu_ids))
        .filter(menu::Column::Status.eq(i32::from(Status::Enabled)))
        .all(db)
        .await?
        .into_iter()
        .map(|m| (m.id, m.perms))
        .collect();

    for grant in grants {
        if let Some(raw) = perms.get(&grant.menu_id) {
            by_role
                .entry(grant.role_id)
                .or_default()
                .extend(split_perms(raw));
        }
    }
    Ok(by_role)
}

pub async fn replace_role_depts<C: ConnectionTrait>(
    db: &C,
    role_id: i64,
    dept_ids: &[i64],
) -> AppResult<()> {
    role_dept::Entity::delete_many()
        .filter(role_dept::Column::RoleId.eq(role_id))
        .exec(db)
        .await?;

    let rows: Vec<role_dept::ActiveModel> = dedup(dept_ids)
        .map(|dept_id| role_dept::ActiveModel {
            role_id: Set(role_id),
            dept_id: Set(dept_id),
        })
        .collect();
    if !rows.is_empty() {
        role_dept::Entity::insert_many(rows).exec(db).await?;
    }
    Ok(())
}

pub async fn replace_role_menus<C: ConnectionTrait>(
    db: &C,
    role_id: i64,
    menu_ids: &[i64],
) -> AppResult<()> {
    role_menu::Entity::delete_many()
        .filter(role_menu::Column::RoleId.eq(role_id))
        .exec(db)
        .await?;

    let rows: Vec<role_menu::ActiveModel> = dedup(menu_ids)
        .map(|menu_id| role_menu::ActiveModel {
            role_id: Set(role_id),
            menu_id: Set(menu_id),
        })
        .collect();
    if !rows.is_empty() {
        role_menu::Entity::insert_many(rows).exec(db).await?;
    }
    Ok(())
}

pub async fn replace_user_roles<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    role_ids: &[i64],
) -> AppResult<()> {
    user_role::Entity::delete_many()
        .filter(user_role::Column::UserId.eq(user_id))
        .exec(db)
        .await?;

    let rows: Vec<user_role::ActiveModel> = dedup(role_ids)
        .map(|role_id| user_role::ActiveModel {
            user_id: Set(user_id),
            role_id: Set(role_id),
        })
        .collect();
    if !rows.is_empty() {
        user_role::Entity::insert_many(rows).exec(db).await?;
    }
    Ok(())
}

/// Drops every grant a role owns
pub async fn delete_role_grants<C: ConnectionTrait>(db: &C, role_id: i64) -> AppResult<()> {
    role_dept::Entity::delete_many()
        .filter(role_dept::Column::RoleId.eq(role_id))
        .exec(db)
        .await?;
    role_menu::Entity::delete_many()
        .filter(role_menu::Column::RoleId.eq(role_id))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn role_in_use<C: ConnectionTrait>(db: &C, role_id: i64) -> AppResult<bool> {
    let row = user_role::Entity::find()
        .filter(user_role::Column::RoleId.eq(role_id))
        .one(db)
        .await?;
    Ok(row.is_some())
}

pub async fn menu_is_granted<C: ConnectionTrait>(db: &C, menu_id: i64) -> AppResult<bool> {
    let row = role_menu::Entity::find()
        .filter(role_menu::Column::MenuId.eq(menu_id))
        .one(db)
        .await?;
    Ok(row.is_some())
}

pub async fn dept_has_users<C: ConnectionTrait>(db: &C, dept_id: i64) -> AppResult<bool> {
    let row = user::Entity::find()
        .filter(user::Column::DeptId.eq(dept_id))
        .one(db)
        .await?;
    Ok(row.is_some())
}

fn dedup(ids: &[i64]) -> impl Iterator<Item = i64> + '_ {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(move |id| seen.insert(*id))
}

/// Ids a tree widget should show as checked.
///
/// With `strict` (parent and child selection linked) a granted node that is
/// the parent of another granted node is left out, since the widget derives
/// its half-checked state from the children.
pub fn checked_keys(granted: &[i64], nodes: &[HierarchyNode], strict: bool) -> Vec<i64> {
    if !strict {
        return granted.to_vec();
    }
    let granted_set: HashSet<i64> = granted.iter().copied().collect();
    let parents: HashSet<i64> = nodes
        .iter()
        .filter(|n| granted_set.contains(&n.id))
        .map(|n| n.parent_id)
        .collect();
    granted
        .iter()
        .copied()
        .filter(|id| !parents.contains(id))
        .collect()
}
