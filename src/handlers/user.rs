//! User handlers
//!
//! Users are department-owned rows: listings are filtered by the caller's
//! data scope and single-record access is checked against it.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Deserialize;

use crate::association;
use crate::entity::{dept, role, user, user_role, Status};
use crate::error::{AppError, AppResult, OptionExt};
use crate::hierarchy::maintainer;
use crate::middleware::auth::{require_permission, CurrentUser};
use crate::middleware::DbConn;
use crate::permission::SUPER_ADMIN_ROLE;
use crate::routes::ApiResponse;
use crate::scope::{ensure_in_scope, resolve_scope, Predicate, ScopeTarget};
use crate::state::AppState;

const PERM_LIST: &str = "system:user:list";
const PERM_QUERY: &str = "system:user:query";
const PERM_ADD: &str = "system:user:add";
const PERM_EDIT: &str = "system:user:edit";
const PERM_REMOVE: &str = "system:user:remove";

const BCRYPT_COST: u32 = 12;

/// Users are scoped by department, and by their own id for self-only roles
fn user_target() -> ScopeTarget {
    ScopeTarget::new((user::Entity, user::Column::DeptId))
        .with_owner((user::Entity, user::Column::Id))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_name: Option<String>,
    pub phone: Option<String>,
    pub status: Option<Status>,
    /// Restrict to this department and everything below it
    pub dept_id: Option<i64>,
}

/// Add/update request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserForm {
    pub id: Option<i64>,
    pub user_name: String,
    pub nick_name: String,
    /// Required on add, ignored on update
    pub password: Option<String>,
    pub dept_id: i64,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub role_ids: Vec<i64>,
}

/// PUT /api/system/user/authRole body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRoleForm {
    pub user_id: i64,
    #[serde(default)]
    pub role_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusForm {
    pub id: i64,
    pub status: Status,
}

async fn user_scope(state: &AppState, user: &CurrentUser, permission: &str) -> Predicate {
    resolve_scope(&state.db, &user.principal, permission, &user_target()).await
}

/// Loads a user and rejects it when it lies outside the caller's scope
async fn find_scoped_user(
    state: &AppState,
    db: &DbConn,
    current: &CurrentUser,
    permission: &str,
    id: i64,
) -> AppResult<user::Model> {
    let target = user::Entity::find_by_id(id)
        .one(&**db)
        .await?
        .ok_or_not_found("用户不存在")?;
    let predicate = user_scope(state, current, permission).await;
    ensure_in_scope(&predicate, Some(target.dept_id), Some(target.id))?;
    Ok(target)
}

/// The super admin account is managed only through bootstrap
fn ensure_mutable(state: &AppState, id: i64) -> AppResult<()> {
    if id == state.super_admin_id() {
        return Err(AppError::Validation("不允许操作超级管理员用户".to_string()));
    }
    Ok(())
}

fn validate_form(form: &UserForm) -> AppResult<()> {
    if form.user_name.trim().is_empty() {
        return Err(AppError::Validation("用户账号不能为空".to_string()));
    }
    if form.nick_name.trim().is_empty() {
        return Err(AppError::Validation("用户昵称不能为空".to_string()));
    }
    Ok(())
}

async fn check_name_unique(db: &DbConn, form: &UserForm) -> AppResult<()> {
    let mut select = user::Entity::find().filter(user::Column::UserName.eq(&form.user_name));
    if let Some(id) = form.id {
        select = select.filter(user::Column::Id.ne(id));
    }
    if select.one(&**db).await?.is_some() {
        return Err(AppError::Conflict(format!("登录账号'{}'已存在", form.user_name)));
    }
    Ok(())
}

async fn check_dept_exists(db: &DbConn, dept_id: i64) -> AppResult<()> {
    dept::Entity::find_by_id(dept_id)
        .one(&**db)
        .await?
        .ok_or_not_found("部门不存在")?;
    Ok(())
}

/// Every role must exist; only the super admin may hand out the admin role.
async fn check_assignable_roles(
    db: &DbConn,
    current: &CurrentUser,
    role_ids: &[i64],
) -> AppResult<()> {
    if role_ids.is_empty() {
        return Ok(());
    }
    let roles = role::Entity::find()
        .filter(role::Column::Id.is_in(role_ids.to_vec()))
        .all(&**db)
        .await?;
    for id in role_ids {
        let Some(found) = roles.iter().find(|r| r.id == *id) else {
            return Err(AppError::Validation(format!("角色{}不存在", id)));
        };
        if found.role_key == SUPER_ADMIN_ROLE && !current.is_super_admin() {
            return Err(AppError::Forbidden);
        }
    }
    Ok(())
}

/// GET /api/system/user/list
pub async fn list_users(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<ApiResponse<Vec<user::UserResponse>>>> {
    require_permission(&state, &current, PERM_LIST).await?;
    let predicate = user_scope(&state, &current, PERM_LIST).await;

    let mut select = user::Entity::find().filter(predicate.to_condition(&user_target()));
    if let Some(name) = query.user_name.as_deref().filter(|n| !n.is_empty()) {
        select = select.filter(user::Column::UserName.contains(name));
    }
    if let Some(phone) = query.phone.as_deref().filter(|p| !p.is_empty()) {
        select = select.filter(user::Column::Phone.contains(phone));
    }
    if let Some(status) = query.status {
        select = select.filter(user::Column::Status.eq(i32::from(status)));
    }
    if let Some(dept_id) = query.dept_id {
        let mut subtree = maintainer::descendant_ids::<dept::Entity, _>(&*db, dept_id).await?;
        subtree.push(dept_id);
        select = select.filter(user::Column::DeptId.is_in(subtree));
    }

    let users = select
        .order_by_asc(user::Column::Id)
        .all(&*db)
        .await?
        .into_iter()
        .map(user::UserResponse::from)
        .collect();
    Ok(Json(ApiResponse::success(users)))
}

/// GET /api/system/user/:id
pub async fn get_user(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<user::UserResponse>>> {
    require_permission(&state, &current, PERM_QUERY).await?;
    let found = find_scoped_user(&state, &db, &current, PERM_QUERY, id).await?;
    let role_ids = association::role_ids_for_user(&*db, id).await?;
    Ok(Json(ApiResponse::success(
        user::UserResponse::from(found).with_roles(role_ids),
    )))
}

/// POST /api/system/user
pub async fn add_user(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current): Extension<CurrentUser>,
    Json(form): Json<UserForm>,
) -> AppResult<Json<ApiResponse<user::UserResponse>>> {
    require_permission(&state, &current, PERM_ADD).await?;
    validate_form(&form)?;
    let password = form
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("用户密码不能为空".to_string()))?;

    let predicate = user_scope(&state, &current, PERM_ADD).await;
    ensure_in_scope(&predicate, Some(form.dept_id), None)?;
    check_dept_exists(&db, form.dept_id).await?;
    check_name_unique(&db, &form).await?;
    check_assignable_roles(&db, &current, &form.role_ids).await?;

    let hashed = bcrypt::hash(password, BCRYPT_COST)?;

    let txn = db.begin().await?;
    let created = user::ActiveModel {
        user_name: Set(form.user_name),
        nick_name: Set(form.nick_name),
        password: Set(hashed),
        dept_id: Set(form.dept_id),
        email: Set(form.email),
        phone: Set(form.phone),
        status: Set(form.status.into()),
        last_login: Set(0),
        create_time: Set(chrono::Utc::now().timestamp()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    association::replace_user_roles(&txn, created.id, &form.role_ids).await?;
    txn.commit().await?;

    tracing::info!("User created by {}: {}", current.username, created.user_name);
    Ok(Json(ApiResponse::success(
        user::UserResponse::from(created).with_roles(form.role_ids),
    )))
}

/// PUT /api/system/user
pub async fn update_user(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current): Extension<CurrentUser>,
    Json(form): Json<UserForm>,
) -> AppResult<Json<ApiResponse<user::UserResponse>>> {
    require_permission(&state, &current, PERM_EDIT).await?;
    validate_form(&form)?;
    let id = form
        .id
        .ok_or_else(|| AppError::Validation("缺少用户ID".to_string()))?;
    ensure_mutable(&state, id)?;

    let existing = find_scoped_user(&state, &db, &current, PERM_EDIT, id).await?;
    if existing.dept_id != form.dept_id {
        let predicate = user_scope(&state, &current, PERM_EDIT).await;
        ensure_in_scope(&predicate, Some(form.dept_id), Some(id))?;
        check_dept_exists(&db, form.dept_id).await?;
    }
    check_name_unique(&db, &form).await?;
    check_assignable_roles(&db, &current, &form.role_ids).await?;

    let txn = db.begin().await?;
    let mut active = existing.into_active_model();
    active.user_name = Set(form.user_name);
    active.nick_name = Set(form.nick_name);
    active.dept_id = Set(form.dept_id);
    active.email = Set(form.email);
    active.phone = Set(form.phone);
    active.status = Set(form.status.into());
    let updated = active.update(&txn).await?;
    association::replace_user_roles(&txn, id, &form.role_ids).await?;
    txn.commit().await?;

    // Roles, department or status may have changed
    state.perm.invalidate_users(&[id]).await;

    tracing::info!("User updated by {}: {}", current.username, updated.user_name);
    Ok(Json(ApiResponse::success(
        user::UserResponse::from(updated).with_roles(form.role_ids),
    )))
}

/// PUT /api/system/user/authRole
pub async fn auth_role(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current): Extension<CurrentUser>,
    Json(form): Json<AuthRoleForm>,
) -> AppResult<Json<ApiResponse<()>>> {
    require_permission(&state, &current, PERM_EDIT).await?;
    ensure_mutable(&state, form.user_id)?;
    find_scoped_user(&state, &db, &current, PERM_EDIT, form.user_id).await?;
    check_assignable_roles(&db, &current, &form.role_ids).await?;

    let txn = db.begin().await?;
    association::replace_user_roles(&txn, form.user_id, &form.role_ids).await?;
    txn.commit().await?;

    state.perm.invalidate_users(&[form.user_id]).await;

    tracing::info!(
        "Roles of user {} set to {:?} by {}",
        form.user_id,
        form.role_ids,
        current.username
    );
    Ok(Json(ApiResponse::success_msg("success")))
}

/// PUT /api/system/user/changeStatus
pub async fn change_status(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current): Extension<CurrentUser>,
    Json(form): Json<StatusForm>,
) -> AppResult<Json<ApiResponse<()>>> {
    require_permission(&state, &current, PERM_EDIT).await?;
    ensure_mutable(&state, form.id)?;
    let existing = find_scoped_user(&state, &db, &current, PERM_EDIT, form.id).await?;

    let mut active = existing.into_active_model();
    active.status = Set(form.status.into());
    active.update(&*db).await?;

    state.perm.invalidate_users(&[form.id]).await;

    tracing::info!("User {} status set to {:?} by {}", form.id, form.status, current.username);
    Ok(Json(ApiResponse::success_msg("success")))
}

/// DELETE /api/system/user/:id
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<()>>> {
    require_permission(&state, &current, PERM_REMOVE).await?;
    if id == current.id {
        return Err(AppError::Validation("当前用户不能删除".to_string()));
    }
    ensure_mutable(&state, id)?;
    let existing = find_scoped_user(&state, &db, &current, PERM_REMOVE, id).await?;

    let txn = db.begin().await?;
    user_role::Entity::delete_many()
        .filter(user_role::Column::UserId.eq(id))
        .exec(&txn)
        .await?;
    user::Entity::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    state.perm.evict(id).await;

    tracing::info!("User deleted by {}: {}", current.username, existing.user_name);
    Ok(Json(ApiResponse::success_msg("success")))
}
