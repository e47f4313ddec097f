//! Role handlers
//!
//! Roles bind menus (permissions) and a data scope. A successful write
//! recomputes the cached grants of the role's holders before responding.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::association;
use crate::entity::{role, Status};
use crate::error::{AppError, AppResult, OptionExt};
use crate::handlers::department::{scoped_depts, DeptQuery};
use crate::hierarchy::{build_tree_select, HierarchyNode, TreeSelect};
use crate::middleware::auth::{require_permission, CurrentUser};
use crate::middleware::DbConn;
use crate::permission::SUPER_ADMIN_ROLE;
use crate::routes::ApiResponse;
use crate::scope::DataScope;
use crate::state::AppState;

const PERM_LIST: &str = "system:role:list";
const PERM_QUERY: &str = "system:role:query";
const PERM_ADD: &str = "system:role:add";
const PERM_EDIT: &str = "system:role:edit";
const PERM_REMOVE: &str = "system:role:remove";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleQuery {
    pub role_name: Option<String>,
    pub role_key: Option<String>,
    pub status: Option<Status>,
}

/// Add/update request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleForm {
    pub id: Option<i64>,
    pub role_name: String,
    pub role_key: String,
    #[serde(default)]
    pub role_sort: i32,
    pub data_scope: Option<DataScope>,
    #[serde(default = "default_true")]
    pub menu_check_strictly: bool,
    #[serde(default = "default_true")]
    pub dept_check_strictly: bool,
    #[serde(default)]
    pub status: Status,
    pub remark: Option<String>,
    #[serde(default)]
    pub menu_ids: Vec<i64>,
}

fn default_true() -> bool {
    true
}

/// PUT /api/system/role/dataScope body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataScopeForm {
    pub id: i64,
    pub data_scope: DataScope,
    #[serde(default)]
    pub dept_ids: Vec<i64>,
    pub dept_check_strictly: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct StatusForm {
    pub id: i64,
    pub status: Status,
}

/// Role detail with its grants
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDetail {
    #[serde(flatten)]
    pub role: role::Model,
    pub menu_ids: Vec<i64>,
    pub dept_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDeptTree {
    pub checked_keys: Vec<i64>,
    pub depts: Vec<TreeSelect>,
}

fn validate_form(form: &RoleForm) -> AppResult<()> {
    if form.role_name.trim().is_empty() {
        return Err(AppError::Validation("角色名称不能为空".to_string()));
    }
    if form.role_key.trim().is_empty() {
        return Err(AppError::Validation("权限字符不能为空".to_string()));
    }
    Ok(())
}

async fn check_unique(db: &DbConn, form: &RoleForm) -> AppResult<()> {
    let mut by_name = role::Entity::find().filter(role::Column::RoleName.eq(&form.role_name));
    let mut by_key = role::Entity::find().filter(role::Column::RoleKey.eq(&form.role_key));
    if let Some(id) = form.id {
        by_name = by_name.filter(role::Column::Id.ne(id));
        by_key = by_key.filter(role::Column::Id.ne(id));
    }
    if by_name.one(&**db).await?.is_some() {
        return Err(AppError::Conflict(format!("角色名称'{}'已存在", form.role_name)));
    }
    if by_key.one(&**db).await?.is_some() {
        return Err(AppError::Conflict(format!("角色权限'{}'已存在", form.role_key)));
    }
    Ok(())
}

async fn find_role(db: &DbConn, id: i64) -> AppResult<role::Model> {
    role::Entity::find_by_id(id)
        .one(&**db)
        .await?
        .ok_or_not_found("角色不存在")
}

/// The built-in super admin role cannot be modified
fn ensure_mutable(role: &role::Model) -> AppResult<()> {
    if role.role_key == SUPER_ADMIN_ROLE {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Recomputes the cached grants of every user holding `role_id`
async fn refresh_holders(state: &AppState, db: &DbConn, role_id: i64) -> AppResult<()> {
    let holders = association::user_ids_for_role(&**db, role_id).await?;
    state.perm.invalidate_users(&holders).await;
    Ok(())
}

/// GET /api/system/role/list
pub async fn list_roles(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<RoleQuery>,
) -> AppResult<Json<ApiResponse<Vec<role::Model>>>> {
    require_permission(&state, &user, PERM_LIST).await?;

    let mut select = role::Entity::find();
    if let Some(name) = query.role_name.as_deref().filter(|n| !n.is_empty()) {
        select = select.filter(role::Column::RoleName.contains(name));
    }
    if let Some(key) = query.role_key.as_deref().filter(|k| !k.is_empty()) {
        select = select.filter(role::Column::RoleKey.contains(key));
    }
    if let Some(status) = query.status {
        select = select.filter(role::Column::Status.eq(i32::from(status)));
    }
    let roles = select.order_by_asc(role::Column::RoleSort).all(&*db).await?;
    Ok(Json(ApiResponse::success(roles)))
}

/// GET /api/system/role/:id
pub async fn get_role(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<RoleDetail>>> {
    require_permission(&state, &user, PERM_QUERY).await?;
    let role = find_role(&db, id).await?;
    let menu_ids = association::granted_menu_ids(&*db, id).await?;
    let dept_ids = association::granted_dept_ids(&*db, id).await?;
    Ok(Json(ApiResponse::success(RoleDetail {
        role,
        menu_ids,
        dept_ids,
    })))
}

/// POST /api/system/role
pub async fn add_role(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Json(form): Json<RoleForm>,
) -> AppResult<Json<ApiResponse<role::Model>>> {
    require_permission(&state, &user, PERM_ADD).await?;
    validate_form(&form)?;
    check_unique(&db, &form).await?;

    let txn = db.begin().await?;
    let created = role::ActiveModel {
        role_name: Set(form.role_name),
        role_key: Set(form.role_key),
        role_sort: Set(form.role_sort),
        data_scope: Set(form.data_scope.unwrap_or(DataScope::All).code()),
        menu_check_strictly: Set(form.menu_check_strictly),
        dept_check_strictly: Set(form.dept_check_strictly),
        status: Set(form.status.into()),
        remark: Set(form.remark),
        create_time: Set(chrono::Utc::now().timestamp()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    association::replace_role_menus(&txn, created.id, &form.menu_ids).await?;
    txn.commit().await?;

    tracing::info!("Role created by {}: {}", user.username, created.role_key);
    Ok(Json(ApiResponse::success(created)))
}

/// PUT /api/system/role
pub async fn update_role(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Json(form): Json<RoleForm>,
) -> AppResult<Json<ApiResponse<role::Model>>> {
    require_permission(&state, &user, PERM_EDIT).await?;
    validate_form(&form)?;
    let id = form
        .id
        .ok_or_else(|| AppError::Validation("缺少角色ID".to_string()))?;
    let existing = find_role(&db, id).await?;
    ensure_mutable(&existing)?;
    check_unique(&db, &form).await?;

    let txn = db.begin().await?;
    let mut active = existing.into_active_model();
    active.role_name = Set(form.role_name);
    active.role_key = Set(form.role_key);
    active.role_sort = Set(form.role_sort);
    if let Some(scope) = form.data_scope {
        active.data_scope = Set(scope.code());
    }
    active.menu_check_strictly = Set(form.menu_check_strictly);
    active.dept_check_strictly = Set(form.dept_check_strictly);
    active.status = Set(form.status.into());
    active.remark = Set(form.remark);
    let updated = active.update(&txn).await?;
    association::replace_role_menus(&txn, id, &form.menu_ids).await?;
    txn.commit().await?;

    refresh_holders(&state, &db, id).await?;

    tracing::info!("Role updated by {}: {}", user.username, updated.role_key);
    Ok(Json(ApiResponse::success(updated)))
}

/// PUT /api/system/role/dataScope
///
/// Department grants only exist for the custom scope; switching to any other
/// scope clears them.
pub async fn update_data_scope(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Json(form): Json<DataScopeForm>,
) -> AppResult<Json<ApiResponse<role::Model>>> {
    require_permission(&state, &user, PERM_EDIT).await?;
    let existing = find_role(&db, form.id).await?;
    ensure_mutable(&existing)?;

    let dept_ids: &[i64] = if form.data_scope == DataScope::Custom {
        &form.dept_ids
    } else {
        &[]
    };

    let txn = db.begin().await?;
    let mut active = existing.into_active_model();
    active.data_scope = Set(form.data_scope.code());
    if let Some(strict) = form.dept_check_strictly {
        active.dept_check_strictly = Set(strict);
    }
    let updated = active.update(&txn).await?;
    association::replace_role_depts(&txn, form.id, dept_ids).await?;
    txn.commit().await?;

    refresh_holders(&state, &db, form.id).await?;

    tracing::info!(
        "Data scope of role {} set to {:?} by {}",
        updated.role_key,
        form.data_scope,
        user.username
    );
    Ok(Json(ApiResponse::success(updated)))
}

/// PUT /api/system/role/changeStatus
pub async fn change_status(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Json(form): Json<StatusForm>,
) -> AppResult<Json<ApiResponse<()>>> {
    require_permission(&state, &user, PERM_EDIT).await?;
    let existing = find_role(&db, form.id).await?;
    ensure_mutable(&existing)?;

    let mut active = existing.into_active_model();
    active.status = Set(form.status.into());
    active.update(&*db).await?;

    refresh_holders(&state, &db, form.id).await?;

    tracing::info!("Role {} status set to {:?} by {}", form.id, form.status, user.username);
    Ok(Json(ApiResponse::success_msg("success")))
}

/// DELETE /api/system/role/:id
pub async fn delete_role(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<()>>> {
    require_permission(&state, &user, PERM_REMOVE).await?;
    let existing = find_role(&db, id).await?;
    ensure_mutable(&existing)?;
    if association::role_in_use(&*db, id).await? {
        return Err(AppError::Conflict(format!(
            "角色'{}'已分配,不能删除",
            existing.role_name
        )));
    }

    let txn = db.begin().await?;
    association::delete_role_grants(&txn, id).await?;
    role::Entity::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    tracing::info!("Role deleted by {}: {}", user.username, existing.role_key);
    Ok(Json(ApiResponse::success_msg("success")))
}

/// GET /api/system/role/deptTree/:roleId
///
/// The department tree offered for a custom scope is limited to what the
/// caller can see.
pub async fn dept_tree(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Path(role_id): Path<i64>,
) -> AppResult<Json<ApiResponse<RoleDeptTree>>> {
    require_permission(&state, &user, PERM_QUERY).await?;
    let role = find_role(&db, role_id).await?;

    let depts = scoped_depts(&state, &db, &user, PERM_QUERY, &DeptQuery::default()).await?;
    let nodes: Vec<HierarchyNode> = depts.into_iter().map(HierarchyNode::from).collect();
    let granted = association::granted_dept_ids(&*db, role_id).await?;
    let checked_keys = association::checked_keys(&granted, &nodes, role.dept_check_strictly);

    Ok(Json(ApiResponse::success(RoleDeptTree {
        checked_keys,
        depts: build_tree_select(nodes),
    })))
}
