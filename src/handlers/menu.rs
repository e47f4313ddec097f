//! Menu handlers
//!
//! Menus carry the permission strings. Any edit that can change what a role
//! grants recomputes the permission cache before responding.

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
use std::collections::HashSet;

use crate::association;
use crate::entity::{menu, role, Status};
use crate::error::{AppError, AppResult, OptionExt};
use crate::hierarchy::{build_tree_select, maintainer, HierarchyNode, TreeSelect};
use crate::middleware::auth::{require_permission, CurrentUser};
use crate::middleware::DbConn;
use crate::routes::ApiResponse;
use crate::state::AppState;

const PERM_LIST: &str = "system:menu:list";
const PERM_QUERY: &str = "system:menu:query";
const PERM_ADD: &str = "system:menu:add";
const PERM_EDIT: &str = "system:menu:edit";
const PERM_REMOVE: &str = "system:menu:remove";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuQuery {
    pub menu_name: Option<String>,
    pub status: Option<Status>,
}

/// Add/update request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuForm {
    pub id: Option<i64>,
    #[serde(default)]
    pub parent_id: i64,
    pub menu_name: String,
    #[serde(default)]
    pub order_num: i32,
    #[serde(default)]
    pub path: String,
    pub component: Option<String>,
    /// M = directory, C = menu item, F = button
    pub menu_type: String,
    #[serde(default)]
    pub perms: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub icon: String,
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleMenuTree {
    pub checked_keys: Vec<i64>,
    pub menus: Vec<TreeSelect>,
}

/// Menus the user may see: all of them for the super admin, otherwise those
/// granted to the user's enabled roles.
async fn visible_menus(
    db: &DbConn,
    user: &CurrentUser,
    query: &MenuQuery,
) -> AppResult<Vec<menu::Model>> {
    let mut select = menu::Entity::find();
    if let Some(name) = query.menu_name.as_deref().filter(|n| !n.is_empty()) {
        select = select.filter(menu::Column::MenuName.contains(name));
    }
    if let Some(status) = query.status {
        select = select.filter(menu::Column::Status.eq(i32::from(status)));
    }
    let menus = select
        .order_by_asc(menu::Column::ParentId)
        .order_by_asc(menu::Column::OrderNum)
        .all(&**db)
        .await?;

    if user.is_super_admin() {
        return Ok(menus);
    }

    let role_ids: Vec<i64> = user
        .principal
        .roles
        .iter()
        .filter(|r| r.is_enabled())
        .map(|r| r.id)
        .collect();
    let granted: HashSet<i64> = association::menu_ids_for_roles(&**db, &role_ids)
        .await?
        .into_iter()
        .collect();
    Ok(menus.into_iter().filter(|m| granted.contains(&m.id)).collect())
}

fn validate_form(form: &MenuForm) -> AppResult<menu::MenuKind> {
    if form.menu_name.trim().is_empty() {
        return Err(AppError::Validation("菜单名称不能为空".to_string()));
    }
    menu::MenuKind::from_code(&form.menu_type)
        .ok_or_else(|| AppError::Validation(format!("未知菜单类型'{}'", form.menu_type)))
}

async fn check_name_unique(db: &DbConn, form: &MenuForm) -> AppResult<()> {
    let mut select = menu::Entity::find()
        .filter(menu::Column::MenuName.eq(&form.menu_name))
        .filter(menu::Column::ParentId.eq(form.parent_id));
    if let Some(id) = form.id {
        select = select.filter(menu::Column::Id.ne(id));
    }
    if select.one(&**db).await?.is_some() {
        return Err(AppError::Conflict(format!("菜单名称'{}'已存在", form.menu_name)));
    }
    Ok(())
}

/// GET /api/system/menu/list
pub async fn list_menus(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<MenuQuery>,
) -> AppResult<Json<ApiResponse<Vec<menu::Model>>>> {
    require_permission(&state, &user, PERM_LIST).await?;
    let menus = visible_menus(&db, &user, &query).await?;
    Ok(Json(ApiResponse::success(menus)))
}

/// GET /api/system/menu/treeselect
pub async fn tree_select(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<MenuQuery>,
) -> AppResult<Json<ApiResponse<Vec<TreeSelect>>>> {
    require_permission(&state, &user, PERM_LIST).await?;
    let menus = visible_menus(&db, &user, &query).await?;
    let nodes: Vec<HierarchyNode> = menus.into_iter().map(HierarchyNode::from).collect();
    Ok(Json(ApiResponse::success(build_tree_select(nodes))))
}

/// GET /api/system/menu/roleMenuTreeselect/:roleId
pub async fn role_menu_tree(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Path(role_id): Path<i64>,
) -> AppResult<Json<ApiResponse<RoleMenuTree>>> {
    require_permission(&state, &user, PERM_LIST).await?;
    let role = role::Entity::find_by_id(role_id)
        .one(&*db)
        .await?
        .ok_or_not_found("角色不存在")?;

    let menus = visible_menus(&db, &user, &MenuQuery::default()).await?;
    let nodes: Vec<HierarchyNode> = menus.into_iter().map(HierarchyNode::from).collect();
    let granted = association::granted_menu_ids(&*db, role_id).await?;
    let checked_keys = association::checked_keys(&granted, &nodes, role.menu_check_strictly);

    Ok(Json(ApiResponse::success(RoleMenuTree {
        checked_keys,
        menus: build_tree_select(nodes),
    })))
}

/// GET /api/system/menu/:id
pub async fn get_menu(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<menu::Model>>> {
    require_permission(&state, &user, PERM_QUERY).await?;
    let menu = menu::Entity::find_by_id(id)
        .one(&*db)
        .await?
        .ok_or_not_found("菜单不存在")?;
    Ok(Json(ApiResponse::success(menu)))
}

/// POST /api/system/menu
pub async fn add_menu(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Json(form): Json<MenuForm>,
) -> AppResult<Json<ApiResponse<menu::Model>>> {
    require_permission(&state, &user, PERM_ADD).await?;
    let kind = validate_form(&form)?;
    check_name_unique(&db, &form).await?;

    let active = menu::ActiveModel {
        menu_name: Set(form.menu_name),
        order_num: Set(form.order_num),
        path: Set(form.path),
        component: Set(form.component),
        menu_type: Set(kind.code().to_string()),
        perms: Set(form.perms),
        visible: Set(form.visible),
        status: Set(form.status.into()),
        icon: Set(form.icon),
        create_time: Set(chrono::Utc::now().timestamp()),
        ..Default::default()
    };
    let created = maintainer::insert::<menu::Entity, _, _>(&*db, active, form.parent_id).await?;

    tracing::info!("Menu created by {}: {}", user.username, created.menu_name);
    Ok(Json(ApiResponse::success(created)))
}

/// PUT /api/system/menu
pub async fn update_menu(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Json(form): Json<MenuForm>,
) -> AppResult<Json<ApiResponse<menu::Model>>> {
    require_permission(&state, &user, PERM_EDIT).await?;
    let kind = validate_form(&form)?;
    let id = form
        .id
        .ok_or_else(|| AppError::Validation("缺少菜单ID".to_string()))?;
    if form.parent_id == id {
        return Err(AppError::Validation("上级菜单不能选择自己".to_string()));
    }
    let existing = menu::Entity::find_by_id(id)
        .one(&*db)
        .await?
        .ok_or_not_found("菜单不存在")?;
    check_name_unique(&db, &form).await?;

    let txn = db.begin().await?;

    if existing.parent_id != form.parent_id {
        maintainer::reparent_in::<menu::Entity, _>(&txn, id, form.parent_id).await?;
    }

    let current = menu::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_not_found("菜单不存在")?;
    let path = current.ancestor_path();
    let mut active = current.into_active_model();
    active.menu_name = Set(form.menu_name);
    active.order_num = Set(form.order_num);
    active.path = Set(form.path);
    active.component = Set(form.component);
    active.menu_type = Set(kind.code().to_string());
    active.perms = Set(form.perms);
    active.visible = Set(form.visible);
    active.status = Set(form.status.into());
    active.icon = Set(form.icon);
    let updated = active.update(&txn).await?;

    // A move of an enabled node already reactivated its new ancestors
    if form.status.is_enabled() && !existing.status().is_enabled() {
        maintainer::reactivate_ancestors::<menu::Entity, _>(&txn, &path).await?;
    }

    txn.commit().await?;

    // Permission strings or menu status may have changed
    state.perm.invalidate_all().await;

    tracing::info!("Menu updated by {}: {}", user.username, updated.menu_name);
    Ok(Json(ApiResponse::success(updated)))
}

/// DELETE /api/system/menu/:id
pub async fn delete_menu(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<()>>> {
    require_permission(&state, &user, PERM_REMOVE).await?;

    if maintainer::has_children::<menu::Entity, _>(&*db, id).await? {
        return Err(AppError::Conflict("存在子菜单,不允许删除".to_string()));
    }
    if association::menu_is_granted(&*db, id).await? {
        return Err(AppError::Conflict("菜单已分配,不允许删除".to_string()));
    }

    let result = menu::Entity::delete_by_id(id).exec(&*db).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound("菜单不存在".to_string()));
    }

    tracing::info!("Menu {} deleted by {}", id, user.username);
    Ok(Json(ApiResponse::success_msg("success")))
}
