//! Department handlers
//!
//! Listings are filtered by the caller's data scope; writes go through the
//! ancestor maintainer so `ancestors` is never set by hand.

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
use crate::entity::{dept, role_dept, Status};
use crate::error::{AppError, AppResult, OptionExt};
use crate::hierarchy::{build_tree_select, maintainer, HierarchyNode, TreeSelect, ROOT_PARENT_ID};
use crate::middleware::auth::{require_permission, CurrentUser};
use crate::middleware::DbConn;
use crate::routes::ApiResponse;
use crate::scope::{ensure_in_scope, resolve_scope, ScopeTarget};
use crate::state::AppState;

const PERM_LIST: &str = "system:dept:list";
const PERM_QUERY: &str = "system:dept:query";
const PERM_ADD: &str = "system:dept:add";
const PERM_EDIT: &str = "system:dept:edit";
const PERM_REMOVE: &str = "system:dept:remove";

/// Departments are scoped on their own id
pub(crate) fn dept_target() -> ScopeTarget {
    ScopeTarget::new((dept::Entity, dept::Column::Id))
}

/// List filters
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeptQuery {
    pub dept_name: Option<String>,
    pub status: Option<Status>,
}

/// Add/update request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeptForm {
    pub id: Option<i64>,
    #[serde(default)]
    pub parent_id: i64,
    pub dept_name: String,
    #[serde(default)]
    pub order_num: i32,
    pub leader: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub status: Status,
}

/// Scoped, filtered department rows in display order
pub(crate) async fn scoped_depts(
    state: &AppState,
    db: &DbConn,
    user: &CurrentUser,
    permission: &str,
    query: &DeptQuery,
) -> AppResult<Vec<dept::Model>> {
    let predicate = resolve_scope(&state.db, &user.principal, permission, &dept_target()).await;

    let mut select = dept::Entity::find().filter(predicate.to_condition(&dept_target()));
    if let Some(name) = query.dept_name.as_deref().filter(|n| !n.is_empty()) {
        select = select.filter(dept::Column::DeptName.contains(name));
    }
    if let Some(status) = query.status {
        select = select.filter(dept::Column::Status.eq(i32::from(status)));
    }

    Ok(select
        .order_by_asc(dept::Column::ParentId)
        .order_by_asc(dept::Column::OrderNum)
        .all(&**db)
        .await?)
}

async fn check_dept_scope(
    state: &AppState,
    user: &CurrentUser,
    permission: &str,
    dept_id: i64,
) -> AppResult<()> {
    let predicate = resolve_scope(&state.db, &user.principal, permission, &dept_target()).await;
    ensure_in_scope(&predicate, Some(dept_id), None)
}

async fn check_name_unique(db: &DbConn, form: &DeptForm) -> AppResult<()> {
    let mut select = dept::Entity::find()
        .filter(dept::Column::DeptName.eq(&form.dept_name))
        .filter(dept::Column::ParentId.eq(form.parent_id));
    if let Some(id) = form.id {
        select = select.filter(dept::Column::Id.ne(id));
    }
    if select.one(&**db).await?.is_some() {
        return Err(AppError::Conflict(format!("部门名称'{}'已存在", form.dept_name)));
    }
    Ok(())
}

fn validate_form(form: &DeptForm) -> AppResult<()> {
    if form.dept_name.trim().is_empty() {
        return Err(AppError::Validation("部门名称不能为空".to_string()));
    }
    if form.dept_name.chars().count() > 30 {
        return Err(AppError::Validation("部门名称不能超过30个字符".to_string()));
    }
    Ok(())
}

/// GET /api/system/dept/list
pub async fn list_depts(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<DeptQuery>,
) -> AppResult<Json<ApiResponse<Vec<dept::Model>>>> {
    require_permission(&state, &user, PERM_LIST).await?;
    let depts = scoped_depts(&state, &db, &user, PERM_LIST, &query).await?;
    Ok(Json(ApiResponse::success(depts)))
}

/// GET /api/system/dept/list/exclude/:id
///
/// Candidate parents for `id`: the scoped list without the node and its subtree.
pub async fn list_excluding(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<Vec<dept::Model>>>> {
    require_permission(&state, &user, PERM_LIST).await?;
    let depts = scoped_depts(&state, &db, &user, PERM_LIST, &DeptQuery::default()).await?;
    let depts = depts
        .into_iter()
        .filter(|d| d.id != id && !d.ancestor_path().contains(id))
        .collect();
    Ok(Json(ApiResponse::success(depts)))
}

/// GET /api/system/dept/treeselect
pub async fn tree_select(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<DeptQuery>,
) -> AppResult<Json<ApiResponse<Vec<TreeSelect>>>> {
    require_permission(&state, &user, PERM_LIST).await?;
    let depts = scoped_depts(&state, &db, &user, PERM_LIST, &query).await?;
    let nodes: Vec<HierarchyNode> = depts.into_iter().map(HierarchyNode::from).collect();
    Ok(Json(ApiResponse::success(build_tree_select(nodes))))
}

/// GET /api/system/dept/:id
pub async fn get_dept(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<dept::Model>>> {
    require_permission(&state, &user, PERM_QUERY).await?;
    check_dept_scope(&state, &user, PERM_QUERY, id).await?;

    let dept = dept::Entity::find_by_id(id)
        .one(&*db)
        .await?
        .ok_or_not_found("部门不存在")?;
    Ok(Json(ApiResponse::success(dept)))
}

/// POST /api/system/dept
pub async fn add_dept(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Json(form): Json<DeptForm>,
) -> AppResult<Json<ApiResponse<dept::Model>>> {
    require_permission(&state, &user, PERM_ADD).await?;
    validate_form(&form)?;

    if form.parent_id == ROOT_PARENT_ID {
        // Only an unrestricted scope may add top-level departments
        let predicate = resolve_scope(&state.db, &user.principal, PERM_ADD, &dept_target()).await;
        if !predicate.is_unrestricted() {
            return Err(AppError::DataPermission);
        }
    } else {
        check_dept_scope(&state, &user, PERM_ADD, form.parent_id).await?;
        let parent = dept::Entity::find_by_id(form.parent_id)
            .one(&*db)
            .await?
            .ok_or_not_found("上级部门不存在")?;
        if !parent.status().is_enabled() {
            return Err(AppError::Validation("部门停用，不允许新增".to_string()));
        }
    }
    check_name_unique(&db, &form).await?;

    let active = dept::ActiveModel {
        dept_name: Set(form.dept_name.clone()),
        order_num: Set(form.order_num),
        leader: Set(form.leader),
        phone: Set(form.phone),
        email: Set(form.email),
        status: Set(form.status.into()),
        create_time: Set(chrono::Utc::now().timestamp()),
        ..Default::default()
    };
    let created = maintainer::insert::<dept::Entity, _, _>(&*db, active, form.parent_id).await?;

    tracing::info!("Department created by {}: {}", user.username, created.dept_name);
    Ok(Json(ApiResponse::success(created)))
}

/// PUT /api/system/dept
pub async fn update_dept(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Json(form): Json<DeptForm>,
) -> AppResult<Json<ApiResponse<dept::Model>>> {
    require_permission(&state, &user, PERM_EDIT).await?;
    validate_form(&form)?;
    let id = form
        .id
        .ok_or_else(|| AppError::Validation("缺少部门ID".to_string()))?;
    check_dept_scope(&state, &user, PERM_EDIT, id).await?;

    if form.parent_id == id {
        return Err(AppError::Validation("上级部门不能是自己".to_string()));
    }
    let existing = dept::Entity::find_by_id(id)
        .one(&*db)
        .await?
        .ok_or_not_found("部门不存在")?;
    check_name_unique(&db, &form).await?;

    if !form.status.is_enabled()
        && maintainer::count_enabled_descendants::<dept::Entity, _>(&*db, id).await? > 0
    {
        return Err(AppError::Validation("该部门包含未停用的子部门".to_string()));
    }

    let txn = db.begin().await?;

    if existing.parent_id != form.parent_id {
        maintainer::reparent_in::<dept::Entity, _>(&txn, id, form.parent_id).await?;
    }

    // Reload: reparent may have rewritten parent and ancestors
    let current = dept::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_not_found("部门不存在")?;
    let path = current.ancestor_path();
    let mut active = current.into_active_model();
    active.dept_name = Set(form.dept_name);
    active.order_num = Set(form.order_num);
    active.leader = Set(form.leader);
    active.phone = Set(form.phone);
    active.email = Set(form.email);
    active.status = Set(form.status.into());
    let updated = active.update(&txn).await?;

    // A move of an enabled node already reactivated its new ancestors
    if form.status.is_enabled() && !existing.status().is_enabled() {
        maintainer::reactivate_ancestors::<dept::Entity, _>(&txn, &path).await?;
    }

    txn.commit().await?;

    tracing::info!("Department updated by {}: {}", user.username, updated.dept_name);
    Ok(Json(ApiResponse::success(updated)))
}

/// DELETE /api/system/dept/:id
pub async fn delete_dept(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<()>>> {
    require_permission(&state, &user, PERM_REMOVE).await?;
    check_dept_scope(&state, &user, PERM_REMOVE, id).await?;

    if maintainer::has_children::<dept::Entity, _>(&*db, id).await? {
        return Err(AppError::Conflict("存在下级部门,不允许删除".to_string()));
    }
    if association::dept_has_users(&*db, id).await? {
        return Err(AppError::Conflict("部门存在用户,不允许删除".to_string()));
    }

    let dept = dept::Entity::find_by_id(id)
        .one(&*db)
        .await?
        .ok_or_not_found("部门不存在")?;

    let txn = db.begin().await?;
    role_dept::Entity::delete_many()
        .filter(role_dept::Column::DeptId.eq(id))
        .exec(&txn)
        .await?;
    dept::Entity::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    tracing::info!("Department deleted by {}: {}", user.username, dept.dept_name);
    Ok(Json(ApiResponse::success_msg("success")))
}
