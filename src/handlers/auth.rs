//! Authentication handlers
//!
//! Implements login, logout, current user info and the router menu tree

use axum::{extract::State, response::Json, Extension};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tower_sessions::Session;

use crate::association;
use crate::entity::{menu, user, Status};
use crate::error::{AppError, AppResult, OptionExt};
use crate::hierarchy::{build_tree, HierarchyNode};
use crate::middleware::auth::{CurrentUser, SESSION_TIMESTAMP_KEY, SESSION_USER_KEY};
use crate::middleware::DbConn;
use crate::routes::ApiResponse;
use crate::state::AppState;

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// GET /api/getInfo response
#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub user: user::UserResponse,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(AppError::BadRequest("用户名或密码不能为空".to_string()));
    }

    let db_user = user::Entity::find()
        .filter(user::Column::UserName.eq(&req.username))
        .one(&state.db)
        .await?;

    let Some(db_user) = db_user else {
        tracing::warn!("Login failed: user not found - {}", req.username);
        return Err(AppError::BadRequest("用户名或密码错误".to_string()));
    };

    if !bcrypt::verify(&req.password, &db_user.password).unwrap_or(false) {
        tracing::warn!("Login failed: wrong password - {}", req.username);
        return Err(AppError::BadRequest("用户名或密码错误".to_string()));
    }

    if !db_user.status().is_enabled() {
        tracing::warn!("Login failed: user disabled - {}", req.username);
        return Err(AppError::BadRequest("用户已停用".to_string()));
    }

    let user_id = db_user.id;
    let mut active_model: user::ActiveModel = db_user.into();
    active_model.last_login = Set(chrono::Utc::now().timestamp());
    if let Err(e) = active_model.update(&state.db).await {
        tracing::error!("Failed to update last login: {}", e);
    }

    // Permissions are recomputed on every login
    state.perm.refresh_user(user_id).await?;

    session
        .insert(SESSION_USER_KEY, user_id)
        .await
        .map_err(|e| AppError::Internal(format!("failed to save session: {}", e)))?;
    if let Err(e) = session
        .insert(SESSION_TIMESTAMP_KEY, chrono::Utc::now().timestamp())
        .await
    {
        tracing::error!("Failed to save session timestamp: {}", e);
    }

    tracing::info!("User logged in: {}", req.username);
    Ok(Json(ApiResponse::success_msg("login success")))
}

/// POST /api/logout
pub async fn logout(
    State(state): State<AppState>,
    session: Session,
    Extension(current_user): Extension<CurrentUser>,
) -> AppResult<Json<ApiResponse<()>>> {
    session
        .flush()
        .await
        .map_err(|e| AppError::Internal(format!("failed to flush session: {}", e)))?;
    state.perm.evict(current_user.id).await;

    tracing::info!("User logged out: {}", current_user.username);
    Ok(Json(ApiResponse::success_msg("logout success")))
}

/// GET /api/getInfo
pub async fn get_info(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> AppResult<Json<ApiResponse<UserInfo>>> {
    let db_user = user::Entity::find_by_id(current_user.id)
        .one(&state.db)
        .await?
        .ok_or_not_found("用户不存在")?;
    let role_ids = association::role_ids_for_user(&state.db, current_user.id).await?;
    let authorities = state.perm.authorities(current_user.id).await;

    Ok(Json(ApiResponse::success(UserInfo {
        user: user::UserResponse::from(db_user).with_roles(role_ids),
        roles: authorities.roles.into_iter().collect(),
        permissions: authorities.permissions.into_iter().collect(),
    })))
}

/// GET /api/getRouters
///
/// Enabled, visible directories and menu items reachable by the user; buttons
/// are permission carriers only and never become routes.
pub async fn get_routers(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
) -> AppResult<Json<ApiResponse<Vec<HierarchyNode>>>> {
    let menus = menu::Entity::find()
        .filter(menu::Column::Status.eq(i32::from(Status::Enabled)))
        .filter(menu::Column::Visible.eq(true))
        .filter(menu::Column::MenuType.ne(menu::MenuKind::Button.code()))
        .order_by_asc(menu::Column::ParentId)
        .order_by_asc(menu::Column::OrderNum)
        .all(&*db)
        .await?;

    let menus = if current_user.is_super_admin() {
        menus
    } else {
        let role_ids: Vec<i64> = current_user
            .principal
            .roles
            .iter()
            .filter(|r| r.is_enabled())
            .map(|r| r.id)
            .collect();
        let granted: HashSet<i64> = association::menu_ids_for_roles(&*db, &role_ids)
            .await?
            .into_iter()
            .collect();
        menus.into_iter().filter(|m| granted.contains(&m.id)).collect()
    };

    let nodes = menus.into_iter().map(HierarchyNode::from).collect();
    Ok(Json(ApiResponse::success(build_tree(nodes))))
}
