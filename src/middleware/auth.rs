//! Authentication middleware
//!
//! Resolves the session's user id into a cached [`Principal`] and exposes it
//! to handlers as [`CurrentUser`].

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sea_orm::DatabaseConnection;
use std::ops::Deref;
use std::sync::Arc;
use tower_sessions::Session;

use crate::error::{AppError, AppResult};
use crate::principal::Principal;
use crate::state::AppState;

/// Session key for storing the user id
pub const SESSION_USER_KEY: &str = "user_id";
pub const SESSION_TIMESTAMP_KEY: &str = "timestamp";

/// Database connection wrapper for use in handlers via Extension
#[derive(Clone)]
pub struct DbConn(pub DatabaseConnection);

impl Deref for DbConn {
    type Target = DatabaseConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Extension to store current user in request
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    pub dept_id: i64,
    pub principal: Arc<Principal>,
}

impl CurrentUser {
    pub fn is_super_admin(&self) -> bool {
        self.principal.is_super_admin
    }
}

/// Paths that don't require authentication
fn is_public_path(path: &str) -> bool {
    // Only API routes are authenticated
    if !path.starts_with("/api") {
        return true;
    }
    path == "/api/login" || path == "/api/health"
}

/// Authentication middleware
pub async fn auth_layer(
    State(state): State<AppState>,
    session: Session,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    request.extensions_mut().insert(DbConn(state.db.clone()));

    if is_public_path(request.uri().path()) {
        return next.run(request).await;
    }

    let user_id: Option<i64> = session.get(SESSION_USER_KEY).await.unwrap_or(None);
    let Some(user_id) = user_id else {
        return AppError::Unauthorized.into_response();
    };

    match state.perm.principal(user_id).await {
        Ok(principal) if principal.is_enabled() => {
            let current_user = CurrentUser {
                id: principal.id,
                username: principal.user_name.clone(),
                dept_id: principal.own_dept_id,
                principal,
            };
            request.extensions_mut().insert(current_user);
            next.run(request).await
        }
        Ok(principal) => {
            tracing::warn!("Disabled user rejected: {}", principal.user_name);
            if let Err(e) = session.flush().await {
                tracing::error!("Failed to flush session: {}", e);
            }
            AppError::Unauthorized.into_response()
        }
        Err(AppError::NotFound(_)) => {
            tracing::warn!("User not found in database: {}", user_id);
            AppError::Unauthorized.into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Fails with `Forbidden` unless the user holds `permission`.
pub async fn require_permission(
    state: &AppState,
    user: &CurrentUser,
    permission: &str,
) -> AppResult<()> {
    if user.is_super_admin() || state.perm.check(user.id, permission).await {
        return Ok(());
    }
    tracing::warn!("Permission denied: {} lacks {}", user.username, permission);
    Err(AppError::Forbidden)
}
