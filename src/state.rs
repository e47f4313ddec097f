use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::Config;
use crate::permission::PermissionCache;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: DatabaseConnection,
    /// Permission cache; admin handlers invalidate it before responding
    pub perm: PermissionCache,
    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: DatabaseConnection, perm: PermissionCache, config: Config) -> Self {
        Self {
            db,
            perm,
            config: Arc::new(config),
        }
    }

    pub fn super_admin_id(&self) -> i64 {
        self.config.super_admin_id
    }
}
