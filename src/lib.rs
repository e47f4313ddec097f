//! RBAC Admin - admin backend with hierarchical data scopes
//!
//! Departments and menus are trees kept consistent through a materialized
//! ancestor path. Roles grant menu permissions and a data scope; the scope
//! resolver turns a user's roles into a row filter for department-owned data.

pub mod association;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod handlers;
pub mod hierarchy;
pub mod middleware;
pub mod permission;
pub mod principal;
pub mod routes;
pub mod scope;
pub mod state;

// Re-export commonly used types
pub use config::Config;
pub use state::AppState;
