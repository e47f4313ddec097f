//! Request handlers module

pub mod auth;
pub mod department;
pub mod menu;
pub mod role;
pub mod user;
