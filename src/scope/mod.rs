//! Row-level data scope
//!
//! A role's [`DataScope`] decides which department- or user-owned rows its
//! holders may see. [`resolve_scope`] turns a principal's roles into one
//! [`Predicate`], which listing queries AND into their filter.

use serde::{Deserialize, Serialize};

pub mod predicate;
pub mod resolver;

pub use predicate::{ensure_in_scope, Predicate, ScopeTarget};
pub use resolver::{resolve_scope, ScopeSource};

/// Data scope attached to a role, persisted as its numeric code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataScope {
    /// 全部数据
    All,
    /// 自定数据 (sys_role_dept)
    Custom,
    /// 本部门
    Dept,
    /// 本部门及以下
    DeptAndChild,
    /// 仅本人
    #[serde(rename = "SELF")]
    SelfOnly,
}

impl DataScope {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(DataScope::All),
            2 => Some(DataScope::Custom),
            3 => Some(DataScope::Dept),
            4 => Some(DataScope::DeptAndChild),
            5 => Some(DataScope::SelfOnly),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            DataScope::All => 1,
            DataScope::Custom => 2,
            DataScope::Dept => 3,
            DataScope::DeptAndChild => 4,
            DataScope::SelfOnly => 5,
        }
    }
}
