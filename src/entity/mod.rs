//! Entity module - SeaORM 实体定义
//!
//! 层级表 (sys_dept, sys_menu) 与角色关联表 (sys_role_dept, sys_role_menu, sys_user_role)

use serde::{Deserialize, Serialize};

pub mod dept;
pub mod menu;
pub mod role;
pub mod role_dept;
pub mod role_menu;
pub mod user;
pub mod user_role;

/// 启用状态 (部门、菜单、角色、用户共用)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// 正常
    #[default]
    Enabled = 0,
    /// 停用
    Disabled = 1,
}

impl Status {
    pub fn is_enabled(self) -> bool {
        self == Status::Enabled
    }
}

/// Unknown stored codes read as disabled.
impl From<i32> for Status {
    fn from(value: i32) -> Self {
        match value {
            0 => Status::Enabled,
            _ => Status::Disabled,
        }
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status as i32
    }
}
