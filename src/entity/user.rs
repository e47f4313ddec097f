//! User entity - 用户表
//!
//! 表名: sys_user

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::Status;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_user")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 用户名 (唯一)
    #[sea_orm(column_type = "String(Some(30))", unique)]
    pub user_name: String,

    /// 昵称
    #[sea_orm(column_type = "String(Some(30))")]
    pub nick_name: String,

    /// 密码 (bcrypt 哈希)
    #[sea_orm(column_type = "String(Some(128))")]
    #[serde(skip_serializing)]
    pub password: String,

    /// 所属部门ID
    pub dept_id: i64,

    #[sea_orm(column_type = "String(Some(64))", nullable)]
    pub email: Option<String>,

    #[sea_orm(column_type = "String(Some(20))", nullable)]
    pub phone: Option<String>,

    /// 用户状态: 0=正常, 1=停用
    pub status: i32,

    /// 最后登录时间 (Unix 时间戳)
    pub last_login: i64,

    pub create_time: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

// 跨模块关系通过手动查询处理，避免循环依赖

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn status(&self) -> Status {
        Status::from(self.status)
    }
}

/// 用户响应 (不含密码)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i64,
    pub user_name: String,
    pub nick_name: String,
    pub dept_id: i64,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Status,
    pub last_login: i64,
    /// 角色ID (由 handler 从 sys_user_role 填充)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub role_ids: Vec<i64>,
}

impl From<Model> for UserResponse {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            user_name: model.user_name,
            nick_name: model.nick_name,
            dept_id: model.dept_id,
            email: model.email,
            phone: model.phone,
            status: Status::from(model.status),
            last_login: model.last_login,
            role_ids: Vec::new(),
        }
    }
}

impl UserResponse {
    pub fn with_roles(mut self, role_ids: Vec<i64>) -> Self {
        self.role_ids = role_ids;
        self
    }
}
