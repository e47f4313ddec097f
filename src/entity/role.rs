//! Role entity - 角色表
//!
//! 表名: sys_role

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::Status;
use crate::scope::DataScope;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_role")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(column_type = "String(Some(30))")]
    pub role_name: String,

    /// 角色权限字符串 (唯一)
    #[sea_orm(column_type = "String(Some(100))", unique)]
    pub role_key: String,

    /// 显示顺序
    pub role_sort: i32,

    /// 数据范围: 1=全部, 2=自定义, 3=本部门, 4=本部门及以下, 5=仅本人
    pub data_scope: i32,

    /// 菜单树选择项是否关联显示
    pub menu_check_strictly: bool,

    /// 部门树选择项是否关联显示
    pub dept_check_strictly: bool,

    /// 角色状态: 0=正常, 1=停用
    pub status: i32,

    #[sea_orm(column_type = "String(Some(500))", nullable)]
    pub remark: Option<String>,

    pub create_time: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn status(&self) -> Status {
        Status::from(self.status)
    }

    /// `None` for codes this build does not know
    pub fn data_scope(&self) -> Option<DataScope> {
        DataScope::from_code(self.data_scope)
    }
}
