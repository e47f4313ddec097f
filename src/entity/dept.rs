//! Department entity - 部门表
//!
//! 表名: sys_dept

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::Status;
use crate::hierarchy::{AncestorPath, HierarchyNode, NodeRef, TreeEntity};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_dept")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 父部门ID (0 表示顶级部门)
    pub parent_id: i64,

    /// 祖级列表, 由 hierarchy::maintainer 维护
    #[sea_orm(column_type = "String(Some(512))")]
    pub ancestors: String,

    /// 部门名称
    #[sea_orm(column_type = "String(Some(64))")]
    pub dept_name: String,

    /// 显示顺序
    pub order_num: i32,

    /// 负责人
    #[sea_orm(column_type = "String(Some(32))", nullable)]
    pub leader: Option<String>,

    #[sea_orm(column_type = "String(Some(20))", nullable)]
    pub phone: Option<String>,

    #[sea_orm(column_type = "String(Some(64))", nullable)]
    pub email: Option<String>,

    /// 部门状态: 0=正常, 1=停用
    pub status: i32,

    /// 创建时间 (Unix 时间戳)
    pub create_time: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

// 自引用关系通过祖级列表处理

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn ancestor_path(&self) -> AncestorPath {
        AncestorPath::from_stored(self.ancestors.as_str())
    }

    pub fn status(&self) -> Status {
        Status::from(self.status)
    }
}

impl TreeEntity for Entity {
    const KIND: &'static str = "department";

    fn id_column() -> Column {
        Column::Id
    }

    fn parent_column() -> Column {
        Column::ParentId
    }

    fn ancestors_column() -> Column {
        Column::Ancestors
    }

    fn status_column() -> Column {
        Column::Status
    }

    fn node_ref(model: &Model) -> NodeRef {
        NodeRef {
            id: model.id,
            parent_id: model.parent_id,
            ancestors: model.ancestor_path(),
            status: model.status(),
        }
    }
}

impl From<Model> for HierarchyNode {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            parent_id: model.parent_id,
            status: Status::from(model.status),
            order_num: model.order_num,
            ancestors: model.ancestors,
            name: model.dept_name,
            kind: None,
            perms: None,
            children: Vec::new(),
        }
    }
}
