//! Menu entity - 菜单权限表
//!
//! 表名: sys_menu

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::Status;
use crate::hierarchy::{AncestorPath, HierarchyNode, NodeRef, TreeEntity};

/// 菜单类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuKind {
    /// 目录 (M)
    Directory,
    /// 菜单 (C)
    Item,
    /// 按钮 (F)
    Button,
}

impl MenuKind {
    pub fn code(self) -> &'static str {
        match self {
            MenuKind::Directory => "M",
            MenuKind::Item => "C",
            MenuKind::Button => "F",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(MenuKind::Directory),
            "C" => Some(MenuKind::Item),
            "F" => Some(MenuKind::Button),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sys_menu")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// 父菜单ID (0 表示顶级菜单)
    pub parent_id: i64,

    /// 祖级列表, 由 hierarchy::maintainer 维护
    #[sea_orm(column_type = "String(Some(512))")]
    pub ancestors: String,

    #[sea_orm(column_type = "String(Some(50))")]
    pub menu_name: String,

    pub order_num: i32,

    /// 路由地址
    #[sea_orm(column_type = "String(Some(200))")]
    pub path: String,

    /// 组件路径
    #[sea_orm(column_type = "String(Some(255))", nullable)]
    pub component: Option<String>,

    /// 菜单类型: M=目录, C=菜单, F=按钮
    #[sea_orm(column_type = "String(Some(1))")]
    pub menu_type: String,

    /// 权限标识, 可用逗号分隔多个
    #[sea_orm(column_type = "String(Some(255))")]
    pub perms: String,

    /// 是否在导航中显示
    pub visible: bool,

    /// 菜单状态: 0=正常, 1=停用
    pub status: i32,

    #[sea_orm(column_type = "String(Some(100))")]
    pub icon: String,

    pub create_time: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn ancestor_path(&self) -> AncestorPath {
        AncestorPath::from_stored(self.ancestors.as_str())
    }

    pub fn kind(&self) -> Option<MenuKind> {
        MenuKind::from_code(&self.menu_type)
    }

    pub fn status(&self) -> Status {
        Status::from(self.status)
    }
}

impl TreeEntity for Entity {
    const KIND: &'static str = "menu";

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
        let kind = model.kind();
        Self {
            id: model.id,
            parent_id: model.parent_id,
            status: Status::from(model.status),
            order_num: model.order_num,
            ancestors: model.ancestors,
            name: model.menu_name,
            kind,
            perms: Some(model.perms).filter(|p| !p.is_empty()),
            children: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_kind_codes() {
        for kind in [MenuKind::Directory, MenuKind::Item, MenuKind::Button] {
            assert_eq!(MenuKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(MenuKind::from_code("X"), None);
    }
}
