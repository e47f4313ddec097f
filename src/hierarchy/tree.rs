//! Flat list → nested tree conversion
//!
//! Input lists are already filtered by data scope, so a node whose parent was
//! filtered out becomes a root of the returned forest. Sibling order follows
//! the input order.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::warn;

use crate::entity::menu::MenuKind;
use crate::entity::Status;

/// Shared node shape for departments and menus
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyNode {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub status: Status,
    pub order_num: i32,
    /// Read-only projection of the stored path
    pub ancestors: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MenuKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perms: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HierarchyNode>,
}

/// Selector-widget projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeSelect {
    pub id: i64,
    pub label: String,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeSelect>,
}

impl From<HierarchyNode> for TreeSelect {
    fn from(node: HierarchyNode) -> Self {
        Self {
            id: node.id,
            label: node.name,
            disabled: !node.status.is_enabled(),
            children: node.children.into_iter().map(TreeSelect::from).collect(),
        }
    }
}

/// Builds a forest from a flat list in one indexing pass.
pub fn build_tree(nodes: Vec<HierarchyNode>) -> Vec<HierarchyNode> {
    let ids: HashSet<i64> = nodes.iter().map(|n| n.id).collect();

    let mut children_of: HashMap<i64, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();
    for (idx, node) in nodes.iter().enumerate() {
        if node.parent_id != node.id && ids.contains(&node.parent_id) {
            children_of.entry(node.parent_id).or_default().push(idx);
        } else {
            roots.push(idx);
        }
    }

    let mut slots: Vec<Option<HierarchyNode>> = nodes.into_iter().map(Some).collect();
    let mut forest: Vec<HierarchyNode> = roots
        .into_iter()
        .filter_map(|idx| attach(idx, &mut slots, &children_of))
        .collect();

    // Only a parent cycle leaves slots untaken
    for idx in 0..slots.len() {
        if slots[idx].is_some() {
            warn!("hierarchy node in a parent cycle, promoting to root");
            if let Some(node) = attach(idx, &mut slots, &children_of) {
                forest.push(node);
            }
        }
    }

    forest
}

fn attach(
    idx: usize,
    slots: &mut [Option<HierarchyNode>],
    children_of: &HashMap<i64, Vec<usize>>,
) -> Option<HierarchyNode> {
    let mut node = slots[idx].take()?;
    if let Some(child_idxs) = children_of.get(&node.id) {
        node.children = child_idxs
            .iter()
            .filter_map(|&child| attach(child, slots, children_of))
            .collect();
    }
    Some(node)
}

/// Tree-select projection of a flat list
pub fn build_tree_select(nodes: Vec<HierarchyNode>) -> Vec<TreeSelect> {
    build_tree(nodes).into_iter().map(TreeSelect::from).collect()
}

/// Pre-order flattening; children are detached from the returned nodes.
pub fn flatten(forest: Vec<HierarchyNode>) -> Vec<HierarchyNode> {
    let mut out = Vec::new();
    let mut stack: Vec<HierarchyNode> = forest.into_iter().rev().collect();
    while let Some(mut node) = stack.pop() {
        let children = std::mem::take(&mut node.children);
        stack.extend(children.into_iter().rev());
        out.push(node);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, parent_id: i64, status: Status) -> HierarchyNode {
        HierarchyNode {
            id,
            parent_id,
            name: format!("node-{id}"),
            status,
            order_num: 0,
            ancestors: String::new(),
            kind: None,
            perms: None,
            children: Vec::new(),
        }
    }

    fn sample() -> Vec<HierarchyNode> {
        vec![
            node(100, 0, Status::Enabled),
            node(103, 101, Status::Enabled),
            node(101, 100, Status::Enabled),
            node(102, 100, Status::Disabled),
            node(200, 0, Status::Enabled),
            node(201, 200, Status::Enabled),
        ]
    }

    fn sorted_ids(nodes: &[HierarchyNode]) -> Vec<i64> {
        let mut ids: Vec<i64> = nodes.iter().map(|n| n.id).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_build_tree_shape() {
        let tree = build_tree(sample());
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].id, 100);
        assert_eq!(tree[1].id, 200);

        let kids: Vec<i64> = tree[0].children.iter().map(|n| n.id).collect();
        assert_eq!(kids, vec![101, 102]);
        assert_eq!(tree[0].children[0].children[0].id, 103);
        assert_eq!(tree[1].children[0].id, 201);
    }

    #[test]
    fn test_missing_parent_becomes_root() {
        // 100 filtered out by scope: its children surface as roots
        let nodes = vec![
            node(101, 100, Status::Enabled),
            node(103, 101, Status::Enabled),
            node(102, 100, Status::Enabled),
        ];
        let tree = build_tree(nodes);
        let roots: Vec<i64> = tree.iter().map(|n| n.id).collect();
        assert_eq!(roots, vec![101, 102]);
        assert_eq!(tree[0].children[0].id, 103);
    }

    #[test]
    fn test_preserves_input_order() {
        let nodes = vec![
            node(1, 0, Status::Enabled),
            node(30, 1, Status::Enabled),
            node(10, 1, Status::Enabled),
            node(20, 1, Status::Enabled),
        ];
        let tree = build_tree(nodes);
        let kids: Vec<i64> = tree[0].children.iter().map(|n| n.id).collect();
        assert_eq!(kids, vec![30, 10, 20]);
    }

    #[test]
    fn test_flatten_is_permutation_and_round_trips() {
        let input = sample();
        let tree = build_tree(input.clone());
        let flat = flatten(tree.clone());

        assert_eq!(sorted_ids(&flat), sorted_ids(&input));
        assert!(flat.iter().all(|n| n.children.is_empty()));
        assert_eq!(build_tree(flat), tree);
    }

    #[test]
    fn test_cycle_does_not_lose_nodes() {
        let nodes = vec![
            node(1, 2, Status::Enabled),
            node(2, 1, Status::Enabled),
            node(3, 0, Status::Enabled),
        ];
        let tree = build_tree(nodes.clone());
        assert_eq!(sorted_ids(&flatten(tree)), sorted_ids(&nodes));
    }

    #[test]
    fn test_tree_select_projection() {
        let select = build_tree_select(sample());
        assert_eq!(select[0].label, "node-100");
        assert!(!select[0].disabled);
        let disabled = select[0].children.iter().find(|n| n.id == 102).unwrap();
        assert!(disabled.disabled);
    }

    #[test]
    fn test_empty_input() {
        assert!(build_tree(Vec::new()).is_empty());
        assert!(build_tree_select(Vec::new()).is_empty());
    }
}
