//! Department and menu hierarchies
//!
//! - `path`: materialized ancestor path value type
//! - `maintainer`: the only writer of ancestor paths
//! - `tree`: flat list to nested tree conversion

pub mod maintainer;
pub mod path;
pub mod tree;

pub use maintainer::{NodeRef, Reparented, TreeEntity};
pub use path::{AncestorPath, ConsistencyError, ROOT_PARENT_ID};
pub use tree::{build_tree, build_tree_select, flatten, HierarchyNode, TreeSelect};
