//! Materialized ancestor paths
//!
//! A path is the comma-joined list of ancestor ids, root-first, with `"0"`
//! as the root sentinel: a department under `100`, which is itself a root,
//! stores `"0,100"`. Membership is always tested on whole tokens, so id `1`
//! never matches a path that only contains `10`.

use std::fmt;

use thiserror::Error;
use tracing::warn;

/// Parent id carried by root nodes
pub const ROOT_PARENT_ID: i64 = 0;

const ROOT: &str = "0";
const SEPARATOR: char = ',';

/// Ancestor path of one hierarchy node.
///
/// Only [`crate::hierarchy::maintainer`] produces new paths; everything else
/// reads them back from storage with [`AncestorPath::from_stored`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AncestorPath(String);

/// A descendant path that does not start with the prefix it was discovered
/// under (data drift). The row is skipped, never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ancestor path '{path}' does not start with '{expected}'")]
pub struct ConsistencyError {
    pub path: String,
    pub expected: String,
}

impl AncestorPath {
    /// Path of a root node
    pub fn root() -> Self {
        Self(ROOT.to_string())
    }

    /// Wraps a path read from storage. Malformed tokens are dropped lazily
    /// when the path is walked.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Path of a node placed directly under `parent_id`
    pub(crate) fn child_of(parent: &AncestorPath, parent_id: i64) -> Self {
        Self(format!("{}{}{}", parent.0, SEPARATOR, parent_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    fn raw_tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).map(str::trim).filter(|t| !t.is_empty())
    }

    /// Non-empty tokens, root first. Empty tokens are skipped with a warning.
    pub fn tokens(&self) -> Vec<&str> {
        let tokens: Vec<&str> = self.raw_tokens().collect();
        if tokens.len() != self.0.split(SEPARATOR).count() {
            warn!(path = %self.0, "skipping empty tokens in ancestor path");
        }
        tokens
    }

    /// Whole-token membership
    pub fn contains(&self, id: i64) -> bool {
        let id = id.to_string();
        self.raw_tokens().any(|t| t == id)
    }

    /// Real ancestor ids (root sentinel excluded), root first
    pub fn ancestor_ids(&self) -> Vec<i64> {
        self.tokens()
            .into_iter()
            .filter_map(|t| match t.parse::<i64>() {
                Ok(ROOT_PARENT_ID) => None,
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(path = %self.0, token = t, "skipping non-numeric ancestor token");
                    None
                }
            })
            .collect()
    }

    /// Replaces the leading `old_prefix` tokens with `new_prefix`.
    pub(crate) fn rebase(
        &self,
        old_prefix: &AncestorPath,
        new_prefix: &AncestorPath,
    ) -> Result<AncestorPath, ConsistencyError> {
        let tokens = self.tokens();
        let old = old_prefix.tokens();
        if tokens.len() < old.len() || tokens[..old.len()] != old[..] {
            return Err(ConsistencyError {
                path: self.0.clone(),
                expected: old_prefix.0.clone(),
            });
        }

        let rebased: Vec<&str> = new_prefix
            .tokens()
            .into_iter()
            .chain(tokens[old.len()..].iter().copied())
            .collect();
        Ok(Self(rebased.join(",")))
    }
}

impl fmt::Display for AncestorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_and_child() {
        let root = AncestorPath::root();
        assert!(root.is_root());
        assert_eq!(root.as_str(), "0");

        let child = AncestorPath::child_of(&root, 100);
        assert_eq!(child.as_str(), "0,100");
        let grandchild = AncestorPath::child_of(&child, 101);
        assert_eq!(grandchild.as_str(), "0,100,101");
        assert!(!grandchild.is_root());
    }

    #[test]
    fn test_contains_is_whole_token() {
        let path = AncestorPath::from_stored("0,10,100");
        assert!(path.contains(10));
        assert!(path.contains(100));
        assert!(!path.contains(1));
        assert!(!path.contains(1000));
    }

    #[test]
    fn test_empty_tokens_are_skipped() {
        let path = AncestorPath::from_stored("0,,100, ,101");
        assert_eq!(path.tokens(), vec!["0", "100", "101"]);
        assert_eq!(path.ancestor_ids(), vec![100, 101]);
        assert!(path.contains(101));
    }

    #[test]
    fn test_ancestor_ids_skip_garbage() {
        let path = AncestorPath::from_stored("0,abc,7");
        assert_eq!(path.ancestor_ids(), vec![7]);
        assert!(AncestorPath::root().ancestor_ids().is_empty());
    }

    #[test]
    fn test_rebase_moves_prefix() {
        let old_prefix = AncestorPath::from_stored("0,100,101");
        let new_prefix = AncestorPath::from_stored("0,200,101");

        let grandchild = AncestorPath::from_stored("0,100,101");
        assert_eq!(
            grandchild.rebase(&old_prefix, &new_prefix).unwrap().as_str(),
            "0,200,101"
        );

        let deeper = AncestorPath::from_stored("0,100,101,102,103");
        assert_eq!(
            deeper.rebase(&old_prefix, &new_prefix).unwrap().as_str(),
            "0,200,101,102,103"
        );
    }

    #[test]
    fn test_rebase_reports_drift() {
        let old_prefix = AncestorPath::from_stored("0,100,101");
        let new_prefix = AncestorPath::from_stored("0,200,101");

        let drifted = AncestorPath::from_stored("0,300,101,102");
        let err = drifted.rebase(&old_prefix, &new_prefix).unwrap_err();
        assert_eq!(err.path, "0,300,101,102");
        assert_eq!(err.expected, "0,100,101");

        // Substring of a token is not a prefix match
        let lookalike = AncestorPath::from_stored("0,100,1010");
        assert!(lookalike.rebase(&old_prefix, &new_prefix).is_err());
    }
}
