//! Ancestor path bookkeeping for hierarchy tables
//!
//! `insert` and `reparent` are the only entry points that write the
//! ancestors column. `reparent` runs in its own transaction; `reparent_in` and
//! `reactivate_ancestors` let a handler compose the same steps with its own
//! field updates inside one transaction.

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    IntoActiveModel, QueryFilter, TransactionTrait,
};
use tracing::{info, warn};

use super::path::{AncestorPath, ROOT_PARENT_ID};
use crate::entity::Status;
use crate::error::{AppError, AppResult, OptionExt};

/// The columns of a hierarchy table the maintainer needs to know about
pub trait TreeEntity: EntityTrait {
    /// Human readable table kind, used in errors and logs
    const KIND: &'static str;

    fn id_column() -> Self::Column;
    fn parent_column() -> Self::Column;
    fn ancestors_column() -> Self::Column;
    fn status_column() -> Self::Column;
    fn node_ref(model: &Self::Model) -> NodeRef;
}

/// Placement fields of one stored node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub id: i64,
    pub parent_id: i64,
    pub ancestors: AncestorPath,
    pub status: Status,
}

/// Result of a reparent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reparented {
    pub node_id: i64,
    pub old_path: AncestorPath,
    pub new_path: AncestorPath,
    /// Descendant rows whose path changed
    pub rewritten: usize,
    /// Disabled ancestors enabled because the moved node is enabled
    pub reactivated: u64,
}

pub async fn find_node<E, C>(db: &C, id: i64) -> AppResult<Option<NodeRef>>
where
    E: TreeEntity,
    C: ConnectionTrait,
{
    let model = E::find().filter(E::id_column().eq(id)).one(db).await?;
    Ok(model.as_ref().map(E::node_ref))
}

/// SQL prefilter for whole-token containment; callers re-check with
/// [`AncestorPath::contains`].
pub(crate) fn token_condition<Col: ColumnTrait>(column: Col, id: i64) -> Condition {
    let id = id.to_string();
    Condition::any()
        .add(column.eq(id.clone()))
        .add(column.like(format!("{id},%")))
        .add(column.like(format!("%,{id}")))
        .add(column.like(format!("%,{id},%")))
}

/// Every node whose path contains `id` as a whole token. The root sentinel
/// is not a node and has no descendants.
pub async fn descendants<E, C>(db: &C, id: i64) -> AppResult<Vec<NodeRef>>
where
    E: TreeEntity,
    C: ConnectionTrait,
{
    if id == ROOT_PARENT_ID {
        return Ok(Vec::new());
    }
    let rows = E::find()
        .filter(token_condition(E::ancestors_column(), id))
        .all(db)
        .await?;

    Ok(rows
        .iter()
        .map(E::node_ref)
        .filter(|n| n.id != id && n.ancestors.contains(id))
        .collect())
}

pub async fn descendant_ids<E, C>(db: &C, id: i64) -> AppResult<Vec<i64>>
where
    E: TreeEntity,
    C: ConnectionTrait,
{
    Ok(descendants::<E, C>(db, id).await?.into_iter().map(|n| n.id).collect())
}

pub async fn has_children<E, C>(db: &C, id: i64) -> AppResult<bool>
where
    E: TreeEntity,
    C: ConnectionTrait,
{
    let child = E::find().filter(E::parent_column().eq(id)).one(db).await?;
    Ok(child.is_some())
}

pub async fn count_enabled_descendants<E, C>(db: &C, id: i64) -> AppResult<usize>
where
    E: TreeEntity,
    C: ConnectionTrait,
{
    Ok(descendants::<E, C>(db, id)
        .await?
        .iter()
        .filter(|n| n.status.is_enabled())
        .count())
}

/// Path a new child of `parent_id` gets. A missing parent is `NotFound`.
pub async fn path_for_child<E, C>(db: &C, parent_id: i64) -> AppResult<AncestorPath>
where
    E: TreeEntity,
    C: ConnectionTrait,
{
    if parent_id == ROOT_PARENT_ID {
        return Ok(AncestorPath::root());
    }
    let parent = find_node::<E, C>(db, parent_id)
        .await?
        .ok_or_not_found(format!("parent {} {} not found", E::KIND, parent_id))?;
    Ok(AncestorPath::child_of(&parent.ancestors, parent.id))
}

/// Inserts `active` under `parent_id`, filling in parent and ancestors.
pub async fn insert<E, A, C>(db: &C, mut active: A, parent_id: i64) -> AppResult<E::Model>
where
    E: TreeEntity,
    A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
    E::Model: IntoActiveModel<A>,
    C: ConnectionTrait,
{
    let path = path_for_child::<E, C>(db, parent_id).await?;
    active.set(E::parent_column(), parent_id.into());
    active.set(E::ancestors_column(), path.as_str().into());
    Ok(active.insert(db).await?)
}

/// Computes the descendant rewrites of moving `node_id` from `old_path` to
/// `new_path`. Drifted rows are logged and left out.
pub fn plan_rewrites(
    node_id: i64,
    old_path: &AncestorPath,
    new_path: &AncestorPath,
    descendants: &[NodeRef],
) -> Vec<(i64, AncestorPath)> {
    let old_prefix = AncestorPath::child_of(old_path, node_id);
    let new_prefix = AncestorPath::child_of(new_path, node_id);

    descendants
        .iter()
        .filter_map(|d| match d.ancestors.rebase(&old_prefix, &new_prefix) {
            Ok(path) if path != d.ancestors => Some((d.id, path)),
            Ok(_) => None,
            Err(e) => {
                warn!(node = d.id, moved = node_id, error = %e, "skipping drifted descendant");
                None
            }
        })
        .collect()
}

/// Moves `node_id` under `new_parent_id` inside its own transaction.
pub async fn reparent<E, C>(db: &C, node_id: i64, new_parent_id: i64) -> AppResult<Reparented>
where
    E: TreeEntity,
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let moved = reparent_in::<E, _>(&txn, node_id, new_parent_id).await?;
    txn.commit().await?;
    Ok(moved)
}

/// Reparent steps without transaction handling; run inside a transaction.
/// An enabled node re-enables every disabled ancestor on its new path.
pub async fn reparent_in<E, C>(db: &C, node_id: i64, new_parent_id: i64) -> AppResult<Reparented>
where
    E: TreeEntity,
    C: ConnectionTrait,
{
    let node = find_node::<E, C>(db, node_id)
        .await?
        .ok_or_not_found(format!("{} {} not found", E::KIND, node_id))?;

    if new_parent_id == node_id {
        return Err(AppError::Validation(format!(
            "{} {} cannot be its own parent",
            E::KIND,
            node_id
        )));
    }

    let new_path = if new_parent_id == ROOT_PARENT_ID {
        AncestorPath::root()
    } else {
        let parent = find_node::<E, C>(db, new_parent_id)
            .await?
            .ok_or_not_found(format!("parent {} {} not found", E::KIND, new_parent_id))?;
        if parent.ancestors.contains(node_id) {
            return Err(AppError::Validation(format!(
                "{} {} cannot move under its own descendant {}",
                E::KIND,
                node_id,
                new_parent_id
            )));
        }
        AncestorPath::child_of(&parent.ancestors, parent.id)
    };
    let old_path = node.ancestors;
    let enabled = node.status.is_enabled();

    E::update_many()
        .col_expr(E::parent_column(), Expr::value(new_parent_id))
        .col_expr(E::ancestors_column(), Expr::value(new_path.to_string()))
        .filter(E::id_column().eq(node_id))
        .exec(db)
        .await?;

    let found = descendants::<E, C>(db, node_id).await?;
    let rewrites = plan_rewrites(node_id, &old_path, &new_path, &found);
    for (id, path) in &rewrites {
        E::update_many()
            .col_expr(E::ancestors_column(), Expr::value(path.to_string()))
            .filter(E::id_column().eq(*id))
            .exec(db)
            .await?;
    }

    let reactivated = if enabled {
        reactivate_ancestors::<E, C>(db, &new_path).await?
    } else {
        0
    };

    if old_path != new_path {
        info!(
            kind = E::KIND,
            node = node_id,
            from = %old_path,
            to = %new_path,
            descendants = rewrites.len(),
            "reparented hierarchy node"
        );
    }

    Ok(Reparented {
        node_id,
        old_path,
        new_path,
        rewritten: rewrites.len(),
        reactivated,
    })
}

/// Enables every still-disabled ancestor on `path`; returns rows changed.
pub async fn reactivate_ancestors<E, C>(db: &C, path: &AncestorPath) -> AppResult<u64>
where
    E: TreeEntity,
    C: ConnectionTrait,
{
    let ids = path.ancestor_ids();
    if ids.is_empty() {
        return Ok(0);
    }

    let result = E::update_many()
        .col_expr(E::status_column(), Expr::value(i32::from(Status::Enabled)))
        .filter(E::id_column().is_in(ids))
        .filter(E::status_column().eq(i32::from(Status::Disabled)))
        .exec(db)
        .await?;

    if result.rows_affected > 0 {
        info!(kind = E::KIND, path = %path, count = result.rows_affected, "reactivated ancestors");
    }
    Ok(result.rows_affected)
}
