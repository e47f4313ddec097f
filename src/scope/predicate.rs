//! Row-visibility predicate
//!
//! A [`Predicate`] is the resolver's output. Query code never sees raw SQL
//! text: [`Predicate::to_condition`] compiles it into a parameterized sea-orm
//! [`Condition`] against the columns named by a [`ScopeTarget`].

use std::collections::BTreeSet;

use sea_orm::sea_query::{ColumnRef, Expr, IntoColumnRef};
use sea_orm::Condition;
use tracing::warn;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// No filter
    Unrestricted,
    DeptEquals(i64),
    DeptIn(BTreeSet<i64>),
    /// Row owner equals the principal
    UserEquals(i64),
    /// Explicit deny, distinct from "no filter"
    AlwaysFalse,
    /// Disjunction of clauses
    AnyOf(Vec<Predicate>),
}

/// Columns a scoped query filters on
#[derive(Debug, Clone)]
pub struct ScopeTarget {
    dept: ColumnRef,
    owner: Option<ColumnRef>,
}

impl ScopeTarget {
    /// Target with a department column only; owner clauses deny.
    ///
    /// ```ignore
    /// let target = ScopeTarget::new((user::Entity, user::Column::DeptId))
    ///     .with_owner((user::Entity, user::Column::Id));
    /// ```
    pub fn new(dept: impl IntoColumnRef) -> Self {
        Self {
            dept: dept.into_column_ref(),
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: impl IntoColumnRef) -> Self {
        self.owner = Some(owner.into_column_ref());
        self
    }

    pub fn has_owner(&self) -> bool {
        self.owner.is_some()
    }
}

fn deny_all() -> Condition {
    Condition::all().add(Expr::value(false))
}

impl Predicate {
    /// Department allow-list; an empty list denies.
    pub fn dept_in(ids: impl IntoIterator<Item = i64>) -> Self {
        let ids: BTreeSet<i64> = ids.into_iter().collect();
        match ids.len() {
            0 => Predicate::AlwaysFalse,
            1 => ids
                .into_iter()
                .next()
                .map_or(Predicate::AlwaysFalse, Predicate::DeptEquals),
            _ => Predicate::DeptIn(ids),
        }
    }

    /// OR-combines clauses into a normal form.
    ///
    /// `Unrestricted` absorbs everything, `AlwaysFalse` is dropped, nested
    /// disjunctions are flattened and department clauses merge into one set,
    /// so the result does not depend on clause order. No clauses left means
    /// `AlwaysFalse`.
    pub fn any(clauses: impl IntoIterator<Item = Predicate>) -> Self {
        let mut depts = BTreeSet::new();
        let mut users = BTreeSet::new();
        let mut pending: Vec<Predicate> = clauses.into_iter().collect();

        while let Some(clause) = pending.pop() {
            match clause {
                Predicate::Unrestricted => return Predicate::Unrestricted,
                Predicate::AlwaysFalse => {}
                Predicate::DeptEquals(id) => {
                    depts.insert(id);
                }
                Predicate::DeptIn(ids) => depts.extend(ids),
                Predicate::UserEquals(id) => {
                    users.insert(id);
                }
                Predicate::AnyOf(inner) => pending.extend(inner),
            }
        }

        let mut out = Vec::new();
        if !depts.is_empty() {
            out.push(Predicate::dept_in(depts));
        }
        out.extend(users.into_iter().map(Predicate::UserEquals));

        match out.len() {
            0 => Predicate::AlwaysFalse,
            1 => out.pop().unwrap_or(Predicate::AlwaysFalse),
            _ => Predicate::AnyOf(out),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Predicate::Unrestricted)
    }

    /// Evaluates the predicate against one record.
    pub fn permits(&self, dept_id: Option<i64>, owner_id: Option<i64>) -> bool {
        match self {
            Predicate::Unrestricted => true,
            Predicate::AlwaysFalse => false,
            Predicate::DeptEquals(id) => dept_id == Some(*id),
            Predicate::DeptIn(ids) => dept_id.is_some_and(|d| ids.contains(&d)),
            Predicate::UserEquals(id) => owner_id == Some(*id),
            Predicate::AnyOf(clauses) => clauses.iter().any(|c| c.permits(dept_id, owner_id)),
        }
    }

    /// Compiles into a parameterized condition to AND into a query.
    pub fn to_condition(&self, target: &ScopeTarget) -> Condition {
        match self {
            Predicate::Unrestricted => Condition::all(),
            Predicate::AlwaysFalse => deny_all(),
            Predicate::DeptEquals(id) => {
                Condition::all().add(Expr::col(target.dept.clone()).eq(*id))
            }
            Predicate::DeptIn(ids) => {
                Condition::all().add(Expr::col(target.dept.clone()).is_in(ids.iter().copied()))
            }
            Predicate::UserEquals(id) => match &target.owner {
                Some(owner) => Condition::all().add(Expr::col(owner.clone()).eq(*id)),
                None => {
                    warn!(user = id, "owner clause on a target without owner column, denying");
                    deny_all()
                }
            },
            Predicate::AnyOf(clauses) => {
                if clauses.is_empty() {
                    return deny_all();
                }
                if clauses.iter().any(Predicate::is_unrestricted) {
                    return Condition::all();
                }
                clauses
                    .iter()
                    .fold(Condition::any(), |cond, c| cond.add(c.to_condition(target)))
            }
        }
    }
}

/// Rejects a single record outside the predicate.
pub fn ensure_in_scope(
    predicate: &Predicate,
    dept_id: Option<i64>,
    owner_id: Option<i64>,
) -> AppResult<()> {
    if predicate.permits(dept_id, owner_id) {
        Ok(())
    } else {
        warn!(?dept_id, ?owner_id, ?predicate, "record outside data scope");
        Err(AppError::DataPermission)
    }
}
