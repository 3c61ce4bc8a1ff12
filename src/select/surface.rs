//! The remaining core-surface operations `spec.md` §6 lists alongside
//! `init`/`prepare`/`query_without_cache`: result-set metadata, the
//! generic expression-tree predicate, trigger dispatch, and the
//! externally-driven mutators (`map_columns`, `set_evaluatable`,
//! `update_aggregate`, `prepare_join_batch`, `add_global_condition`) used
//! by collaborators outside this crate (view rewriting, prepared
//! statements, a join optimizer).

use crate::error::Result;
use crate::exprkit::{CmpOp, Expr};
use crate::expression::{ColumnResolver, EvalContext, Expression};
use crate::row::Row;
use crate::select::group_state::GroupSlots;
use crate::value::Value;

use super::Select;

/// One visible output column's display metadata.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub alias: Option<String>,
}

/// Result-set shape of a prepared `Select`, independent of any particular
/// execution (`spec.md` §6's `queryMeta`).
#[derive(Debug, Clone)]
pub struct QueryMeta {
    pub columns: Vec<ColumnMeta>,
}

/// A generic predicate applied to every expression reachable from a
/// `Select` (`spec.md` §6's `isEverything(visitor)`) — e.g. "is every
/// expression deterministic", "does any expression reference table T".
/// `Select::is_everything` is `true` only if `visit` accepts every
/// reachable expression.
pub trait QueryVisitor {
    fn visit(&mut self, expr: &dyn Expression) -> bool;
}

impl Select {
    /// Describes the shape of this (prepared) statement's result set.
    pub fn query_meta(&self) -> Result<QueryMeta> {
        assert!(self.is_prepared(), "query_meta called before prepare");
        let columns = self.expressions[..self.visible_column_count]
            .iter()
            .map(|e| ColumnMeta {
                name: e.sql_text(),
                alias: e.alias().map(|a| a.to_string()),
            })
            .collect();
        Ok(QueryMeta { columns })
    }

    /// `true` iff `visitor` accepts every projection expression and the
    /// `WHERE` condition. Used by collaborators that need a yes/no answer
    /// about the whole expression tree (determinism, table references,
    /// cacheability) without this crate knowing what they're checking for.
    pub fn is_everything(&self, visitor: &mut dyn QueryVisitor) -> bool {
        self.expressions.iter().all(|e| visitor.visit(e.as_ref()))
            && self.condition.as_deref().map(|c| visitor.visit(c)).unwrap_or(true)
    }

    /// Dispatches `BEFORE SELECT` triggers via the session, before any row
    /// is read.
    pub fn fire_before_select_triggers(&self) {
        self.session.fire_before_select_triggers();
    }

    /// Resolves every column reference in this statement's expressions and
    /// `WHERE` condition using an externally-supplied `resolver` — used by
    /// a correlated subquery binding its outer references against this
    /// statement, distinct from the per-filter resolvers `init()` builds
    /// internally.
    pub fn map_columns(&mut self, resolver: &dyn ColumnResolver) {
        for expr in self.expressions.iter_mut() {
            expr.map_columns(resolver);
        }
        if let Some(cond) = self.condition.as_mut() {
            cond.map_columns(resolver);
        }
    }

    /// Marks every expression and the `WHERE` condition as evaluatable (or
    /// not) at `filter`'s position in the join order — used by an external
    /// join optimizer while it determines where each predicate can run.
    pub fn set_evaluatable(&mut self, filter: usize, evaluatable: bool) {
        for expr in self.expressions.iter_mut() {
            expr.set_evaluatable(filter, evaluatable);
        }
        if let Some(cond) = self.condition.as_mut() {
            cond.set_evaluatable(filter, evaluatable);
        }
    }

    /// Folds one input row into `group`'s per-slot state, the same loop
    /// the hashed-group, sorted-group, and lazy group-sorted strategies
    /// each drive internally. Exposed as its own surface method
    /// (`spec.md` §6's `updateAggregate(session)`) for a collaborator that
    /// manages its own group-state vectors rather than going through
    /// `query_without_cache` — the `EvalContext`-threading redesign (§9)
    /// means that state lives in a plain `GroupSlots` the caller owns,
    /// not in a field on `Select` itself.
    pub fn update_aggregate(&self, group: &mut GroupSlots, row_id: u64, rows: &[Row]) {
        for (i, expr) in self.expressions.iter().enumerate() {
            if self.group_by_expression.get(i).copied().unwrap_or(false) {
                continue;
            }
            let mut ctx = EvalContext {
                session: self.session.as_ref(),
                group: Some(&mut *group),
                current_group_row_id: row_id,
                current_slot: i,
                current_rows: rows,
                projection_values: &[],
            };
            expr.update_aggregate(&mut ctx);
        }
    }

    /// `spec.md` §6's `prepareJoinBatch()`. This core's `Select` does not
    /// model a nested join tree beyond the flat `filters` list (see
    /// `prepare::choose_top_filter`'s doc comment) — any multi-filter
    /// join-batching machinery lives inside a composite `TableFilter`
    /// implementation, which this crate never constructs itself. A no-op
    /// here, kept as a documented simplification rather than removed, so
    /// the core surface still matches `spec.md` §6.
    pub fn prepare_join_batch(&mut self) -> Result<()> {
        Ok(())
    }

    /// Splices a parameterized predicate onto one projection column
    /// (`spec.md` §4.6) — used by external drivers such as view or
    /// prepared-statement parameter rewriting. If `column_index`'s
    /// expression is not group-comparable (here: not a bare, non-aggregate
    /// column reference), a tautological null-safe self-equality is added
    /// instead so the parameter is still bound to the plan. Routes into
    /// `WHERE` for a non-group query or a `GROUP BY` key column, into
    /// `HAVING` otherwise.
    ///
    /// Calling this more than once on the same `Select` is a programming
    /// error (`spec.md` §9 notes the source engine's equivalent can
    /// silently double-register `HAVING` on re-entry); guarded here with
    /// `debug_assert!` instead.
    pub fn add_global_condition(&mut self, param: Box<dyn Expression>, column_index: usize, cmp: CmpOp) -> Result<()> {
        debug_assert!(
            !self.global_condition_applied,
            "add_global_condition called more than once on the same Select"
        );
        self.global_condition_applied = true;

        let target = &self.expressions[column_index];
        let group_comparable = target
            .as_simple_column()
            .map(|c| c.filter.is_some())
            .unwrap_or(false)
            && !target.is_aggregate();

        let param_expr = param
            .into_expr_box()
            .expect("add_global_condition expects an Expr-based parameter expression");

        let predicate: Box<Expr> = if group_comparable {
            let col_ref = target.as_simple_column().unwrap();
            let filter = col_ref
                .filter
                .expect("a group-comparable column resolves to a table filter");
            let name = target.sql_text();
            Expr::cmp(cmp, Expr::column(filter, col_ref.column, name), param_expr)
        } else {
            Expr::null_safe_self_eq(param_expr)
        };

        let is_group_key = self.group_by_expression.get(column_index).copied().unwrap_or(false);
        if self.flags.is_group_query && !is_group_key {
            self.join_having(predicate);
        } else {
            self.add_condition(predicate);
        }
        Ok(())
    }

    fn join_having(&mut self, predicate: Box<Expr>) {
        match self.having_index {
            Some(idx) => {
                let placeholder: Box<dyn Expression> = Expr::constant(Value::Null);
                let existing = std::mem::replace(&mut self.expressions[idx], placeholder);
                self.expressions[idx] = Expr::and(existing, predicate);
            }
            None => {
                self.expressions.push(predicate);
                self.having_index = Some(self.expressions.len() - 1);
            }
        }
    }
}
