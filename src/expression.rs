//! The expression interface: everything this core treats as an opaque,
//! externally-supplied evaluable node.
//!
//! `spec.md` §3 describes `Expression` purely as a capability set
//! (`evaluate`, `boolean_value`, `update_aggregate`, `optimize`,
//! `map_columns`, ...). Per the design notes in §9, aggregating
//! expressions do not reach into a shared, heap-owned map to find their
//! group's state; instead every call site threads an [`EvalContext`] that
//! carries the session, the current group's state slots, the current
//! group-row counter, and which slot in that vector belongs to the
//! expression being evaluated.

use crate::config::Session;
use crate::row::Row;
use crate::select::group_state::GroupSlots;
use crate::value::Value;

/// Per-group aggregation state slots are typed as plain [`Value`] — the
/// same tagged value used everywhere else, serving as the accumulator
/// state for `SUM`/`COUNT`/`MIN`/`MAX`/etc. This mirrors the source
/// engine's `Object[]` state vector without introducing a second value
/// representation.
pub type AggValue = Value;

/// A stable identifier for a table filter within `Select::filters`.
pub type FilterId = usize;

/// The result of resolving a bare or qualified column name against the
/// filters (and, for `HAVING`, the projection list) visible at a given
/// binding depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRef {
    /// Index into `Select::filters`, or `None` when the column resolved
    /// through the projection-list resolver used for `HAVING`.
    pub filter: Option<FilterId>,
    /// Column position within the resolved filter's table, or within
    /// `Select::expressions` when `filter` is `None`.
    pub column: usize,
}

/// Resolves column references during `map_columns`. The preparer supplies
/// one resolver per table filter (ordinary column binding) and, for
/// `HAVING`, a resolver backed by the projection list itself, so `HAVING`
/// can reference aggregate results and select-list aliases.
pub trait ColumnResolver {
    fn resolve(&self, schema: Option<&str>, table: Option<&str>, column: &str) -> Option<ColumnRef>;

    /// Nesting depth passed through to `Expression::map_columns`, used by
    /// subquery expressions to tell an outer reference from a local one.
    fn level(&self) -> i32 {
        0
    }
}

/// Context available to `Expression::optimize`.
pub struct OptimizeContext<'a> {
    pub session: &'a dyn Session,
}

/// Context threaded through every `evaluate`/`boolean_value`/
/// `update_aggregate` call during execution.
pub struct EvalContext<'a> {
    pub session: &'a dyn Session,
    /// The current group's per-slot state, when executing a group query.
    /// `None` outside grouping, matching `spec.md` §3's invariant that
    /// `current_group_state`/`current_group_row_id` are null outside
    /// execution.
    pub group: Option<&'a mut GroupSlots>,
    /// Monotonically incrementing per-input-row counter within the
    /// current group, used by aggregates to detect a new row.
    pub current_group_row_id: u64,
    /// The slot in the current group's state vector owned by the
    /// expression currently being evaluated. Set by the executor
    /// immediately before each top-level `evaluate`/`update_aggregate`
    /// call, using the expression's column index in `Select::expressions`
    /// as the slot id (see `select::group_state`).
    pub current_slot: usize,
    /// Snapshot of each table filter's current row, indexed by filter
    /// position within `Select::filters`. Refreshed by the executor after
    /// every `TableFilter::next()`, since a bare `Expression::evaluate`
    /// call has no other way to reach "the row currently under the
    /// cursor" for the filter(s) it references.
    pub current_rows: &'a [Row],
    /// Values already computed earlier in the output row currently being
    /// built, indexed the same way as `Select::expressions`. A `HAVING`
    /// column reference resolved against the projection list (rather than
    /// against a table filter) reads its value from here instead of from
    /// `current_rows`, since it names an already-evaluated aggregate or
    /// group-key column, not a column under any cursor. Empty outside
    /// group evaluation.
    pub projection_values: &'a [Value],
}

impl<'a> EvalContext<'a> {
    /// Access to this expression's own group-state slot. Panics if called
    /// outside a group query — aggregates must not be evaluated there.
    pub fn agg_slot(&mut self) -> &mut Option<AggValue> {
        let slot = self.current_slot;
        self.group
            .as_mut()
            .expect("aggregate expression evaluated outside a group context")
            .get_mut(slot)
    }
}

/// An opaque, externally-supplied expression node.
///
/// Implementations are free to represent columns, literals, comparisons,
/// boolean connectives, aggregates, parameters, and wildcards however they
/// like; this core never inspects an expression's internals directly,
/// only through this trait (the "small method table" the design notes
/// recommend in place of deep inheritance).
pub trait Expression: std::fmt::Debug {
    /// Evaluates this expression in `ctx`, returning its value.
    fn evaluate(&self, ctx: &mut EvalContext) -> Value;

    /// SQL `boolean_value`: NULL is treated as `false`.
    fn boolean_value(&self, ctx: &mut EvalContext) -> bool {
        self.evaluate(ctx).as_bool_or_false()
    }

    /// For an aggregate (or an expression containing one), folds the
    /// current input row into the aggregate's state slot. A no-op for
    /// non-aggregating expressions.
    fn update_aggregate(&self, _ctx: &mut EvalContext) {}

    /// Constant-folds and otherwise simplifies this expression, returning
    /// its (possibly identical) optimized form. Runs once during
    /// `Select::prepare`.
    fn optimize(self: Box<Self>, ctx: &OptimizeContext) -> Box<dyn Expression>;

    /// Resolves every column reference reachable from this expression
    /// using `resolver`, which is scoped to one table filter (or, for
    /// `HAVING`, to the projection list).
    fn map_columns(&mut self, resolver: &dyn ColumnResolver);

    /// Marks whether this expression (when part of a join condition) is
    /// evaluatable at `filter`'s position in the join order. A no-op for
    /// expressions that do not carry per-filter evaluability state.
    fn set_evaluatable(&mut self, _filter: FilterId, _evaluatable: bool) {}

    /// `true` for an unexpanded `*` or `table.*` wildcard.
    fn is_wildcard(&self) -> bool {
        false
    }

    /// For a wildcard expression, its optional schema and table
    /// qualifiers (`None, None` for a bare `*`). Meaningless (and never
    /// called) on a non-wildcard expression.
    fn wildcard_qualifier(&self) -> (Option<String>, Option<String>) {
        (None, None)
    }

    /// For an aliased expression, the aliased expression itself;
    /// otherwise `self`.
    fn non_alias(&self) -> &dyn Expression
    where
        Self: Sized,
    {
        self
    }

    /// Canonical SQL text, used for SQL-string matching during binding
    /// (`ORDER BY`/`GROUP BY`/`DISTINCT ON` reuse of an existing
    /// projection column) and for plan printing.
    fn sql_text(&self) -> String;

    /// The user-visible alias, if this expression was named via `AS` or a
    /// bare column/alias reference.
    fn alias(&self) -> Option<&str> {
        None
    }

    /// `true` for a compile-time constant (used by the quick-aggregate and
    /// plan-cost heuristics).
    fn is_constant(&self) -> bool {
        false
    }

    /// `true` for an aggregate function call (`COUNT`, `SUM`, `MIN`,
    /// `MAX`, `AVG`, ...). Used to tell group-key columns from aggregate
    /// columns while evaluating a grouped row.
    fn is_aggregate(&self) -> bool {
        false
    }

    /// If this expression is a bare (possibly qualified) reference to a
    /// single column of a single table filter, returns that column's
    /// position. Used by the access-path chooser (DISTINCT single-column
    /// fast path, `GROUP BY`/`ORDER BY`-by-index matching).
    fn as_simple_column(&self) -> Option<ColumnRef> {
        None
    }

    /// `true` if this expression is admissible to the quick-aggregate
    /// fast path for `table` — i.e. it can be answered from catalog/index
    /// metadata (`COUNT(*)`, `MIN`/`MAX` of an indexed column) without
    /// scanning any row.
    fn is_quick_aggregatable(&self) -> bool {
        false
    }

    /// For a quick-aggregatable expression, computes its value directly
    /// from `index`'s metadata rather than from a scanned row. Takes the
    /// index rather than an `EvalContext` since this path never has a
    /// current row, group, or session state to offer — only the single
    /// filter's chosen index.
    fn evaluate_quick_aggregate(&self, _index: &dyn crate::table_filter::Index) -> Value {
        Value::Null
    }

    /// Downcasts this boxed expression back to the crate's concrete
    /// [`crate::exprkit::Expr`] representation, when that's what it
    /// actually is. `None` for any other `Expression` implementation.
    /// Internal helpers that need to recompose `Expr` trees (condition
    /// conjunction, the global-condition tautology) use this instead of
    /// a generic `Any` downcast, since `Expr` is the only concrete
    /// expression type this crate ever constructs itself.
    fn into_expr_box(self: Box<Self>) -> Option<Box<crate::exprkit::Expr>> {
        None
    }
}
