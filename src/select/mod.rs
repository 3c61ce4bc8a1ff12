//! The `Select` statement: bound/prepared query state plus the core
//! surface exposed to the rest of the engine (`spec.md` §3, §6).

pub mod group_state;
mod init;
mod plan_printer;
mod prepare;
mod resolver;
mod surface;

pub use surface::{ColumnMeta, QueryMeta, QueryVisitor};

use std::sync::Arc;

use crate::config::Session;
use crate::expression::Expression;
use crate::table_filter::{SortColumn, TableFilter};

/// A single `ORDER BY` item, before and after binding.
pub struct OrderItem {
    pub key: OrderKey,
    pub direction: crate::table_filter::SortDirection,
    pub nulls: crate::table_filter::NullPosition,
    /// Column index within `Select::expressions` this item binds to.
    /// `usize::MAX` until `Select::init` resolves it.
    pub resolved_index: usize,
}

impl OrderItem {
    pub fn new(
        key: OrderKey,
        direction: crate::table_filter::SortDirection,
        nulls: crate::table_filter::NullPosition,
    ) -> Self {
        OrderItem {
            key,
            direction,
            nulls,
            resolved_index: usize::MAX,
        }
    }
}

pub enum OrderKey {
    /// A 1-based `ORDER BY <n>` column position.
    Position(i64),
    Expression(Box<dyn Expression>),
}

/// One candidate root filter in the join tree, alongside whether it is
/// eligible as the plan's top filter (`spec.md`'s `topFilters`).
pub struct FilterSlot {
    pub filter: Box<dyn TableFilter>,
    pub is_top: bool,
}

/// Lifecycle/mode flags set during binding and planning.
#[derive(Default, Debug, Clone, Copy)]
pub struct SelectFlags {
    pub is_group_query: bool,
    pub is_group_sorted_query: bool,
    pub is_distinct_query: bool,
    pub is_quick_aggregate_query: bool,
    pub is_for_update: bool,
    pub is_for_update_mvcc: bool,
    pub sort_using_index: bool,
    pub with_ties: bool,
    pub fetch_percent: bool,
}

/// The bound and (once prepared) planned state of a single `SELECT`.
///
/// Lifecycle: created by the caller, mutated by [`Select::init`] and
/// [`Select::prepare`] exactly once each (double-calling either is a
/// programming error and panics), then executed any number of times via
/// [`Select::query_without_cache`].
pub struct Select {
    pub(crate) session: Arc<dyn Session>,

    pub(crate) expressions: Vec<Box<dyn Expression>>,
    pub(crate) visible_column_count: usize,
    pub(crate) distinct_column_count: usize,

    pub(crate) filters: Vec<FilterSlot>,
    pub(crate) top_table_filter: Option<usize>,

    pub(crate) condition: Option<Box<dyn Expression>>,

    pub(crate) group: Option<Vec<Box<dyn Expression>>>,
    pub(crate) group_index: Vec<usize>,
    pub(crate) group_by_expression: Vec<bool>,

    /// `HAVING`, pending append until `init()` runs (spec's binding step
    /// owns appending it to `expressions` and recording `having_index`,
    /// not the builder-time setter).
    pub(crate) having_pending: Option<Box<dyn Expression>>,
    pub(crate) having_index: Option<usize>,

    pub(crate) is_distinct: bool,
    /// `SELECT DISTINCT ON (...)`, pending until bound in `init()`.
    pub(crate) distinct_on_pending: Option<Vec<Box<dyn Expression>>>,
    pub(crate) distinct_indexes: Vec<usize>,

    pub(crate) order_list: Option<Vec<OrderItem>>,
    pub(crate) sort: Option<Vec<SortColumn>>,

    pub(crate) limit_expr: Option<Box<dyn Expression>>,
    pub(crate) offset_expr: Option<Box<dyn Expression>>,

    pub(crate) flags: SelectFlags,

    pub(crate) cost: f64,

    pub(crate) visible_expr_sql: Vec<String>,

    /// Guards against a second `add_global_condition` call re-absorbing
    /// `HAVING` (`spec.md` §9's documented re-entry hazard).
    pub(crate) global_condition_applied: bool,

    pub(crate) metrics: crate::metrics::ExecutionMetrics,

    initialized: bool,
    prepared: bool,
}

impl std::fmt::Debug for Select {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Select")
            .field("visible_column_count", &self.visible_column_count)
            .field("distinct_column_count", &self.distinct_column_count)
            .field("expressions", &self.expressions.len())
            .field("filters", &self.filters.len())
            .field("flags", &self.flags)
            .field("initialized", &self.initialized)
            .field("prepared", &self.prepared)
            .finish()
    }
}

impl Select {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Select {
            session,
            expressions: Vec::new(),
            visible_column_count: 0,
            distinct_column_count: 0,
            filters: Vec::new(),
            top_table_filter: None,
            condition: None,
            group: None,
            group_index: Vec::new(),
            group_by_expression: Vec::new(),
            having_pending: None,
            having_index: None,
            is_distinct: false,
            distinct_on_pending: None,
            distinct_indexes: Vec::new(),
            order_list: None,
            sort: None,
            limit_expr: None,
            offset_expr: None,
            flags: SelectFlags::default(),
            cost: 0.0,
            visible_expr_sql: Vec::new(),
            global_condition_applied: false,
            metrics: crate::metrics::ExecutionMetrics::new(),
            initialized: false,
            prepared: false,
        }
    }

    // ---- builder-style setters (core surface, §6) ----

    pub fn set_expressions(&mut self, expressions: Vec<Box<dyn Expression>>) {
        self.expressions = expressions;
    }

    pub fn set_group_by(&mut self, group: Vec<Box<dyn Expression>>) {
        self.group = Some(group);
    }

    pub fn set_having(&mut self, having: Box<dyn Expression>) {
        self.having_pending = Some(having);
    }

    pub fn set_order_list(&mut self, order_list: Vec<OrderItem>) {
        self.order_list = Some(order_list);
    }

    pub fn set_distinct(&mut self) {
        self.is_distinct = true;
    }

    pub fn set_distinct_on(&mut self, exprs: Vec<Box<dyn Expression>>) {
        self.distinct_on_pending = Some(exprs);
    }

    pub fn set_for_update(&mut self, for_update: bool) {
        self.flags.is_for_update = for_update;
    }

    pub fn set_with_ties(&mut self, with_ties: bool) {
        self.flags.with_ties = with_ties;
    }

    pub fn set_fetch_percent(&mut self, fetch_percent: bool) {
        self.flags.fetch_percent = fetch_percent;
    }

    pub fn set_limit(&mut self, limit: Option<Box<dyn Expression>>) {
        self.limit_expr = limit;
    }

    pub fn set_offset(&mut self, offset: Option<Box<dyn Expression>>) {
        self.offset_expr = offset;
    }

    pub fn set_condition(&mut self, condition: Option<Box<dyn Expression>>) {
        self.condition = condition;
    }

    /// Conjoins `expr` onto the current `WHERE` condition.
    pub fn add_condition(&mut self, expr: Box<dyn Expression>) {
        self.condition = Some(match self.condition.take() {
            None => expr,
            Some(existing) => crate::exprkit::Expr::and(existing, expr),
        });
    }

    pub fn add_table_filter(&mut self, filter: Box<dyn TableFilter>, is_top: bool) {
        self.filters.push(FilterSlot { filter, is_top });
    }

    /// Wildcards are represented inline as `Expression::is_wildcard()`
    /// nodes within the list passed to [`Select::set_expressions`];
    /// nothing to record separately. Kept as a named no-op so the core
    /// surface matches `spec.md` §6's `setWildcard` entry.
    pub fn set_wildcard(&mut self) {}

    // ---- core surface accessors (§6) ----

    pub fn column_count(&self) -> usize {
        self.visible_column_count
    }

    pub fn tables(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.filter.table_name()).collect()
    }

    pub fn sort_order(&self) -> Option<&[SortColumn]> {
        self.sort.as_deref()
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn is_cacheable(&self) -> bool {
        !self.flags.is_for_update
    }

    pub fn is_read_only(&self) -> bool {
        !self.flags.is_for_update
    }

    pub fn is_for_update(&self) -> bool {
        self.flags.is_for_update
    }

    pub fn is_for_update_mvcc(&self) -> bool {
        self.flags.is_for_update_mvcc
    }

    pub fn is_group_query(&self) -> bool {
        self.flags.is_group_query
    }

    pub fn is_quick_aggregate_query(&self) -> bool {
        self.flags.is_quick_aggregate_query
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Marks that `init()` has run. Panics (fatal internal error) if
    /// called twice.
    pub(crate) fn mark_initialized(&mut self) {
        assert!(!self.initialized, "Select::init called twice");
        self.initialized = true;
    }

    /// Marks that `prepare()` has run. Panics if `init()` has not run
    /// yet.
    pub(crate) fn mark_prepared(&mut self) {
        assert!(self.initialized, "Select::prepare called before init");
        self.prepared = true;
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Row counts and elapsed time for the most recent
    /// `query_without_cache` call.
    pub fn metrics(&self) -> &crate::metrics::ExecutionMetrics {
        &self.metrics
    }
}
