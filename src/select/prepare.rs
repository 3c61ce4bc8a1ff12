//! Planning: `Select::prepare`, `spec.md` §4.2.

use std::collections::HashSet;

use crate::access_path;
use crate::error::Result;
use crate::exprkit::Named;
use crate::expression::{Expression, OptimizeContext};
use crate::table_filter::SortColumn;

use super::Select;

impl Select {
    /// Plans this (already bound) statement: materializes the sort order,
    /// names and optimizes every expression, detects the quick-aggregate
    /// and group-sorted fast paths, and adopts whatever index the
    /// access-path chooser finds for DISTINCT, sort elision, or
    /// group-sorted execution. Idempotence-guarded like [`Select::init`].
    pub fn prepare(&mut self) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        self.materialize_sort();
        self.allocate_names();
        self.optimize_expressions();
        self.push_down_where();
        self.detect_quick_aggregate();
        self.choose_top_filter();
        self.try_distinct_fast_path();
        self.try_sort_by_index();
        self.try_group_sorted();

        self.mark_prepared();
        Ok(())
    }

    /// §4.2 step 1: turns the bound `ORDER BY` list into a concrete
    /// `SortColumn` sequence over `expressions`' column space, then drops
    /// `order_list` (its job binding positions/aliases is done).
    fn materialize_sort(&mut self) {
        let Some(order_list) = self.order_list.take() else {
            return;
        };
        let sort = order_list
            .iter()
            .map(|item| SortColumn {
                column: item.resolved_index,
                direction: item.direction,
                nulls: item.nulls,
            })
            .collect();
        self.sort = Some(sort);
    }

    /// §4.2 step 2, first half: gives every visible output column a
    /// unique display name, wrapping it in [`Named`] when its current
    /// alias (or a synthesized default) collides with an earlier column's.
    fn allocate_names(&mut self) {
        let mut seen: HashSet<String> = HashSet::new();
        for i in 0..self.visible_column_count {
            let base = self.expressions[i]
                .alias()
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("column{}", i + 1));
            let mut candidate = base.clone();
            let mut suffix = 2;
            while seen.contains(&candidate) {
                candidate = format!("{base}_{suffix}");
                suffix += 1;
            }
            seen.insert(candidate.clone());
            if self.expressions[i].alias() != Some(candidate.as_str()) {
                let placeholder: Box<dyn Expression> = crate::exprkit::Expr::constant(crate::value::Value::Null);
                let expr = std::mem::replace(&mut self.expressions[i], placeholder);
                self.expressions[i] = Named::new(expr, candidate);
            }
        }
    }

    /// §4.2 step 2, second half: constant-folds and simplifies every
    /// expression (and the `WHERE` condition) via `Expression::optimize`.
    fn optimize_expressions(&mut self) {
        let ctx = OptimizeContext {
            session: self.session.as_ref(),
        };
        let old = std::mem::take(&mut self.expressions);
        self.expressions = old.into_iter().map(|e| e.optimize(&ctx)).collect();
        if let Some(cond) = self.condition.take() {
            self.condition = Some(cond.optimize(&ctx));
        }
    }

    /// §4.2 step 3: offers the optimized `WHERE` condition to every
    /// non-outer, non-outer-indirect filter so it can push down an
    /// equality or range predicate as an index seek.
    fn push_down_where(&mut self) {
        let condition = self.condition.as_deref();
        for slot in self.filters.iter_mut() {
            if slot.filter.is_join_outer() || slot.filter.is_join_outer_indirect() {
                continue;
            }
            slot.filter.request_index_condition(condition);
        }
    }

    /// §4.2 step 4: a query is quick-aggregatable when it has exactly one
    /// filter, no `WHERE`/`GROUP BY`/`HAVING`, and every projected
    /// expression can be answered from catalog/index metadata alone.
    fn detect_quick_aggregate(&mut self) {
        let eligible = self.filters.len() == 1
            && self.condition.is_none()
            && self.group_index.is_empty()
            && self.having_index.is_none()
            && !self.expressions.is_empty()
            && self
                .expressions
                .iter()
                .all(|e| e.is_quick_aggregatable() || e.is_constant());
        self.flags.is_quick_aggregate_query = eligible;
        if eligible {
            log::debug!("select: quick-aggregate path eligible, skipping table scan");
        }
    }

    /// §4.2 step 5: a simplified join optimizer — this core's `Select`
    /// does not itself model a join tree beyond the flat `filters` list
    /// (multi-filter join structure, if any, lives inside a composite
    /// `TableFilter` implementation), so "choosing" `top_table_filter` is
    /// just picking the declared top filter, and "cost" is the product of
    /// each filter's approximate row count. The condition is marked
    /// evaluatable at every filter position; this core does not lift
    /// nested per-join conditions since it has no nested-join
    /// representation to lift them out of.
    fn choose_top_filter(&mut self) {
        if self.filters.is_empty() {
            self.top_table_filter = None;
            return;
        }
        let top = self.filters.iter().position(|f| f.is_top).unwrap_or(0);
        self.top_table_filter = Some(top);
        self.cost = self
            .filters
            .iter()
            .map(|f| (f.filter.index().row_count_approx().max(1)) as f64)
            .product();
        if let Some(cond) = self.condition.as_mut() {
            for fi in 0..self.filters.len() {
                cond.set_evaluatable(fi, true);
            }
        }
    }

    /// §4.2 step 6: adopts a more selective single-column ascending index
    /// for a plain `DISTINCT` over one column of one filter, when no
    /// `WHERE`/`GROUP BY` stands in the way and the column's selectivity
    /// clears [`access_path::DISTINCT_SELECTIVITY_THRESHOLD`].
    fn try_distinct_fast_path(&mut self) {
        if !self.session.database().optimize_distinct() {
            return;
        }
        if !self.is_distinct || !self.distinct_indexes.is_empty() {
            return;
        }
        if self.visible_column_count != 1 || self.condition.is_some() || self.flags.is_group_query {
            return;
        }
        if self.filters.len() != 1 {
            return;
        }
        let Some(col_ref) = self.expressions[0].as_simple_column() else {
            return;
        };
        if col_ref.filter != Some(0) {
            return;
        }
        let selectivity = self.filters[0].filter.index().selectivity();
        if selectivity >= access_path::DISTINCT_SELECTIVITY_THRESHOLD {
            return;
        }
        let available = self.filters[0].filter.available_indexes();
        if let Some(pos) = access_path::find_distinct_index(available, col_ref.column) {
            self.filters[0].filter.set_index_at(pos);
            self.flags.is_distinct_query = true;
            log::debug!("select: adopting distinct single-column index at position {pos}");
        }
    }

    /// §4.2 step 7: elides a plain sort when the top filter's current (or
    /// a better available) index already produces rows in `ORDER BY`
    /// order.
    fn try_sort_by_index(&mut self) {
        if self.flags.is_group_query || self.flags.is_quick_aggregate_query {
            return;
        }
        let Some(sort) = self.sort.clone() else {
            return;
        };
        if sort.is_empty() {
            return;
        }
        let Some(top) = self.top_table_filter else {
            return;
        };
        if self.filters[top].filter.has_in_comparisons() {
            return;
        }
        let current_column_count = self.filters[top].filter.index().columns().len();
        if access_path::index_satisfies_sort(self.filters[top].filter.index(), &sort) {
            self.flags.sort_using_index = true;
            return;
        }
        let available = self.filters[top].filter.available_indexes();
        if let Some(pos) = access_path::find_better_sort_index(available, &sort, current_column_count) {
            self.filters[top].filter.set_index_at(pos);
            self.flags.sort_using_index = true;
            log::debug!("select: adopting sort-covering index at position {pos}");
        }
    }

    /// §4.2 step 8: adopts an index whose leading columns cover every
    /// `GROUP BY` key (in any permutation, as an unbroken prefix) so
    /// groups arrive pre-sorted and hashed grouping can be skipped.
    fn try_group_sorted(&mut self) {
        if !self.flags.is_group_query || self.group_index.is_empty() {
            return;
        }
        let Some(top) = self.top_table_filter else {
            return;
        };
        let table_columns: Option<Vec<usize>> = self
            .group_index
            .iter()
            .map(|&gi| {
                self.expressions[gi]
                    .as_simple_column()
                    .filter(|c| c.filter == Some(top))
                    .map(|c| c.column)
            })
            .collect();
        let Some(columns) = table_columns else {
            return;
        };
        let available = self.filters[top].filter.available_indexes();
        if let Some(pos) = access_path::find_group_sorted_index(available, &columns) {
            self.filters[top].filter.set_index_at(pos);
            self.flags.is_group_sorted_query = true;
            log::debug!("select: adopting group-sorted index at position {pos}");
        }
    }
}
