//! Execution: `Select::query_without_cache` and the five physical
//! strategies it dispatches to (`spec.md` §4.3).

use crate::error::{Error, Result};
use crate::expression::EvalContext;
use crate::result_sink::{MaterializedResult, ResultSink};
use crate::row::Row;
use crate::select::group_state::GroupStateArena;
use crate::select::Select;
use crate::value::{Value, ValueArray};

/// What `query_without_cache` hands back: a materialized result owned by
/// this call, a pull-based lazy result the caller drives at its own pace
/// (borrowing the `Select` for as long as it is driven), or nothing when
/// the caller supplied its own sink to drain into.
pub enum QueryOutcome<'a> {
    Materialized(MaterializedResult),
    Lazy(Box<dyn crate::lazy::LazyResult + 'a>),
    Drained,
}

impl Select {
    /// Evaluates a scalar expression with no row context — used for
    /// `LIMIT`/`OFFSET`, which may reference parameters but never columns.
    fn evaluate_scalar(&self, expr: &dyn crate::expression::Expression) -> Value {
        let mut ctx = EvalContext {
            session: self.session.as_ref(),
            group: None,
            current_group_row_id: 0,
            current_slot: 0,
            current_rows: &[],
            projection_values: &[],
        };
        expr.evaluate(&mut ctx)
    }

    /// §4.3: effective limit is the smaller of `max_rows` (0 = unlimited)
    /// and the evaluated `LIMIT` expression (NULL or negative = unlimited).
    /// Under `FETCH PERCENT`, the result must additionally fall in
    /// `[0, 100]`.
    fn resolve_limit(&self, max_rows: u64) -> Result<Option<u64>> {
        let expr_limit = match &self.limit_expr {
            None => None,
            Some(e) => match self.evaluate_scalar(e.as_ref()) {
                Value::Int(n) if n >= 0 => Some(n as u64),
                _ => None,
            },
        };
        let max_rows = if max_rows == 0 { None } else { Some(max_rows) };
        let effective = match (max_rows, expr_limit) {
            (None, None) => None,
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (Some(a), Some(b)) => Some(a.min(b)),
        };
        if self.flags.fetch_percent {
            let pct = effective.unwrap_or(0);
            if pct > 100 {
                return Err(Error::invalid_value(
                    "FETCH PERCENT",
                    format!("{pct} (expected 0..=100)"),
                ));
            }
        }
        Ok(effective)
    }

    /// §4.3: `OFFSET` is clamped to `>= 0`.
    fn resolve_offset(&self) -> u64 {
        match &self.offset_expr {
            None => 0,
            Some(e) => match self.evaluate_scalar(e.as_ref()) {
                Value::Int(n) if n > 0 => n as u64,
                _ => 0,
            },
        }
    }

    /// §4.3 lazy eligibility: no caller-supplied sink, read-only,
    /// non-quick-aggregate, a non-zero limit, no `FETCH PERCENT`/
    /// `WITH TIES`, zero offset, the session prefers it, and the chosen
    /// strategy can itself stream (flat, or group-sorted) rather than
    /// needing a full materialization pass for sorting, distinctness, or
    /// hashed aggregation.
    ///
    /// `DISTINCT` always forces materialization here even when
    /// `try_distinct_fast_path` adopted a covering index for
    /// `run_distinct_scan` — that fast path's seek-past-each-key scan has
    /// no pull-based counterpart in `lazy.rs`, so the plain flat driver it
    /// would otherwise fall back to would yield duplicate rows.
    fn is_lazy_eligible(&self, has_target: bool, limit: Option<u64>, offset: u64) -> bool {
        if has_target
            || self.flags.is_for_update
            || self.flags.is_quick_aggregate_query
            || limit == Some(0)
            || self.flags.fetch_percent
            || self.flags.with_ties
            || offset != 0
            || self.is_distinct
            || !self.is_read_only()
            || !self.session.is_lazy_query_execution()
        {
            return false;
        }
        let streaming_strategy = !self.flags.is_group_query || self.flags.is_group_sorted_query;
        let needs_materialized_sort = self.sort.is_some() && !self.flags.sort_using_index;
        streaming_strategy && !needs_materialized_sort
    }

    /// Drives this (already bound and prepared) statement once. When
    /// `target` is `None`, the returned [`QueryOutcome`] owns the result;
    /// when `Some`, rows are drained into it directly and
    /// [`QueryOutcome::Drained`] is returned instead.
    pub fn query_without_cache(
        &mut self,
        max_rows: u64,
        mut target: Option<&mut dyn ResultSink>,
    ) -> Result<QueryOutcome<'_>> {
        assert!(self.is_prepared(), "query_without_cache called before prepare");

        let limit = self.resolve_limit(max_rows)?;
        let offset = self.resolve_offset();

        if self.flags.is_for_update_mvcc
            && (self.flags.is_group_query
                || self.is_distinct
                || self.flags.is_quick_aggregate_query
                || self.filters.len() > 1)
        {
            return Err(Error::UnsupportedFeatureCombination(
                "MVCC FOR UPDATE does not support GROUP BY, DISTINCT, quick aggregate, or a join",
            ));
        }

        if let Some(top) = self.top_table_filter {
            let session = self.session.clone();
            self.filters[top].filter.start_query(session.as_ref())?;
            self.filters[top].filter.reset();
            let exclusive = self.flags.is_for_update && !self.flags.is_for_update_mvcc;
            self.filters[top]
                .filter
                .lock(session.as_ref(), exclusive, self.flags.is_for_update_mvcc)?;
        }

        self.metrics = crate::metrics::ExecutionMetrics::new();
        self.metrics.start();

        if self.is_lazy_eligible(target.is_some(), limit, offset) {
            // A lazy driver's rows are counted by the caller pulling
            // `next()`, not here; stop the clock immediately since this
            // call itself does no scanning.
            self.metrics.stop();
            let driver = crate::lazy::build_lazy_driver(self, limit);
            return Ok(QueryOutcome::Lazy(driver));
        }

        let mut owned_sink = MaterializedResult::new();
        {
            let sink: &mut dyn ResultSink = match target.as_deref_mut() {
                Some(t) => t,
                None => &mut owned_sink,
            };

            if self.flags.is_quick_aggregate_query {
                self.run_quick_aggregate(sink, offset)?;
            } else if self.flags.is_group_query {
                if self.flags.is_group_sorted_query {
                    self.run_sorted_group(sink)?;
                } else {
                    self.run_hashed_group(sink)?;
                }
            } else if self.flags.is_distinct_query {
                self.run_distinct_scan(sink)?;
            } else {
                self.run_flat(sink)?;
            }

            if let Some(top) = self.top_table_filter {
                if self.flags.is_for_update_mvcc {
                    let session = self.session.clone();
                    self.filters[top].filter.lock_rows(session.as_ref())?;
                }
            }

            sink.set_sort_order(self.sort.clone());
            sink.set_distinct(if self.is_distinct || !self.distinct_indexes.is_empty() {
                Some(if self.distinct_indexes.is_empty() {
                    (0..self.distinct_column_count).collect()
                } else {
                    self.distinct_indexes.clone()
                })
            } else {
                None
            });
            sink.set_offset(offset);
            sink.set_limit(limit);
            sink.set_fetch_percent(self.flags.fetch_percent);
            sink.set_with_ties(self.flags.with_ties);
            sink.done()?;
        }
        self.metrics.stop();

        match target {
            Some(_) => Ok(QueryOutcome::Drained),
            None => Ok(QueryOutcome::Materialized(owned_sink)),
        }
    }

    /// Builds the per-filter row snapshot every expression evaluation
    /// needs, refreshed after each `TableFilter::next()`.
    pub(crate) fn current_filter_rows(&self) -> Vec<Row> {
        self.filters.iter().map(|f| f.filter.current_row()).collect()
    }

    pub(crate) fn passes_condition(&self, rows: &[Row]) -> bool {
        match &self.condition {
            None => true,
            Some(cond) => {
                let mut ctx = EvalContext {
                    session: self.session.as_ref(),
                    group: None,
                    current_group_row_id: 0,
                    current_slot: 0,
                    current_rows: rows,
                    projection_values: &[],
                };
                cond.boolean_value(&mut ctx)
            }
        }
    }

    /// Evaluates every projection expression against `rows` and returns
    /// the resulting row, trimmed to `distinct_column_count`.
    pub(crate) fn build_output_row(&self, rows: &[Row]) -> Row {
        let mut ctx = EvalContext {
            session: self.session.as_ref(),
            group: None,
            current_group_row_id: 0,
            current_slot: 0,
            current_rows: rows,
            projection_values: &[],
        };
        let values: Vec<Value> = self.expressions.iter().map(|e| e.evaluate(&mut ctx)).collect();
        let mut row = Row::new(values);
        row.truncate(self.distinct_column_count);
        row
    }

    fn run_quick_aggregate(&mut self, sink: &mut dyn ResultSink, offset: u64) -> Result<()> {
        let top = self.top_table_filter.expect("quick aggregate requires a single top filter");
        let index = self.filters[top].filter.index();
        let mut ctx = EvalContext {
            session: self.session.as_ref(),
            group: None,
            current_group_row_id: 0,
            current_slot: 0,
            current_rows: &[],
            projection_values: &[],
        };
        let values: Vec<Value> = self
            .expressions
            .iter()
            .map(|e| {
                if e.is_quick_aggregatable() {
                    e.evaluate_quick_aggregate(index)
                } else {
                    e.evaluate(&mut ctx)
                }
            })
            .collect();
        if offset == 0 {
            let mut row = Row::new(values);
            row.truncate(self.distinct_column_count);
            self.metrics.record_row_produced();
            sink.add_row(row)?;
        }
        Ok(())
    }

    fn run_hashed_group(&mut self, sink: &mut dyn ResultSink) -> Result<()> {
        let Some(top) = self.top_table_filter else {
            return Ok(());
        };
        let session = self.session.clone();
        let mut arena = GroupStateArena::new();
        let slot_len = self.expressions.len();
        let sample_size = session.sample_size();
        let mut rows_scanned: u64 = 0;

        while self.filters[top].filter.next(session.as_ref())? {
            let rows = self.current_filter_rows();
            self.metrics.record_row_scanned();
            if !self.passes_condition(&rows) {
                continue;
            }
            rows_scanned += 1;

            let key: ValueArray = self
                .group_index
                .iter()
                .map(|&gi| {
                    let mut ctx = EvalContext {
                        session: session.as_ref(),
                        group: None,
                        current_group_row_id: 0,
                        current_slot: 0,
                        current_rows: &rows,
                        projection_values: &[],
                    };
                    self.expressions[gi].evaluate(&mut ctx)
                })
                .collect();

            let id = arena.get_or_create(&key, slot_len);
            let row_id = session.next_row_id();
            self.update_aggregate(arena.slots_mut(id), row_id, &rows);

            if let Some(sample) = sample_size {
                if rows_scanned >= sample {
                    break;
                }
            }
        }

        if arena.is_empty() && self.group_index.is_empty() {
            arena.get_or_create(&Vec::new(), slot_len);
        }

        let order: Vec<(ValueArray, crate::select::group_state::GroupId)> =
            arena.iter().map(|(k, id)| (k.clone(), id)).collect();

        for (key, id) in order {
            let mut values = vec![Value::Null; self.expressions.len()];
            for (pos, &expr_idx) in self.group_index.iter().enumerate() {
                values[expr_idx] = key[pos].clone();
            }
            let slots = arena.slots_mut(id);
            for i in 0..self.expressions.len() {
                if self.group_by_expression.get(i).copied().unwrap_or(false) {
                    continue;
                }
                let v = {
                    let mut ctx = EvalContext {
                        session: session.as_ref(),
                        group: Some(&mut *slots),
                        current_group_row_id: 0,
                        current_slot: i,
                        current_rows: &[],
                        projection_values: &values,
                    };
                    self.expressions[i].evaluate(&mut ctx)
                };
                values[i] = v;
            }

            let mut row = Row::new(values);
            if let Some(hidx) = self.having_index {
                if !matches!(row.get(hidx), Value::Boolean(true)) {
                    continue;
                }
            }
            row.truncate(self.distinct_column_count);
            self.metrics.record_row_produced();
            sink.add_row(row)?;
        }

        Ok(())
    }

    /// §4.3 `queryGroupSorted`: rows arrive pre-sorted on the `GROUP BY`
    /// prefix, so each group's state lives only until its key changes.
    fn run_sorted_group(&mut self, sink: &mut dyn ResultSink) -> Result<()> {
        let Some(top) = self.top_table_filter else {
            return Ok(());
        };
        let session = self.session.clone();
        let slot_len = self.expressions.len();
        let mut current_key: Option<ValueArray> = None;
        let mut current_slots = crate::select::group_state::GroupSlots::default();
        let mut have_pending = false;

        while self.filters[top].filter.next(session.as_ref())? {
            let rows = self.current_filter_rows();
            self.metrics.record_row_scanned();
            if !self.passes_condition(&rows) {
                continue;
            }

            let key: ValueArray = self
                .group_index
                .iter()
                .map(|&gi| {
                    let mut ctx = EvalContext {
                        session: session.as_ref(),
                        group: None,
                        current_group_row_id: 0,
                        current_slot: 0,
                        current_rows: &rows,
                        projection_values: &[],
                    };
                    self.expressions[gi].evaluate(&mut ctx)
                })
                .collect();

            if current_key.as_ref() != Some(&key) {
                if have_pending {
                    self.emit_sorted_group(sink, current_key.take().unwrap(), &mut current_slots)?;
                }
                current_key = Some(key);
                current_slots = crate::select::group_state::GroupSlots::default();
                current_slots.ensure_len(slot_len);
                have_pending = true;
            }

            let row_id = session.next_row_id();
            self.update_aggregate(&mut current_slots, row_id, &rows);
        }

        if have_pending {
            self.emit_sorted_group(sink, current_key.take().unwrap(), &mut current_slots)?;
        } else if self.group_index.is_empty() {
            self.emit_sorted_group(sink, Vec::new(), &mut current_slots)?;
        }

        Ok(())
    }

    pub(crate) fn emit_sorted_group(
        &mut self,
        sink: &mut dyn ResultSink,
        key: ValueArray,
        slots: &mut crate::select::group_state::GroupSlots,
    ) -> Result<()> {
        let mut values = vec![Value::Null; self.expressions.len()];
        for (pos, &expr_idx) in self.group_index.iter().enumerate() {
            values[expr_idx] = key[pos].clone();
        }
        for i in 0..self.expressions.len() {
            if self.group_by_expression.get(i).copied().unwrap_or(false) {
                continue;
            }
            let v = {
                let mut ctx = EvalContext {
                    session: self.session.as_ref(),
                    group: Some(&mut *slots),
                    current_group_row_id: 0,
                    current_slot: i,
                    current_rows: &[],
                    projection_values: &values,
                };
                self.expressions[i].evaluate(&mut ctx)
            };
            values[i] = v;
        }
        let mut row = Row::new(values);
        if let Some(hidx) = self.having_index {
            if !matches!(row.get(hidx), Value::Boolean(true)) {
                return Ok(());
            }
        }
        row.truncate(self.distinct_column_count);
        self.metrics.record_row_produced();
        sink.add_row(row)
    }

    /// §4.3 `queryDistinct`: walks the single-column index's own cursor
    /// directly, seeking just past each distinct value rather than
    /// revisiting every row through the generic table-filter `next()`.
    fn run_distinct_scan(&mut self, sink: &mut dyn ResultSink) -> Result<()> {
        let Some(top) = self.top_table_filter else {
            return Ok(());
        };
        let session = self.session.clone();
        let column = self.expressions[0]
            .as_simple_column()
            .expect("distinct fast path requires a simple-column projection")
            .column;

        let mut from: Option<ValueArray> = None;
        loop {
            let mut cursor = self.filters[top]
                .filter
                .index()
                .find_next(session.as_ref(), from.as_deref(), None)?;
            if !cursor.next()? {
                break;
            }
            let row = cursor.current();
            self.metrics.record_row_scanned();
            self.metrics.record_row_produced();
            sink.add_row(Row::new(vec![row.get(column).clone()]))?;
            from = Some(cursor.current_key());
        }
        Ok(())
    }

    /// §4.3 `queryFlat`: streams every row through `WHERE` and the
    /// projection list.
    fn run_flat(&mut self, sink: &mut dyn ResultSink) -> Result<()> {
        let Some(top) = self.top_table_filter else {
            return Ok(());
        };
        let session = self.session.clone();
        while self.filters[top].filter.next(session.as_ref())? {
            let rows = self.current_filter_rows();
            self.metrics.record_row_scanned();
            if !self.passes_condition(&rows) {
                continue;
            }
            if self.flags.is_for_update_mvcc {
                self.filters[top].filter.lock_row_add(&rows[top]);
            }
            let row = self.build_output_row(&rows);
            self.metrics.record_row_produced();
            sink.add_row(row)?;
        }
        Ok(())
    }
}
