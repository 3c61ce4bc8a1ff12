//! Synchronous, pull-based lazy result drivers (`spec.md` §4.4, §5).
//!
//! The source engine streams rows through an async `Stream`; this core has
//! no internal parallelism and executes cooperatively on the caller's own
//! thread, so a lazy result here is instead a plain trait the caller polls
//! with `next()` at whatever pace suits it, stopping whenever it likes
//! (e.g. once it has the `LIMIT` rows it asked for) without the rest of the
//! scan ever running.

use crate::error::Result;
use crate::row::Row;
use crate::select::group_state::GroupSlots;
use crate::select::Select;
use crate::value::ValueArray;

/// A pull-based row source handed back by [`crate::executor::QueryOutcome::Lazy`].
pub trait LazyResult {
    /// Advances to the next row; `false` at end of input. Only the rows
    /// actually pulled are ever produced — the underlying scan does no
    /// more work than the caller asks for.
    fn next(&mut self) -> Result<bool>;

    /// The row at the current position. Only valid after a `next()` that
    /// returned `true`.
    fn current_row(&self) -> Row;

    fn column_count(&self) -> usize;

    fn reset(&mut self);

    fn close(&mut self);
}

/// Builds the lazy driver for an already-planned, lazy-eligible `Select`:
/// a flat scan when ungrouped, or a group-sorted one-pass aggregation when
/// grouped over a covering index. `limit` caps the total rows the driver
/// will ever emit, per §4.4's "integrating ... row limits" responsibility.
pub fn build_lazy_driver(select: &mut Select, limit: Option<u64>) -> Box<dyn LazyResult + '_> {
    if select.flags.is_group_sorted_query {
        Box::new(SortedGroupLazyResult::new(select, limit))
    } else {
        Box::new(FlatLazyResult::new(select, limit))
    }
}

/// §4.4 flat lazy driver: each `next()` pulls exactly one qualifying row
/// through the top filter and the projection list.
struct FlatLazyResult<'a> {
    select: &'a mut Select,
    top: usize,
    current: Option<Row>,
    limit: Option<u64>,
    emitted: u64,
}

impl<'a> FlatLazyResult<'a> {
    fn new(select: &'a mut Select, limit: Option<u64>) -> Self {
        let top = select.top_table_filter.expect("lazy flat driver requires a top filter");
        FlatLazyResult {
            select,
            top,
            current: None,
            limit,
            emitted: 0,
        }
    }
}

impl<'a> LazyResult for FlatLazyResult<'a> {
    fn next(&mut self) -> Result<bool> {
        if self.limit.map(|l| self.emitted >= l).unwrap_or(false) {
            self.current = None;
            return Ok(false);
        }
        let session = self.select.session.clone();
        loop {
            if self.select.session.is_aborted() {
                self.current = None;
                return Ok(false);
            }
            if !self.select.filters[self.top].filter.next(session.as_ref())? {
                self.current = None;
                return Ok(false);
            }
            let rows = self.select.current_filter_rows();
            self.select.metrics.record_row_scanned();
            if !self.select.passes_condition(&rows) {
                continue;
            }
            self.current = Some(self.select.build_output_row(&rows));
            self.select.metrics.record_row_produced();
            self.emitted += 1;
            return Ok(true);
        }
    }

    fn current_row(&self) -> Row {
        self.current.clone().expect("current_row called before a successful next()")
    }

    fn column_count(&self) -> usize {
        self.select.distinct_column_count
    }

    fn reset(&mut self) {
        self.select.filters[self.top].filter.reset();
        self.current = None;
        self.emitted = 0;
    }

    fn close(&mut self) {
        self.current = None;
    }
}

/// §4.4 sorted-group lazy driver: pulls rows from an index already sorted
/// on the `GROUP BY` prefix and emits one output row per group boundary,
/// reading one row past the boundary (buffered in `pending`) to detect it.
struct SortedGroupLazyResult<'a> {
    select: &'a mut Select,
    top: usize,
    pending: Option<(ValueArray, Vec<Row>)>,
    exhausted: bool,
    current: Option<Row>,
    limit: Option<u64>,
    emitted: u64,
}

impl<'a> SortedGroupLazyResult<'a> {
    fn new(select: &'a mut Select, limit: Option<u64>) -> Self {
        let top = select.top_table_filter.expect("lazy group-sorted driver requires a top filter");
        SortedGroupLazyResult {
            select,
            top,
            pending: None,
            exhausted: false,
            current: None,
            limit,
            emitted: 0,
        }
    }

    fn group_key(&self, rows: &[Row]) -> ValueArray {
        let mut ctx = crate::expression::EvalContext {
            session: self.select.session.as_ref(),
            group: None,
            current_group_row_id: 0,
            current_slot: 0,
            current_rows: rows,
            projection_values: &[],
        };
        self.select
            .group_index
            .iter()
            .map(|&gi| self.select.expressions[gi].evaluate(&mut ctx))
            .collect()
    }

    fn pull_qualifying_row(&mut self) -> Result<Option<(ValueArray, Vec<Row>)>> {
        let session = self.select.session.clone();
        loop {
            if !self.select.filters[self.top].filter.next(session.as_ref())? {
                return Ok(None);
            }
            let rows = self.select.current_filter_rows();
            self.select.metrics.record_row_scanned();
            if !self.select.passes_condition(&rows) {
                continue;
            }
            let key = self.group_key(&rows);
            return Ok(Some((key, rows)));
        }
    }
}

impl<'a> LazyResult for SortedGroupLazyResult<'a> {
    fn next(&mut self) -> Result<bool> {
        if self.limit.map(|l| self.emitted >= l).unwrap_or(false) {
            self.current = None;
            return Ok(false);
        }
        loop {
            match self.compute_next_group()? {
                None => {
                    self.current = None;
                    return Ok(false);
                }
                Some(mut row) => {
                    if let Some(hidx) = self.select.having_index {
                        if !matches!(row.get(hidx), crate::value::Value::Boolean(true)) {
                            continue;
                        }
                    }
                    row.truncate(self.select.distinct_column_count);
                    self.current = Some(row);
                    self.select.metrics.record_row_produced();
                    self.emitted += 1;
                    return Ok(true);
                }
            }
        }
    }

    fn current_row(&self) -> Row {
        self.current.clone().expect("current_row called before a successful next()")
    }

    fn column_count(&self) -> usize {
        self.select.distinct_column_count
    }

    fn reset(&mut self) {
        self.select.filters[self.top].filter.reset();
        self.pending = None;
        self.exhausted = false;
        self.current = None;
        self.emitted = 0;
    }

    fn close(&mut self) {
        self.current = None;
    }
}

impl<'a> SortedGroupLazyResult<'a> {
    /// Accumulates and evaluates one full group (ungated by `HAVING`), or
    /// `None` once the underlying scan is exhausted with no group pending.
    fn compute_next_group(&mut self) -> Result<Option<Row>> {
        if self.exhausted && self.pending.is_none() {
            return Ok(None);
        }

        let first = match self.pending.take() {
            Some(p) => p,
            None => match self.pull_qualifying_row()? {
                Some(p) => p,
                None => {
                    self.exhausted = true;
                    return Ok(None);
                }
            },
        };

        let key = first.0.clone();
        let slot_len = self.select.expressions.len();
        let mut slots = GroupSlots::default();
        slots.ensure_len(slot_len);

        let session = self.select.session.clone();
        let mut row_id = session.next_row_id();
        self.select.update_aggregate(&mut slots, row_id, &first.1);

        loop {
            match self.pull_qualifying_row()? {
                None => {
                    self.exhausted = true;
                    break;
                }
                Some((next_key, next_rows)) => {
                    if next_key != key {
                        self.pending = Some((next_key, next_rows));
                        break;
                    }
                    row_id = session.next_row_id();
                    self.select.update_aggregate(&mut slots, row_id, &next_rows);
                }
            }
        }

        let mut values = vec![crate::value::Value::Null; self.select.expressions.len()];
        for (pos, &expr_idx) in self.select.group_index.iter().enumerate() {
            values[expr_idx] = key[pos].clone();
        }
        for i in 0..self.select.expressions.len() {
            if self.select.group_by_expression.get(i).copied().unwrap_or(false) {
                continue;
            }
            let v = {
                let mut ctx = crate::expression::EvalContext {
                    session: session.as_ref(),
                    group: Some(&mut slots),
                    current_group_row_id: 0,
                    current_slot: i,
                    current_rows: &[],
                    projection_values: &values,
                };
                self.select.expressions[i].evaluate(&mut ctx)
            };
            values[i] = v;
        }

        Ok(Some(Row::new(values)))
    }
}
