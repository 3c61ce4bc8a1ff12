//! The result-sink collaborator: where the executor's rows land, and the
//! in-process materialized implementation used when no external sink is
//! supplied.

use crate::error::Result;
use crate::row::Row;

/// Where the executor's rows go. A real engine typically backs this with
/// its own spill-to-disk sorter/deduplicator; this core only needs the
/// narrow contract `spec.md` §6 lists.
pub trait ResultSink {
    fn add_row(&mut self, row: Row) -> Result<()>;

    fn row_count(&self) -> usize;

    /// Marks the given (0-based) columns as the DISTINCT key; `None`
    /// disables distinct filtering.
    fn set_distinct(&mut self, indices: Option<Vec<usize>>);

    fn set_sort_order(&mut self, order: Option<Vec<crate::table_filter::SortColumn>>);

    fn set_offset(&mut self, offset: u64);

    /// `None` means unlimited.
    fn set_limit(&mut self, limit: Option<u64>);

    fn set_fetch_percent(&mut self, fetch_percent: bool);

    fn set_with_ties(&mut self, with_ties: bool);

    /// Finalizes the sink: applies sorting, distinct filtering, and
    /// limit/offset/with-ties semantics to the buffered rows. Called
    /// exactly once, after every row has been added.
    fn done(&mut self) -> Result<()>;

    /// `true` once [`ResultSink::done`] has applied a limit/offset/with-ties
    /// trim (as opposed to the caller having to apply it externally).
    fn limits_were_applied(&self) -> bool;

    fn reset(&mut self);

    fn next(&mut self) -> Result<bool>;

    fn current_row(&self) -> Row;

    fn close(&mut self);
}

/// An in-process, fully materialized [`ResultSink`] good enough to back
/// `queryWithoutCache` when the caller doesn't hand in its own sink (e.g.
/// every code path except `INSERT ... SELECT`-style draining into another
/// sink).
#[derive(Debug, Default)]
pub struct MaterializedResult {
    rows: Vec<Row>,
    distinct: Option<Vec<usize>>,
    sort: Option<Vec<crate::table_filter::SortColumn>>,
    offset: u64,
    limit: Option<u64>,
    fetch_percent: bool,
    with_ties: bool,
    limits_applied: bool,
    cursor: usize,
    done_called: bool,
}

impl MaterializedResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl ResultSink for MaterializedResult {
    fn add_row(&mut self, row: Row) -> Result<()> {
        self.rows.push(row);
        Ok(())
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn set_distinct(&mut self, indices: Option<Vec<usize>>) {
        self.distinct = indices;
    }

    fn set_sort_order(&mut self, order: Option<Vec<crate::table_filter::SortColumn>>) {
        self.sort = order;
    }

    fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }

    fn set_fetch_percent(&mut self, fetch_percent: bool) {
        self.fetch_percent = fetch_percent;
    }

    fn set_with_ties(&mut self, with_ties: bool) {
        self.with_ties = with_ties;
    }

    fn done(&mut self) -> Result<()> {
        use std::cmp::Ordering;

        self.done_called = true;

        if let Some(order) = &self.sort {
            let order = order.clone();
            self.rows.sort_by(|a, b| {
                for col in &order {
                    let av = a.get(col.column);
                    let bv = b.get(col.column);
                    let ord = sort_key_cmp(av, bv, col);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        if let Some(keys) = &self.distinct {
            let keys = keys.clone();
            let mut seen = hashbrown::HashSet::new();
            let mut deduped = Vec::with_capacity(self.rows.len());
            for row in self.rows.drain(..) {
                let key: Vec<_> = keys.iter().map(|&i| row.get(i).clone()).collect();
                if seen.insert(key) {
                    deduped.push(row);
                }
            }
            self.rows = deduped;
        }

        if self.fetch_percent {
            let pct = self.limit.unwrap_or(0).min(100);
            let n = (self.rows.len() as u64 * pct + 99) / 100;
            self.rows.truncate(n as usize);
            self.limits_applied = true;
            return Ok(());
        }

        let offset = self.offset as usize;
        if offset > 0 {
            if offset >= self.rows.len() {
                self.rows.clear();
            } else {
                self.rows.drain(0..offset);
            }
        }

        if let Some(limit) = self.limit {
            let mut limit = limit as usize;
            if self.with_ties && self.sort.is_some() && limit < self.rows.len() && limit > 0 {
                let order = self.sort.clone().unwrap();
                let last = self.rows[limit - 1].clone();
                while limit < self.rows.len()
                    && order.iter().all(|col| {
                        sort_key_cmp(
                            self.rows[limit].get(col.column),
                            last.get(col.column),
                            col,
                        ) == Ordering::Equal
                    })
                {
                    limit += 1;
                }
            }
            self.rows.truncate(limit);
        }
        self.limits_applied = self.offset > 0 || self.limit.is_some();

        Ok(())
    }

    fn limits_were_applied(&self) -> bool {
        self.limits_applied
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn next(&mut self) -> Result<bool> {
        if self.cursor < self.rows.len() {
            self.cursor += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn current_row(&self) -> Row {
        self.rows[self.cursor - 1].clone()
    }

    fn close(&mut self) {
        self.rows.clear();
        self.cursor = 0;
    }
}

fn sort_key_cmp(
    a: &crate::value::Value,
    b: &crate::value::Value,
    col: &crate::table_filter::SortColumn,
) -> std::cmp::Ordering {
    use crate::table_filter::{NullPosition, SortDirection};
    use std::cmp::Ordering;

    let null_rank = |v: &crate::value::Value| -> Option<Ordering> {
        if v.is_null() {
            Some(match col.nulls {
                NullPosition::First => Ordering::Less,
                NullPosition::Last => Ordering::Greater,
            })
        } else {
            None
        }
    };

    let ord = match (null_rank(a), null_rank(b)) {
        (Some(_), Some(_)) => Ordering::Equal,
        (Some(ra), None) => ra,
        (None, Some(rb)) => rb.reverse(),
        (None, None) => a.cmp(b),
    };

    match col.direction {
        SortDirection::Ascending => ord,
        SortDirection::Descending => ord.reverse(),
    }
}
