//! A plain in-memory table/index/filter implementation good enough to
//! drive the whole pipeline end to end, for this crate's own tests and
//! for downstream integration tests that don't want to stand up a real
//! storage engine.

use std::cmp::Ordering;
use std::sync::Arc;

use itertools::Itertools;

use crate::access_path::SELECTIVITY_SENTINEL;
use crate::config::Session;
use crate::error::Result;
use crate::row::Row;
use crate::table_filter::{Cursor, Index, IndexType, NullPosition, SortColumn, SortDirection, TableFilter};
use crate::value::Value;

/// A fixed column list and row set, in row-id (insertion) order.
#[derive(Debug)]
pub struct MemTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl MemTable {
    pub fn new(name: impl Into<String>, columns: &[&str], rows: Vec<Vec<Value>>) -> Arc<MemTable> {
        Arc::new(MemTable {
            name: name.into(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            rows: rows.into_iter().map(Row::new).collect(),
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The implicit row-id index: every row in insertion order, with no
    /// declared sort key of its own.
    pub fn row_id_index(&self) -> MemIndex {
        MemIndex {
            key_columns: Vec::new(),
            sort_cols: Vec::new(),
            ty: IndexType {
                is_scan: true,
                is_hash: false,
                is_unique: false,
            },
            rows: self.rows.clone(),
            selectivity: SELECTIVITY_SENTINEL,
            min: None,
            max: None,
            create_sql: format!("SCAN ON {}", self.name),
            is_row_id: true,
        }
    }

    /// A secondary index ordered on `columns`, used to exercise the
    /// DISTINCT fast path, sort elision, and group-sorted execution.
    pub fn index_on(
        &self,
        columns: &[(usize, SortDirection, NullPosition)],
        unique: bool,
        is_hash: bool,
    ) -> MemIndex {
        let sort_cols: Vec<SortColumn> = columns
            .iter()
            .map(|&(column, direction, nulls)| SortColumn {
                column,
                direction,
                nulls,
            })
            .collect();
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| compare_rows(a, b, &sort_cols));

        let key_columns: Vec<usize> = columns.iter().map(|&(c, _, _)| c).collect();
        let leading = key_columns.first().copied();
        let (min, max) = match leading {
            Some(c) => {
                let mut values: Vec<&Value> = self.rows.iter().map(|r| r.get(c)).filter(|v| !v.is_null()).collect();
                values.sort_by(|a, b| a.cmp(b));
                (values.first().map(|v| (*v).clone()), values.last().map(|v| (*v).clone()))
            }
            None => (None, None),
        };
        let distinct_count = self
            .rows
            .iter()
            .map(|r| match leading {
                Some(c) => r.get(c),
                None => r.get(0),
            })
            .sorted_by(|a, b| a.cmp(b))
            .dedup()
            .count() as u32;

        MemIndex {
            key_columns,
            sort_cols,
            ty: IndexType {
                is_scan: false,
                is_hash,
                is_unique: unique,
            },
            rows,
            selectivity: distinct_count.max(1),
            min,
            max,
            create_sql: format!("INDEX ON {}({:?})", self.name, columns.iter().map(|c| c.0).collect::<Vec<_>>()),
            is_row_id: false,
        }
    }
}

fn compare_rows(a: &Row, b: &Row, cols: &[SortColumn]) -> Ordering {
    for col in cols {
        let ord = compare_values(a.get(col.column), b.get(col.column), col);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_values(a: &Value, b: &Value, col: &SortColumn) -> Ordering {
    let null_rank = |v: &Value| -> Option<Ordering> {
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

/// An index over a [`MemTable`]'s rows, pre-sorted in this index's own
/// order so [`MemIndex::find_next`] only has to find the seek window.
#[derive(Debug)]
pub struct MemIndex {
    key_columns: Vec<usize>,
    sort_cols: Vec<SortColumn>,
    ty: IndexType,
    rows: Vec<Row>,
    selectivity: u32,
    min: Option<Value>,
    max: Option<Value>,
    create_sql: String,
    is_row_id: bool,
}

impl MemIndex {
    fn key_of(&self, row: &Row) -> Vec<Value> {
        self.key_columns.iter().map(|&c| row.get(c).clone()).collect()
    }
}

impl Index for MemIndex {
    fn columns(&self) -> &[usize] {
        &self.key_columns
    }

    fn index_columns(&self) -> &[SortColumn] {
        &self.sort_cols
    }

    fn index_type(&self) -> IndexType {
        self.ty
    }

    fn can_find_next(&self) -> bool {
        true
    }

    fn find_next(
        &self,
        _session: &dyn Session,
        from: Option<&[Value]>,
        to: Option<&[Value]>,
    ) -> Result<Box<dyn Cursor>> {
        let start = match from {
            None => 0,
            Some(from) => self
                .rows
                .iter()
                .position(|r| compare_rows_to_key(&self.key_of(r), from, &self.sort_cols) == Ordering::Greater)
                .unwrap_or(self.rows.len()),
        };
        let end = match to {
            None => self.rows.len(),
            Some(to) => self.rows[start..]
                .iter()
                .position(|r| compare_rows_to_key(&self.key_of(r), to, &self.sort_cols) == Ordering::Greater)
                .map(|p| start + p)
                .unwrap_or(self.rows.len()),
        };
        Ok(Box::new(MemCursor {
            rows: self.rows[start..end].to_vec(),
            keys: self.rows[start..end].iter().map(|r| self.key_of(r)).collect(),
            pos: 0,
            started: false,
        }))
    }

    fn is_row_id_index(&self) -> bool {
        self.is_row_id
    }

    fn create_sql(&self) -> String {
        self.create_sql.clone()
    }

    fn selectivity(&self) -> u32 {
        self.selectivity
    }

    fn row_count_approx(&self) -> u64 {
        self.rows.len() as u64
    }

    fn min_value(&self) -> Option<Value> {
        self.min.clone()
    }

    fn max_value(&self) -> Option<Value> {
        self.max.clone()
    }
}

fn compare_rows_to_key(row_key: &[Value], key: &[Value], cols: &[SortColumn]) -> Ordering {
    for (i, col) in cols.iter().enumerate() {
        let ord = compare_values(&row_key[i], &key[i], col);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[derive(Debug)]
struct MemCursor {
    rows: Vec<Row>,
    keys: Vec<Vec<Value>>,
    pos: usize,
    started: bool,
}

impl Cursor for MemCursor {
    fn next(&mut self) -> Result<bool> {
        if self.started {
            self.pos += 1;
        }
        self.started = true;
        Ok(self.pos < self.rows.len())
    }

    fn current(&self) -> Row {
        self.rows[self.pos].clone()
    }

    fn current_key(&self) -> Vec<Value> {
        self.keys[self.pos].clone()
    }
}

/// A single-table [`TableFilter`] over a [`MemTable`], with no join
/// partner — sufficient for every scenario this core's `spec.md` §8
/// describes, which is all single-table.
#[derive(Debug)]
pub struct MemTableFilter {
    table: Arc<MemTable>,
    alias: Option<String>,
    indexes: Vec<MemIndexHandle>,
    current: usize,
    cursor: Option<Box<dyn Cursor>>,
}

/// `Index` trait objects can't be cloned, so each available index is built
/// once from the table and stored directly rather than rebuilt per access.
type MemIndexHandle = Box<dyn Index>;

impl MemTableFilter {
    /// Builds a filter whose only available index is the row-id scan.
    pub fn new(table: Arc<MemTable>) -> Self {
        let scan = table.row_id_index();
        MemTableFilter {
            table,
            alias: None,
            indexes: vec![Box::new(scan)],
            current: 0,
            cursor: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Registers an additional index the access-path chooser may adopt.
    /// Returns its position in [`TableFilter::available_indexes`].
    pub fn add_index(&mut self, index: MemIndex) -> usize {
        self.indexes.push(Box::new(index));
        self.indexes.len() - 1
    }
}

impl TableFilter for MemTableFilter {
    fn next(&mut self, session: &dyn Session) -> Result<bool> {
        if self.cursor.is_none() {
            self.cursor = Some(self.indexes[self.current].find_next(session, None, None)?);
        }
        self.cursor.as_mut().unwrap().next()
    }

    fn reset(&mut self) {
        self.cursor = None;
    }

    fn start_query(&mut self, _session: &dyn Session) -> Result<()> {
        self.cursor = None;
        Ok(())
    }

    fn lock(&mut self, _session: &dyn Session, _exclusive: bool, _shared_row_lock: bool) -> Result<()> {
        Ok(())
    }

    fn lock_row_add(&mut self, _row: &Row) {}

    fn lock_rows(&mut self, _session: &dyn Session) -> Result<()> {
        Ok(())
    }

    fn index(&self) -> &dyn Index {
        self.indexes[self.current].as_ref()
    }

    fn set_index(&mut self, index: Box<dyn Index>) {
        self.indexes[self.current] = index;
    }

    fn available_indexes(&self) -> &[Box<dyn Index>] {
        &self.indexes
    }

    fn set_index_at(&mut self, position: usize) {
        self.current = position;
        self.cursor = None;
    }

    fn current_row(&self) -> Row {
        self.cursor
            .as_ref()
            .expect("current_row called before a successful next()")
            .current()
    }

    fn visible_column_count(&self) -> usize {
        self.table.columns.len()
    }

    fn table_name(&self) -> &str {
        &self.table.name
    }

    fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    fn column_name(&self, index: usize) -> String {
        self.table.columns[index].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimpleSession;

    fn schema() -> Arc<MemTable> {
        MemTable::new(
            "t",
            &["a", "b"],
            vec![
                vec![Value::Int(1), Value::Int(10)],
                vec![Value::Int(1), Value::Int(20)],
                vec![Value::Int(2), Value::Int(30)],
            ],
        )
    }

    #[test]
    fn scan_index_yields_rows_in_insertion_order() {
        let table = schema();
        let mut filter = MemTableFilter::new(table);
        let session = SimpleSession::default();
        let mut seen = Vec::new();
        while filter.next(&session).unwrap() {
            seen.push(filter.current_row().get(1).clone());
        }
        assert_eq!(seen, vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
    }

    #[test]
    fn secondary_index_seeks_strictly_past_the_given_key() {
        let table = schema();
        let idx = table.index_on(&[(0, SortDirection::Ascending, NullPosition::Last)], false, false);
        let session = SimpleSession::default();
        let mut cursor = idx.find_next(&session, Some(&[Value::Int(1)]), None).unwrap();
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.current().get(0), &Value::Int(2));
        assert!(!cursor.next().unwrap());
    }
}
