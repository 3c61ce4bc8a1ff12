//! The table-filter and index access layer: an opaque, pull-based row
//! source over a table under a chosen access index and residual
//! predicate, plus the join structure it carries (`spec.md` §4, glossary
//! "Table filter"/"Access path").

use crate::config::Session;
use crate::error::Result;
use crate::expression::Expression;
use crate::row::Row;
use crate::value::Value;

/// Ascending or descending sort direction for one index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Where NULLs sort relative to non-NULL values for one index/sort column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullPosition {
    First,
    Last,
}

/// One column of an index's or an `ORDER BY`'s sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortColumn {
    /// Position of this column within the table (for an index) or within
    /// `Select::expressions` (for a materialized `Select::sort`).
    pub column: usize,
    pub direction: SortDirection,
    pub nulls: NullPosition,
}

/// What kind of physical index this is, for access-path selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexType {
    pub is_scan: bool,
    pub is_hash: bool,
    pub is_unique: bool,
}

/// An opaque index over one table.
pub trait Index: std::fmt::Debug {
    /// Table column positions this index covers, in key order.
    fn columns(&self) -> &[usize];

    /// Sort direction and null position for each of [`Index::columns`].
    fn index_columns(&self) -> &[SortColumn];

    fn index_type(&self) -> IndexType;

    /// `true` if this index supports [`Index::find_next`] range seeks
    /// (false for, e.g., a hash index used only for equality lookups).
    fn can_find_next(&self) -> bool;

    /// Opens a cursor over `[from, to]` (either bound `None` for
    /// unbounded), honoring this index's declared sort order.
    fn find_next(
        &self,
        session: &dyn Session,
        from: Option<&[Value]>,
        to: Option<&[Value]>,
    ) -> Result<Box<dyn Cursor>>;

    /// `true` for the implicit row-id index every table has.
    fn is_row_id_index(&self) -> bool {
        false
    }

    /// The `CREATE INDEX`-shaped SQL that produced this index, used by the
    /// plan printer's optimization comments.
    fn create_sql(&self) -> String;

    /// A rough selectivity metric (distinct-value estimate) for this
    /// index's leading column, used by the DISTINCT fast-path threshold
    /// in `Select::prepare`. Lower is more selective; the access-path
    /// chooser's default sentinel is [`crate::access_path::SELECTIVITY_SENTINEL`].
    fn selectivity(&self) -> u32 {
        crate::access_path::SELECTIVITY_SENTINEL
    }

    /// The table's estimated row count, for quick-aggregate `COUNT(*)`.
    fn row_count_approx(&self) -> u64 {
        0
    }

    /// The indexed column's minimum/maximum value, for quick-aggregate
    /// `MIN`/`MAX`, when this index is ordered on that column.
    fn min_value(&self) -> Option<Value> {
        None
    }
    fn max_value(&self) -> Option<Value> {
        None
    }
}

/// A positioned row cursor opened from an [`Index`].
pub trait Cursor {
    /// Advances to the next row; `false` at end of range.
    fn next(&mut self) -> Result<bool>;

    /// The row at the cursor's current position. Only valid after a
    /// `next()` that returned `true`.
    fn current(&self) -> Row;

    /// The current position's key for the index's leading columns, used
    /// by the distinct-scan strategy to seek just past the last yielded
    /// value.
    fn current_key(&self) -> Vec<Value>;
}

/// An iterator over one table in the `FROM` clause, under a chosen
/// [`Index`] and residual predicate, and the carrier of this filter's
/// position in the join tree.
pub trait TableFilter: std::fmt::Debug {
    /// Advances to the next row satisfying this filter's access path
    /// (including any pushed-down index condition and, for a joined
    /// filter, its join partner's current row); `false` at end of input.
    fn next(&mut self, session: &dyn Session) -> Result<bool>;

    /// Rewinds this filter (and, recursively, its join children) to
    /// before the first row.
    fn reset(&mut self);

    /// Called once before the first `next()` of a query execution, to let
    /// the filter (and its join batch, if any) arm itself.
    fn start_query(&mut self, session: &dyn Session) -> Result<()>;

    /// Acquires a lock on the table this filter scans.
    /// `exclusive` requests a non-MVCC exclusive table lock (taken
    /// upfront); `shared_row_lock` requests MVCC per-row lock buffering
    /// instead (see [`TableFilter::lock_row_add`]/[`TableFilter::lock_rows`]).
    fn lock(&mut self, session: &dyn Session, exclusive: bool, shared_row_lock: bool) -> Result<()>;

    /// Buffers the current row for a deferred MVCC row lock.
    fn lock_row_add(&mut self, row: &Row);

    /// Installs every buffered row lock atomically. Called once at the
    /// end of a successful scan; if the caller aborts first, buffered
    /// locks are simply dropped and never installed.
    fn lock_rows(&mut self, session: &dyn Session) -> Result<()>;

    /// Offers this filter the optimized `WHERE` condition so it can
    /// promote an equality or range predicate over its own columns into
    /// an index seek. A no-op default; only meaningful for filters
    /// capable of index-condition pushdown.
    fn request_index_condition(&mut self, condition: Option<&dyn Expression>) {
        let _ = condition;
    }

    fn index(&self) -> &dyn Index;

    fn set_index(&mut self, index: Box<dyn Index>);

    /// Every index the access-path chooser may pick from for this filter,
    /// including the one currently installed via [`TableFilter::index`].
    fn available_indexes(&self) -> &[Box<dyn Index>];

    /// Installs `available_indexes()[position]` as this filter's current
    /// index. Used by [`crate::access_path`]'s choosers, which report a
    /// position into that same slice rather than an owned `Index` (no
    /// `Index: Clone` bound is required this way).
    fn set_index_at(&mut self, position: usize);

    /// The row at this filter's current cursor position. Only valid after
    /// a `next()` that returned `true`; column expressions read their
    /// value through this, since `Expression::evaluate` has no other way
    /// to reach "the row currently under the cursor".
    fn current_row(&self) -> Row;

    /// Table-qualified column count, for wildcard expansion.
    fn visible_column_count(&self) -> usize;

    /// `true` if the column at `position` arrived via a `NATURAL JOIN` (and
    /// so is excluded a second time when a wildcard expands the
    /// downstream side of the join).
    fn is_natural_join_column(&self, position: usize) -> bool {
        let _ = position;
        false
    }

    /// `true` if this filter sits on the nullable side of an outer join.
    fn is_join_outer(&self) -> bool {
        false
    }

    /// `true` if this filter is indirectly outer (nested inside an outer
    /// join further up the tree) even though its own join isn't marked
    /// outer.
    fn is_join_outer_indirect(&self) -> bool {
        false
    }

    /// `true` if this filter's access condition contains an `IN`
    /// predicate, which can make the index emit keys out of index order
    /// (disabling sort-by-index elision).
    fn has_in_comparisons(&self) -> bool {
        false
    }

    /// `true` if this filter is itself a join (has join children).
    fn is_join(&self) -> bool {
        false
    }

    fn table_name(&self) -> &str;

    fn alias(&self) -> Option<&str> {
        None
    }

    fn schema_name(&self) -> Option<&str> {
        None
    }

    /// Name of the column at `index`, for wildcard expansion and output
    /// column naming.
    fn column_name(&self, index: usize) -> String;

    /// The identifier this filter is referred to by in qualified
    /// references and wildcard expansion: its alias if it has one,
    /// otherwise its table name.
    fn display_name(&self) -> &str {
        self.alias().unwrap_or_else(|| self.table_name())
    }
}
