//! Access-path chooser: the index-selection heuristics used by
//! `Select::prepare` to elide work (sorting, distinctness, full
//! aggregation). `spec.md` §4.2 steps 4, 6, 7, 8.

use crate::table_filter::{Index, SortColumn};

/// Sentinel used when an index reports no selectivity estimate. The
/// DISTINCT fast path only fires for indexes *more* selective than
/// [`DISTINCT_SELECTIVITY_THRESHOLD`], so a sentinel-valued index never
/// qualifies.
pub const SELECTIVITY_SENTINEL: u32 = u32::MAX;

/// Threshold below which a column's index is considered selective enough
/// to drive the DISTINCT single-column fast path.
pub const DISTINCT_SELECTIVITY_THRESHOLD: u32 = 20;

/// §4.2 step 6: search `indexes` for one usable by the DISTINCT
/// single-column fast path — ascending on `column`, not a hash index, and
/// not a single-column unique index (uniqueness already makes DISTINCT
/// trivial via other means, so such an index is not worth adopting here).
pub fn find_distinct_index(indexes: &[Box<dyn Index>], column: usize) -> Option<usize> {
    indexes.iter().position(|idx| {
        let idx = idx.as_ref();
        let cols = idx.index_columns();
        let leads_on_column = cols.first().map(|c| c.column) == Some(column);
        let ascending = cols
            .first()
            .map(|c| c.direction == crate::table_filter::SortDirection::Ascending)
            .unwrap_or(false);
        let ty = idx.index_type();
        let single_col_unique = ty.is_unique && idx.columns().len() == 1;
        leads_on_column && ascending && !ty.is_hash && !single_col_unique
    })
}

/// §4.2 step 7, first half: does `index` already satisfy `sort` as a
/// prefix (same columns, same direction, same null position)? `IN`
/// comparisons on the filter are assumed already filtered out by the
/// caller, since they can reorder keys and so disable this path entirely.
pub fn index_satisfies_sort(index: &dyn Index, sort: &[SortColumn]) -> bool {
    let cols = index.index_columns();
    if cols.len() < sort.len() {
        return false;
    }
    cols.iter()
        .zip(sort.iter())
        .all(|(ic, sc)| ic.column == sc.column && ic.direction == sc.direction && ic.nulls == sc.nulls)
}

/// §4.2 step 7, second half: search for a non-scan index that starts with
/// exactly `sort`'s columns (same prefix match as
/// [`index_satisfies_sort`]) and has at least as many columns as
/// `current_column_count`, preferring it over the currently installed
/// index so the sort can be elided.
pub fn find_better_sort_index(
    indexes: &[Box<dyn Index>],
    sort: &[SortColumn],
    current_column_count: usize,
) -> Option<usize> {
    indexes.iter().position(|idx| {
        let idx = idx.as_ref();
        !idx.index_type().is_scan
            && index_satisfies_sort(idx, sort)
            && idx.columns().len() >= current_column_count
    })
}

/// §4.2 step 8: search for an index whose columns — in any permutation of
/// a prefix — cover every column in `group_columns`, with the matched
/// columns forming an unbroken prefix of the index (no gap). Returns the
/// index if found; the caller adopts it and sets `isGroupSortedQuery`.
pub fn find_group_sorted_index(indexes: &[Box<dyn Index>], group_columns: &[usize]) -> Option<usize> {
    if group_columns.is_empty() {
        return None;
    }
    indexes.iter().position(|idx| {
        let idx = idx.as_ref();
        let cols = idx.index_columns();
        if cols.len() < group_columns.len() {
            return false;
        }
        let prefix: std::collections::HashSet<usize> =
            cols[..group_columns.len()].iter().map(|c| c.column).collect();
        let wanted: std::collections::HashSet<usize> = group_columns.iter().copied().collect();
        prefix == wanted
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_filter::{Cursor, IndexType, NullPosition, SortDirection};

    #[derive(Debug)]
    struct FakeIndex {
        cols: Vec<usize>,
        sort_cols: Vec<SortColumn>,
        ty: IndexType,
        selectivity: u32,
    }

    impl Index for FakeIndex {
        fn columns(&self) -> &[usize] {
            &self.cols
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
            _session: &dyn crate::config::Session,
            _from: Option<&[crate::value::Value]>,
            _to: Option<&[crate::value::Value]>,
        ) -> crate::error::Result<Box<dyn Cursor>> {
            unimplemented!("not exercised in access-path tests")
        }
        fn create_sql(&self) -> String {
            String::new()
        }
        fn selectivity(&self) -> u32 {
            self.selectivity
        }
    }

    fn asc(column: usize) -> SortColumn {
        SortColumn {
            column,
            direction: SortDirection::Ascending,
            nulls: NullPosition::Last,
        }
    }

    #[test]
    fn distinct_index_rejects_hash_and_single_col_unique() {
        let indexes: Vec<Box<dyn Index>> = vec![
            Box::new(FakeIndex {
                cols: vec![0],
                sort_cols: vec![asc(0)],
                ty: IndexType {
                    is_scan: false,
                    is_hash: true,
                    is_unique: false,
                },
                selectivity: 1,
            }),
            Box::new(FakeIndex {
                cols: vec![0],
                sort_cols: vec![asc(0)],
                ty: IndexType {
                    is_scan: false,
                    is_hash: false,
                    is_unique: true,
                },
                selectivity: 1,
            }),
            Box::new(FakeIndex {
                cols: vec![0],
                sort_cols: vec![asc(0)],
                ty: IndexType {
                    is_scan: false,
                    is_hash: false,
                    is_unique: false,
                },
                selectivity: 1,
            }),
        ];
        let found = indexes[find_distinct_index(&indexes, 0).unwrap()].as_ref();
        assert!(!found.index_type().is_hash);
        assert!(!(found.index_type().is_unique && found.columns().len() == 1));
    }

    #[test]
    fn group_sorted_matches_permuted_prefix() {
        let indexes: Vec<Box<dyn Index>> = vec![Box::new(FakeIndex {
            cols: vec![1, 0, 2],
            sort_cols: vec![asc(1), asc(0), asc(2)],
            ty: IndexType {
                is_scan: false,
                is_hash: false,
                is_unique: false,
            },
            selectivity: 5,
        })];
        assert!(find_group_sorted_index(&indexes, &[0, 1]).is_some());
        assert!(find_group_sorted_index(&indexes, &[0, 2]).is_none());
    }
}
