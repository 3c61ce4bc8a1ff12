//! Column resolvers used during `Select::init`'s `map_columns` pass.

use crate::expression::{ColumnRef, ColumnResolver};
use crate::table_filter::TableFilter;

fn names_match(case_insensitive: bool, a: &str, b: &str) -> bool {
    if case_insensitive {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

/// Resolves a (possibly schema/table-qualified) column name against one
/// table filter's visible columns.
pub struct FilterColumnResolver<'a> {
    pub filter: &'a dyn TableFilter,
    pub filter_index: usize,
    pub case_insensitive: bool,
}

impl<'a> ColumnResolver for FilterColumnResolver<'a> {
    fn resolve(&self, schema: Option<&str>, table: Option<&str>, column: &str) -> Option<ColumnRef> {
        if let Some(table) = table {
            if !names_match(self.case_insensitive, table, self.filter.display_name()) {
                return None;
            }
        }
        if let Some(schema) = schema {
            match self.filter.schema_name() {
                Some(s) if names_match(self.case_insensitive, schema, s) => {}
                _ => return None,
            }
        }
        for i in 0..self.filter.visible_column_count() {
            if names_match(self.case_insensitive, column, &self.filter.column_name(i)) {
                return Some(ColumnRef {
                    filter: Some(self.filter_index),
                    column: i,
                });
            }
        }
        None
    }
}
