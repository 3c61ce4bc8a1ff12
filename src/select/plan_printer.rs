//! Plan printer: regenerates an equivalent SQL text for a prepared
//! `Select`, annotated with the optimizations chosen during `prepare()`
//! (`spec.md` §4.5).

use std::fmt::Write as _;

use super::Select;

impl Select {
    /// Produces the canonical SQL reconstruction of this (prepared)
    /// statement, with inline comments naming the access-path
    /// optimizations `prepare()` chose.
    pub fn plan_sql(&self) -> String {
        let mut out = String::new();

        out.push_str("SELECT");
        if self.flags.is_quick_aggregate_query {
            out.push_str(" /* direct lookup */");
        }
        if self.is_distinct {
            out.push_str(" DISTINCT");
        }
        if !self.distinct_indexes.is_empty() && !self.is_distinct {
            let cols: Vec<String> = self
                .distinct_indexes
                .iter()
                .map(|&i| self.column_display(i))
                .collect();
            let _ = write!(out, " DISTINCT ON ({})", cols.join(", "));
        }
        if self.flags.is_distinct_query {
            out.push_str(" /* distinct */");
        }

        let projection: Vec<String> = (0..self.visible_column_count)
            .map(|i| self.column_display(i))
            .collect();
        let _ = write!(out, " {}", projection.join(", "));

        if !self.filters.is_empty() {
            out.push_str(" FROM ");
            let tables: Vec<String> = self
                .filters
                .iter()
                .map(|f| match f.filter.alias() {
                    Some(alias) => format!("{} AS {}", f.filter.table_name(), alias),
                    None => f.filter.table_name().to_string(),
                })
                .collect();
            out.push_str(&tables.join(", "));
        }

        if let Some(cond) = &self.condition {
            let _ = write!(out, " WHERE {}", cond.sql_text());
        }

        if !self.group_index.is_empty() {
            let cols: Vec<String> = self.group_index.iter().map(|&i| self.column_display(i)).collect();
            let _ = write!(out, " GROUP BY {}", cols.join(", "));
        }

        if let Some(hidx) = self.having_index {
            let _ = write!(out, " HAVING {}", self.expressions[hidx].sql_text());
        }

        if let Some(sort) = &self.sort {
            if !sort.is_empty() {
                let mut parts = Vec::with_capacity(sort.len());
                for col in sort {
                    let dir = match col.direction {
                        crate::table_filter::SortDirection::Ascending => "ASC",
                        crate::table_filter::SortDirection::Descending => "DESC",
                    };
                    parts.push(format!("{} {}", self.column_display(col.column), dir));
                }
                let _ = write!(out, " ORDER BY {}", parts.join(", "));
                if self.flags.sort_using_index {
                    out.push_str(" /* index sorted */");
                }
            }
        }
        if self.flags.is_group_sorted_query {
            out.push_str(" /* group sorted */");
        }

        if let Some(limit) = &self.limit_expr {
            let _ = write!(out, " LIMIT {}", limit.sql_text());
            if self.flags.fetch_percent {
                out.push_str(" PERCENT");
            }
            if self.flags.with_ties {
                out.push_str(" WITH TIES");
            }
        }
        if let Some(offset) = &self.offset_expr {
            let _ = write!(out, " OFFSET {}", offset.sql_text());
        }

        if let Some(sample) = self.session.sample_size() {
            let _ = write!(out, " SAMPLE_SIZE {sample}");
        }

        if self.flags.is_for_update {
            out.push_str(" FOR UPDATE");
        }

        out
    }

    fn column_display(&self, index: usize) -> String {
        let expr = &self.expressions[index];
        match expr.alias() {
            Some(alias) if index < self.visible_column_count => {
                format!("{} AS {}", expr.sql_text(), alias)
            }
            _ => expr.sql_text(),
        }
    }
}
