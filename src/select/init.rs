//! Binding: `Select::init`, `spec.md` §4.1.

use crate::error::{Error, Result};
use crate::exprkit::Expr;
use crate::expression::Expression;

use super::{OrderKey, Select};

impl Select {
    /// Binds this statement: expands wildcards, binds `DISTINCT ON`,
    /// `ORDER BY`, and `GROUP BY` against the projection list, appends
    /// `HAVING`, and resolves every column reference. Idempotence-guarded:
    /// calling this twice is a fatal internal error (`spec.md` §7).
    pub fn init(&mut self) -> Result<()> {
        self.mark_initialized();
        let case_insensitive = self.session.database().case_insensitive_identifiers();

        self.expand_wildcards(case_insensitive)?;
        self.visible_column_count = self.expressions.len();

        let snapshot_needed = self.is_distinct
            || self.distinct_on_pending.is_some()
            || self.order_list.is_some()
            || self.group.is_some();
        if snapshot_needed {
            self.visible_expr_sql = self.expressions[..self.visible_column_count]
                .iter()
                .map(|e| e.sql_text())
                .collect();
        }

        if self.is_distinct && self.distinct_on_pending.is_some() {
            return Err(Error::UnsupportedFeatureCombination(
                "DISTINCT ON cannot be combined with plain DISTINCT",
            ));
        }

        self.bind_distinct_on(case_insensitive)?;

        let had_order_by = self
            .order_list
            .as_ref()
            .map(|items| !items.is_empty())
            .unwrap_or(false);
        self.bind_order_by(case_insensitive)?;

        self.distinct_column_count = self.expressions.len();

        if let Some(having) = self.having_pending.take() {
            self.expressions.push(having);
            self.having_index = Some(self.expressions.len() - 1);
        }

        if self.flags.with_ties && !had_order_by {
            return Err(Error::WithTiesWithoutOrderBy);
        }

        self.bind_group_by(case_insensitive)?;

        self.map_columns_over_filters(case_insensitive);
        self.bind_having_through_projection_list(case_insensitive);

        self.flags.is_group_query =
            !self.group_index.is_empty() || self.expressions.iter().any(|e| e.is_aggregate());

        Ok(())
    }

    /// §4.1 step 1: replaces each `*`/`table.*` expression with one
    /// `Column` reference per visible, non-natural-join column of every
    /// matching filter, in `FROM`-clause order.
    fn expand_wildcards(&mut self, case_insensitive: bool) -> Result<()> {
        let old = std::mem::take(&mut self.expressions);
        let mut expanded = Vec::with_capacity(old.len());
        for expr in old {
            if !expr.is_wildcard() {
                expanded.push(expr);
                continue;
            }
            let (schema, table) = expr.wildcard_qualifier();
            let mut matched_any = false;
            for (fi, slot) in self.filters.iter().enumerate() {
                let filter = slot.filter.as_ref();
                if let Some(table) = &table {
                    let name_matches = names_eq(table, filter.display_name(), case_insensitive);
                    if !name_matches {
                        continue;
                    }
                    if let Some(schema) = &schema {
                        match filter.schema_name() {
                            Some(s) if names_eq(schema, s, case_insensitive) => {}
                            _ => continue,
                        }
                    }
                }
                matched_any = true;
                for col in 0..filter.visible_column_count() {
                    if filter.is_natural_join_column(col) {
                        continue;
                    }
                    expanded.push(Expr::column(fi, col, filter.column_name(col)));
                }
            }
            if table.is_some() && !matched_any {
                return Err(Error::TableOrViewNotFound(table.unwrap_or_default()));
            }
        }
        self.expressions = expanded;
        Ok(())
    }

    /// §4.1 step 4: bind `DISTINCT ON` expressions against the existing
    /// visible projection list, reusing a matching column or appending a
    /// new one, then collecting the unique, ascending `distinct_indexes`.
    fn bind_distinct_on(&mut self, case_insensitive: bool) -> Result<()> {
        let Some(pending) = self.distinct_on_pending.take() else {
            return Ok(());
        };
        let mut indexes = Vec::new();
        for expr in pending {
            let idx = self.match_or_append(expr, case_insensitive);
            if !indexes.contains(&idx) {
                indexes.push(idx);
            }
        }
        indexes.sort_unstable();
        self.distinct_indexes = indexes;
        Ok(())
    }

    /// §4.1 step 5: bind `ORDER BY` items — numeric positions refer to
    /// 1-based columns among the expressions bound so far; expressions
    /// use the same match-or-append policy as `DISTINCT ON`.
    fn bind_order_by(&mut self, case_insensitive: bool) -> Result<()> {
        let Some(mut items) = self.order_list.take() else {
            return Ok(());
        };
        for item in items.iter_mut() {
            item.resolved_index = match &item.key {
                OrderKey::Position(n) => {
                    let n = *n;
                    if n < 1 || n as usize > self.expressions.len() {
                        return Err(Error::invalid_value(
                            "ORDER BY position",
                            format!("{n} (expected 1..={})", self.expressions.len()),
                        ));
                    }
                    (n - 1) as usize
                }
                OrderKey::Expression(_) => {
                    let OrderKey::Expression(expr) = std::mem::replace(&mut item.key, OrderKey::Position(0))
                    else {
                        unreachable!()
                    };
                    self.match_or_append(expr, case_insensitive)
                }
            };
        }
        self.order_list = Some(items);
        Ok(())
    }

    /// §4.1 step 9: bind `GROUP BY` keys against existing expression SQL
    /// text, then against column aliases (including the group
    /// expression's own alias against existing aliases — the "GROUP BY
    /// alias" special case), appending when neither matches.
    fn bind_group_by(&mut self, case_insensitive: bool) -> Result<()> {
        let Some(group) = self.group.take() else {
            return Ok(());
        };
        let mut group_index = Vec::with_capacity(group.len());
        for expr in group {
            let idx = self
                .match_by_sql_text(expr.as_ref(), case_insensitive)
                .or_else(|| self.match_by_alias(expr.alias(), case_insensitive));
            let idx = match idx {
                Some(idx) => idx,
                None => {
                    self.expressions.push(expr);
                    self.expressions.len() - 1
                }
            };
            group_index.push(idx);
        }
        self.group_by_expression = vec![false; self.expressions.len()];
        for &idx in &group_index {
            self.group_by_expression[idx] = true;
        }
        self.group_index = group_index;
        Ok(())
    }

    /// Shared match-or-append policy used by `DISTINCT ON` and
    /// `ORDER BY` binding: match by SQL text first, then by alias,
    /// otherwise append as a new (non-visible) expression.
    fn match_or_append(&mut self, expr: Box<dyn Expression>, case_insensitive: bool) -> usize {
        if let Some(idx) = self.match_by_sql_text(expr.as_ref(), case_insensitive) {
            return idx;
        }
        if let Some(idx) = self.match_by_alias(expr.alias(), case_insensitive) {
            return idx;
        }
        self.expressions.push(expr);
        self.expressions.len() - 1
    }

    fn match_by_sql_text(&self, expr: &dyn Expression, case_insensitive: bool) -> Option<usize> {
        let text = expr.sql_text();
        self.expressions
            .iter()
            .position(|e| names_eq(&e.sql_text(), &text, case_insensitive))
    }

    fn match_by_alias(&self, alias: Option<&str>, case_insensitive: bool) -> Option<usize> {
        let alias = alias?;
        self.expressions
            .iter()
            .position(|e| e.alias().map(|a| names_eq(a, alias, case_insensitive)).unwrap_or(false))
    }

    /// §4.1 step 10, first half: resolve every column reference against
    /// every table filter, in filter order. A column already resolved by
    /// an earlier filter is left untouched by later ones (`Expr`'s
    /// `map_columns` only rewrites its `UnresolvedColumn` variant).
    fn map_columns_over_filters(&mut self, case_insensitive: bool) {
        for fi in 0..self.filters.len() {
            let resolver = super::resolver::FilterColumnResolver {
                filter: self.filters[fi].filter.as_ref(),
                filter_index: fi,
                case_insensitive,
            };
            for expr in self.expressions.iter_mut() {
                expr.map_columns(&resolver);
            }
            if let Some(cond) = self.condition.as_mut() {
                cond.map_columns(&resolver);
            }
        }
    }

    /// §4.1 step 10, second half: resolve any column in `HAVING` still
    /// unresolved after the filter pass through the projection list
    /// itself, so `HAVING` can reference aggregate results and
    /// select-list aliases.
    fn bind_having_through_projection_list(&mut self, case_insensitive: bool) {
        let Some(having_index) = self.having_index else {
            return;
        };
        let others: Vec<(usize, Option<String>)> = self
            .expressions
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != having_index)
            .map(|(i, e)| (i, e.alias().map(|a| a.to_string())))
            .collect();
        let having = &mut self.expressions[having_index];
        having.map_columns(&AliasOnlyResolver {
            aliases: &others,
            case_insensitive,
        });
    }
}

struct AliasOnlyResolver<'a> {
    aliases: &'a [(usize, Option<String>)],
    case_insensitive: bool,
}

impl<'a> crate::expression::ColumnResolver for AliasOnlyResolver<'a> {
    fn resolve(
        &self,
        schema: Option<&str>,
        table: Option<&str>,
        column: &str,
    ) -> Option<crate::expression::ColumnRef> {
        if schema.is_some() || table.is_some() {
            return None;
        }
        self.aliases
            .iter()
            .find(|(_, alias)| {
                alias
                    .as_deref()
                    .map(|a| names_eq(a, column, self.case_insensitive))
                    .unwrap_or(false)
            })
            .map(|(idx, _)| crate::expression::ColumnRef {
                filter: None,
                column: *idx,
            })
    }
}

fn names_eq(a: &str, b: &str, case_insensitive: bool) -> bool {
    if case_insensitive {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}
