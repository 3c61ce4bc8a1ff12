//! A concrete [`Expression`] implementation.
//!
//! `spec.md` §9 ("Expression polymorphism") recommends treating
//! `Expression` as "a capability set... with variants `{ Column,
//! Constant, Comparison, AndOr, Wildcard, Alias, Aggregate, Parameter,
//! ... }`. Use tagged variants with dispatch through a small method
//! table; avoid deep inheritance." [`Expr`] is exactly that: one enum,
//! one `impl Expression for Expr`. It is what the core itself uses to
//! build the small synthetic predicates it needs internally (condition
//! conjunction, the global-condition tautology), and it is the
//! expression type the in-memory `testutil` engine uses to build whole
//! queries end to end.

use std::cell::RefCell;

use crate::expression::{ColumnRef, ColumnResolver, EvalContext, Expression, FilterId, OptimizeContext};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggFunc {
    fn name(&self) -> &'static str {
        match self {
            AggFunc::CountStar | AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
            AggFunc::Avg => "AVG",
        }
    }
}

/// The concrete expression AST used across this crate's core and its
/// `testutil` in-memory engine.
#[derive(Debug)]
pub enum Expr {
    /// A resolved reference to one column of one table filter.
    Column {
        filter: FilterId,
        column: usize,
        name: String,
    },
    /// An unresolved (possibly qualified) column reference, replaced by
    /// `Column` once `map_columns` runs.
    UnresolvedColumn {
        schema: Option<String>,
        table: Option<String>,
        column: String,
    },
    Constant(Value),
    Comparison {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Null-safe equality (`IS NOT DISTINCT FROM`).
    NullSafeEq(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Alias {
        expr: Box<Expr>,
        name: String,
    },
    Aggregate {
        func: AggFunc,
        arg: Option<Box<Expr>>,
    },
    Wildcard {
        schema: Option<String>,
        table: Option<String>,
    },
    /// A bind parameter. `RefCell` because `Expression::evaluate` takes
    /// `&self`, but binding a parameter value happens after the
    /// expression tree is built (mirroring the source engine's mutable
    /// parameter cells).
    Parameter(RefCell<Value>),
}

impl Expr {
    pub fn column(filter: FilterId, column: usize, name: impl Into<String>) -> Box<Expr> {
        Box::new(Expr::Column {
            filter,
            column,
            name: name.into(),
        })
    }

    pub fn unresolved(schema: Option<String>, table: Option<String>, column: impl Into<String>) -> Box<Expr> {
        Box::new(Expr::UnresolvedColumn {
            schema,
            table,
            column: column.into(),
        })
    }

    pub fn constant(v: Value) -> Box<Expr> {
        Box::new(Expr::Constant(v))
    }

    pub fn cmp(op: CmpOp, left: Box<Expr>, right: Box<Expr>) -> Box<Expr> {
        Box::new(Expr::Comparison { op, left, right })
    }

    pub fn and(left: Box<dyn Expression>, right: Box<dyn Expression>) -> Box<dyn Expression> {
        let left = downcast(left);
        let right = downcast(right);
        Box::new(Expr::And(left, right))
    }

    pub fn or(left: Box<Expr>, right: Box<Expr>) -> Box<Expr> {
        Box::new(Expr::Or(left, right))
    }

    pub fn alias(expr: Box<Expr>, name: impl Into<String>) -> Box<Expr> {
        Box::new(Expr::Alias {
            expr,
            name: name.into(),
        })
    }

    pub fn aggregate(func: AggFunc, arg: Option<Box<Expr>>) -> Box<Expr> {
        Box::new(Expr::Aggregate { func, arg })
    }

    pub fn wildcard(schema: Option<String>, table: Option<String>) -> Box<Expr> {
        Box::new(Expr::Wildcard { schema, table })
    }

    pub fn parameter(v: Value) -> Box<Expr> {
        Box::new(Expr::Parameter(RefCell::new(v)))
    }

    /// Builds the tautological null-safe self-equality fallback used by
    /// `Select::add_global_condition` when the target column is not
    /// group-comparable (see `select::prepare`'s doc comment on that
    /// method for the exact rule this crate applies).
    pub fn null_safe_self_eq(param: Box<Expr>) -> Box<Expr> {
        let a = Box::new(clone_shallow(&param));
        Box::new(Expr::NullSafeEq(a, param))
    }
}

/// Recovers the concrete `Expr` underneath a `Box<dyn Expression>` built
/// by this crate. `Select::add_condition`'s doc comment documents that
/// callers are expected to pass `Expr`-based trees (the only concrete
/// expression type this crate constructs); panics otherwise.
fn downcast(expr: Box<dyn Expression>) -> Box<Expr> {
    expr.into_expr_box()
        .expect("add_condition expects an Expr-based expression tree; see exprkit::downcast")
}

fn clone_shallow(e: &Expr) -> Expr {
    match e {
        Expr::Parameter(v) => Expr::Parameter(RefCell::new(v.borrow().clone())),
        Expr::Constant(v) => Expr::Constant(v.clone()),
        Expr::Column { filter, column, name } => Expr::Column {
            filter: *filter,
            column: *column,
            name: name.clone(),
        },
        other => panic!("null_safe_self_eq only supports simple operands, got {other:?}"),
    }
}

impl Expression for Expr {
    fn evaluate(&self, ctx: &mut EvalContext) -> Value {
        match self {
            Expr::Column { filter, column, .. } => {
                if *filter == usize::MAX {
                    ctx.projection_values.get(*column).cloned().unwrap_or(Value::Null)
                } else {
                    ctx.current_rows[*filter].get(*column).clone()
                }
            }
            Expr::UnresolvedColumn { column, .. } => {
                panic!("unresolved column '{column}' evaluated before map_columns")
            }
            Expr::Constant(v) => v.clone(),
            Expr::Comparison { op, left, right } => {
                let l = left.evaluate(ctx);
                let r = right.evaluate(ctx);
                match l.sql_cmp(&r) {
                    None => Value::Null,
                    Some(ord) => Value::Boolean(match op {
                        CmpOp::Eq => ord.is_eq(),
                        CmpOp::Ne => !ord.is_eq(),
                        CmpOp::Lt => ord.is_lt(),
                        CmpOp::Le => ord.is_le(),
                        CmpOp::Gt => ord.is_gt(),
                        CmpOp::Ge => ord.is_ge(),
                    }),
                }
            }
            Expr::NullSafeEq(left, right) => {
                let l = left.evaluate(ctx);
                let r = right.evaluate(ctx);
                Value::Boolean(l.null_safe_eq(&r))
            }
            Expr::And(left, right) => {
                let l = left.evaluate(ctx);
                if !l.is_null() && !l.as_bool_or_false() {
                    return Value::Boolean(false);
                }
                let r = right.evaluate(ctx);
                if !r.is_null() && !r.as_bool_or_false() {
                    return Value::Boolean(false);
                }
                if l.is_null() || r.is_null() {
                    Value::Null
                } else {
                    Value::Boolean(true)
                }
            }
            Expr::Or(left, right) => {
                let l = left.evaluate(ctx);
                if !l.is_null() && l.as_bool_or_false() {
                    return Value::Boolean(true);
                }
                let r = right.evaluate(ctx);
                if !r.is_null() && r.as_bool_or_false() {
                    return Value::Boolean(true);
                }
                if l.is_null() || r.is_null() {
                    Value::Null
                } else {
                    Value::Boolean(false)
                }
            }
            Expr::Not(inner) => match inner.evaluate(ctx) {
                Value::Null => Value::Null,
                v => Value::Boolean(!v.as_bool_or_false()),
            },
            Expr::Alias { expr, .. } => expr.evaluate(ctx),
            Expr::Aggregate { func, .. } => {
                let slot = ctx.agg_slot().clone();
                finalize_aggregate(*func, slot.as_ref())
            }
            Expr::Wildcard { .. } => panic!("wildcard evaluated before expansion"),
            Expr::Parameter(v) => v.borrow().clone(),
        }
    }

    fn update_aggregate(&self, ctx: &mut EvalContext) {
        match self {
            Expr::Aggregate { func, arg } => {
                let input = arg.as_ref().map(|a| a.evaluate(ctx));
                let slot = ctx.agg_slot();
                *slot = Some(fold_aggregate(*func, slot.clone(), input));
            }
            // A single shared slot only correctly folds one aggregate per
            // top-level expression; `HAVING SUM(b) > COUNT(*)` would need
            // two. Every concrete scenario this core targets nests at
            // most one aggregate per `HAVING`/projection expression.
            Expr::Alias { expr, .. } | Expr::Not(expr) => expr.update_aggregate(ctx),
            Expr::Comparison { left, right, .. }
            | Expr::NullSafeEq(left, right)
            | Expr::And(left, right)
            | Expr::Or(left, right) => {
                left.update_aggregate(ctx);
                right.update_aggregate(ctx);
            }
            _ => {}
        }
    }

    fn optimize(self: Box<Self>, ctx: &OptimizeContext) -> Box<dyn Expression> {
        let _ = ctx;
        match *self {
            Expr::And(l, r) => {
                let l = to_boxed_expression(l, ctx);
                let r = to_boxed_expression(r, ctx);
                Box::new(Expr::And(into_expr(l), into_expr(r)))
            }
            Expr::Or(l, r) => {
                let l = to_boxed_expression(l, ctx);
                let r = to_boxed_expression(r, ctx);
                Box::new(Expr::Or(into_expr(l), into_expr(r)))
            }
            Expr::Comparison { op, left, right } => {
                let left = into_expr(to_boxed_expression(left, ctx));
                let right = into_expr(to_boxed_expression(right, ctx));
                if let (Expr::Constant(a), Expr::Constant(b)) = (left.as_ref(), right.as_ref()) {
                    let v = match a.sql_cmp(b) {
                        None => Value::Null,
                        Some(ord) => Value::Boolean(match op {
                            CmpOp::Eq => ord.is_eq(),
                            CmpOp::Ne => !ord.is_eq(),
                            CmpOp::Lt => ord.is_lt(),
                            CmpOp::Le => ord.is_le(),
                            CmpOp::Gt => ord.is_gt(),
                            CmpOp::Ge => ord.is_ge(),
                        }),
                    };
                    return Box::new(Expr::Constant(v));
                }
                Box::new(Expr::Comparison { op, left, right })
            }
            Expr::Alias { expr, name } => {
                let expr = into_expr(to_boxed_expression(expr, ctx));
                Box::new(Expr::Alias { expr, name })
            }
            other => Box::new(other),
        }
    }

    fn map_columns(&mut self, resolver: &dyn ColumnResolver) {
        match self {
            Expr::UnresolvedColumn { schema, table, column } => {
                match resolver.resolve(schema.as_deref(), table.as_deref(), column) {
                    Some(ColumnRef { filter: Some(filter), column: col }) => {
                        *self = Expr::Column {
                            filter,
                            column: col,
                            name: column.clone(),
                        };
                    }
                    Some(ColumnRef { filter: None, column: col }) => {
                        // Resolved through the projection-list resolver
                        // (HAVING referencing a select-list alias): keep
                        // the slot-index identity but mark it as an
                        // already-evaluated projection column.
                        *self = Expr::Column {
                            filter: usize::MAX,
                            column: col,
                            name: column.clone(),
                        };
                    }
                    None => {}
                }
            }
            Expr::Comparison { left, right, .. } | Expr::NullSafeEq(left, right) => {
                left.map_columns(resolver);
                right.map_columns(resolver);
            }
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.map_columns(resolver);
                r.map_columns(resolver);
            }
            Expr::Not(inner) | Expr::Alias { expr: inner, .. } => inner.map_columns(resolver),
            Expr::Aggregate { arg: Some(arg), .. } => arg.map_columns(resolver),
            _ => {}
        }
    }

    fn sql_text(&self) -> String {
        match self {
            Expr::Column { name, .. } => name.clone(),
            Expr::UnresolvedColumn { table, column, .. } => match table {
                Some(t) => format!("{t}.{column}"),
                None => column.clone(),
            },
            Expr::Constant(v) => format!("{v:?}"),
            Expr::Comparison { op, left, right } => {
                let sym = match op {
                    CmpOp::Eq => "=",
                    CmpOp::Ne => "<>",
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                };
                format!("({} {} {})", left.sql_text(), sym, right.sql_text())
            }
            Expr::NullSafeEq(l, r) => format!("({} IS NOT DISTINCT FROM {})", l.sql_text(), r.sql_text()),
            Expr::And(l, r) => format!("({} AND {})", l.sql_text(), r.sql_text()),
            Expr::Or(l, r) => format!("({} OR {})", l.sql_text(), r.sql_text()),
            Expr::Not(inner) => format!("(NOT {})", inner.sql_text()),
            Expr::Alias { expr, .. } => expr.sql_text(),
            Expr::Aggregate { func, arg } => match arg {
                Some(a) => format!("{}({})", func.name(), a.sql_text()),
                None => format!("{}(*)", func.name()),
            },
            Expr::Wildcard { table, .. } => match table {
                Some(t) => format!("{t}.*"),
                None => "*".to_string(),
            },
            Expr::Parameter(_) => "?".to_string(),
        }
    }

    fn alias(&self) -> Option<&str> {
        match self {
            Expr::Alias { name, .. } => Some(name),
            Expr::Column { name, .. } => Some(name),
            _ => None,
        }
    }

    fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant(_))
    }

    fn is_wildcard(&self) -> bool {
        matches!(self, Expr::Wildcard { .. })
    }

    fn wildcard_qualifier(&self) -> (Option<String>, Option<String>) {
        match self {
            Expr::Wildcard { schema, table } => (schema.clone(), table.clone()),
            _ => (None, None),
        }
    }

    fn is_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Alias { expr, .. } => expr.is_aggregate(),
            _ => false,
        }
    }

    fn as_simple_column(&self) -> Option<ColumnRef> {
        match self {
            Expr::Column { filter, column, .. } => Some(ColumnRef {
                filter: if *filter == usize::MAX { None } else { Some(*filter) },
                column: *column,
            }),
            Expr::Alias { expr, .. } => expr.as_simple_column(),
            _ => None,
        }
    }

    fn is_quick_aggregatable(&self) -> bool {
        match self {
            Expr::Aggregate { func, arg } => match func {
                AggFunc::CountStar => true,
                AggFunc::Min | AggFunc::Max => arg.as_ref().map(|a| a.as_simple_column().is_some()).unwrap_or(false),
                _ => false,
            },
            Expr::Alias { expr, .. } => expr.is_quick_aggregatable(),
            _ => false,
        }
    }

    fn evaluate_quick_aggregate(&self, index: &dyn crate::table_filter::Index) -> Value {
        match self {
            Expr::Alias { expr, .. } => expr.evaluate_quick_aggregate(index),
            Expr::Aggregate { func: AggFunc::CountStar, .. } => Value::Int(index.row_count_approx() as i64),
            Expr::Aggregate { func: AggFunc::Min, .. } => index.min_value().unwrap_or(Value::Null),
            Expr::Aggregate { func: AggFunc::Max, .. } => index.max_value().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    fn into_expr_box(self: Box<Self>) -> Option<Box<Expr>> {
        Some(self)
    }
}

fn fold_aggregate(func: AggFunc, current: Option<Value>, input: Option<Value>) -> Value {
    match func {
        AggFunc::CountStar => {
            let n = match current {
                Some(Value::Int(n)) => n,
                _ => 0,
            };
            Value::Int(n + 1)
        }
        AggFunc::Count => {
            let n = match current {
                Some(Value::Int(n)) => n,
                _ => 0,
            };
            let bump = input.map(|v| !v.is_null()).unwrap_or(false) as i64;
            Value::Int(n + bump)
        }
        AggFunc::Sum => {
            let input = match input {
                Some(v) if !v.is_null() => v,
                _ => return current.unwrap_or(Value::Null),
            };
            match (current, input) {
                (None, v) | (Some(Value::Null), v) => v,
                (Some(Value::Int(a)), Value::Int(b)) => Value::Int(a + b),
                (Some(Value::Int(a)), Value::Float(b)) => Value::Float(ordered_float::OrderedFloat(a as f64 + b.0)),
                (Some(Value::Float(a)), Value::Int(b)) => Value::Float(ordered_float::OrderedFloat(a.0 + b as f64)),
                (Some(Value::Float(a)), Value::Float(b)) => Value::Float(ordered_float::OrderedFloat(a.0 + b.0)),
                (Some(other), _) => other,
            }
        }
        AggFunc::Min => match (current, input) {
            (None, Some(v)) => v,
            (Some(c), Some(v)) if !v.is_null() && (c.is_null() || v.cmp(&c) == std::cmp::Ordering::Less) => v,
            (Some(c), _) => c,
            (None, None) => Value::Null,
        },
        AggFunc::Max => match (current, input) {
            (None, Some(v)) => v,
            (Some(c), Some(v)) if !v.is_null() && (c.is_null() || v.cmp(&c) == std::cmp::Ordering::Greater) => v,
            (Some(c), _) => c,
            (None, None) => Value::Null,
        },
        AggFunc::Avg => {
            // Represented as a running `[sum, count]` pair encoded in an
            // Array value so AVG needs no separate accumulator type.
            let (mut sum, mut count) = match current {
                Some(Value::Array(ref a)) if a.len() == 2 => match (&a[0], &a[1]) {
                    (Value::Float(s), Value::Int(c)) => (s.0, *c),
                    _ => (0.0, 0),
                },
                _ => (0.0, 0),
            };
            if let Some(v) = input {
                if !v.is_null() {
                    sum += match v {
                        Value::Int(i) => i as f64,
                        Value::Float(f) => f.0,
                        _ => 0.0,
                    };
                    count += 1;
                }
            }
            Value::Array(vec![Value::Float(ordered_float::OrderedFloat(sum)), Value::Int(count)])
        }
    }
}

/// Finalizes an `AVG` accumulator slot (stored as `[sum, count]`) into its
/// displayed value. Aggregates whose running state already equals their
/// displayed value (`COUNT`, `SUM`, `MIN`, `MAX`) need no such step.
pub fn finalize_aggregate(func: AggFunc, state: Option<&Value>) -> Value {
    match (func, state) {
        (AggFunc::Avg, Some(Value::Array(a))) if a.len() == 2 => match (&a[0], &a[1]) {
            (Value::Float(s), Value::Int(c)) if *c > 0 => {
                Value::Float(ordered_float::OrderedFloat(s.0 / *c as f64))
            }
            _ => Value::Null,
        },
        (AggFunc::Avg, _) => Value::Null,
        (AggFunc::CountStar, None) | (AggFunc::Count, None) => Value::Int(0),
        (_, Some(v)) => v.clone(),
        (_, None) => Value::Null,
    }
}

/// Wraps an arbitrary expression with a display alias. Unlike
/// [`Expr::alias`], which only wraps this crate's own `Expr` tree, this
/// works over any `Box<dyn Expression>` — used by `Select::prepare`'s
/// output-name allocator, which must be able to rename a column supplied
/// by an external `Expression` implementation too.
#[derive(Debug)]
pub struct Named {
    inner: Box<dyn Expression>,
    name: String,
}

impl Named {
    pub fn new(inner: Box<dyn Expression>, name: impl Into<String>) -> Box<dyn Expression> {
        Box::new(Named {
            inner,
            name: name.into(),
        })
    }
}

impl Expression for Named {
    fn evaluate(&self, ctx: &mut EvalContext) -> Value {
        self.inner.evaluate(ctx)
    }

    fn update_aggregate(&self, ctx: &mut EvalContext) {
        self.inner.update_aggregate(ctx)
    }

    fn optimize(self: Box<Self>, ctx: &OptimizeContext) -> Box<dyn Expression> {
        let Named { inner, name } = *self;
        Named::new(inner.optimize(ctx), name)
    }

    fn map_columns(&mut self, resolver: &dyn ColumnResolver) {
        self.inner.map_columns(resolver)
    }

    fn set_evaluatable(&mut self, filter: FilterId, evaluatable: bool) {
        self.inner.set_evaluatable(filter, evaluatable)
    }

    fn is_wildcard(&self) -> bool {
        self.inner.is_wildcard()
    }

    fn wildcard_qualifier(&self) -> (Option<String>, Option<String>) {
        self.inner.wildcard_qualifier()
    }

    fn sql_text(&self) -> String {
        self.inner.sql_text()
    }

    fn alias(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn is_constant(&self) -> bool {
        self.inner.is_constant()
    }

    fn is_aggregate(&self) -> bool {
        self.inner.is_aggregate()
    }

    fn as_simple_column(&self) -> Option<ColumnRef> {
        self.inner.as_simple_column()
    }

    fn is_quick_aggregatable(&self) -> bool {
        self.inner.is_quick_aggregatable()
    }

    fn evaluate_quick_aggregate(&self, index: &dyn crate::table_filter::Index) -> Value {
        self.inner.evaluate_quick_aggregate(index)
    }
}

fn to_boxed_expression(e: Box<Expr>, ctx: &OptimizeContext) -> Box<dyn Expression> {
    (e as Box<dyn Expression>).optimize(ctx)
}

fn into_expr(e: Box<dyn Expression>) -> Box<Expr> {
    downcast(e)
}
