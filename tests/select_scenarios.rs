//! End-to-end coverage over the public surface, using the in-memory table
//! fixtures in `select_exec::testutil`. There is no SQL parser in this
//! crate, so every statement here is built by hand through `Select`'s
//! setters, the same way a caller with its own parser/binder would.

use std::sync::Arc;

use rstest::rstest;
use select_exec::config::{Session, SimpleSession};
use select_exec::exprkit::{AggFunc, CmpOp, Expr};
use select_exec::expression::Expression;
use select_exec::result_sink::MaterializedResult;
use select_exec::select::{OrderItem, OrderKey};
use select_exec::table_filter::{NullPosition, SortDirection};
use select_exec::testutil::{MemTable, MemTableFilter};
use select_exec::value::Value;
use select_exec::{QueryOutcome, Select};

fn dyn_expr(e: Box<Expr>) -> Box<dyn Expression> {
    e
}

fn session() -> Arc<dyn Session> {
    // Surfaces the `log::debug!` access-path decisions from `prepare()`
    // when a test is run with `RUST_LOG=debug`. Harmless if called more
    // than once across tests.
    let _ = env_logger::try_init();
    Arc::new(SimpleSession::default())
}

/// `T(a, b)` with rows `(1,10) (1,20) (2,30) (2,40) (3,50)`, the schema
/// every concrete scenario is built over.
fn table_t() -> Arc<MemTable> {
    MemTable::new(
        "t",
        &["a", "b"],
        vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(1), Value::Int(20)],
            vec![Value::Int(2), Value::Int(30)],
            vec![Value::Int(2), Value::Int(40)],
            vec![Value::Int(3), Value::Int(50)],
        ],
    )
}

fn asc(position: i64) -> OrderItem {
    OrderItem::new(OrderKey::Position(position), SortDirection::Ascending, NullPosition::Last)
}

fn rows_of(outcome: QueryOutcome<'_>) -> Vec<Vec<Value>> {
    rows_of_capped(outcome, None)
}

/// Like `rows_of`, but for a lazy outcome stops pulling once `cap` rows are
/// in hand — the lazy driver itself never truncates to `LIMIT`, the same as
/// a real streaming consumer that stops asking for more once it has enough
/// (`spec.md` §4.4).
fn rows_of_capped(outcome: QueryOutcome<'_>, cap: Option<usize>) -> Vec<Vec<Value>> {
    match outcome {
        QueryOutcome::Materialized(r) => r.into_rows().into_iter().map(|row| row.into_values()).collect(),
        QueryOutcome::Lazy(mut lazy) => {
            let mut out = Vec::new();
            while cap.map(|c| out.len() < c).unwrap_or(true) && lazy.next().unwrap() {
                out.push(lazy.current_row().into_values());
            }
            out
        }
        QueryOutcome::Drained => Vec::new(),
    }
}

#[test]
fn group_by_sum_ordered_by_key() {
    let session = session();
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table_t())), true);
    select.set_expressions(vec![
        dyn_expr(Expr::column(0, 0, "a")),
        dyn_expr(Expr::aggregate(AggFunc::Sum, Some(Expr::column(0, 1, "b")))),
    ]);
    select.set_group_by(vec![dyn_expr(Expr::column(0, 0, "a"))]);
    select.set_order_list(vec![asc(1)]);

    select.init().unwrap();
    select.prepare().unwrap();
    let outcome = select.query_without_cache(0, None).unwrap();

    assert_eq!(
        rows_of(outcome),
        vec![
            vec![Value::Int(1), Value::Int(30)],
            vec![Value::Int(2), Value::Int(70)],
            vec![Value::Int(3), Value::Int(50)],
        ]
    );
}

#[test]
fn group_by_sum_with_having_filters_groups() {
    let session = session();
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table_t())), true);
    select.set_expressions(vec![
        dyn_expr(Expr::column(0, 0, "a")),
        dyn_expr(Expr::aggregate(AggFunc::Sum, Some(Expr::column(0, 1, "b")))),
    ]);
    select.set_group_by(vec![dyn_expr(Expr::column(0, 0, "a"))]);
    select.set_having(dyn_expr(Expr::cmp(
        CmpOp::Gt,
        Expr::aggregate(AggFunc::Sum, Some(Expr::column(0, 1, "b"))),
        Expr::constant(Value::Int(40)),
    )));
    select.set_order_list(vec![asc(1)]);

    select.init().unwrap();
    select.prepare().unwrap();
    let outcome = select.query_without_cache(0, None).unwrap();

    assert_eq!(
        rows_of(outcome),
        vec![vec![Value::Int(2), Value::Int(70)], vec![Value::Int(3), Value::Int(50)]]
    );
}

#[test]
fn distinct_single_column_ordered() {
    let session = session();
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table_t())), true);
    select.set_expressions(vec![dyn_expr(Expr::column(0, 0, "a"))]);
    select.set_distinct();
    select.set_order_list(vec![asc(1)]);

    select.init().unwrap();
    select.prepare().unwrap();
    let outcome = select.query_without_cache(0, None).unwrap();

    assert_eq!(
        rows_of(outcome),
        vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]]
    );
}

/// Same statement as above, but with a covering ascending index on `a`
/// registered, which gives the preparer a real shot at the DISTINCT
/// single-column fast path instead of a materialize-and-dedup scan.
#[test]
fn distinct_single_column_with_covering_index() {
    let session = session();
    let table = table_t();
    let mut filter = MemTableFilter::new(table.clone());
    filter.add_index(table.index_on(&[(0, SortDirection::Ascending, NullPosition::Last)], false, false));
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(filter), true);
    select.set_expressions(vec![dyn_expr(Expr::column(0, 0, "a"))]);
    select.set_distinct();
    select.set_order_list(vec![asc(1)]);

    select.init().unwrap();
    select.prepare().unwrap();
    let outcome = select.query_without_cache(0, None).unwrap();

    assert_eq!(
        rows_of(outcome),
        vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]]
    );
}

/// `ORDER BY b` where `b` is not already in the select list: `match_or_append`
/// appends it as a hidden column, and `distinct_column_count` must be taken
/// after that append (`spec.md` §4.1 step 6) so the hidden column stays
/// in-bounds for the final sort instead of panicking on a truncated row.
#[test]
fn distinct_with_order_by_column_outside_select_list() {
    let session = session();
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table_t())), true);
    select.set_expressions(vec![dyn_expr(Expr::column(0, 0, "a"))]);
    select.set_distinct();
    select.set_order_list(vec![OrderItem::new(
        OrderKey::Expression(dyn_expr(Expr::column(0, 1, "b"))),
        SortDirection::Ascending,
        NullPosition::Last,
    )]);

    select.init().unwrap();
    select.prepare().unwrap();
    let outcome = select.query_without_cache(0, None).unwrap();

    assert_eq!(
        rows_of(outcome),
        vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(1), Value::Int(20)],
            vec![Value::Int(2), Value::Int(30)],
            vec![Value::Int(2), Value::Int(40)],
            vec![Value::Int(3), Value::Int(50)],
        ]
    );
}

#[test]
fn count_star_uses_quick_aggregate_metadata() {
    let session = session();
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table_t())), true);
    select.set_expressions(vec![dyn_expr(Expr::aggregate(AggFunc::CountStar, None))]);

    select.init().unwrap();
    select.prepare().unwrap();
    assert!(select.is_quick_aggregate_query());

    let outcome = select.query_without_cache(0, None).unwrap();
    assert_eq!(rows_of(outcome), vec![vec![Value::Int(5)]]);
}

#[test]
fn order_desc_with_limit_and_offset() {
    let session = session();
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table_t())), true);
    select.set_expressions(vec![dyn_expr(Expr::column(0, 0, "a")), dyn_expr(Expr::column(0, 1, "b"))]);
    select.set_order_list(vec![OrderItem::new(
        OrderKey::Position(2),
        SortDirection::Descending,
        NullPosition::Last,
    )]);
    select.set_limit(Some(dyn_expr(Expr::constant(Value::Int(2)))));
    select.set_offset(Some(dyn_expr(Expr::constant(Value::Int(1)))));

    select.init().unwrap();
    select.prepare().unwrap();
    let outcome = select.query_without_cache(0, None).unwrap();

    assert_eq!(
        rows_of(outcome),
        vec![vec![Value::Int(2), Value::Int(30)], vec![Value::Int(1), Value::Int(20)]]
    );
}

#[test]
fn fetch_first_with_ties_extends_past_the_limit() {
    let session = session();
    let table = MemTable::new(
        "t",
        &["a", "b"],
        vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(1), Value::Int(20)],
            vec![Value::Int(2), Value::Int(30)],
            vec![Value::Int(2), Value::Int(40)],
            vec![Value::Int(3), Value::Int(50)],
            vec![Value::Int(4), Value::Int(20)],
        ],
    );
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table)), true);
    select.set_expressions(vec![dyn_expr(Expr::column(0, 0, "a")), dyn_expr(Expr::column(0, 1, "b"))]);
    select.set_order_list(vec![asc(2)]);
    select.set_limit(Some(dyn_expr(Expr::constant(Value::Int(2)))));
    select.set_with_ties(true);

    select.init().unwrap();
    select.prepare().unwrap();
    let outcome = select.query_without_cache(0, None).unwrap();

    assert_eq!(
        rows_of(outcome),
        vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(1), Value::Int(20)],
            vec![Value::Int(4), Value::Int(20)],
        ]
    );
}

#[test]
#[should_panic(expected = "Select::init called twice")]
fn init_twice_panics() {
    let session = session();
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table_t())), true);
    select.set_expressions(vec![dyn_expr(Expr::column(0, 0, "a"))]);
    select.init().unwrap();
    select.init().unwrap();
}

#[test]
fn prepare_twice_is_a_no_op() {
    let session = session();
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table_t())), true);
    select.set_expressions(vec![dyn_expr(Expr::column(0, 0, "a"))]);
    select.init().unwrap();
    select.prepare().unwrap();
    select.prepare().unwrap();

    let outcome = select.query_without_cache(0, None).unwrap();
    assert_eq!(
        rows_of(outcome),
        vec![vec![Value::Int(1)], vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(2)], vec![Value::Int(3)]]
    );
}

#[test]
#[should_panic(expected = "query_without_cache called before prepare")]
fn query_before_prepare_panics() {
    let session = session();
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table_t())), true);
    select.set_expressions(vec![dyn_expr(Expr::column(0, 0, "a"))]);
    select.init().unwrap();
    let _ = select.query_without_cache(0, None);
}

#[rstest]
#[case(0, 0, vec![1, 10, 1, 20, 2, 30, 2, 40, 3, 50])]
#[case(2, 0, vec![1, 10, 1, 20])]
#[case(2, 2, vec![2, 30, 2, 40])]
#[case(1, 4, vec![3, 50])]
#[case(10, 4, vec![3, 50])]
fn limit_offset_paging_over_a_sorted_scan(#[case] limit: i64, #[case] offset: i64, #[case] expected_flat: Vec<i64>) {
    let session = session();
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table_t())), true);
    select.set_expressions(vec![dyn_expr(Expr::column(0, 0, "a")), dyn_expr(Expr::column(0, 1, "b"))]);
    select.set_order_list(vec![asc(2)]);
    if limit != 0 {
        select.set_limit(Some(dyn_expr(Expr::constant(Value::Int(limit)))));
    }
    if offset != 0 {
        select.set_offset(Some(dyn_expr(Expr::constant(Value::Int(offset)))));
    }

    select.init().unwrap();
    select.prepare().unwrap();
    let outcome = select.query_without_cache(0, None).unwrap();

    let expected: Vec<Vec<Value>> = expected_flat
        .chunks(2)
        .map(|pair| vec![Value::Int(pair[0]), Value::Int(pair[1])])
        .collect();
    let cap = if limit == 0 { None } else { Some(expected.len()) };
    assert_eq!(rows_of_capped(outcome, cap), expected);
}

/// A lazy driver enforces a configured `LIMIT` itself (`spec.md` §4.4's
/// "integrating ... row limits" is the driver's own responsibility), so
/// draining it with a plain `while lazy.next()? {}` loop — not a caller that
/// stops pulling once it has enough — still yields exactly `LIMIT` rows.
#[test]
fn lazy_driver_stops_at_its_own_limit() {
    let session = session();
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table_t())), true);
    select.set_expressions(vec![dyn_expr(Expr::column(0, 0, "a")), dyn_expr(Expr::column(0, 1, "b"))]);
    select.set_limit(Some(dyn_expr(Expr::constant(Value::Int(2)))));

    select.init().unwrap();
    select.prepare().unwrap();
    let outcome = select.query_without_cache(0, None).unwrap();

    let QueryOutcome::Lazy(mut lazy) = outcome else {
        panic!("expected a lazy outcome for an unordered, ungrouped, non-distinct query with a limit");
    };
    let mut rows = Vec::new();
    while lazy.next().unwrap() {
        rows.push(lazy.current_row().into_values());
    }
    assert_eq!(rows, vec![vec![Value::Int(1), Value::Int(10)], vec![Value::Int(1), Value::Int(20)]]);
}

/// A caller-supplied sink receives the same rows a materialized result
/// would have, and disables the lazy path (`spec.md` §4.3/§4.4).
#[test]
fn caller_supplied_sink_receives_rows() {
    let session = session();
    let mut select = Select::new(session);
    select.add_table_filter(Box::new(MemTableFilter::new(table_t())), true);
    select.set_expressions(vec![dyn_expr(Expr::column(0, 0, "a")), dyn_expr(Expr::column(0, 1, "b"))]);
    select.set_order_list(vec![asc(1)]);
    select.init().unwrap();
    select.prepare().unwrap();

    let mut sink = MaterializedResult::new();
    let outcome = select.query_without_cache(0, Some(&mut sink)).unwrap();
    assert!(matches!(outcome, QueryOutcome::Drained));
    assert_eq!(sink.rows().len(), 5);
}
