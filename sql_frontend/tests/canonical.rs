//! SQL scenarios over the canonical six-row store.

use frozen_store::{FrozenStore, Scalar};
use query_engine::{Engine, QueryOutput};
use rust_decimal::Decimal;
use sql_frontend::execute_sql;
use std::sync::Arc;

fn money(dollars: i64) -> Decimal {
    Decimal::new(dollars * 100, 2)
}

fn engine() -> Engine {
    let store = FrozenStore::builder()
        .col_i32("id", (1..=6).map(Some).collect())
        .col_utf8(
            "name",
            vec![
                Some("Alice"),
                Some("Bob"),
                Some("Carol"),
                Some("Dan"),
                Some("Eve"),
                Some("Fred"),
            ],
        )
        .col_i32(
            "age",
            vec![Some(30), Some(45), Some(55), Some(25), Some(60), None],
        )
        .col_decimal(
            "salary",
            18,
            2,
            vec![
                Some(money(50_000)),
                Some(money(70_000)),
                Some(money(90_000)),
                Some(money(40_000)),
                Some(money(120_000)),
                Some(money(55_000)),
            ],
        )
        .col_bool(
            "active",
            vec![
                Some(true),
                Some(true),
                Some(false),
                Some(true),
                Some(true),
                Some(false),
            ],
        )
        .col_dictionary(
            "category",
            vec![
                Some("Eng"),
                Some("Sales"),
                Some("Eng"),
                Some("HR"),
                Some("Eng"),
                Some("Sales"),
            ],
        )
        .freeze()
        .unwrap();
    Engine::new(Arc::new(store))
}

fn scalar(engine: &Engine, sql: &str) -> Scalar {
    match execute_sql(engine, sql).unwrap() {
        QueryOutput::Scalar(s) => s,
        other => panic!("expected a scalar from {:?}, got {:?}", sql, other),
    }
}

#[test]
fn count_of_prefix_disjunction() {
    test_helpers::maybe_start_logging();
    let engine = engine();
    assert_eq!(
        scalar(
            &engine,
            "SELECT COUNT(*) FROM t WHERE name LIKE 'A%' OR name LIKE 'E%'"
        ),
        Scalar::I64(2) // Alice, Eve
    );
}

#[test]
fn filtered_count_skips_nulls() {
    let engine = engine();
    assert_eq!(
        scalar(&engine, "SELECT COUNT(*) FROM t WHERE age > 40"),
        Scalar::I64(3)
    );
}

#[test]
fn sum_over_active_rows() {
    let engine = engine();
    assert_eq!(
        scalar(&engine, "SELECT SUM(salary) FROM t WHERE active = true"),
        Scalar::Decimal(money(280_000))
    );
}

#[test]
fn grouped_aggregates() {
    let engine = engine();
    let output = execute_sql(
        &engine,
        "SELECT category, COUNT(*) AS n, SUM(salary) AS total FROM t GROUP BY category",
    )
    .unwrap();
    let groups = output.groups().unwrap();
    assert_eq!(groups.len(), 3);

    for (key, n, total) in [
        ("Eng", 3i64, money(260_000)),
        ("Sales", 2, money(125_000)),
        ("HR", 1, money(40_000)),
    ] {
        let group = groups.group(&Scalar::Str(key.to_owned())).unwrap();
        assert_eq!(group.aggregates[0], Scalar::I64(n), "{} count", key);
        assert_eq!(group.aggregates[1], Scalar::Decimal(total), "{} total", key);
    }
}

#[test]
fn null_filter_and_projection() {
    let engine = engine();
    let output = execute_sql(&engine, "SELECT name FROM t WHERE age IS NULL").unwrap();
    let rows = output.rows().unwrap();
    assert_eq!(rows.rows, vec![vec![Scalar::Str("Fred".to_owned())]]);
}

#[test]
fn ordered_limited_projection() {
    let engine = engine();
    let output = execute_sql(
        &engine,
        "SELECT name FROM t WHERE salary >= 50000 AND active = true \
         ORDER BY salary DESC LIMIT 2",
    )
    .unwrap();
    let rows = output.rows().unwrap();
    assert_eq!(
        rows.rows,
        vec![
            vec![Scalar::Str("Eve".to_owned())],
            vec![Scalar::Str("Bob".to_owned())],
        ]
    );
}

#[test]
fn both_front_ends_share_the_plan_cache() {
    use predicate::{Operator, Predicate};

    let engine = engine();
    execute_sql(&engine, "SELECT COUNT(*) FROM t WHERE age > 40").unwrap();
    let misses_after_sql = engine.cache_stats().misses;

    // the chainable surface lowers to the identical plan
    engine
        .query()
        .filter(Predicate::cmp("age", Operator::GT, 40i64))
        .count()
        .unwrap();
    let stats = engine.cache_stats();
    assert_eq!(stats.misses, misses_after_sql);
    assert!(stats.hits >= 1);
}
