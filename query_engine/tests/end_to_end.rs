//! End-to-end scenarios over the canonical six-row store.

use frozen_store::{FrozenStore, Scalar};
use predicate::{Operator, Predicate};
use query_engine::{Engine, EngineConfig, Error, LogicalPlan};
use rust_decimal::Decimal;
use std::sync::Arc;

fn money(dollars: i64) -> Decimal {
    Decimal::new(dollars * 100, 2)
}

// | id | name  | age  | salary    | active | category |
// |  1 | Alice |  30  |  50000.00 | true   | Eng      |
// |  2 | Bob   |  45  |  70000.00 | true   | Sales    |
// |  3 | Carol |  55  |  90000.00 | false  | Eng      |
// |  4 | Dan   |  25  |  40000.00 | true   | HR       |
// |  5 | Eve   |  60  | 120000.00 | true   | Eng      |
// |  6 | Fred  | NULL |  55000.00 | false  | Sales    |
fn people() -> Arc<FrozenStore> {
    Arc::new(
        FrozenStore::builder()
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
            .unwrap(),
    )
}

fn engine() -> Engine {
    Engine::new(people())
}

#[test]
fn filter_count_excludes_null_age() {
    test_helpers::maybe_start_logging();
    let engine = engine();
    let count = engine
        .query()
        .filter(Predicate::cmp("age", Operator::GT, 40i64))
        .count()
        .unwrap();
    assert_eq!(count, 3); // Bob, Carol, Eve; Fred's NULL never matches
}

#[test]
fn sum_of_active_salaries() {
    let engine = engine();
    let total = engine
        .query()
        .filter(Predicate::cmp("active", Operator::Equal, true))
        .sum("salary")
        .unwrap();
    assert_eq!(total, Scalar::Decimal(money(280_000)));
}

#[test]
fn group_by_category() {
    let engine = engine();
    let groups = engine
        .query()
        .group_by("category")
        .count("n")
        .sum("salary", "total")
        .collect()
        .unwrap();

    assert_eq!(groups.len(), 3);
    let expected = [
        ("Eng", 3i64, money(260_000)),
        ("HR", 1, money(40_000)),
        ("Sales", 2, money(125_000)),
    ];
    for (key, count, total) in expected {
        let group = groups.group(&Scalar::Str(key.to_owned())).unwrap();
        assert_eq!(group.aggregates[0], Scalar::I64(count), "count of {}", key);
        assert_eq!(group.aggregates[1], Scalar::Decimal(total), "sum of {}", key);
    }
}

#[test]
fn first_name_with_null_age() {
    let engine = engine();
    let row = engine
        .query()
        .filter(Predicate::is_null("age"))
        .select(["name"])
        .first()
        .unwrap();
    assert_eq!(row, vec![Scalar::Str("Fred".to_owned())]);
}

#[test]
fn top_two_active_earners() {
    let engine = engine();
    let rows = engine
        .query()
        .filter(
            Predicate::cmp("salary", Operator::GTE, 50_000i64)
                .and(Predicate::cmp("active", Operator::Equal, true)),
        )
        .order_by_desc("salary")
        .take(2)
        .select(["name"])
        .rows()
        .unwrap();
    assert_eq!(
        rows.rows,
        vec![
            vec![Scalar::Str("Eve".to_owned())],
            vec![Scalar::Str("Bob".to_owned())],
        ]
    );
}

#[test]
fn or_of_prefix_matches() {
    let engine = engine();
    let count = engine
        .query()
        .filter(
            Predicate::cmp("name", Operator::Like, "A%")
                .or(Predicate::cmp("name", Operator::Like, "E%")),
        )
        .count()
        .unwrap();
    assert_eq!(count, 2); // Alice, Eve
}

#[test]
fn empty_store_boundaries() {
    let store = Arc::new(
        FrozenStore::builder()
            .col_i64("v", vec![])
            .freeze()
            .unwrap(),
    );
    let engine = Engine::new(store);

    assert_eq!(engine.query().count().unwrap(), 0);
    assert_eq!(engine.query().sum("v").unwrap(), Scalar::I64(0));
    assert!(matches!(engine.query().min("v"), Err(Error::EmptySequence)));
    assert!(matches!(engine.query().max("v"), Err(Error::EmptySequence)));
    assert!(!engine.query().any().unwrap());
    assert_eq!(engine.query().first_opt().unwrap(), None);
    assert!(matches!(engine.query().first(), Err(Error::EmptySequence)));
}

#[test]
fn all_null_column_behaviour() {
    let store = Arc::new(
        FrozenStore::builder()
            .col_i64("v", vec![None, None, None])
            .freeze()
            .unwrap(),
    );
    let engine = Engine::new(store);

    let nulls = engine.query().filter(Predicate::is_null("v")).count().unwrap();
    assert_eq!(nulls, 3);
    for op in [Operator::Equal, Operator::NotEqual, Operator::GT, Operator::LTE] {
        let n = engine
            .query()
            .filter(Predicate::cmp("v", op, 0i64))
            .count()
            .unwrap();
        assert_eq!(n, 0, "op {}", op);
    }
}

#[test]
fn chained_filters_equal_conjunction() {
    let engine = engine();
    let chained = engine
        .query()
        .filter(Predicate::cmp("age", Operator::GT, 26i64))
        .filter(Predicate::cmp("active", Operator::Equal, true))
        .count()
        .unwrap();
    let conjoined = engine
        .query()
        .filter(
            Predicate::cmp("age", Operator::GT, 26i64)
                .and(Predicate::cmp("active", Operator::Equal, true)),
        )
        .count()
        .unwrap();
    assert_eq!(chained, conjoined);
    assert_eq!(chained, 3); // Alice, Bob, Eve
}

#[test]
fn stacked_limits_take_the_minimum() {
    let engine = engine();
    let a = engine.query().order_by("id").take(5).take(2).rows().unwrap();
    let b = engine.query().order_by("id").take(2).rows().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 2);
}

#[test]
fn distinct_is_idempotent() {
    let engine = engine();
    let once = engine
        .query()
        .select(["category"])
        .distinct()
        .rows()
        .unwrap();
    let twice = engine
        .query()
        .select(["category"])
        .distinct()
        .distinct()
        .rows()
        .unwrap();
    assert_eq!(once, twice);
    assert_eq!(once.len(), 3);
}

#[test]
fn skip_and_take_compose() {
    let engine = engine();
    let rows = engine
        .query()
        .order_by("id")
        .skip(2)
        .take(2)
        .select(["id"])
        .rows()
        .unwrap();
    assert_eq!(rows.rows, vec![vec![Scalar::I32(3)], vec![Scalar::I32(4)]]);
}

#[test]
fn multi_key_sort_is_stable() {
    let engine = engine();
    // category asc, then salary desc inside each category
    let rows = engine
        .query()
        .order_by("category")
        .then_by_desc("salary")
        .select(["name"])
        .rows()
        .unwrap();
    let names = rows
        .rows
        .iter()
        .map(|r| r[0].as_str().unwrap().to_owned())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Eve", "Carol", "Alice", "Dan", "Bob", "Fred"]);
}

#[test]
fn single_enforces_cardinality() {
    let engine = engine();
    let row = engine
        .query()
        .filter(Predicate::cmp("name", Operator::Equal, "Dan"))
        .select(["id"])
        .single()
        .unwrap();
    assert_eq!(row, vec![Scalar::I32(4)]);

    assert!(matches!(
        engine
            .query()
            .filter(Predicate::cmp("active", Operator::Equal, true))
            .single(),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        engine
            .query()
            .filter(Predicate::cmp("age", Operator::GT, 1000i64))
            .single(),
        Err(Error::EmptySequence)
    ));
}

#[test]
fn any_streams_with_early_exit() {
    let engine = engine();
    assert!(engine
        .query()
        .filter(Predicate::cmp("age", Operator::GT, 50i64))
        .any()
        .unwrap());
    assert!(!engine
        .query()
        .filter(Predicate::cmp("age", Operator::GT, 500i64))
        .any()
        .unwrap());
}

#[test]
fn records_rebuild_caller_shapes() {
    #[derive(Debug, PartialEq)]
    struct Person {
        name: String,
        age: Option<i32>,
    }

    let engine = engine();
    let people = engine
        .query()
        .filter(Predicate::cmp("active", Operator::Equal, false))
        .order_by("id")
        .records(|row| Person {
            name: row.str("name").unwrap().unwrap().to_owned(),
            age: row.i32("age").unwrap(),
        })
        .unwrap();

    assert_eq!(
        people,
        vec![
            Person {
                name: "Carol".to_owned(),
                age: Some(55)
            },
            Person {
                name: "Fred".to_owned(),
                age: None
            },
        ]
    );
}

#[test]
fn arrow_egress_of_results() {
    let engine = engine();
    let rows = engine
        .query()
        .filter(Predicate::cmp("category", Operator::Equal, "Eng"))
        .order_by("id")
        .select(["name", "salary"])
        .rows()
        .unwrap();
    let batch = rows.to_record_batch().unwrap();
    assert_eq!(batch.num_rows(), 3);
    assert_eq!(batch.num_columns(), 2);

    let groups = engine
        .query()
        .group_by("category")
        .count("n")
        .collect()
        .unwrap();
    let batch = groups.to_record_batch().unwrap();
    assert_eq!(batch.num_rows(), 3);
    assert_eq!(batch.num_columns(), 2);
}

#[test]
fn strategies_agree_on_large_stores() {
    let rows = 120_000usize;
    let store = Arc::new(
        FrozenStore::builder()
            .col_i64(
                "v",
                (0..rows as i64)
                    .map(|i| if i % 97 == 0 { None } else { Some(i % 1_000) })
                    .collect(),
            )
            .col_i64("w", (0..rows as i64).map(|i| Some(i % 7)).collect())
            .freeze()
            .unwrap(),
    );

    let parallel = Engine::new(Arc::clone(&store));
    let sequential = Engine::with_config(
        store,
        EngineConfig {
            enable_parallel_execution: false,
            enable_compiled_predicates: false,
            adaptive_execution: false,
            ..Default::default()
        },
    );

    let run = |engine: &Engine| {
        let sum = engine
            .query()
            .filter(Predicate::cmp("v", Operator::GT, 500i64))
            .filter(Predicate::cmp("w", Operator::LT, 5i64))
            .sum("v")
            .unwrap();
        let count = engine
            .query()
            .filter(Predicate::cmp("v", Operator::GT, 500i64))
            .filter(Predicate::cmp("w", Operator::LT, 5i64))
            .count()
            .unwrap();
        (sum, count)
    };

    assert_eq!(run(&parallel), run(&sequential));
}

#[test]
fn compiled_path_matches_interpreter_through_the_engine() {
    let store = people();
    let compiled = Engine::new(Arc::clone(&store));
    let interpreted = Engine::with_config(
        store,
        EngineConfig {
            enable_compiled_predicates: false,
            ..Default::default()
        },
    );

    let filter = || {
        Predicate::cmp("age", Operator::GTE, 30i64)
    };
    assert_eq!(
        compiled.query().filter(filter()).count().unwrap(),
        interpreted.query().filter(filter()).count().unwrap(),
    );
}

#[test]
fn plan_reuse_is_visible_in_cache_stats() {
    let engine = engine();
    for _ in 0..5 {
        engine
            .query()
            .filter(Predicate::cmp("age", Operator::GT, 40i64))
            .count()
            .unwrap();
    }
    let stats = engine.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 4);
}

#[test]
fn optimizer_folds_impossible_filters_to_empty() {
    let engine = engine();
    // id is 1..=6; the optimizer folds this to an empty scan, and the
    // result is still correct
    let count = engine
        .query()
        .filter(Predicate::cmp("id", Operator::GT, 100i64))
        .count()
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn unknown_columns_and_type_mismatches_surface() {
    let engine = engine();
    assert!(matches!(
        engine
            .query()
            .filter(Predicate::cmp("nope", Operator::GT, 1i64))
            .count(),
        Err(Error::UnknownColumn { column }) if column == "nope"
    ));
    assert!(matches!(
        engine
            .query()
            .filter(Predicate::cmp("name", Operator::GT, 1i64))
            .count(),
        Err(Error::TypeMismatch { .. })
    ));
    assert!(matches!(
        engine.query().sum("name"),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn run_plan_directly() {
    // the plan API is public; the surface is a convenience over it
    let engine = engine();
    let plan = LogicalPlan::Aggregate {
        input: Box::new(LogicalPlan::Filter {
            input: Box::new(LogicalPlan::scan()),
            predicates: vec![Predicate::cmp("active", Operator::Equal, true)],
        }),
        op: aggregate::AggregateType::Count,
        column: None,
    };
    let output = engine.run(plan).unwrap();
    assert_eq!(output.scalar(), Some(&Scalar::I64(4)));
}
