//! Logical plan rewrites.
//!
//! Passes run in a fixed order and repeat until the plan stops changing.
//! Every rewrite preserves query semantics; estimates and zone-map masks
//! only let the executor skip provably irrelevant work. Limits are pushed
//! below projections but never below filters — reordering a limit past a
//! filter changes results, so selective filters instead rely on the
//! executor's early-exit terminals.

use std::collections::BTreeSet;

use frozen_store::FrozenStore;
use observability_deps::tracing::debug;
use predicate::{prune_chunks, Predicate};

use crate::plan::LogicalPlan;

const MAX_PASSES: usize = 10;

/// Optimize `plan` against `store`. Idempotent: optimizing an optimized
/// plan returns an equal plan.
pub fn optimize(plan: LogicalPlan, store: &FrozenStore) -> LogicalPlan {
    let mut current = plan;
    for pass in 0..MAX_PASSES {
        let next = rewrite(current.clone(), store);
        if next == current {
            debug!(passes = pass, "optimizer reached fixpoint");
            return current;
        }
        current = next;
    }
    current
}

fn rewrite(plan: LogicalPlan, store: &FrozenStore) -> LogicalPlan {
    let plan = merge_filters(plan);
    let plan = push_filter_below_project(plan);
    let plan = fold_constants(plan, store);
    let plan = prune_scan_chunks(plan, store);
    let plan = push_limit_below_project(plan);
    let plan = merge_limits(plan);
    let plan = merge_distinct(plan);
    collapse_distinct_of_sort(plan)
}

// Rebuild the tree bottom-up with `f` applied at every node.
fn transform(plan: LogicalPlan, f: &impl Fn(LogicalPlan) -> LogicalPlan) -> LogicalPlan {
    let with_children = match plan {
        LogicalPlan::Scan { chunk_mask } => LogicalPlan::Scan { chunk_mask },
        LogicalPlan::Filter { input, predicates } => LogicalPlan::Filter {
            input: Box::new(transform(*input, f)),
            predicates,
        },
        LogicalPlan::Project { input, columns } => LogicalPlan::Project {
            input: Box::new(transform(*input, f)),
            columns,
        },
        LogicalPlan::GroupBy {
            input,
            key,
            aggregates,
        } => LogicalPlan::GroupBy {
            input: Box::new(transform(*input, f)),
            key,
            aggregates,
        },
        LogicalPlan::GroupFilter { input, predicate } => LogicalPlan::GroupFilter {
            input: Box::new(transform(*input, f)),
            predicate,
        },
        LogicalPlan::Aggregate { input, op, column } => LogicalPlan::Aggregate {
            input: Box::new(transform(*input, f)),
            op,
            column,
        },
        LogicalPlan::Distinct { input } => LogicalPlan::Distinct {
            input: Box::new(transform(*input, f)),
        },
        LogicalPlan::Sort { input, keys, unique } => LogicalPlan::Sort {
            input: Box::new(transform(*input, f)),
            keys,
            unique,
        },
        LogicalPlan::Limit { input, limit } => LogicalPlan::Limit {
            input: Box::new(transform(*input, f)),
            limit,
        },
        LogicalPlan::Offset { input, offset } => LogicalPlan::Offset {
            input: Box::new(transform(*input, f)),
            offset,
        },
    };
    f(with_children)
}

// Pass 1: adjacent filters concatenate their predicate lists.
fn merge_filters(plan: LogicalPlan) -> LogicalPlan {
    transform(plan, &|node| match node {
        LogicalPlan::Filter { input, predicates } => match *input {
            LogicalPlan::Filter {
                input: inner_input,
                predicates: mut inner_preds,
            } => {
                inner_preds.extend(predicates);
                LogicalPlan::Filter {
                    input: inner_input,
                    predicates: inner_preds,
                }
            }
            other => LogicalPlan::Filter {
                input: Box::new(other),
                predicates,
            },
        },
        other => other,
    })
}

// Pass 2: Filter(Project(x)) -> Project(Filter(x)) when the projection
// keeps every predicate column.
fn push_filter_below_project(plan: LogicalPlan) -> LogicalPlan {
    transform(plan, &|node| match node {
        LogicalPlan::Filter { input, predicates } => match *input {
            LogicalPlan::Project {
                input: proj_input,
                columns,
            } => {
                let mut referenced = BTreeSet::new();
                for pred in &predicates {
                    pred.columns(&mut referenced);
                }
                if referenced.iter().all(|c| columns.contains(c)) {
                    LogicalPlan::Project {
                        input: Box::new(LogicalPlan::Filter {
                            input: proj_input,
                            predicates,
                        }),
                        columns,
                    }
                } else {
                    LogicalPlan::Filter {
                        input: Box::new(LogicalPlan::Project {
                            input: proj_input,
                            columns,
                        }),
                        predicates,
                    }
                }
            }
            other => LogicalPlan::Filter {
                input: Box::new(other),
                predicates,
            },
        },
        other => other,
    })
}

// How a predicate relates to the whole store, judged from statistics.
#[derive(Debug, PartialEq, Eq)]
enum Fold {
    Keep,
    AlwaysTrue,
    AlwaysFalse,
}

// Pass 3: drop trivially-true predicates, collapse trivially-false filters
// into an empty scan.
fn fold_constants(plan: LogicalPlan, store: &FrozenStore) -> LogicalPlan {
    transform(plan, &|node| match node {
        LogicalPlan::Filter { input, predicates } => {
            let mut kept = Vec::with_capacity(predicates.len());
            for pred in predicates {
                match classify(&pred, store) {
                    Fold::AlwaysTrue => {
                        debug!(%pred, "dropping trivially-true predicate");
                    }
                    Fold::AlwaysFalse => {
                        debug!(%pred, "filter is trivially false; emptying scan");
                        return LogicalPlan::empty_scan(store);
                    }
                    Fold::Keep => kept.push(pred),
                }
            }
            if kept.is_empty() {
                *input
            } else {
                LogicalPlan::Filter {
                    input,
                    predicates: kept,
                }
            }
        }
        other => other,
    })
}

fn classify(pred: &Predicate, store: &FrozenStore) -> Fold {
    // Statistics cover the whole store, which is exactly one "chunk" as far
    // as bounds reasoning goes: reuse the zone-map bounds logic through the
    // estimated selectivity extremes.
    match pred {
        Predicate::Cmp(cmp) => {
            let Ok((idx, col)) = store.column_by_name(&cmp.column) else {
                return Fold::Keep; // surfaced as an error at evaluation
            };
            if store.row_count() == 0 {
                return Fold::Keep;
            }
            let stats = store.stats(idx);

            // a column with no non-null values satisfies no comparison
            if stats.min.is_null() {
                return Fold::AlwaysFalse;
            }

            let whole = frozen_store::ChunkSummary {
                min: stats.min.clone(),
                max: stats.max.clone(),
                has_nulls: stats.null_count > 0,
                row_start: 0,
                row_end: store.row_count(),
            };
            if !prune::cmp_could_match_summary(cmp, col.logical_type(), &whole) {
                return Fold::AlwaysFalse;
            }
            // fold to true only when every row (nulls included) must match
            if stats.null_count == 0
                && prune::cmp_always_matches_summary(cmp, col.logical_type(), &whole)
            {
                return Fold::AlwaysTrue;
            }
            Fold::Keep
        }
        Predicate::IsNull { column, negated } => {
            let Ok((idx, _)) = store.column_by_name(column) else {
                return Fold::Keep;
            };
            if store.row_count() == 0 {
                return Fold::Keep;
            }
            let nulls = store.stats(idx).null_count;
            match (negated, nulls) {
                (false, 0) => Fold::AlwaysFalse,
                (true, 0) => Fold::AlwaysTrue,
                (false, n) if n == store.row_count() => Fold::AlwaysTrue,
                (true, n) if n == store.row_count() => Fold::AlwaysFalse,
                _ => Fold::Keep,
            }
        }
        // compound folding composes child classifications
        Predicate::And(left, right) => match (classify(left, store), classify(right, store)) {
            (Fold::AlwaysFalse, _) | (_, Fold::AlwaysFalse) => Fold::AlwaysFalse,
            (Fold::AlwaysTrue, Fold::AlwaysTrue) => Fold::AlwaysTrue,
            _ => Fold::Keep,
        },
        Predicate::Or(left, right) => match (classify(left, store), classify(right, store)) {
            (Fold::AlwaysTrue, _) | (_, Fold::AlwaysTrue) => Fold::AlwaysTrue,
            (Fold::AlwaysFalse, Fold::AlwaysFalse) => Fold::AlwaysFalse,
            _ => Fold::Keep,
        },
        Predicate::Not(inner) => match classify(inner, store) {
            Fold::AlwaysTrue => Fold::AlwaysFalse,
            Fold::AlwaysFalse => Fold::AlwaysTrue,
            Fold::Keep => Fold::Keep,
        },
    }
}

// Bounds helpers shared with predicate pruning semantics, specialised to a
// single whole-store summary.
mod prune {
    use frozen_store::ChunkSummary;
    use predicate::{ColumnCmp, Operator};
    use schema::LogicalType;

    pub(super) fn cmp_could_match_summary(
        cmp: &ColumnCmp,
        lt: LogicalType,
        summary: &ChunkSummary,
    ) -> bool {
        bounds(cmp, lt, summary)
            .map(|(min_cmp, max_cmp)| could(cmp.op, min_cmp, max_cmp))
            .unwrap_or(true)
    }

    pub(super) fn cmp_always_matches_summary(
        cmp: &ColumnCmp,
        lt: LogicalType,
        summary: &ChunkSummary,
    ) -> bool {
        bounds(cmp, lt, summary)
            .map(|(min_cmp, max_cmp)| always(cmp.op, min_cmp, max_cmp))
            .unwrap_or(false)
    }

    type Bounds = (std::cmp::Ordering, std::cmp::Ordering);

    fn bounds(cmp: &ColumnCmp, lt: LogicalType, summary: &ChunkSummary) -> Option<Bounds> {
        use LogicalType::*;
        match lt {
            Int8 | Int16 | Int32 | Int64 | Date => {
                let (min, max, lit) = (
                    summary.min.as_i64()?,
                    summary.max.as_i64()?,
                    cmp.literal.as_i64()?,
                );
                Some((min.cmp(&lit), max.cmp(&lit)))
            }
            Timestamp(unit) => {
                let (min, max, lit) = (
                    summary.min.as_i64()?,
                    summary.max.as_i64()?,
                    cmp.literal.as_timestamp(unit)?,
                );
                Some((min.cmp(&lit), max.cmp(&lit)))
            }
            Float32 | Float64 => {
                let (min, max, lit) = (
                    summary.min.as_f64()?,
                    summary.max.as_f64()?,
                    cmp.literal.as_f64()?,
                );
                min.partial_cmp(&lit).zip(max.partial_cmp(&lit))
            }
            Decimal { .. } => {
                let (min, max, lit) = (
                    summary.min.as_decimal()?,
                    summary.max.as_decimal()?,
                    cmp.literal.as_decimal()?,
                );
                Some((min.cmp(&lit), max.cmp(&lit)))
            }
            // strings and bools keep their filters
            _ => None,
        }
    }

    fn could(op: Operator, min_cmp: std::cmp::Ordering, max_cmp: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match op {
            Operator::Equal => min_cmp != Greater && max_cmp != Less,
            Operator::NotEqual => !(min_cmp == Equal && max_cmp == Equal),
            Operator::GT => max_cmp == Greater,
            Operator::GTE => max_cmp != Less,
            Operator::LT => min_cmp == Less,
            Operator::LTE => min_cmp != Greater,
            Operator::Like => true,
        }
    }

    fn always(op: Operator, min_cmp: std::cmp::Ordering, max_cmp: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match op {
            Operator::Equal => min_cmp == Equal && max_cmp == Equal,
            Operator::NotEqual => min_cmp == Greater || max_cmp == Less,
            Operator::GT => min_cmp == Greater,
            Operator::GTE => min_cmp != Less,
            Operator::LT => max_cmp == Less,
            Operator::LTE => max_cmp != Greater,
            Operator::Like => false,
        }
    }
}

// Pass 4: Filter directly above Scan contributes a zone-map chunk mask.
fn prune_scan_chunks(plan: LogicalPlan, store: &FrozenStore) -> LogicalPlan {
    transform(plan, &|node| match node {
        LogicalPlan::Filter { input, predicates } => match *input {
            LogicalPlan::Scan { chunk_mask } => {
                let mut mask = chunk_mask
                    .unwrap_or_else(|| vec![true; store.zone_maps().num_chunks()]);
                for pred in &predicates {
                    let pred_mask = prune_chunks(pred, store);
                    for (m, p) in mask.iter_mut().zip(pred_mask) {
                        *m = *m && p;
                    }
                }
                LogicalPlan::Filter {
                    input: Box::new(LogicalPlan::Scan {
                        chunk_mask: Some(mask),
                    }),
                    predicates,
                }
            }
            other => LogicalPlan::Filter {
                input: Box::new(other),
                predicates,
            },
        },
        other => other,
    })
}

// Pass 6: Limit(Project(x)) -> Project(Limit(x)). Limits never move below
// filters; see the module docs.
fn push_limit_below_project(plan: LogicalPlan) -> LogicalPlan {
    transform(plan, &|node| match node {
        LogicalPlan::Limit { input, limit } => match *input {
            LogicalPlan::Project {
                input: proj_input,
                columns,
            } => LogicalPlan::Project {
                input: Box::new(LogicalPlan::Limit {
                    input: proj_input,
                    limit,
                }),
                columns,
            },
            other => LogicalPlan::Limit {
                input: Box::new(other),
                limit,
            },
        },
        other => other,
    })
}

// Limit(a, Limit(b, x)) == Limit(min(a, b), x)
fn merge_limits(plan: LogicalPlan) -> LogicalPlan {
    transform(plan, &|node| match node {
        LogicalPlan::Limit { input, limit } => match *input {
            LogicalPlan::Limit {
                input: inner_input,
                limit: inner_limit,
            } => LogicalPlan::Limit {
                input: inner_input,
                limit: limit.min(inner_limit),
            },
            other => LogicalPlan::Limit {
                input: Box::new(other),
                limit,
            },
        },
        other => other,
    })
}

// Distinct(Distinct(x)) == Distinct(x)
fn merge_distinct(plan: LogicalPlan) -> LogicalPlan {
    transform(plan, &|node| match node {
        LogicalPlan::Distinct { input } => match *input {
            inner @ LogicalPlan::Distinct { .. } => inner,
            other => LogicalPlan::Distinct {
                input: Box::new(other),
            },
        },
        other => other,
    })
}

// Pass 7: Distinct(Sort(x)) -> Sort(x, unique)
fn collapse_distinct_of_sort(plan: LogicalPlan) -> LogicalPlan {
    transform(plan, &|node| match node {
        LogicalPlan::Distinct { input } => match *input {
            LogicalPlan::Sort {
                input: sort_input,
                keys,
                unique: _,
            } => LogicalPlan::Sort {
                input: sort_input,
                keys,
                unique: true,
            },
            other => LogicalPlan::Distinct {
                input: Box::new(other),
            },
        },
        other => other,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use predicate::Operator;

    fn store() -> FrozenStore {
        FrozenStore::builder()
            .zone_map_chunk_rows(32)
            .col_i64("v", (0..128).map(Some).collect())
            .col_utf8(
                "s",
                (0..128).map(|_| Some("x")).collect::<Vec<_>>(),
            )
            .freeze()
            .unwrap()
    }

    fn filter(preds: Vec<Predicate>, input: LogicalPlan) -> LogicalPlan {
        LogicalPlan::Filter {
            input: Box::new(input),
            predicates: preds,
        }
    }

    #[test]
    fn adjacent_filters_merge() {
        let store = store();
        let plan = filter(
            vec![Predicate::cmp("v", Operator::LT, 100i64)],
            filter(
                vec![Predicate::cmp("v", Operator::GT, 10i64)],
                LogicalPlan::scan(),
            ),
        );
        let optimized = optimize(plan, &store);
        match &optimized {
            LogicalPlan::Filter { predicates, input } => {
                assert_eq!(predicates.len(), 2);
                // inner predicate first, then outer
                assert_eq!(predicates[0], Predicate::cmp("v", Operator::GT, 10i64));
                assert!(matches!(**input, LogicalPlan::Scan { .. }));
            }
            other => panic!("expected merged filter, got {}", other),
        }
    }

    #[test]
    fn filter_pushed_below_preserving_project() {
        let store = store();
        let plan = filter(
            vec![Predicate::cmp("v", Operator::GT, 5i64)],
            LogicalPlan::Project {
                input: Box::new(LogicalPlan::scan()),
                columns: vec!["v".into(), "s".into()],
            },
        );
        let optimized = optimize(plan, &store);
        assert!(
            matches!(&optimized, LogicalPlan::Project { input, .. }
                if matches!(**input, LogicalPlan::Filter { .. })),
            "got {}",
            optimized
        );

        // not pushed when the projection drops the predicate column
        let plan = filter(
            vec![Predicate::cmp("v", Operator::GT, 5i64)],
            LogicalPlan::Project {
                input: Box::new(LogicalPlan::scan()),
                columns: vec!["s".into()],
            },
        );
        let optimized = optimize(plan, &store);
        assert!(
            matches!(&optimized, LogicalPlan::Filter { .. }),
            "got {}",
            optimized
        );
    }

    #[test]
    fn trivially_false_filter_becomes_empty_scan() {
        let store = store();
        // v is 0..=127; v > 1000 matches nothing
        let plan = filter(
            vec![Predicate::cmp("v", Operator::GT, 1000i64)],
            LogicalPlan::scan(),
        );
        let optimized = optimize(plan, &store);
        assert_eq!(optimized, LogicalPlan::empty_scan(&store));
        assert_eq!(optimized.estimated_rows(&store), 0.0);
    }

    #[test]
    fn trivially_true_predicate_dropped() {
        let store = store();
        // v >= 0 holds for every (non-null-free) row
        let plan = filter(
            vec![
                Predicate::cmp("v", Operator::GTE, 0i64),
                Predicate::cmp("v", Operator::GT, 60i64),
            ],
            LogicalPlan::scan(),
        );
        let optimized = optimize(plan, &store);
        match &optimized {
            LogicalPlan::Filter { predicates, .. } => {
                assert_eq!(predicates.len(), 1);
                assert_eq!(predicates[0], Predicate::cmp("v", Operator::GT, 60i64));
            }
            other => panic!("expected filter, got {}", other),
        }

        // a filter reduced to nothing disappears entirely
        let plan = filter(
            vec![Predicate::cmp("v", Operator::GTE, 0i64)],
            LogicalPlan::scan(),
        );
        let optimized = optimize(plan, &store);
        assert!(matches!(optimized, LogicalPlan::Scan { .. }));
    }

    #[test]
    fn zone_map_mask_attached_to_scan() {
        let store = store(); // 4 chunks of 32 rows
        let plan = filter(
            vec![Predicate::cmp("v", Operator::GT, 95i64)],
            LogicalPlan::scan(),
        );
        let optimized = optimize(plan, &store);
        match &optimized {
            LogicalPlan::Filter { input, .. } => match &**input {
                LogicalPlan::Scan {
                    chunk_mask: Some(mask),
                } => assert_eq!(mask, &vec![false, false, false, true]),
                other => panic!("expected masked scan, got {}", other),
            },
            other => panic!("expected filter, got {}", other),
        }
    }

    #[test]
    fn limits_merge_and_push_below_project() {
        let store = store();
        let plan = LogicalPlan::Limit {
            input: Box::new(LogicalPlan::Limit {
                input: Box::new(LogicalPlan::Project {
                    input: Box::new(LogicalPlan::scan()),
                    columns: vec!["v".into()],
                }),
                limit: 10,
            }),
            limit: 3,
        };
        let optimized = optimize(plan, &store);
        assert!(
            matches!(&optimized, LogicalPlan::Project { input, .. }
                if matches!(**input, LogicalPlan::Limit { limit: 3, .. })),
            "got {}",
            optimized
        );
    }

    #[test]
    fn distinct_rewrites() {
        let store = store();
        let plan = LogicalPlan::Distinct {
            input: Box::new(LogicalPlan::Distinct {
                input: Box::new(LogicalPlan::scan()),
            }),
        };
        let optimized = optimize(plan, &store);
        assert!(
            matches!(&optimized, LogicalPlan::Distinct { input }
                if matches!(**input, LogicalPlan::Scan { .. })),
            "got {}",
            optimized
        );

        let plan = LogicalPlan::Distinct {
            input: Box::new(LogicalPlan::Sort {
                input: Box::new(LogicalPlan::scan()),
                keys: vec![crate::plan::SortKey {
                    column: "v".into(),
                    descending: false,
                }],
                unique: false,
            }),
        };
        let optimized = optimize(plan, &store);
        assert!(
            matches!(optimized, LogicalPlan::Sort { unique: true, .. }),
        );
    }

    #[test]
    fn optimize_is_idempotent() {
        let store = store();
        let plans = vec![
            filter(
                vec![
                    Predicate::cmp("v", Operator::GT, 10i64),
                    Predicate::cmp("s", Operator::Equal, "x"),
                ],
                LogicalPlan::scan(),
            ),
            LogicalPlan::Limit {
                input: Box::new(LogicalPlan::Distinct {
                    input: Box::new(filter(
                        vec![Predicate::cmp("v", Operator::LT, 64i64)],
                        LogicalPlan::scan(),
                    )),
                }),
                limit: 5,
            },
        ];
        for plan in plans {
            let once = optimize(plan, &store);
            let twice = optimize(once.clone(), &store);
            assert_eq!(once, twice);
        }
    }
}
