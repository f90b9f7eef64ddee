//! Physical planning: pick an execution strategy per plan stage.
//!
//! Strategy choice is cost-threshold driven and never affects results:
//! every strategy computes the same answer (floats may differ in ULPs under
//! Parallel). The adaptive executor may later override these choices with a
//! learned strategy for the same fingerprint.

use frozen_store::FrozenStore;
use observability_deps::tracing::debug;
use predicate::Predicate;
use selection::simd_available;

use crate::plan::LogicalPlan;
use crate::EngineConfig;

/// How a stage executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Sequential,
    Simd,
    Parallel,
    Compiled,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Simd => write!(f, "simd"),
            Self::Parallel => write!(f, "parallel"),
            Self::Compiled => write!(f, "compiled"),
        }
    }
}

/// How grouped aggregation executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStrategy {
    Hash,
    /// Output must come back key-ordered (no later sort re-orders it).
    Sorted,
}

/// The annotated plan handed to the executor.
#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    pub root: std::sync::Arc<LogicalPlan>,
    pub filter_strategy: Strategy,
    pub aggregate_strategy: Strategy,
    pub group_strategy: GroupStrategy,
}

/// Annotate `plan` with strategies.
pub fn plan_physical(
    root: std::sync::Arc<LogicalPlan>,
    store: &FrozenStore,
    config: &EngineConfig,
) -> PhysicalPlan {
    let filter_strategy = filter_strategy(&root, store, config);
    let aggregate_strategy = aggregate_strategy(&root, store, config);
    let group_strategy = group_strategy(&root);

    debug!(
        filter = %filter_strategy,
        aggregate = %aggregate_strategy,
        "physical plan"
    );

    PhysicalPlan {
        root,
        filter_strategy,
        aggregate_strategy,
        group_strategy,
    }
}

// Find the (merged) filter node and choose its strategy from the estimated
// rows of its input.
fn filter_strategy(plan: &LogicalPlan, store: &FrozenStore, config: &EngineConfig) -> Strategy {
    let Some((predicates, input)) = find_filter(plan) else {
        return Strategy::Sequential;
    };
    let input_rows = input.estimated_rows(store);

    if config.enable_parallel_execution
        && input_rows >= config.parallel_row_threshold as f64
        && predicates.len() > 1
    {
        return Strategy::Parallel;
    }
    if config.enable_compiled_predicates && predicates.iter().all(compilable) {
        return Strategy::Compiled;
    }
    if input_rows >= config.simd_row_threshold as f64 && simd_available() {
        return Strategy::Simd;
    }
    Strategy::Sequential
}

fn find_filter(plan: &LogicalPlan) -> Option<(&[Predicate], &LogicalPlan)> {
    match plan {
        LogicalPlan::Filter { input, predicates } => Some((predicates, input)),
        other => other.input().and_then(find_filter),
    }
}

// A predicate the compiled tape can fuse: a plain scalar comparison.
fn compilable(pred: &Predicate) -> bool {
    matches!(
        pred,
        Predicate::Cmp(cmp) if !matches!(
            cmp.literal,
            predicate::Literal::Str(_)
        ) && cmp.op != predicate::Operator::Like
    )
}

fn aggregate_strategy(plan: &LogicalPlan, store: &FrozenStore, config: &EngineConfig) -> Strategy {
    let (op, column, input) = match plan {
        LogicalPlan::Aggregate { op, column, input } => (*op, column.as_ref(), input),
        LogicalPlan::GroupBy { input, .. } => {
            // grouped aggregation parallelism is governed by its own policy
            let rows = input.estimated_rows(store);
            return if rows >= config.simd_row_threshold as f64 && simd_available() {
                Strategy::Simd
            } else {
                Strategy::Sequential
            };
        }
        other => match other.input() {
            Some(input) => return aggregate_strategy(input, store, config),
            None => return Strategy::Sequential,
        },
    };

    let input_rows = input.estimated_rows(store);
    let bare_count = op == aggregate::AggregateType::Count && column.is_none();

    if bare_count {
        // Count is a popcount; fan-out never pays for itself.
        return Strategy::Sequential;
    }
    if config.enable_parallel_execution && input_rows >= config.parallel_row_threshold as f64 {
        return Strategy::Parallel;
    }
    if input_rows >= config.simd_row_threshold as f64 && simd_available() {
        return Strategy::Simd;
    }
    Strategy::Sequential
}

fn group_strategy(plan: &LogicalPlan) -> GroupStrategy {
    // Sorted aggregation applies when grouped output feeds nothing that
    // re-orders it; the executor emits key-ordered groups in that case.
    match plan {
        LogicalPlan::GroupBy { .. } | LogicalPlan::GroupFilter { .. } => GroupStrategy::Sorted,
        LogicalPlan::Sort { .. } => GroupStrategy::Hash,
        other => match other.input() {
            Some(input) => group_strategy(input),
            None => GroupStrategy::Hash,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use aggregate::AggregateType;
    use predicate::Operator;
    use std::sync::Arc;

    fn store(rows: usize) -> FrozenStore {
        FrozenStore::builder()
            .col_i64("v", (0..rows as i64).map(Some).collect())
            .freeze()
            .unwrap()
    }

    fn filter(preds: Vec<Predicate>) -> LogicalPlan {
        LogicalPlan::Filter {
            input: Box::new(LogicalPlan::scan()),
            predicates: preds,
        }
    }

    #[test]
    fn small_inputs_run_sequential_or_compiled() {
        let store = store(10);
        let config = EngineConfig {
            enable_compiled_predicates: false,
            ..Default::default()
        };
        let plan = plan_physical(
            Arc::new(filter(vec![Predicate::cmp("v", Operator::GT, 1i64)])),
            &store,
            &config,
        );
        assert_eq!(plan.filter_strategy, Strategy::Sequential);

        let config = EngineConfig::default();
        let plan = plan_physical(
            Arc::new(filter(vec![Predicate::cmp("v", Operator::GT, 1i64)])),
            &store,
            &config,
        );
        assert_eq!(plan.filter_strategy, Strategy::Compiled);
    }

    #[test]
    fn large_multi_predicate_filters_go_parallel() {
        let store = store(100_000);
        let plan = plan_physical(
            Arc::new(filter(vec![
                Predicate::cmp("v", Operator::GT, 1i64),
                Predicate::cmp("v", Operator::LT, 90_000i64),
            ])),
            &store,
            &EngineConfig::default(),
        );
        assert_eq!(plan.filter_strategy, Strategy::Parallel);

        // a single predicate stays off the parallel path
        let plan = plan_physical(
            Arc::new(filter(vec![Predicate::cmp("v", Operator::GT, 1i64)])),
            &store,
            &EngineConfig::default(),
        );
        assert_ne!(plan.filter_strategy, Strategy::Parallel);
    }

    #[test]
    fn string_predicates_are_not_compiled() {
        let store = FrozenStore::builder()
            .col_utf8("s", vec![Some("a"); 10])
            .freeze()
            .unwrap();
        let plan = plan_physical(
            Arc::new(filter(vec![Predicate::cmp("s", Operator::Equal, "a")])),
            &store,
            &EngineConfig::default(),
        );
        assert_ne!(plan.filter_strategy, Strategy::Compiled);
    }

    #[test]
    fn bare_count_is_sequential() {
        let store = store(1_000_000);
        let plan = plan_physical(
            Arc::new(LogicalPlan::Aggregate {
                input: Box::new(LogicalPlan::scan()),
                op: AggregateType::Count,
                column: None,
            }),
            &store,
            &EngineConfig::default(),
        );
        assert_eq!(plan.aggregate_strategy, Strategy::Sequential);

        let plan = plan_physical(
            Arc::new(LogicalPlan::Aggregate {
                input: Box::new(LogicalPlan::scan()),
                op: AggregateType::Sum,
                column: Some("v".into()),
            }),
            &store,
            &EngineConfig::default(),
        );
        assert_eq!(plan.aggregate_strategy, Strategy::Parallel);
    }

    #[test]
    fn group_output_order() {
        let group = LogicalPlan::GroupBy {
            input: Box::new(LogicalPlan::scan()),
            key: "k".into(),
            aggregates: vec![],
        };
        assert_eq!(group_strategy(&group), GroupStrategy::Sorted);

        let sorted_later = LogicalPlan::Sort {
            input: Box::new(group),
            keys: vec![crate::plan::SortKey {
                column: "k".into(),
                descending: true,
            }],
            unique: false,
        };
        assert_eq!(group_strategy(&sorted_later), GroupStrategy::Hash);
    }
}
