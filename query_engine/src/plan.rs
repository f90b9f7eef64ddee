//! The logical plan: a tagged tree describing what a query computes.
//!
//! Plans are produced fresh per query by the chainable surface and the SQL
//! front-end, fingerprinted, optimized, and only then annotated with
//! execution strategies. Row estimates are derived bottom-up from store
//! statistics on demand; they steer the optimizer and the physical planner
//! and never affect results.

use std::fmt::Display;

use aggregate::AggregateSpec;
use frozen_store::FrozenStore;
use predicate::Predicate;

/// One sort key of a [`LogicalPlan::Sort`] node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

/// The logical plan tree.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    /// Source of all rows. `chunk_mask[i] == false` lets the executor skip
    /// zone-map chunk `i` entirely.
    Scan { chunk_mask: Option<Vec<bool>> },

    /// Keep rows satisfying every predicate (implicit AND).
    Filter {
        input: Box<LogicalPlan>,
        predicates: Vec<Predicate>,
    },

    /// Restrict output to the named columns.
    Project {
        input: Box<LogicalPlan>,
        columns: Vec<String>,
    },

    /// Group on one key column and compute aggregates per group.
    GroupBy {
        input: Box<LogicalPlan>,
        key: String,
        aggregates: Vec<AggregateSpec>,
    },

    /// Filter grouped output on the group key (the HAVING subset).
    GroupFilter {
        input: Box<LogicalPlan>,
        predicate: Predicate,
    },

    /// Reduce the input to one scalar. `column` is `None` for `COUNT(*)`.
    Aggregate {
        input: Box<LogicalPlan>,
        op: aggregate::AggregateType,
        column: Option<String>,
    },

    /// Keep one row per distinct projected-value combination.
    Distinct { input: Box<LogicalPlan> },

    /// Stable multi-key sort. `unique` additionally drops duplicate rows
    /// (the collapsed form of `Distinct` over sorted input).
    Sort {
        input: Box<LogicalPlan>,
        keys: Vec<SortKey>,
        unique: bool,
    },

    Limit {
        input: Box<LogicalPlan>,
        limit: usize,
    },

    Offset {
        input: Box<LogicalPlan>,
        offset: usize,
    },
}

impl LogicalPlan {
    pub fn scan() -> Self {
        Self::Scan { chunk_mask: None }
    }

    /// A scan that yields no rows; the folded form of an always-false
    /// filter.
    pub fn empty_scan(store: &FrozenStore) -> Self {
        Self::Scan {
            chunk_mask: Some(vec![false; store.zone_maps().num_chunks()]),
        }
    }

    pub fn input(&self) -> Option<&Self> {
        match self {
            Self::Scan { .. } => None,
            Self::Filter { input, .. }
            | Self::Project { input, .. }
            | Self::GroupBy { input, .. }
            | Self::GroupFilter { input, .. }
            | Self::Aggregate { input, .. }
            | Self::Distinct { input }
            | Self::Sort { input, .. }
            | Self::Limit { input, .. }
            | Self::Offset { input, .. } => Some(input),
        }
    }

    /// Estimated output rows, derived bottom-up from store statistics.
    pub fn estimated_rows(&self, store: &FrozenStore) -> f64 {
        match self {
            Self::Scan { chunk_mask } => match chunk_mask {
                None => store.row_count() as f64,
                Some(mask) => mask
                    .iter()
                    .enumerate()
                    .filter(|(_, keep)| **keep)
                    .map(|(chunk, _)| {
                        let (start, end) = store.zone_maps().chunk_bounds(chunk);
                        (end - start) as f64
                    })
                    .sum(),
            },
            Self::Filter { input, predicates } => {
                let selectivity: f64 = predicates
                    .iter()
                    .map(|p| estimate_selectivity(p, store))
                    .product();
                input.estimated_rows(store) * selectivity
            }
            Self::Project { input, .. } => input.estimated_rows(store),
            Self::GroupBy { input, .. } => input.estimated_rows(store).sqrt(),
            Self::GroupFilter { input, .. } => input.estimated_rows(store) / 2.0,
            Self::Aggregate { .. } => 1.0,
            Self::Distinct { input } => input.estimated_rows(store) / 2.0,
            Self::Sort { input, .. } => input.estimated_rows(store),
            Self::Limit { input, limit } => input.estimated_rows(store).min(*limit as f64),
            Self::Offset { input, offset } => {
                (input.estimated_rows(store) - *offset as f64).max(0.0)
            }
        }
    }

    /// Total comparison predicates in the plan; one input to strategy
    /// selection and adaptive statistics.
    pub fn predicate_count(&self) -> usize {
        let own = match self {
            Self::Filter { predicates, .. } => predicates.len(),
            Self::GroupFilter { .. } => 1,
            _ => 0,
        };
        own + self.input().map(|i| i.predicate_count()).unwrap_or(0)
    }
}

/// Estimated fraction of rows a predicate keeps.
pub fn estimate_selectivity(pred: &Predicate, store: &FrozenStore) -> f64 {
    use predicate::Operator;

    match pred {
        Predicate::Cmp(cmp) => {
            let Ok((idx, col)) = store.column_by_name(&cmp.column) else {
                return 1.0;
            };
            let stats = store.stats(idx);
            let rows = store.row_count().max(1) as f64;
            let non_null = (rows - stats.null_count as f64) / rows;

            let base = match cmp.op {
                Operator::Equal => match stats.distinct_count {
                    Some(distinct) if distinct > 0 => 1.0 / distinct as f64,
                    _ => 0.1,
                },
                Operator::NotEqual => 0.9,
                Operator::Like => 0.2,
                op => range_fraction(op, stats, &cmp.literal, col.logical_type()).unwrap_or(0.3),
            };
            (base * non_null).clamp(0.0, 1.0)
        }
        Predicate::IsNull { column, negated } => {
            let Ok((idx, _)) = store.column_by_name(column) else {
                return 1.0;
            };
            let rows = store.row_count().max(1) as f64;
            let nulls = store.stats(idx).null_count as f64 / rows;
            if *negated {
                1.0 - nulls
            } else {
                nulls
            }
        }
        Predicate::And(left, right) => {
            estimate_selectivity(left, store) * estimate_selectivity(right, store)
        }
        Predicate::Or(left, right) => {
            let (l, r) = (
                estimate_selectivity(left, store),
                estimate_selectivity(right, store),
            );
            (l + r - l * r).clamp(0.0, 1.0)
        }
        Predicate::Not(inner) => 1.0 - estimate_selectivity(inner, store),
    }
}

// Fraction of the column's [min, max] range an ordering comparison keeps.
fn range_fraction(
    op: predicate::Operator,
    stats: &frozen_store::ColumnStats,
    literal: &predicate::Literal,
    logical_type: schema::LogicalType,
) -> Option<f64> {
    use predicate::Operator;
    use schema::LogicalType;

    let (min, max, lit) = match logical_type {
        LogicalType::Float32 | LogicalType::Float64 => (
            stats.min.as_f64()?,
            stats.max.as_f64()?,
            literal.as_f64()?,
        ),
        LogicalType::Timestamp(unit) => (
            stats.min.as_i64()? as f64,
            stats.max.as_i64()? as f64,
            literal.as_timestamp(unit)? as f64,
        ),
        LogicalType::Decimal { .. } => {
            use rust_decimal::prelude::ToPrimitive;
            (
                stats.min.as_decimal()?.to_f64()?,
                stats.max.as_decimal()?.to_f64()?,
                literal.as_decimal()?.to_f64()?,
            )
        }
        _ => (
            stats.min.as_i64()? as f64,
            stats.max.as_i64()? as f64,
            literal.as_i64()? as f64,
        ),
    };

    if max <= min {
        return Some(if cmp_matches(op, min, lit) { 1.0 } else { 0.0 });
    }

    let above = ((max - lit) / (max - min)).clamp(0.0, 1.0);
    Some(match op {
        Operator::GT | Operator::GTE => above,
        Operator::LT | Operator::LTE => 1.0 - above,
        _ => return None,
    })
}

fn cmp_matches(op: predicate::Operator, value: f64, lit: f64) -> bool {
    use predicate::Operator;
    match op {
        Operator::GT => value > lit,
        Operator::GTE => value >= lit,
        Operator::LT => value < lit,
        Operator::LTE => value <= lit,
        _ => false,
    }
}

impl Display for LogicalPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scan { chunk_mask } => match chunk_mask {
                None => write!(f, "Scan"),
                Some(mask) => write!(
                    f,
                    "Scan[{}/{} chunks]",
                    mask.iter().filter(|&&k| k).count(),
                    mask.len()
                ),
            },
            Self::Filter { input, predicates } => {
                write!(f, "Filter[")?;
                for (i, p) in predicates.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, "]({})", input)
            }
            Self::Project { input, columns } => {
                write!(f, "Project[{}]({})", columns.join(","), input)
            }
            Self::GroupBy {
                input,
                key,
                aggregates,
            } => write!(
                f,
                "GroupBy[{} => {}]({})",
                key,
                aggregates
                    .iter()
                    .map(|a| a.output.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
                input
            ),
            Self::GroupFilter { input, predicate } => {
                write!(f, "GroupFilter[{}]({})", predicate, input)
            }
            Self::Aggregate { input, op, column } => write!(
                f,
                "Aggregate[{}({})]({})",
                op,
                column.as_deref().unwrap_or("*"),
                input
            ),
            Self::Distinct { input } => write!(f, "Distinct({})", input),
            Self::Sort { input, keys, unique } => {
                write!(f, "Sort{}[", if *unique { "Unique" } else { "" })?;
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}{}", k.column, if k.descending { " desc" } else { "" })?;
                }
                write!(f, "]({})", input)
            }
            Self::Limit { input, limit } => write!(f, "Limit[{}]({})", limit, input),
            Self::Offset { input, offset } => write!(f, "Offset[{}]({})", offset, input),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use predicate::Operator;

    fn store() -> FrozenStore {
        FrozenStore::builder()
            .col_i64("v", (0..100).map(Some).collect())
            .col_dictionary(
                "k",
                (0..100)
                    .map(|i| Some(if i % 2 == 0 { "a" } else { "b" }))
                    .collect::<Vec<_>>(),
            )
            .freeze()
            .unwrap()
    }

    #[test]
    fn scan_estimate_is_row_count() {
        let store = store();
        assert_eq!(LogicalPlan::scan().estimated_rows(&store), 100.0);
        assert_eq!(LogicalPlan::empty_scan(&store).estimated_rows(&store), 0.0);
    }

    #[test]
    fn filter_estimate_uses_range() {
        let store = store();
        let plan = LogicalPlan::Filter {
            input: Box::new(LogicalPlan::scan()),
            predicates: vec![Predicate::cmp("v", Operator::GT, 49i64)],
        };
        let est = plan.estimated_rows(&store);
        assert!((40.0..=60.0).contains(&est), "estimate {}", est);
    }

    #[test]
    fn equality_on_dictionary_uses_distinct_count() {
        let store = store();
        let sel = estimate_selectivity(&Predicate::cmp("k", Operator::Equal, "a"), &store);
        assert!((sel - 0.5).abs() < 1e-9, "selectivity {}", sel);
    }

    #[test]
    fn derived_estimates() {
        let store = store();
        let group = LogicalPlan::GroupBy {
            input: Box::new(LogicalPlan::scan()),
            key: "k".into(),
            aggregates: vec![],
        };
        assert_eq!(group.estimated_rows(&store), 10.0);

        let limit = LogicalPlan::Limit {
            input: Box::new(LogicalPlan::scan()),
            limit: 7,
        };
        assert_eq!(limit.estimated_rows(&store), 7.0);

        let offset = LogicalPlan::Offset {
            input: Box::new(LogicalPlan::scan()),
            offset: 30,
        };
        assert_eq!(offset.estimated_rows(&store), 70.0);

        let distinct = LogicalPlan::Distinct {
            input: Box::new(LogicalPlan::scan()),
        };
        assert_eq!(distinct.estimated_rows(&store), 50.0);
    }

    #[test]
    fn predicate_count_is_recursive() {
        let plan = LogicalPlan::Limit {
            input: Box::new(LogicalPlan::Filter {
                input: Box::new(LogicalPlan::scan()),
                predicates: vec![
                    Predicate::cmp("v", Operator::GT, 1i64),
                    Predicate::cmp("v", Operator::LT, 9i64),
                ],
            }),
            limit: 3,
        };
        assert_eq!(plan.predicate_count(), 2);
    }
}
