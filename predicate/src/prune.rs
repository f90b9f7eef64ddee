//! Zone-map chunk pruning.
//!
//! [`prune_chunks`] answers, per chunk, "could any row in this chunk satisfy
//! the predicate?". `false` means provably not — the executor may skip the
//! chunk. Everything the summaries cannot prove keeps the chunk: a false
//! positive is re-checked by the evaluator, a false negative would be a
//! correctness bug. String columns prune only under equality and null tests.

use std::cmp::Ordering;

use frozen_store::{ChunkSummary, FrozenStore, Scalar};
use observability_deps::tracing::debug;
use schema::LogicalType;

use crate::cmp::Operator;
use crate::literal::Literal;
use crate::{ColumnCmp, Predicate};

/// Per-chunk survival mask for `pred` over `store`'s zone maps.
pub fn prune_chunks(pred: &Predicate, store: &FrozenStore) -> Vec<bool> {
    let num_chunks = store.zone_maps().num_chunks();
    let mask = (0..num_chunks)
        .map(|chunk| could_match(pred, store, chunk))
        .collect::<Vec<_>>();

    let kept = mask.iter().filter(|&&k| k).count();
    debug!(num_chunks, kept, "zone map pruning");
    mask
}

fn could_match(pred: &Predicate, store: &FrozenStore, chunk: usize) -> bool {
    match pred {
        Predicate::Cmp(cmp) => summary_for(store, &cmp.column, chunk)
            .map(|(lt, summary)| cmp_could_match(cmp, lt, summary))
            .unwrap_or(true),
        Predicate::IsNull { column, negated } => summary_for(store, column, chunk)
            .map(|(_, summary)| {
                if *negated {
                    // needs at least one non-null value; min is Null iff none
                    !summary.min.is_null()
                } else {
                    summary.has_nulls
                }
            })
            .unwrap_or(true),
        // a conjunction needs both sides possible
        Predicate::And(left, right) => {
            could_match(left, store, chunk) && could_match(right, store, chunk)
        }
        Predicate::Or(left, right) => {
            could_match(left, store, chunk) || could_match(right, store, chunk)
        }
        // complements cannot be bounded by (min, max)
        Predicate::Not(_) => true,
    }
}

fn summary_for<'a>(
    store: &'a FrozenStore,
    column: &str,
    chunk: usize,
) -> Option<(LogicalType, &'a ChunkSummary)> {
    let (idx, col) = store.column_by_name(column).ok()?;
    Some((
        col.logical_type(),
        &store.zone_maps().column_summaries(idx)[chunk],
    ))
}

fn cmp_could_match(cmp: &ColumnCmp, lt: LogicalType, summary: &ChunkSummary) -> bool {
    // an all-null chunk satisfies no comparison
    if summary.min.is_null() {
        return false;
    }

    let orderings = match lt {
        LogicalType::Int8
        | LogicalType::Int16
        | LogicalType::Int32
        | LogicalType::Int64
        | LogicalType::Date => int_orderings(&summary.min, &summary.max, cmp.literal.as_i64()),
        LogicalType::Timestamp(unit) => {
            int_orderings(&summary.min, &summary.max, cmp.literal.as_timestamp(unit))
        }
        LogicalType::Float32 | LogicalType::Float64 => {
            match (summary.min.as_f64(), summary.max.as_f64(), cmp.literal.as_f64()) {
                (Some(min), Some(max), Some(lit)) => {
                    min.partial_cmp(&lit).zip(max.partial_cmp(&lit))
                }
                _ => None,
            }
        }
        LogicalType::Decimal { .. } => {
            match (
                summary.min.as_decimal(),
                summary.max.as_decimal(),
                cmp.literal.as_decimal(),
            ) {
                (Some(min), Some(max), Some(lit)) => Some((min.cmp(&lit), max.cmp(&lit))),
                _ => None,
            }
        }
        LogicalType::Utf8 | LogicalType::Dictionary => {
            // only equality prunes string chunks
            if cmp.op != Operator::Equal {
                return true;
            }
            match (&summary.min, &summary.max, &cmp.literal) {
                (Scalar::Str(min), Scalar::Str(max), Literal::Str(lit)) => {
                    Some((min.as_str().cmp(lit.as_str()), max.as_str().cmp(lit.as_str())))
                }
                _ => None,
            }
        }
        LogicalType::Bool => match (summary.min.as_bool(), summary.max.as_bool(), cmp.literal.as_bool()) {
            (Some(min), Some(max), Some(lit)) => Some((min.cmp(&lit), max.cmp(&lit))),
            _ => None,
        },
    };

    match orderings {
        Some((min_cmp, max_cmp)) => bounds_allow(cmp.op, min_cmp, max_cmp),
        // incomparable: keep the chunk
        None => true,
    }
}

// `min_cmp` / `max_cmp` compare the chunk bounds against the literal.
fn bounds_allow(op: Operator, min_cmp: Ordering, max_cmp: Ordering) -> bool {
    match op {
        // lit within [min, max]
        Operator::Equal => min_cmp != Ordering::Greater && max_cmp != Ordering::Less,
        // prunable only when every value equals the literal
        Operator::NotEqual => !(min_cmp == Ordering::Equal && max_cmp == Ordering::Equal),
        Operator::GT => max_cmp == Ordering::Greater,
        Operator::GTE => max_cmp != Ordering::Less,
        Operator::LT => min_cmp == Ordering::Less,
        Operator::LTE => min_cmp != Ordering::Greater,
        Operator::Like => true,
    }
}

fn int_orderings(
    min: &Scalar,
    max: &Scalar,
    lit: Option<i64>,
) -> Option<(Ordering, Ordering)> {
    match (min.as_i64(), max.as_i64(), lit) {
        (Some(min), Some(max), Some(lit)) => Some((min.cmp(&lit), max.cmp(&lit))),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use selection::Bitmap;

    // 12 rows in chunks of 4: [0..4) holds 0..=3, [4..8) holds 10..=13,
    // [8..12) holds 20..=22 and a NULL.
    fn store() -> FrozenStore {
        FrozenStore::builder()
            .zone_map_chunk_rows(4)
            .col_i64(
                "v",
                vec![
                    Some(0),
                    Some(1),
                    Some(2),
                    Some(3),
                    Some(10),
                    Some(11),
                    Some(12),
                    Some(13),
                    Some(20),
                    Some(21),
                    Some(22),
                    None,
                ],
            )
            .col_utf8(
                "s",
                vec![
                    Some("a"), Some("b"), Some("c"), Some("d"),
                    Some("m"), Some("n"), Some("o"), Some("p"),
                    Some("x"), Some("y"), Some("z"), Some("z"),
                ],
            )
            .freeze()
            .unwrap()
    }

    #[test]
    fn numeric_pruning() {
        let store = store();
        assert_eq!(
            prune_chunks(&Predicate::cmp("v", Operator::GT, 15i64), &store),
            vec![false, false, true]
        );
        assert_eq!(
            prune_chunks(&Predicate::cmp("v", Operator::LTE, 3i64), &store),
            vec![true, false, false]
        );
        assert_eq!(
            prune_chunks(&Predicate::cmp("v", Operator::Equal, 11i64), &store),
            vec![false, true, false]
        );
        assert_eq!(
            prune_chunks(&Predicate::cmp("v", Operator::NotEqual, 11i64), &store),
            vec![true, true, true]
        );
    }

    #[test]
    fn null_pruning() {
        let store = store();
        assert_eq!(
            prune_chunks(&Predicate::is_null("v"), &store),
            vec![false, false, true]
        );
        assert_eq!(
            prune_chunks(&Predicate::is_not_null("v"), &store),
            vec![true, true, true]
        );
    }

    #[test]
    fn string_pruning_is_conservative_except_equality() {
        let store = store();
        assert_eq!(
            prune_chunks(&Predicate::cmp("s", Operator::Equal, "n"), &store),
            vec![false, true, false]
        );
        // ordering and LIKE keep everything
        assert_eq!(
            prune_chunks(&Predicate::cmp("s", Operator::GT, "y"), &store),
            vec![true, true, true]
        );
        assert_eq!(
            prune_chunks(&Predicate::cmp("s", Operator::Like, "a%"), &store),
            vec![true, true, true]
        );
    }

    #[test]
    fn compound_pruning() {
        let store = store();
        let and = Predicate::cmp("v", Operator::GT, 15i64)
            .and(Predicate::cmp("s", Operator::Equal, "x"));
        assert_eq!(prune_chunks(&and, &store), vec![false, false, true]);

        let or = Predicate::cmp("v", Operator::LT, 2i64)
            .or(Predicate::cmp("v", Operator::GT, 21i64));
        assert_eq!(prune_chunks(&or, &store), vec![true, false, true]);

        // NOT keeps everything
        let not = Predicate::cmp("v", Operator::GT, 100i64).not();
        assert_eq!(prune_chunks(&not, &store), vec![true, true, true]);
    }

    // a kept=false chunk must really contain no matching rows
    #[test]
    fn no_false_negatives() {
        let store = store();
        for pred in [
            Predicate::cmp("v", Operator::GT, 12i64),
            Predicate::cmp("v", Operator::Equal, 3i64),
            Predicate::cmp("v", Operator::LT, 0i64),
            Predicate::is_null("v"),
        ] {
            let mask = prune_chunks(&pred, &store);
            let mut selection = Bitmap::all_set(store.row_count());
            pred.evaluate(&store, &mut selection).unwrap();

            for (chunk, kept) in mask.iter().enumerate() {
                if !kept {
                    let (start, end) = store.zone_maps().chunk_bounds(chunk);
                    assert_eq!(
                        selection.count_ones_in_range(start, end),
                        0,
                        "pruned chunk {} of {} has matches",
                        chunk,
                        pred
                    );
                }
            }
        }
    }
}
