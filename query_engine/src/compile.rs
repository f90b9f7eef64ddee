//! Fused per-row predicate evaluation.
//!
//! A predicate list of plain scalar comparisons compiles to a short tape of
//! resolved terms: column ordinals bound, literals coerced to the column's
//! comparison domain, validity captured. Evaluation short-circuits the AND
//! chain per row. The tape must agree with the interpreter exactly — it is
//! an optimization, never a semantic.
//!
//! Anything else (strings, LIKE, null tests, compound predicates) is
//! `Unsupported`; the caller falls back to the interpreter silently.

use frozen_store::{ColumnData, FrozenStore};
use hashbrown::HashMap;
use observability_deps::tracing::debug;
use parking_lot::Mutex;
use predicate::{ColumnCmp, Literal, Operator, Predicate};
use rust_decimal::Decimal;
use selection::Bitmap;
use snafu::Snafu;
use std::sync::Arc;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("predicate is not compilable: {}", reason))]
    Unsupported { reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// One resolved comparison. Value slots of null rows hold fillers, so every
// term re-checks validity before its comparison.
#[derive(Debug, Clone)]
enum Term {
    Int {
        col: usize,
        op: Operator,
        value: i64,
    },
    Float {
        col: usize,
        op: Operator,
        value: f64,
    },
    Dec {
        col: usize,
        op: Operator,
        value: Decimal,
    },
    Bool {
        col: usize,
        op: Operator,
        value: bool,
    },
}

/// A compiled predicate list.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    terms: Vec<Term>,
}

impl CompiledFilter {
    /// Resolve `predicates` against `store`, failing with `Unsupported` for
    /// any term the tape cannot express.
    pub fn compile(store: &FrozenStore, predicates: &[Predicate]) -> Result<Self> {
        let terms = predicates
            .iter()
            .map(|pred| compile_one(store, pred))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { terms })
    }

    /// Whether the whole term chain passes for `row`.
    fn eval_row(&self, store: &FrozenStore, row: usize) -> bool {
        self.terms.iter().all(|term| eval_term(term, store, row))
    }

    /// Restrict `selection` to passing rows, exactly as the interpreter
    /// would.
    pub fn evaluate(&self, store: &FrozenStore, selection: &mut Bitmap) {
        for block_idx in 0..selection.blocks().len() {
            let mut remaining = selection.blocks()[block_idx];
            if remaining == 0 {
                continue;
            }
            let base = block_idx * 64;
            let mut mask = remaining;
            while remaining != 0 {
                let lane = remaining.trailing_zeros() as usize;
                if !self.eval_row(store, base + lane) {
                    mask &= !(1u64 << lane);
                }
                remaining &= remaining - 1;
            }
            selection.mask_block(block_idx, mask);
        }
    }
}

fn compile_one(store: &FrozenStore, pred: &Predicate) -> Result<Term> {
    let Predicate::Cmp(cmp) = pred else {
        return UnsupportedSnafu {
            reason: "only plain comparisons compile",
        }
        .fail();
    };
    let ColumnCmp { column, op, literal } = cmp;
    if *op == Operator::Like {
        return UnsupportedSnafu {
            reason: "LIKE does not compile",
        }
        .fail();
    }

    let Ok((col, column_ref)) = store.column_by_name(column) else {
        return UnsupportedSnafu {
            reason: format!("unknown column \"{}\"", column),
        }
        .fail();
    };

    let term = match column_ref.data() {
        ColumnData::I8(_)
        | ColumnData::I16(_)
        | ColumnData::I32(_)
        | ColumnData::I64(_)
        | ColumnData::Date(_) => Term::Int {
            col,
            op: *op,
            value: literal.as_i64().ok_or_else(|| {
                UnsupportedSnafu {
                    reason: "literal outside the integer domain",
                }
                .build()
            })?,
        },
        ColumnData::Timestamp { unit, .. } => Term::Int {
            col,
            op: *op,
            value: literal.as_timestamp(*unit).ok_or_else(|| {
                UnsupportedSnafu {
                    reason: "literal outside the timestamp domain",
                }
                .build()
            })?,
        },
        ColumnData::F32(_) | ColumnData::F64(_) => Term::Float {
            col,
            op: *op,
            value: literal.as_f64().ok_or_else(|| {
                UnsupportedSnafu {
                    reason: "literal outside the float domain",
                }
                .build()
            })?,
        },
        ColumnData::Decimal { .. } => Term::Dec {
            col,
            op: *op,
            value: literal.as_decimal().ok_or_else(|| {
                UnsupportedSnafu {
                    reason: "literal outside the decimal domain",
                }
                .build()
            })?,
        },
        ColumnData::Bool(_) => {
            if !matches!(op, Operator::Equal | Operator::NotEqual) {
                return UnsupportedSnafu {
                    reason: "ordering comparison on bool",
                }
                .fail();
            }
            Term::Bool {
                col,
                op: *op,
                value: literal.as_bool().ok_or_else(|| {
                    UnsupportedSnafu {
                        reason: "literal outside the bool domain",
                    }
                    .build()
                })?,
            }
        }
        ColumnData::Utf8 { .. } | ColumnData::Dictionary { .. } => {
            return UnsupportedSnafu {
                reason: "string comparisons do not compile",
            }
            .fail();
        }
    };
    Ok(term)
}

fn eval_term(term: &Term, store: &FrozenStore, row: usize) -> bool {
    match term {
        Term::Int { col, op, value } => {
            let column = store.column(*col);
            if column.is_null(row) {
                return false;
            }
            let v = match column.data() {
                ColumnData::I8(values) => values[row] as i64,
                ColumnData::I16(values) => values[row] as i64,
                ColumnData::I32(values) => values[row] as i64,
                ColumnData::I64(values) => values[row],
                ColumnData::Date(values) => values[row] as i64,
                ColumnData::Timestamp { values, .. } => values[row],
                _ => unreachable!("term bound to an integer column"),
            };
            op.eval_ordering(v.cmp(value))
        }
        Term::Float { col, op, value } => {
            let column = store.column(*col);
            if column.is_null(row) {
                return false;
            }
            let v = match column.data() {
                ColumnData::F32(values) => values[row] as f64,
                ColumnData::F64(values) => values[row],
                _ => unreachable!("term bound to a float column"),
            };
            match v.partial_cmp(value) {
                Some(ordering) => op.eval_ordering(ordering),
                // NaN compares false everywhere, like the interpreter
                None => false,
            }
        }
        Term::Dec { col, op, value } => {
            let column = store.column(*col);
            if column.is_null(row) {
                return false;
            }
            let v = match column.data() {
                ColumnData::Decimal { values, .. } => values[row],
                _ => unreachable!("term bound to a decimal column"),
            };
            op.eval_ordering(v.cmp(value))
        }
        Term::Bool { col, op, value } => {
            let column = store.column(*col);
            if column.is_null(row) {
                return false;
            }
            let v = match column.data() {
                ColumnData::Bool(values) => values[row],
                _ => unreachable!("term bound to a bool column"),
            };
            match op {
                Operator::Equal => v == *value,
                Operator::NotEqual => v != *value,
                _ => unreachable!("bool terms are equality-only"),
            }
        }
    }
}

/// Per-engine cache of compiled filters, keyed by the predicate-list part
/// of the plan fingerprint.
#[derive(Debug, Default)]
pub struct CompiledCache {
    entries: Mutex<HashMap<String, Arc<CompiledFilter>>>,
    fallbacks: std::sync::atomic::AtomicU64,
}

impl CompiledCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or compile the filter for `key`. `None` means not compilable;
    /// the caller uses the interpreter.
    pub fn get_or_compile(
        &self,
        key: &str,
        store: &FrozenStore,
        predicates: &[Predicate],
    ) -> Option<Arc<CompiledFilter>> {
        if let Some(filter) = self.entries.lock().get(key) {
            return Some(Arc::clone(filter));
        }

        match CompiledFilter::compile(store, predicates) {
            Ok(filter) => {
                let filter = Arc::new(filter);
                self.entries
                    .lock()
                    .insert(key.to_owned(), Arc::clone(&filter));
                Some(filter)
            }
            Err(Error::Unsupported { reason }) => {
                // functional paths stay silent; observability only
                debug!(%reason, "compiled predicate fallback to interpreter");
                self.fallbacks
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                None
            }
        }
    }

    /// Number of interpreter fallbacks, for the observability hook.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn store() -> FrozenStore {
        FrozenStore::builder()
            .col_i32("a", vec![Some(1), Some(5), None, Some(9), Some(3)])
            .col_f64("b", vec![Some(0.5), Some(2.5), Some(1.0), None, Some(9.9)])
            .col_utf8("s", vec![Some("x"); 5])
            .freeze()
            .unwrap()
    }

    fn interpreted(store: &FrozenStore, predicates: &[Predicate]) -> Bitmap {
        let mut selection = Bitmap::all_set(store.row_count());
        for pred in predicates {
            pred.evaluate(store, &mut selection).unwrap();
        }
        selection
    }

    #[test]
    fn compiled_matches_interpreter() {
        let store = store();
        let predicates = vec![
            Predicate::cmp("a", Operator::GT, 2i64),
            Predicate::cmp("b", Operator::LT, 5.0),
        ];
        let compiled = CompiledFilter::compile(&store, &predicates).unwrap();

        let mut selection = Bitmap::all_set(store.row_count());
        compiled.evaluate(&store, &mut selection);
        assert_eq!(selection, interpreted(&store, &predicates));
        // rows: a=[1,5,-,9,3], b=[.5,2.5,1,-,9.9]; survivors need a>2 && b<5
        assert_eq!(selection.iter_set().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn unsupported_shapes() {
        let store = store();
        for predicates in [
            vec![Predicate::cmp("s", Operator::Equal, "x")],
            vec![Predicate::is_null("a")],
            vec![Predicate::cmp("a", Operator::GT, 1i64)
                .or(Predicate::cmp("a", Operator::LT, 0i64))],
        ] {
            assert!(matches!(
                CompiledFilter::compile(&store, &predicates),
                Err(Error::Unsupported { .. })
            ));
        }
    }

    #[test]
    fn cache_compiles_once_and_counts_fallbacks() {
        let store = store();
        let cache = CompiledCache::new();
        let predicates = vec![Predicate::cmp("a", Operator::GTE, 3i64)];

        let first = cache.get_or_compile("k", &store, &predicates).unwrap();
        let second = cache.get_or_compile("k", &store, &predicates).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.fallback_count(), 0);

        let uncompilable = vec![Predicate::is_null("a")];
        assert!(cache.get_or_compile("k2", &store, &uncompilable).is_none());
        assert_eq!(cache.fallback_count(), 1);
    }

    proptest! {
        // compiled and interpreted evaluators must agree on any data
        #[test]
        fn prop_compiled_interpreter_equivalence(
            values in prop::collection::vec(proptest::option::weighted(0.85, -50i32..50), 1..250),
            lo in -50i64..50,
            hi in -50i64..50,
        ) {
            let store = FrozenStore::builder()
                .col_i32("v", values)
                .freeze()
                .unwrap();
            let predicates = vec![
                Predicate::cmp("v", Operator::GTE, lo),
                Predicate::cmp("v", Operator::LT, hi),
            ];

            let compiled = CompiledFilter::compile(&store, &predicates).unwrap();
            let mut compiled_sel = Bitmap::all_set(store.row_count());
            compiled.evaluate(&store, &mut compiled_sel);

            prop_assert_eq!(compiled_sel, interpreted(&store, &predicates));
        }
    }
}
