//! Grouped aggregation.
//!
//! Two strategies produce identical `(key, aggregates)` sets:
//!
//! * **Two-pass** (the general path): hash the selected rows into
//!   `group → row list`, then run each aggregate per group. Works for any
//!   key column type; null keys are dropped.
//! * **Single-pass** (dictionary fast path): when the key column is
//!   dictionary-encoded with small cardinality and the selection is large
//!   enough to amortise setup, aggregate into a code-indexed accumulator
//!   array in one scan. Value accessors are resolved to typed slices once,
//!   outside the row loop.
//!
//! Per-group aggregates over zero non-null values emit `Scalar::Null`
//! rather than failing the query. Result rows are sorted by key so output
//! is deterministic across strategies.

use frozen_store::{ColumnData, FrozenStore, Scalar};
use hashbrown::HashMap;
use observability_deps::tracing::debug;
use ordered_float::OrderedFloat;
use rust_decimal::Decimal;
use schema::LogicalType;
use selection::Bitmap;

use crate::{AggregateType, OverflowSnafu, Result, TypeMismatchSnafu, UnknownColumnSnafu};

/// One requested aggregate within a GROUP BY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSpec {
    /// Output name, e.g. `salary_sum`.
    pub output: String,
    pub op: AggregateType,
    /// `None` for `COUNT(*)`.
    pub column: Option<String>,
}

/// One output row of a grouped aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedRow {
    pub key: Scalar,
    pub aggregates: Vec<Scalar>,
}

/// When the dictionary single-pass path is taken.
#[derive(Debug, Clone, Copy)]
pub struct SinglePassPolicy {
    pub max_cardinality: usize,
    pub min_rows: usize,
}

impl Default for SinglePassPolicy {
    fn default() -> Self {
        Self {
            max_cardinality: 256,
            min_rows: 1_000,
        }
    }
}

/// Aggregate the selected rows of `store`, grouped by `key_column`.
pub fn group_aggregate(
    store: &FrozenStore,
    key_column: &str,
    specs: &[AggregateSpec],
    selection: &Bitmap,
    policy: SinglePassPolicy,
) -> Result<Vec<GroupedRow>> {
    let (key_idx, key_col) = resolve(store, key_column)?;
    let accessors = specs
        .iter()
        .map(|spec| SpecAccessor::resolve(store, spec))
        .collect::<Result<Vec<_>>>()?;

    let single_pass = match key_col.data() {
        ColumnData::Dictionary { values, .. } => {
            values.len() <= policy.max_cardinality
                && selection.count_ones() >= policy.min_rows
        }
        _ => false,
    };
    debug!(key = key_column, single_pass, "grouped aggregation");

    let mut rows = if single_pass {
        single_pass_aggregate(store, key_idx, &accessors, selection)
    } else {
        two_pass_aggregate(store, key_idx, &accessors, selection)
    }?;

    rows.sort_by(|a, b| a.key.cmp_nulls_last(&b.key));
    Ok(rows)
}

fn resolve<'a>(
    store: &'a FrozenStore,
    column: &str,
) -> Result<(usize, &'a frozen_store::Column)> {
    store
        .column_by_name(column)
        .map_err(|_| UnknownColumnSnafu { column }.build())
}

// ---- value accessors -------------------------------------------------------

// A typed view of one aggregate's input, resolved once per query.
#[derive(Debug)]
struct SpecAccessor<'a> {
    op: AggregateType,
    values: ValueSlice<'a>,
    validity: Option<&'a Bitmap>,
    result_type: Option<LogicalType>,
}

#[derive(Debug, Clone, Copy)]
enum ValueSlice<'a> {
    /// `COUNT(*)`: no column read at all.
    Rows,
    /// `COUNT(col)` on a non-numeric column: only validity is consulted.
    ValidityOnly,
    I8(&'a [i8]),
    I16(&'a [i16]),
    I32(&'a [i32]),
    I64(&'a [i64]),
    F32(&'a [f32]),
    F64(&'a [f64]),
    Dec(&'a [Decimal]),
}

impl<'a> SpecAccessor<'a> {
    fn resolve(store: &'a FrozenStore, spec: &AggregateSpec) -> Result<Self> {
        let Some(column) = &spec.column else {
            return Ok(Self {
                op: spec.op,
                values: ValueSlice::Rows,
                validity: None,
                result_type: None,
            });
        };

        let (_, col) = resolve(store, column)?;
        let values = match col.data() {
            ColumnData::I8(v) => ValueSlice::I8(v),
            ColumnData::I16(v) => ValueSlice::I16(v),
            ColumnData::I32(v) => ValueSlice::I32(v),
            ColumnData::I64(v) => ValueSlice::I64(v),
            ColumnData::F32(v) => ValueSlice::F32(v),
            ColumnData::F64(v) => ValueSlice::F64(v),
            ColumnData::Decimal { values, .. } => ValueSlice::Dec(values),
            _ if spec.op == AggregateType::Count => ValueSlice::ValidityOnly,
            _ => {
                return TypeMismatchSnafu {
                    actual: col.logical_type().to_string(),
                }
                .fail()
            }
        };

        Ok(Self {
            op: spec.op,
            values,
            validity: col.validity(),
            result_type: Some(col.logical_type()),
        })
    }

    fn new_accum(&self) -> Accum {
        match (self.op, self.values) {
            (AggregateType::Count, _) => Accum::Count { seen: 0 },
            (_, ValueSlice::F32(_) | ValueSlice::F64(_)) => Accum::Float {
                sum: 0.0,
                min: 0.0,
                max: 0.0,
                non_null: 0,
                has_extreme: false,
            },
            (_, ValueSlice::Dec(_)) => Accum::Dec {
                sum: Decimal::ZERO,
                min: Decimal::ZERO,
                max: Decimal::ZERO,
                non_null: 0,
            },
            _ => Accum::Int {
                sum: 0,
                min: 0,
                max: 0,
                non_null: 0,
            },
        }
    }

    fn is_valid(&self, row: usize) -> bool {
        self.validity.map(|v| v.get(row)).unwrap_or(true)
    }
}

// ---- accumulators ----------------------------------------------------------

// (sum, min, max, nonNullCount); hasValue == nonNullCount > 0. Floats
// additionally track whether the extremes were seeded, since NaN values
// contribute to the sum but never to min/max.
#[derive(Debug, Clone)]
enum Accum {
    Count { seen: u64 },
    Int { sum: i128, min: i64, max: i64, non_null: u64 },
    Float { sum: f64, min: f64, max: f64, non_null: u64, has_extreme: bool },
    Dec { sum: Decimal, min: Decimal, max: Decimal, non_null: u64 },
}

impl Accum {
    fn update(&mut self, accessor: &SpecAccessor<'_>, row: usize) {
        match self {
            Self::Count { seen } => match accessor.values {
                ValueSlice::Rows => *seen += 1,
                _ => {
                    if accessor.is_valid(row) {
                        *seen += 1
                    }
                }
            },
            Self::Int { sum, min, max, non_null } => {
                if !accessor.is_valid(row) {
                    return;
                }
                let v = match accessor.values {
                    ValueSlice::I8(values) => values[row] as i64,
                    ValueSlice::I16(values) => values[row] as i64,
                    ValueSlice::I32(values) => values[row] as i64,
                    ValueSlice::I64(values) => values[row],
                    _ => unreachable!("accumulator matches its accessor"),
                };
                *sum += v as i128;
                if *non_null == 0 || v < *min {
                    *min = v;
                }
                if *non_null == 0 || v > *max {
                    *max = v;
                }
                *non_null += 1;
            }
            Self::Float { sum, min, max, non_null, has_extreme } => {
                if !accessor.is_valid(row) {
                    return;
                }
                let v = match accessor.values {
                    ValueSlice::F32(values) => values[row] as f64,
                    ValueSlice::F64(values) => values[row],
                    _ => unreachable!("accumulator matches its accessor"),
                };
                *sum += v;
                // NaN never seeds or displaces an extreme
                if !v.is_nan() {
                    if !*has_extreme || v < *min {
                        *min = v;
                    }
                    if !*has_extreme || v > *max {
                        *max = v;
                    }
                    *has_extreme = true;
                }
                *non_null += 1;
            }
            Self::Dec { sum, min, max, non_null } => {
                if !accessor.is_valid(row) {
                    return;
                }
                let v = match accessor.values {
                    ValueSlice::Dec(values) => values[row],
                    _ => unreachable!("accumulator matches its accessor"),
                };
                *sum = sum.saturating_add(v);
                if *non_null == 0 || v < *min {
                    *min = v;
                }
                if *non_null == 0 || v > *max {
                    *max = v;
                }
                *non_null += 1;
            }
        }
    }

    fn emit(&self, accessor: &SpecAccessor<'_>) -> Result<Scalar> {
        let op = accessor.op;
        Ok(match self {
            Self::Count { seen } => Scalar::I64(
                i64::try_from(*seen).map_err(|_| OverflowSnafu.build())?,
            ),
            Self::Int { sum, min, max, non_null } => {
                if *non_null == 0 && op != AggregateType::Sum {
                    return Ok(Scalar::Null);
                }
                match op {
                    AggregateType::Sum => Scalar::I64(
                        i64::try_from(*sum).map_err(|_| OverflowSnafu.build())?,
                    ),
                    AggregateType::Avg => Scalar::F64(*sum as f64 / *non_null as f64),
                    AggregateType::Min => emit_int(accessor.result_type, *min),
                    AggregateType::Max => emit_int(accessor.result_type, *max),
                    AggregateType::Count => unreachable!("count uses Accum::Count"),
                }
            }
            Self::Float { sum, min, max, non_null, has_extreme } => {
                if *non_null == 0 && op != AggregateType::Sum {
                    return Ok(Scalar::Null);
                }
                match op {
                    AggregateType::Sum => Scalar::F64(*sum),
                    AggregateType::Avg => Scalar::F64(*sum / *non_null as f64),
                    // a group holding nothing but NaNs keeps NaN
                    AggregateType::Min | AggregateType::Max if !*has_extreme => {
                        emit_float(accessor.result_type, f64::NAN)
                    }
                    AggregateType::Min => emit_float(accessor.result_type, *min),
                    AggregateType::Max => emit_float(accessor.result_type, *max),
                    AggregateType::Count => unreachable!("count uses Accum::Count"),
                }
            }
            Self::Dec { sum, min, max, non_null } => {
                if *non_null == 0 && op != AggregateType::Sum {
                    return Ok(Scalar::Null);
                }
                match op {
                    AggregateType::Sum => Scalar::Decimal(*sum),
                    AggregateType::Avg => Scalar::Decimal(
                        sum.checked_div(Decimal::from(*non_null))
                            .ok_or_else(|| OverflowSnafu.build())?,
                    ),
                    AggregateType::Min => Scalar::Decimal(*min),
                    AggregateType::Max => Scalar::Decimal(*max),
                    AggregateType::Count => unreachable!("count uses Accum::Count"),
                }
            }
        })
    }
}

fn emit_int(result_type: Option<LogicalType>, v: i64) -> Scalar {
    match result_type {
        Some(LogicalType::Int8) => Scalar::I8(v as i8),
        Some(LogicalType::Int16) => Scalar::I16(v as i16),
        Some(LogicalType::Int32) => Scalar::I32(v as i32),
        _ => Scalar::I64(v),
    }
}

fn emit_float(result_type: Option<LogicalType>, v: f64) -> Scalar {
    match result_type {
        Some(LogicalType::Float32) => Scalar::F32(v as f32),
        _ => Scalar::F64(v),
    }
}

// ---- strategies ------------------------------------------------------------

// Hashable projection of a group key scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Int(i64),
    Float(OrderedFloat<f64>),
    Dec(Decimal),
    Bool(bool),
    Str(String),
}

impl GroupKey {
    // `None` for null keys, which grouping drops.
    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::Null => None,
            Scalar::I8(v) => Some(Self::Int(*v as i64)),
            Scalar::I16(v) => Some(Self::Int(*v as i64)),
            Scalar::I32(v) => Some(Self::Int(*v as i64)),
            Scalar::I64(v) => Some(Self::Int(*v)),
            Scalar::Date(v) => Some(Self::Int(*v as i64)),
            Scalar::Timestamp { value, .. } => Some(Self::Int(*value)),
            Scalar::F32(v) => Some(Self::Float(OrderedFloat(*v as f64))),
            Scalar::F64(v) => Some(Self::Float(OrderedFloat(*v))),
            Scalar::Decimal(v) => Some(Self::Dec(*v)),
            Scalar::Bool(v) => Some(Self::Bool(*v)),
            Scalar::Str(v) => Some(Self::Str(v.clone())),
        }
    }
}

fn two_pass_aggregate(
    store: &FrozenStore,
    key_idx: usize,
    accessors: &[SpecAccessor<'_>],
    selection: &Bitmap,
) -> Result<Vec<GroupedRow>> {
    let key_col = store.column(key_idx);

    // pass 1: group -> row indices
    let mut groups: HashMap<GroupKey, (Scalar, Vec<u32>)> = HashMap::new();
    for row in selection.iter_set() {
        let key_scalar = key_col.scalar_at(row);
        let Some(key) = GroupKey::from_scalar(&key_scalar) else {
            continue;
        };
        groups
            .entry(key)
            .or_insert_with(|| (key_scalar, Vec::new()))
            .1
            .push(row as u32);
    }

    // pass 2: aggregates per group
    let mut out = Vec::with_capacity(groups.len());
    for (_, (key, rows)) in groups {
        let mut accums = accessors
            .iter()
            .map(SpecAccessor::new_accum)
            .collect::<Vec<_>>();
        for &row in &rows {
            for (accum, accessor) in accums.iter_mut().zip(accessors) {
                accum.update(accessor, row as usize);
            }
        }
        let aggregates = accums
            .iter()
            .zip(accessors)
            .map(|(accum, accessor)| accum.emit(accessor))
            .collect::<Result<Vec<_>>>()?;
        out.push(GroupedRow { key, aggregates });
    }
    Ok(out)
}

fn single_pass_aggregate(
    store: &FrozenStore,
    key_idx: usize,
    accessors: &[SpecAccessor<'_>],
    selection: &Bitmap,
) -> Result<Vec<GroupedRow>> {
    let key_col = store.column(key_idx);
    let (keys, dictionary) = match key_col.data() {
        ColumnData::Dictionary { keys, values } => (keys.as_slice(), values.as_slice()),
        _ => unreachable!("single pass requires a dictionary key"),
    };

    // fixed-size accumulator table indexed by dictionary code
    let mut table: Vec<Option<Vec<Accum>>> = vec![None; dictionary.len()];
    let key_validity = key_col.validity();

    for row in selection.iter_set() {
        if let Some(validity) = key_validity {
            if !validity.get(row) {
                continue; // null key
            }
        }
        let code = keys[row] as usize;
        let accums = table[code].get_or_insert_with(|| {
            accessors.iter().map(SpecAccessor::new_accum).collect()
        });
        for (accum, accessor) in accums.iter_mut().zip(accessors) {
            accum.update(accessor, row);
        }
    }

    // resolve codes back to key values
    let mut out = Vec::new();
    for (code, accums) in table.into_iter().enumerate() {
        let Some(accums) = accums else { continue };
        let aggregates = accums
            .iter()
            .zip(accessors)
            .map(|(accum, accessor)| accum.emit(accessor))
            .collect::<Result<Vec<_>>>()?;
        out.push(GroupedRow {
            key: Scalar::Str(dictionary[code].clone()),
            aggregates,
        });
    }
    Ok(out)
}
