//! Column aggregation: Sum / Avg / Min / Max / Count over a selection.
//!
//! Three execution shapes share one set of kernels:
//!
//! * **Sequential** walks the selection's set bits in a plain loop.
//! * **Blocked** walks 64-bit blocks, skipping empty ones and taking an
//!   unrolled dense reduction over full ones (see [`mod@kernels`]).
//! * **Parallel** splits the row range on block-aligned chunk boundaries,
//!   computes blocked partials on a rayon pool and combines them
//!   associatively, so integer and decimal results are identical to the
//!   sequential ones; float results may differ in the last bits.
//!
//! Count never reads values: it is a popcount of the selection, optionally
//! intersected with the column's validity.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod grouped;
mod kernels;

pub use grouped::{group_aggregate, AggregateSpec, GroupedRow, SinglePassPolicy};

use std::borrow::Cow;
use std::fmt::Display;

use frozen_store::{Column, ColumnData, Scalar};
use kernels::{MinMax, SumPartial};
use observability_deps::tracing::debug;
use rayon::ThreadPool;
use rust_decimal::Decimal;
use schema::LogicalType;
use selection::Bitmap;
use snafu::{ensure, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("column \"{}\" does not exist", column))]
    UnknownColumn { column: String },

    #[snafu(display("cannot aggregate column of type {}", actual))]
    TypeMismatch { actual: String },

    #[snafu(display("aggregate over zero rows"))]
    EmptySequence,

    #[snafu(display("aggregate accumulator overflowed"))]
    Overflow,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The aggregate operations the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateType {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Display for AggregateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count => write!(f, "count"),
            Self::Sum => write!(f, "sum"),
            Self::Avg => write!(f, "avg"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
        }
    }
}

/// How a kernel executes.
#[derive(Debug, Clone, Copy)]
pub enum Mode<'a> {
    Sequential,
    Blocked,
    Parallel {
        pool: &'a ThreadPool,
        chunk_rows: usize,
    },
}

/// `COUNT(*)`: selected rows, nulls included.
pub fn count_star(selection: &Bitmap) -> u64 {
    selection.count_ones() as u64
}

/// `COUNT(col)`: selected rows with a non-null value in `column`.
pub fn count_column(column: &Column, selection: &Bitmap) -> u64 {
    match column.validity() {
        Some(validity) => selection
            .blocks()
            .iter()
            .zip(validity.blocks())
            .map(|(s, v)| (s & v).count_ones() as u64)
            .sum(),
        None => selection.count_ones() as u64,
    }
}

/// Sum of the selected non-null values. Zero rows sum to the typed zero.
pub fn sum(column: &Column, selection: &Bitmap, mode: Mode<'_>) -> Result<Scalar> {
    check_numeric(column)?;
    let selection = valid_selection(column, selection);
    let partial = match mode {
        Mode::Sequential => sum_sequential(column.data(), &selection)?,
        Mode::Blocked => kernels::sum_range(column.data(), &selection, 0, selection.len())?,
        Mode::Parallel { pool, chunk_rows } => {
            let partials = run_chunked(pool, chunk_rows, selection.len(), |start, end| {
                kernels::sum_range(column.data(), &selection, start, end)
            });
            let mut iter = partials.into_iter();
            let mut total = iter.next().unwrap_or(Ok(zero_partial(column.data())))?;
            for partial in iter {
                total = total.combine(partial?)?;
            }
            total
        }
    };

    Ok(match partial {
        SumPartial::Int(total) => Scalar::I64(
            i64::try_from(total).map_err(|_| OverflowSnafu.build())?,
        ),
        SumPartial::Float(total) => Scalar::F64(total),
        SumPartial::Dec(total) => Scalar::Decimal(total),
    })
}

/// Minimum of the selected non-null values; `EmptySequence` when none.
pub fn min(column: &Column, selection: &Bitmap, mode: Mode<'_>) -> Result<Scalar> {
    extreme(column, selection, mode, true)
}

/// Maximum of the selected non-null values; `EmptySequence` when none.
pub fn max(column: &Column, selection: &Bitmap, mode: Mode<'_>) -> Result<Scalar> {
    extreme(column, selection, mode, false)
}

/// Arithmetic mean of the selected non-null values; `EmptySequence` when
/// none. Integer and float averages are `f64`; decimal stays decimal.
pub fn avg(column: &Column, selection: &Bitmap, mode: Mode<'_>) -> Result<Scalar> {
    check_numeric(column)?;
    let selection = valid_selection(column, selection);
    let count = selection.count_ones() as u64;
    ensure!(count > 0, EmptySequenceSnafu);

    let total = match mode {
        Mode::Sequential => sum_sequential(column.data(), &selection)?,
        Mode::Blocked => kernels::sum_range(column.data(), &selection, 0, selection.len())?,
        Mode::Parallel { pool, chunk_rows } => {
            let partials = run_chunked(pool, chunk_rows, selection.len(), |start, end| {
                kernels::sum_range(column.data(), &selection, start, end)
            });
            let mut iter = partials.into_iter();
            let mut total = iter.next().expect("count > 0 implies a chunk")?;
            for partial in iter {
                total = total.combine(partial?)?;
            }
            total
        }
    };

    Ok(match total {
        SumPartial::Int(total) => Scalar::F64(total as f64 / count as f64),
        SumPartial::Float(total) => Scalar::F64(total / count as f64),
        SumPartial::Dec(total) => Scalar::Decimal(
            total
                .checked_div(Decimal::from(count))
                .ok_or_else(|| OverflowSnafu.build())?,
        ),
    })
}

fn extreme(column: &Column, selection: &Bitmap, mode: Mode<'_>, want_min: bool) -> Result<Scalar> {
    check_numeric(column)?;
    let selection = valid_selection(column, selection);

    let partial = match mode {
        Mode::Sequential => extreme_sequential(column.data(), &selection, want_min),
        Mode::Blocked => {
            kernels::extreme_range(column.data(), &selection, 0, selection.len(), want_min)
        }
        Mode::Parallel { pool, chunk_rows } => {
            let partials = run_chunked(pool, chunk_rows, selection.len(), |start, end| {
                kernels::extreme_range(column.data(), &selection, start, end, want_min)
            });
            partials
                .into_iter()
                .flatten()
                .reduce(|a, b| a.combine(b, want_min))
        }
    };

    let extreme = partial.ok_or_else(|| EmptySequenceSnafu.build())?;
    Ok(emit_extreme(column.logical_type(), extreme))
}

fn check_numeric(column: &Column) -> Result<()> {
    ensure!(
        column.logical_type().is_numeric(),
        TypeMismatchSnafu {
            actual: column.logical_type().to_string(),
        }
    );
    Ok(())
}

// AND validity into the selection once so kernels skip null checks.
fn valid_selection<'a>(column: &Column, selection: &'a Bitmap) -> Cow<'a, Bitmap> {
    match column.validity() {
        Some(validity) => {
            let mut scratch = selection.clone();
            scratch
                .and(validity)
                .expect("validity covers the store's rows");
            Cow::Owned(scratch)
        }
        None => Cow::Borrowed(selection),
    }
}

// Dispatch chunked partials onto the pool. Chunk bounds are rounded up to
// block multiples so every chunk starts block-aligned.
fn run_chunked<T: Send>(
    pool: &ThreadPool,
    chunk_rows: usize,
    len: usize,
    work: impl Fn(usize, usize) -> T + Sync,
) -> Vec<T> {
    use rayon::prelude::*;

    let chunk_rows = chunk_rows.max(64).next_multiple_of(64);
    let ranges = (0..len)
        .step_by(chunk_rows)
        .map(|start| (start, (start + chunk_rows).min(len)))
        .collect::<Vec<_>>();
    debug!(chunks = ranges.len(), chunk_rows, "parallel aggregation");

    pool.install(|| {
        ranges
            .par_iter()
            .map(|&(start, end)| work(start, end))
            .collect()
    })
}

fn zero_partial(data: &ColumnData) -> SumPartial {
    match data {
        ColumnData::F32(_) | ColumnData::F64(_) => SumPartial::Float(0.0),
        ColumnData::Decimal { .. } => SumPartial::Dec(Decimal::ZERO),
        _ => SumPartial::Int(0),
    }
}

fn sum_sequential(data: &ColumnData, selection: &Bitmap) -> Result<SumPartial> {
    Ok(match data {
        ColumnData::I8(v) => SumPartial::Int(selection.iter_set().map(|i| v[i] as i128).sum()),
        ColumnData::I16(v) => SumPartial::Int(selection.iter_set().map(|i| v[i] as i128).sum()),
        ColumnData::I32(v) => SumPartial::Int(selection.iter_set().map(|i| v[i] as i128).sum()),
        ColumnData::I64(v) => SumPartial::Int(selection.iter_set().map(|i| v[i] as i128).sum()),
        ColumnData::F32(v) => SumPartial::Float(selection.iter_set().map(|i| v[i] as f64).sum()),
        ColumnData::F64(v) => SumPartial::Float(selection.iter_set().map(|i| v[i]).sum()),
        ColumnData::Decimal { values, .. } => {
            let mut total = Decimal::ZERO;
            for i in selection.iter_set() {
                total = total
                    .checked_add(values[i])
                    .ok_or_else(|| OverflowSnafu.build())?;
            }
            SumPartial::Dec(total)
        }
        _ => unreachable!("sum validated against numeric columns"),
    })
}

fn extreme_sequential(
    data: &ColumnData,
    selection: &Bitmap,
    want_min: bool,
) -> Option<MinMax> {
    // reuse the range kernels in their sparse shape by walking bits directly
    let mut result: Option<MinMax> = None;
    for i in selection.iter_set() {
        let value = match data {
            ColumnData::I8(v) => MinMax::Int(v[i] as i64),
            ColumnData::I16(v) => MinMax::Int(v[i] as i64),
            ColumnData::I32(v) => MinMax::Int(v[i] as i64),
            ColumnData::I64(v) => MinMax::Int(v[i]),
            ColumnData::F32(v) => MinMax::Float(v[i] as f64),
            ColumnData::F64(v) => MinMax::Float(v[i]),
            ColumnData::Decimal { values, .. } => MinMax::Dec(values[i]),
            _ => unreachable!("min/max validated against numeric columns"),
        };
        result = Some(match result {
            None => value,
            Some(cur) => cur.combine(value, want_min),
        });
    }
    result
}

// Min/Max results keep the column's native width.
fn emit_extreme(logical_type: LogicalType, extreme: MinMax) -> Scalar {
    match (extreme, logical_type) {
        (MinMax::Int(v), LogicalType::Int8) => Scalar::I8(v as i8),
        (MinMax::Int(v), LogicalType::Int16) => Scalar::I16(v as i16),
        (MinMax::Int(v), LogicalType::Int32) => Scalar::I32(v as i32),
        (MinMax::Int(v), _) => Scalar::I64(v),
        (MinMax::Float(v), LogicalType::Float32) => Scalar::F32(v as f32),
        (MinMax::Float(v), _) => Scalar::F64(v),
        (MinMax::Dec(v), _) => Scalar::Decimal(v),
    }
}

/// The result type an aggregate produces over a column of `logical_type`.
pub fn result_type(op: AggregateType, logical_type: LogicalType) -> LogicalType {
    match op {
        AggregateType::Count => LogicalType::Int64,
        AggregateType::Sum => match logical_type {
            LogicalType::Decimal { precision, scale } => {
                LogicalType::Decimal { precision, scale }
            }
            LogicalType::Float32 | LogicalType::Float64 => LogicalType::Float64,
            _ => LogicalType::Int64,
        },
        AggregateType::Avg => match logical_type {
            LogicalType::Decimal { precision, scale } => {
                LogicalType::Decimal { precision, scale }
            }
            _ => LogicalType::Float64,
        },
        AggregateType::Min | AggregateType::Max => logical_type,
    }
}
