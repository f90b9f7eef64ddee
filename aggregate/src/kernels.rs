//! Block-based scalar aggregation kernels.
//!
//! All kernels walk the selection's 64-bit blocks with three cases per
//! block: all-zero blocks are skipped, full blocks take a dense unrolled
//! reduction over the contiguous value slice, and partial blocks fall back
//! to a trailing-zero sparse loop. Callers AND column validity into the
//! selection beforehand, so the hot loops contain no null checks.
//!
//! Integer sums accumulate in `i128` so no intermediate overflows; float
//! sums keep four independent lanes that are summed horizontally at the
//! end, which is why parallel/blocked float results may differ from the
//! sequential ones in the last bits. Decimal never takes the dense path.

use frozen_store::ColumnData;
use rust_decimal::Decimal;
use selection::Bitmap;

use crate::{OverflowSnafu, Result};

const BLOCK_BITS: usize = 64;

/// Partial sum in the accumulation domain of the column family.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SumPartial {
    Int(i128),
    Float(f64),
    Dec(Decimal),
}

impl SumPartial {
    pub(crate) fn combine(self, other: Self) -> Result<Self> {
        Ok(match (self, other) {
            (Self::Int(a), Self::Int(b)) => {
                Self::Int(a.checked_add(b).ok_or_else(|| OverflowSnafu.build())?)
            }
            (Self::Float(a), Self::Float(b)) => Self::Float(a + b),
            (Self::Dec(a), Self::Dec(b)) => {
                Self::Dec(a.checked_add(b).ok_or_else(|| OverflowSnafu.build())?)
            }
            _ => unreachable!("partials of one column share a domain"),
        })
    }
}

/// Partial extreme; `None` when the range holds no selected value.
pub(crate) type ExtremePartial = Option<MinMax>;

#[derive(Debug, Clone, Copy)]
pub(crate) enum MinMax {
    Int(i64),
    Float(f64),
    Dec(Decimal),
}

// One step of a block walk: either a whole dense block starting at the
// given base row, or a single selected row.
enum Step {
    Dense(usize),
    Row(usize),
}

// Drive `visit` over the selected rows of `[start_row, end_row)`, emitting
// `Step::Dense` for every all-ones block that lies fully inside the range.
fn for_blocks(
    selection: &Bitmap,
    start_row: usize,
    end_row: usize,
    mut visit: impl FnMut(Step),
) {
    debug_assert!(start_row % BLOCK_BITS == 0);
    let blocks = selection.blocks();
    let first_block = start_row / BLOCK_BITS;
    let last_block = (end_row + BLOCK_BITS - 1) / BLOCK_BITS;

    for block_idx in first_block..last_block {
        let mut block = blocks[block_idx];
        if block == 0 {
            continue;
        }

        let base = block_idx * BLOCK_BITS;
        let full_span = base + BLOCK_BITS <= end_row;
        if block == u64::MAX && full_span {
            visit(Step::Dense(base));
            continue;
        }

        // mask to the row range (start is block aligned; end may not be)
        if !full_span {
            block &= selection::low_mask(end_row - base);
        }
        while block != 0 {
            visit(Step::Row(base + block.trailing_zeros() as usize));
            block &= block - 1;
        }
    }
}

macro_rules! int_sum_range {
    ($fn_name:ident, $ty:ty) => {
        fn $fn_name(values: &[$ty], selection: &Bitmap, start: usize, end: usize) -> i128 {
            let mut total: i128 = 0;
            for_blocks(selection, start, end, |step| match step {
                Step::Dense(base) => {
                    // four-lane unrolled reduction; cannot overflow i64 for
                    // a 64-element block of this width
                    let vals = &values[base..base + BLOCK_BITS];
                    let mut acc = [0i64; 4];
                    for chunk in vals.chunks_exact(4) {
                        acc[0] += chunk[0] as i64;
                        acc[1] += chunk[1] as i64;
                        acc[2] += chunk[2] as i64;
                        acc[3] += chunk[3] as i64;
                    }
                    total += (acc[0] + acc[1] + acc[2] + acc[3]) as i128;
                }
                Step::Row(row) => total += values[row] as i128,
            });
            total
        }
    };
}

int_sum_range!(sum_range_i8, i8);
int_sum_range!(sum_range_i16, i16);
int_sum_range!(sum_range_i32, i32);

// i64 blocks can overflow an i64 accumulator, so the dense lanes are i128.
fn sum_range_i64(values: &[i64], selection: &Bitmap, start: usize, end: usize) -> i128 {
    let mut total: i128 = 0;
    for_blocks(selection, start, end, |step| match step {
        Step::Dense(base) => {
            let vals = &values[base..base + BLOCK_BITS];
            let mut acc = [0i128; 4];
            for chunk in vals.chunks_exact(4) {
                acc[0] += chunk[0] as i128;
                acc[1] += chunk[1] as i128;
                acc[2] += chunk[2] as i128;
                acc[3] += chunk[3] as i128;
            }
            total += acc[0] + acc[1] + acc[2] + acc[3];
        }
        Step::Row(row) => total += values[row] as i128,
    });
    total
}

macro_rules! float_sum_range {
    ($fn_name:ident, $ty:ty) => {
        fn $fn_name(values: &[$ty], selection: &Bitmap, start: usize, end: usize) -> f64 {
            let mut total = 0f64;
            for_blocks(selection, start, end, |step| match step {
                Step::Dense(base) => {
                    let vals = &values[base..base + BLOCK_BITS];
                    let mut acc = [0f64; 4];
                    for chunk in vals.chunks_exact(4) {
                        acc[0] += chunk[0] as f64;
                        acc[1] += chunk[1] as f64;
                        acc[2] += chunk[2] as f64;
                        acc[3] += chunk[3] as f64;
                    }
                    // horizontal sum of the lane accumulators
                    total += (acc[0] + acc[1]) + (acc[2] + acc[3]);
                }
                Step::Row(row) => total += values[row] as f64,
            });
            total
        }
    };
}

float_sum_range!(sum_range_f32, f32);
float_sum_range!(sum_range_f64, f64);

// Decimal is not a vector lane type; every step is element-wise.
fn sum_range_decimal(
    values: &[Decimal],
    selection: &Bitmap,
    start: usize,
    end: usize,
) -> Result<Decimal> {
    let mut total = Decimal::ZERO;
    let mut overflow = false;
    let mut add = |value: Decimal, total: &mut Decimal, overflow: &mut bool| {
        match total.checked_add(value) {
            Some(t) => *total = t,
            None => *overflow = true,
        }
    };
    for_blocks(selection, start, end, |step| match step {
        Step::Dense(base) => {
            for value in &values[base..base + BLOCK_BITS] {
                add(*value, &mut total, &mut overflow);
            }
        }
        Step::Row(row) => add(values[row], &mut total, &mut overflow),
    });
    if overflow {
        return OverflowSnafu.fail();
    }
    Ok(total)
}

/// Sum the selected rows of `[start, end)`. `start` must be block-aligned.
pub(crate) fn sum_range(
    data: &ColumnData,
    selection: &Bitmap,
    start: usize,
    end: usize,
) -> Result<SumPartial> {
    Ok(match data {
        ColumnData::I8(v) => SumPartial::Int(sum_range_i8(v, selection, start, end)),
        ColumnData::I16(v) => SumPartial::Int(sum_range_i16(v, selection, start, end)),
        ColumnData::I32(v) => SumPartial::Int(sum_range_i32(v, selection, start, end)),
        ColumnData::I64(v) => SumPartial::Int(sum_range_i64(v, selection, start, end)),
        ColumnData::F32(v) => SumPartial::Float(sum_range_f32(v, selection, start, end)),
        ColumnData::F64(v) => SumPartial::Float(sum_range_f64(v, selection, start, end)),
        ColumnData::Decimal { values, .. } => {
            SumPartial::Dec(sum_range_decimal(values, selection, start, end)?)
        }
        _ => unreachable!("sum validated against numeric columns"),
    })
}

macro_rules! int_extreme_range {
    ($fn_name:ident, $ty:ty) => {
        fn $fn_name(
            values: &[$ty],
            selection: &Bitmap,
            start: usize,
            end: usize,
            want_min: bool,
        ) -> Option<i64> {
            let mut extreme: Option<i64> = None;
            for_blocks(selection, start, end, |step| {
                let candidate = match step {
                    Step::Dense(base) => {
                        let vals = &values[base..base + BLOCK_BITS];
                        // per-lane extremes, combined horizontally
                        let mut acc = [vals[0]; 4];
                        for chunk in vals.chunks_exact(4) {
                            for lane in 0..4 {
                                if (want_min && chunk[lane] < acc[lane])
                                    || (!want_min && chunk[lane] > acc[lane])
                                {
                                    acc[lane] = chunk[lane];
                                }
                            }
                        }
                        let folded = if want_min {
                            acc.iter().copied().min().unwrap()
                        } else {
                            acc.iter().copied().max().unwrap()
                        };
                        folded as i64
                    }
                    Step::Row(row) => values[row] as i64,
                };
                extreme = Some(match extreme {
                    None => candidate,
                    Some(cur) => {
                        if (want_min && candidate < cur) || (!want_min && candidate > cur) {
                            candidate
                        } else {
                            cur
                        }
                    }
                });
            });
            extreme
        }
    };
}

int_extreme_range!(extreme_range_i8, i8);
int_extreme_range!(extreme_range_i16, i16);
int_extreme_range!(extreme_range_i32, i32);
int_extreme_range!(extreme_range_i64, i64);

macro_rules! float_extreme_range {
    ($fn_name:ident, $ty:ty) => {
        // NaN is never a candidate extreme: comparisons against NaN are
        // false, so letting one seed the accumulator would wedge it there
        // for good. An all-NaN range falls back to its first NaN so the
        // caller can distinguish "only NaNs" from "no rows".
        fn $fn_name(
            values: &[$ty],
            selection: &Bitmap,
            start: usize,
            end: usize,
            want_min: bool,
        ) -> Option<f64> {
            let mut extreme: Option<f64> = None;
            let mut nan_fallback: Option<f64> = None;
            let mut consider =
                |v: f64, extreme: &mut Option<f64>, fallback: &mut Option<f64>| {
                    if v.is_nan() {
                        if fallback.is_none() {
                            *fallback = Some(v);
                        }
                        return;
                    }
                    match *extreme {
                        None => *extreme = Some(v),
                        Some(cur) => {
                            if (want_min && v < cur) || (!want_min && v > cur) {
                                *extreme = Some(v)
                            }
                        }
                    }
                };
            for_blocks(selection, start, end, |step| match step {
                Step::Dense(base) => {
                    for value in &values[base..base + BLOCK_BITS] {
                        consider(*value as f64, &mut extreme, &mut nan_fallback);
                    }
                }
                Step::Row(row) => consider(values[row] as f64, &mut extreme, &mut nan_fallback),
            });
            extreme.or(nan_fallback)
        }
    };
}

float_extreme_range!(extreme_range_f32, f32);
float_extreme_range!(extreme_range_f64, f64);

fn extreme_range_decimal(
    values: &[Decimal],
    selection: &Bitmap,
    start: usize,
    end: usize,
    want_min: bool,
) -> Option<Decimal> {
    let mut extreme: Option<Decimal> = None;
    let mut consider = |v: Decimal, extreme: &mut Option<Decimal>| match *extreme {
        None => *extreme = Some(v),
        Some(cur) => {
            if (want_min && v < cur) || (!want_min && v > cur) {
                *extreme = Some(v)
            }
        }
    };
    for_blocks(selection, start, end, |step| match step {
        Step::Dense(base) => {
            for value in &values[base..base + BLOCK_BITS] {
                consider(*value, &mut extreme);
            }
        }
        Step::Row(row) => consider(values[row], &mut extreme),
    });
    extreme
}

/// Min or max of the selected rows of `[start, end)`.
pub(crate) fn extreme_range(
    data: &ColumnData,
    selection: &Bitmap,
    start: usize,
    end: usize,
    want_min: bool,
) -> ExtremePartial {
    match data {
        ColumnData::I8(v) => extreme_range_i8(v, selection, start, end, want_min).map(MinMax::Int),
        ColumnData::I16(v) => {
            extreme_range_i16(v, selection, start, end, want_min).map(MinMax::Int)
        }
        ColumnData::I32(v) => {
            extreme_range_i32(v, selection, start, end, want_min).map(MinMax::Int)
        }
        ColumnData::I64(v) => {
            extreme_range_i64(v, selection, start, end, want_min).map(MinMax::Int)
        }
        ColumnData::F32(v) => {
            extreme_range_f32(v, selection, start, end, want_min).map(MinMax::Float)
        }
        ColumnData::F64(v) => {
            extreme_range_f64(v, selection, start, end, want_min).map(MinMax::Float)
        }
        ColumnData::Decimal { values, .. } => {
            extreme_range_decimal(values, selection, start, end, want_min).map(MinMax::Dec)
        }
        _ => unreachable!("min/max validated against numeric columns"),
    }
}

impl MinMax {
    pub(crate) fn combine(self, other: Self, want_min: bool) -> Self {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => {
                Self::Int(if want_min { a.min(b) } else { a.max(b) })
            }
            // a NaN partial only means its chunk held nothing but NaNs; a
            // real extreme from any other chunk wins
            (Self::Float(a), Self::Float(b)) => Self::Float(if a.is_nan() {
                b
            } else if b.is_nan() {
                a
            } else if want_min {
                if b < a {
                    b
                } else {
                    a
                }
            } else if b > a {
                b
            } else {
                a
            }),
            (Self::Dec(a), Self::Dec(b)) => {
                Self::Dec(if want_min { a.min(b) } else { a.max(b) })
            }
            _ => unreachable!("partials of one column share a domain"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bitmap_from(bits: &[bool]) -> Bitmap {
        let mut bitmap = Bitmap::all_clear(bits.len());
        for (i, &b) in bits.iter().enumerate() {
            if b {
                bitmap.set(i);
            }
        }
        bitmap
    }

    #[test]
    fn dense_and_sparse_blocks_sum_alike() {
        // 130 rows: one full block, one partial-by-selection, one tail
        let values = (0..130i64).collect::<Vec<_>>();
        let mut bits = vec![true; 130];
        bits[70] = false; // second block goes sparse
        let selection = bitmap_from(&bits);

        let data = ColumnData::I64(values.clone());
        let total = match sum_range(&data, &selection, 0, 130).unwrap() {
            SumPartial::Int(v) => v,
            _ => unreachable!(),
        };
        let expected: i128 = (0..130).filter(|&v| v != 70).map(|v| v as i128).sum();
        assert_eq!(total, expected);
    }

    #[test]
    fn range_bounds_are_respected() {
        let values = (0..256i64).collect::<Vec<_>>();
        let selection = Bitmap::all_set(256);
        let data = ColumnData::I64(values);

        // block-aligned subrange [64, 192)
        let total = match sum_range(&data, &selection, 64, 192).unwrap() {
            SumPartial::Int(v) => v,
            _ => unreachable!(),
        };
        assert_eq!(total, (64..192).sum::<i64>() as i128);

        // non-aligned end
        let total = match sum_range(&data, &selection, 64, 100).unwrap() {
            SumPartial::Int(v) => v,
            _ => unreachable!(),
        };
        assert_eq!(total, (64..100).sum::<i64>() as i128);
    }

    #[test]
    fn extremes_over_blocks() {
        let mut values = vec![50i32; 200];
        values[3] = -7;
        values[130] = 99;
        let selection = Bitmap::all_set(200);
        let data = ColumnData::I32(values);

        assert!(matches!(
            extreme_range(&data, &selection, 0, 200, true),
            Some(MinMax::Int(-7))
        ));
        assert!(matches!(
            extreme_range(&data, &selection, 0, 200, false),
            Some(MinMax::Int(99))
        ));
        // empty selection has no extreme
        let empty = Bitmap::all_clear(200);
        assert!(extreme_range(&data, &empty, 0, 200, true).is_none());
    }

    #[test]
    fn partial_combination() {
        let a = SumPartial::Int(10);
        let b = SumPartial::Int(-3);
        assert!(matches!(a.combine(b).unwrap(), SumPartial::Int(7)));

        let m = MinMax::Int(4).combine(MinMax::Int(9), true);
        assert!(matches!(m, MinMax::Int(4)));
        let m = MinMax::Int(4).combine(MinMax::Int(9), false);
        assert!(matches!(m, MinMax::Int(9)));
    }

    #[test]
    fn nan_first_does_not_wedge_float_extremes() {
        let values = vec![f64::NAN, 3.0, 1.0, f64::NAN, 7.0];
        let selection = Bitmap::all_set(5);
        let data = ColumnData::F64(values);

        assert!(matches!(
            extreme_range(&data, &selection, 0, 5, true),
            Some(MinMax::Float(v)) if v == 1.0
        ));
        assert!(matches!(
            extreme_range(&data, &selection, 0, 5, false),
            Some(MinMax::Float(v)) if v == 7.0
        ));

        // only NaNs: the fallback NaN survives, distinguishing the range
        // from an empty one
        let data = ColumnData::F64(vec![f64::NAN; 3]);
        let selection = Bitmap::all_set(3);
        assert!(matches!(
            extreme_range(&data, &selection, 0, 3, true),
            Some(MinMax::Float(v)) if v.is_nan()
        ));
    }

    #[test]
    fn nan_partials_lose_to_real_extremes() {
        let m = MinMax::Float(f64::NAN).combine(MinMax::Float(2.0), true);
        assert!(matches!(m, MinMax::Float(v) if v == 2.0));
        let m = MinMax::Float(2.0).combine(MinMax::Float(f64::NAN), false);
        assert!(matches!(m, MinMax::Float(v) if v == 2.0));
        let m = MinMax::Float(f64::NAN).combine(MinMax::Float(f64::NAN), true);
        assert!(matches!(m, MinMax::Float(v) if v.is_nan()));
    }
}
