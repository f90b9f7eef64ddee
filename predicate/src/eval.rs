//! Typed evaluation kernels.
//!
//! Dispatch on the column's storage variant happens once per predicate; the
//! per-row closures below then run over concrete slices. The dense path
//! builds a 64-bit keep-mask per block from contiguous values (the inner
//! lane loop vectorizes); the sparse path visits only set bits via
//! trailing-zero counts.

use frozen_store::{Column, ColumnData, FrozenStore};
use observability_deps::tracing::debug;
use selection::Bitmap;
use snafu::IntoError;

use crate::cmp::Operator;
use crate::like::LikePattern;
use crate::literal::Literal;
use crate::{ColumnCmp, Result, TypeMismatchSnafu, UnknownColumnSnafu, UnsupportedLikeSnafu};

/// Selection density above which the dense per-block path is used.
const DENSE_THRESHOLD: f64 = 0.5;

/// Restrict `selection` to rows satisfying `cmp`, in place.
pub(crate) fn eval_cmp(cmp: &ColumnCmp, store: &FrozenStore, selection: &mut Bitmap) -> Result<()> {
    let (_, column) = store
        .column_by_name(&cmp.column)
        .map_err(|_| UnknownColumnSnafu { column: &cmp.column }.build())?;

    if !cmp.literal.compatible_with(column.logical_type(), cmp.op) {
        return TypeMismatchSnafu {
            column: &cmp.column,
            expected: column.logical_type().to_string(),
            actual: cmp.literal.to_string(),
        }
        .fail();
    }

    // Null rows never satisfy a comparison; drop them up front so the value
    // loops need no per-row null checks.
    if let Some(validity) = column.validity() {
        selection
            .and(validity)
            .expect("validity bitmap covers the store's rows");
    }

    let dense = selection.density() > DENSE_THRESHOLD;
    debug!(
        column = %cmp.column,
        op = %cmp.op,
        dense,
        "evaluating comparison"
    );

    match column.data() {
        ColumnData::I8(values) => int_filter(selection, dense, values, cmp.op, int_literal(cmp)),
        ColumnData::I16(values) => int_filter(selection, dense, values, cmp.op, int_literal(cmp)),
        ColumnData::I32(values) => int_filter(selection, dense, values, cmp.op, int_literal(cmp)),
        ColumnData::I64(values) => int_filter(selection, dense, values, cmp.op, int_literal(cmp)),
        ColumnData::Date(values) => int_filter(selection, dense, values, cmp.op, int_literal(cmp)),
        ColumnData::Timestamp { unit, values } => {
            let lit = cmp
                .literal
                .as_timestamp(*unit)
                .expect("validated timestamp literal");
            int_filter(selection, dense, values, cmp.op, lit)
        }
        ColumnData::F32(values) => {
            let lit = cmp.literal.as_f64().expect("validated float literal");
            float_filter(selection, dense, values, cmp.op, lit)
        }
        ColumnData::F64(values) => {
            let lit = cmp.literal.as_f64().expect("validated float literal");
            float_filter(selection, dense, values, cmp.op, lit)
        }
        ColumnData::Decimal { values, .. } => {
            let lit = cmp.literal.as_decimal().expect("validated decimal literal");
            match cmp.op {
                Operator::Equal => filter_with(selection, dense, |i| values[i] == lit),
                Operator::NotEqual => filter_with(selection, dense, |i| values[i] != lit),
                Operator::GT => filter_with(selection, dense, |i| values[i] > lit),
                Operator::GTE => filter_with(selection, dense, |i| values[i] >= lit),
                Operator::LT => filter_with(selection, dense, |i| values[i] < lit),
                Operator::LTE => filter_with(selection, dense, |i| values[i] <= lit),
                Operator::Like => unreachable!("LIKE validated against string columns"),
            }
        }
        ColumnData::Bool(values) => {
            let lit = cmp.literal.as_bool().expect("validated bool literal");
            match cmp.op {
                Operator::Equal => filter_with(selection, dense, |i| values[i] == lit),
                Operator::NotEqual => filter_with(selection, dense, |i| values[i] != lit),
                _ => unreachable!("bool comparisons validated to equality"),
            }
        }
        ColumnData::Utf8 { .. } => string_filter(selection, dense, column, cmp)?,
        ColumnData::Dictionary { keys, values } => {
            // Resolve the comparison against the (small) dictionary once,
            // then match rows on their codes.
            let code_matches = dictionary_matches(values, cmp)?;
            filter_with(selection, dense, |i| code_matches[keys[i] as usize])
        }
    }

    Ok(())
}

fn int_literal(cmp: &ColumnCmp) -> i64 {
    cmp.literal.as_i64().expect("validated integer literal")
}

fn int_filter<T: Copy + Into<i64>>(
    selection: &mut Bitmap,
    dense: bool,
    values: &[T],
    op: Operator,
    lit: i64,
) {
    match op {
        Operator::Equal => filter_with(selection, dense, |i| values[i].into() == lit),
        Operator::NotEqual => filter_with(selection, dense, |i| values[i].into() != lit),
        Operator::GT => filter_with(selection, dense, |i| values[i].into() > lit),
        Operator::GTE => filter_with(selection, dense, |i| values[i].into() >= lit),
        Operator::LT => filter_with(selection, dense, |i| values[i].into() < lit),
        Operator::LTE => filter_with(selection, dense, |i| values[i].into() <= lit),
        Operator::Like => unreachable!("LIKE validated against string columns"),
    }
}

fn float_filter<T: Copy + Into<f64>>(
    selection: &mut Bitmap,
    dense: bool,
    values: &[T],
    op: Operator,
    lit: f64,
) {
    match op {
        Operator::Equal => filter_with(selection, dense, |i| values[i].into() == lit),
        Operator::NotEqual => filter_with(selection, dense, |i| values[i].into() != lit),
        Operator::GT => filter_with(selection, dense, |i| values[i].into() > lit),
        Operator::GTE => filter_with(selection, dense, |i| values[i].into() >= lit),
        Operator::LT => filter_with(selection, dense, |i| values[i].into() < lit),
        Operator::LTE => filter_with(selection, dense, |i| values[i].into() <= lit),
        Operator::Like => unreachable!("LIKE validated against string columns"),
    }
}

fn string_filter(
    selection: &mut Bitmap,
    dense: bool,
    column: &Column,
    cmp: &ColumnCmp,
) -> Result<()> {
    let lit = cmp.literal.as_str().expect("validated string literal");
    match cmp.op {
        Operator::Equal => filter_with(selection, dense, |i| column.str_at(i) == lit),
        Operator::NotEqual => filter_with(selection, dense, |i| column.str_at(i) != lit),
        Operator::GT => filter_with(selection, dense, |i| column.str_at(i) > lit),
        Operator::GTE => filter_with(selection, dense, |i| column.str_at(i) >= lit),
        Operator::LT => filter_with(selection, dense, |i| column.str_at(i) < lit),
        Operator::LTE => filter_with(selection, dense, |i| column.str_at(i) <= lit),
        Operator::Like => {
            let pattern = LikePattern::parse(lit).context_like(&cmp.column)?;
            filter_with(selection, dense, |i| pattern.matches(column.str_at(i)))
        }
    }
    Ok(())
}

// Evaluate the comparison against every dictionary entry, yielding a
// per-code match table.
fn dictionary_matches(dictionary: &[String], cmp: &ColumnCmp) -> Result<Vec<bool>> {
    let lit = cmp.literal.as_str().expect("validated string literal");
    let table = match cmp.op {
        Operator::Equal => dictionary.iter().map(|v| v == lit).collect(),
        Operator::NotEqual => dictionary.iter().map(|v| v != lit).collect(),
        Operator::GT => dictionary.iter().map(|v| v.as_str() > lit).collect(),
        Operator::GTE => dictionary.iter().map(|v| v.as_str() >= lit).collect(),
        Operator::LT => dictionary.iter().map(|v| v.as_str() < lit).collect(),
        Operator::LTE => dictionary.iter().map(|v| v.as_str() <= lit).collect(),
        Operator::Like => {
            let pattern = LikePattern::parse(lit).context_like(&cmp.column)?;
            dictionary.iter().map(|v| pattern.matches(v)).collect()
        }
    };
    Ok(table)
}

trait LikeContext<T> {
    fn context_like(self, column: &str) -> Result<T>;
}

impl<T> LikeContext<T> for std::result::Result<T, crate::like::Error> {
    fn context_like(self, column: &str) -> Result<T> {
        self.map_err(|source| {
            UnsupportedLikeSnafu {
                column: column.to_owned(),
            }
            .into_error(source)
        })
    }
}

/// Run `keep` over the selected rows, clearing rows it rejects.
fn filter_with(selection: &mut Bitmap, dense: bool, keep: impl Fn(usize) -> bool) {
    if dense {
        dense_filter(selection, keep)
    } else {
        sparse_filter(selection, keep)
    }
}

// Build a full keep-mask per block from contiguous values; skips all-zero
// blocks. Reads value slots of still-unselected rows, which is safe: slots
// always hold an in-bounds filler.
fn dense_filter(selection: &mut Bitmap, keep: impl Fn(usize) -> bool) {
    let len = selection.len();
    for block_idx in 0..selection.blocks().len() {
        if selection.blocks()[block_idx] == 0 {
            continue;
        }
        let base = block_idx * 64;
        let lanes = (len - base).min(64);
        let mut mask = 0u64;
        for lane in 0..lanes {
            mask |= (keep(base + lane) as u64) << lane;
        }
        selection.mask_block(block_idx, mask);
    }
}

// Visit only set bits, clearing the ones the closure rejects.
fn sparse_filter(selection: &mut Bitmap, keep: impl Fn(usize) -> bool) {
    for block_idx in 0..selection.blocks().len() {
        let mut remaining = selection.blocks()[block_idx];
        if remaining == 0 {
            continue;
        }
        let base = block_idx * 64;
        let mut mask = remaining;
        while remaining != 0 {
            let lane = remaining.trailing_zeros() as usize;
            if !keep(base + lane) {
                mask &= !(1u64 << lane);
            }
            remaining &= remaining - 1;
        }
        selection.mask_block(block_idx, mask);
    }
}
