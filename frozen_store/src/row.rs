//! Row-wise access for result materialization.
//!
//! The engine is columnar end to end; a [`RowView`] is only handed out for
//! rows that survive a materializing terminal, so the row-builder callback
//! can reconstruct caller records.

use rust_decimal::Decimal;
use schema::LogicalType;

use crate::column::ColumnData;
use crate::value::Scalar;
use crate::{FrozenStore, Result, TypeMismatchSnafu};

/// Borrowed accessor for one logical row of a store.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    store: &'a FrozenStore,
    row: usize,
}

macro_rules! typed_getter {
    ($fn_name:ident, $ty:ty, $variant:ident, $logical:expr) => {
        pub fn $fn_name(&self, column: &str) -> Result<Option<$ty>> {
            let (_, col) = self.store.column_by_name(column)?;
            match col.data() {
                ColumnData::$variant(values) => {
                    Ok((!col.is_null(self.row)).then(|| values[self.row]))
                }
                _ => TypeMismatchSnafu {
                    column,
                    expected: $logical.to_string(),
                    actual: col.logical_type().to_string(),
                }
                .fail(),
            }
        }
    };
}

impl<'a> RowView<'a> {
    pub(crate) fn new(store: &'a FrozenStore, row: usize) -> Self {
        Self { store, row }
    }

    /// The logical row index within the store.
    pub fn row(&self) -> usize {
        self.row
    }

    pub fn store(&self) -> &'a FrozenStore {
        self.store
    }

    /// The value of the named column as an owned [`Scalar`].
    pub fn scalar(&self, column: &str) -> Result<Scalar> {
        let (_, col) = self.store.column_by_name(column)?;
        Ok(col.scalar_at(self.row))
    }

    /// The value of the column at ordinal `idx` as an owned [`Scalar`].
    pub fn scalar_at(&self, idx: usize) -> Scalar {
        self.store.column(idx).scalar_at(self.row)
    }

    typed_getter!(i8, i8, I8, LogicalType::Int8);
    typed_getter!(i16, i16, I16, LogicalType::Int16);
    typed_getter!(i32, i32, I32, LogicalType::Int32);
    typed_getter!(i64, i64, I64, LogicalType::Int64);
    typed_getter!(f32, f32, F32, LogicalType::Float32);
    typed_getter!(f64, f64, F64, LogicalType::Float64);
    typed_getter!(bool, bool, Bool, LogicalType::Bool);
    typed_getter!(date, i32, Date, LogicalType::Date);

    pub fn decimal(&self, column: &str) -> Result<Option<Decimal>> {
        let (_, col) = self.store.column_by_name(column)?;
        match col.data() {
            ColumnData::Decimal { values, .. } => {
                Ok((!col.is_null(self.row)).then(|| values[self.row]))
            }
            _ => TypeMismatchSnafu {
                column,
                expected: "decimal",
                actual: col.logical_type().to_string(),
            }
            .fail(),
        }
    }

    pub fn timestamp(&self, column: &str) -> Result<Option<i64>> {
        let (_, col) = self.store.column_by_name(column)?;
        match col.data() {
            ColumnData::Timestamp { values, .. } => {
                Ok((!col.is_null(self.row)).then(|| values[self.row]))
            }
            _ => TypeMismatchSnafu {
                column,
                expected: "timestamp",
                actual: col.logical_type().to_string(),
            }
            .fail(),
        }
    }

    /// String access; works for both direct and dictionary-encoded columns.
    pub fn str(&self, column: &str) -> Result<Option<&'a str>> {
        let (idx, col) = self.store.column_by_name(column)?;
        if !col.logical_type().is_string() {
            return TypeMismatchSnafu {
                column,
                expected: LogicalType::Utf8.to_string(),
                actual: col.logical_type().to_string(),
            }
            .fail();
        }
        let col = self.store.column(idx);
        Ok((!col.is_null(self.row)).then(|| col.str_at(self.row)))
    }
}
