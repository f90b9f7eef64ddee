//! Arrow interop: ingest a `RecordBatch` into a store and materialize
//! result rows back out as a `RecordBatch`.
//!
//! Ingest covers the store's own type set; anything else is rejected with
//! `UnsupportedArrowType` rather than silently coerced. Dictionary columns
//! are re-encoded on ingest so code assignment is canonical, and decoded to
//! plain strings on egress.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Decimal128Array, DictionaryArray, Float32Array,
    Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, StringArray,
    TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray,
};
use arrow::datatypes::{
    DataType, Field as ArrowField, Int32Type, Schema as ArrowSchema, TimeUnit as ArrowTimeUnit,
};
use arrow::record_batch::RecordBatch;
use rust_decimal::Decimal;
use schema::{LogicalType, TimeUnit};
use snafu::ResultExt;

use crate::value::Scalar;
use crate::{
    ArrowSnafu, Column, DecimalOutOfRangeSnafu, FrozenStore, Result, StoreBuilder,
    UnsupportedArrowTypeSnafu,
};

impl FrozenStore {
    /// Ingest every column of an Arrow record batch and freeze the result.
    pub fn try_from_record_batch(batch: &RecordBatch) -> Result<Self> {
        let schema = batch.schema();
        let mut builder = StoreBuilder::new();
        for (field, array) in schema.fields().iter().zip(batch.columns()) {
            builder = builder.column(field.name(), ingest_column(field.name(), array)?);
        }
        builder.freeze()
    }
}

macro_rules! collect_opts {
    ($arr:expr) => {{
        let arr = $arr;
        (0..arr.len())
            .map(|i| (!arr.is_null(i)).then(|| arr.value(i)))
            .collect::<Vec<_>>()
    }};
}

fn ingest_column(name: &str, array: &ArrayRef) -> Result<Column> {
    let unsupported = || {
        UnsupportedArrowTypeSnafu {
            column: name,
            datatype: array.data_type().to_string(),
        }
        .build()
    };

    let column = match array.data_type() {
        DataType::Int8 => {
            let arr = array.as_any().downcast_ref::<Int8Array>().unwrap();
            Column::from_i8_opts(collect_opts!(arr))
        }
        DataType::Int16 => {
            let arr = array.as_any().downcast_ref::<Int16Array>().unwrap();
            Column::from_i16_opts(collect_opts!(arr))
        }
        DataType::Int32 => {
            let arr = array.as_any().downcast_ref::<Int32Array>().unwrap();
            Column::from_i32_opts(collect_opts!(arr))
        }
        DataType::Int64 => {
            let arr = array.as_any().downcast_ref::<Int64Array>().unwrap();
            Column::from_i64_opts(collect_opts!(arr))
        }
        DataType::Float32 => {
            let arr = array.as_any().downcast_ref::<Float32Array>().unwrap();
            Column::from_f32_opts(collect_opts!(arr))
        }
        DataType::Float64 => {
            let arr = array.as_any().downcast_ref::<Float64Array>().unwrap();
            Column::from_f64_opts(collect_opts!(arr))
        }
        DataType::Boolean => {
            let arr = array.as_any().downcast_ref::<BooleanArray>().unwrap();
            Column::from_bool_opts(collect_opts!(arr))
        }
        DataType::Utf8 => {
            let arr = array.as_any().downcast_ref::<StringArray>().unwrap();
            Column::from_utf8_opts(collect_opts!(arr))
        }
        DataType::Date32 => {
            let arr = array.as_any().downcast_ref::<Date32Array>().unwrap();
            Column::from_date_opts(collect_opts!(arr))
        }
        DataType::Timestamp(unit, _) => {
            let (unit, values) = match unit {
                ArrowTimeUnit::Second => {
                    let arr = array.as_any().downcast_ref::<TimestampSecondArray>().unwrap();
                    (TimeUnit::Second, collect_opts!(arr))
                }
                ArrowTimeUnit::Millisecond => {
                    let arr = array
                        .as_any()
                        .downcast_ref::<TimestampMillisecondArray>()
                        .unwrap();
                    (TimeUnit::Millisecond, collect_opts!(arr))
                }
                ArrowTimeUnit::Microsecond => {
                    let arr = array
                        .as_any()
                        .downcast_ref::<TimestampMicrosecondArray>()
                        .unwrap();
                    (TimeUnit::Microsecond, collect_opts!(arr))
                }
                ArrowTimeUnit::Nanosecond => {
                    let arr = array
                        .as_any()
                        .downcast_ref::<TimestampNanosecondArray>()
                        .unwrap();
                    (TimeUnit::Nanosecond, collect_opts!(arr))
                }
            };
            Column::from_timestamp_opts(unit, values)
        }
        DataType::Decimal128(precision, scale) => {
            if *scale < 0 {
                return Err(unsupported());
            }
            let arr = array.as_any().downcast_ref::<Decimal128Array>().unwrap();
            let mut values = Vec::with_capacity(arr.len());
            for i in 0..arr.len() {
                if arr.is_null(i) {
                    values.push(None);
                } else {
                    let decimal = Decimal::try_from_i128_with_scale(arr.value(i), *scale as u32)
                        .map_err(|_| DecimalOutOfRangeSnafu { column: name }.build())?;
                    values.push(Some(decimal));
                }
            }
            Column::from_decimal_opts(*precision, *scale as u32, values)
        }
        DataType::Dictionary(key, value)
            if **key == DataType::Int32 && **value == DataType::Utf8 =>
        {
            let arr = array
                .as_any()
                .downcast_ref::<DictionaryArray<Int32Type>>()
                .unwrap();
            let dict = arr
                .values()
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap();
            let keys = arr.keys();
            let values = (0..arr.len())
                .map(|i| (!arr.is_null(i)).then(|| dict.value(keys.value(i) as usize)))
                .collect::<Vec<_>>();
            Column::from_dictionary_opts(values)
        }
        _ => return Err(unsupported()),
    };

    Ok(column)
}

/// Convert a logical type to the Arrow data type used on egress.
/// Dictionary columns egress as plain strings.
pub fn arrow_type(logical_type: LogicalType) -> DataType {
    match logical_type {
        LogicalType::Int8 => DataType::Int8,
        LogicalType::Int16 => DataType::Int16,
        LogicalType::Int32 => DataType::Int32,
        LogicalType::Int64 => DataType::Int64,
        LogicalType::Float32 => DataType::Float32,
        LogicalType::Float64 => DataType::Float64,
        LogicalType::Decimal { precision, scale } => {
            DataType::Decimal128(precision, scale as i8)
        }
        LogicalType::Bool => DataType::Boolean,
        LogicalType::Utf8 | LogicalType::Dictionary => DataType::Utf8,
        LogicalType::Date => DataType::Date32,
        LogicalType::Timestamp(unit) => DataType::Timestamp(arrow_time_unit(unit), None),
    }
}

fn arrow_time_unit(unit: TimeUnit) -> ArrowTimeUnit {
    match unit {
        TimeUnit::Second => ArrowTimeUnit::Second,
        TimeUnit::Millisecond => ArrowTimeUnit::Millisecond,
        TimeUnit::Microsecond => ArrowTimeUnit::Microsecond,
        TimeUnit::Nanosecond => ArrowTimeUnit::Nanosecond,
    }
}

/// Materialize row-major scalars into a `RecordBatch` with the given
/// `(name, logical type)` fields.
pub fn rows_to_record_batch(
    fields: &[(String, LogicalType)],
    rows: &[Vec<Scalar>],
) -> Result<RecordBatch> {
    let arrow_fields = fields
        .iter()
        .map(|(name, lt)| ArrowField::new(name, arrow_type(*lt), true))
        .collect::<Vec<_>>();

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for (idx, (_, lt)) in fields.iter().enumerate() {
        arrays.push(egress_column(*lt, rows, idx)?);
    }

    RecordBatch::try_new(Arc::new(ArrowSchema::new(arrow_fields)), arrays).context(ArrowSnafu)
}

fn egress_column(lt: LogicalType, rows: &[Vec<Scalar>], idx: usize) -> Result<ArrayRef> {
    fn cell(row: &Vec<Scalar>, idx: usize) -> &Scalar {
        &row[idx]
    }
    

    let array: ArrayRef = match lt {
        LogicalType::Int8 => Arc::new(
            rows.iter()
                .map(|r| match cell(r, idx) {
                    Scalar::I8(v) => Some(*v),
                    _ => None,
                })
                .collect::<Int8Array>(),
        ),
        LogicalType::Int16 => Arc::new(
            rows.iter()
                .map(|r| match cell(r, idx) {
                    Scalar::I16(v) => Some(*v),
                    _ => None,
                })
                .collect::<Int16Array>(),
        ),
        LogicalType::Int32 => Arc::new(
            rows.iter()
                .map(|r| match cell(r, idx) {
                    Scalar::I32(v) => Some(*v),
                    _ => None,
                })
                .collect::<Int32Array>(),
        ),
        LogicalType::Int64 => Arc::new(
            rows.iter()
                .map(|r| cell(r, idx).as_i64())
                .collect::<Int64Array>(),
        ),
        LogicalType::Float32 => Arc::new(
            rows.iter()
                .map(|r| match cell(r, idx) {
                    Scalar::F32(v) => Some(*v),
                    _ => None,
                })
                .collect::<Float32Array>(),
        ),
        LogicalType::Float64 => Arc::new(
            rows.iter()
                .map(|r| cell(r, idx).as_f64())
                .collect::<Float64Array>(),
        ),
        LogicalType::Decimal { precision, scale } => {
            let values = rows
                .iter()
                .map(|r| {
                    cell(r, idx).as_decimal().map(|mut d| {
                        d.rescale(scale);
                        d.mantissa()
                    })
                })
                .collect::<Decimal128Array>();
            Arc::new(
                values
                    .with_precision_and_scale(precision, scale as i8)
                    .context(ArrowSnafu)?,
            )
        }
        LogicalType::Bool => Arc::new(
            rows.iter()
                .map(|r| cell(r, idx).as_bool())
                .collect::<BooleanArray>(),
        ),
        LogicalType::Utf8 | LogicalType::Dictionary => Arc::new(
            rows.iter()
                .map(|r| match cell(r, idx) {
                    Scalar::Str(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect::<StringArray>(),
        ),
        LogicalType::Date => Arc::new(
            rows.iter()
                .map(|r| match cell(r, idx) {
                    Scalar::Date(v) => Some(*v),
                    _ => None,
                })
                .collect::<Date32Array>(),
        ),
        LogicalType::Timestamp(unit) => {
            let values = rows.iter().map(|r| match cell(r, idx) {
                Scalar::Timestamp { value, .. } => Some(*value),
                _ => None,
            });
            match unit {
                TimeUnit::Second => Arc::new(values.collect::<TimestampSecondArray>()),
                TimeUnit::Millisecond => Arc::new(values.collect::<TimestampMillisecondArray>()),
                TimeUnit::Microsecond => Arc::new(values.collect::<TimestampMicrosecondArray>()),
                TimeUnit::Nanosecond => Arc::new(values.collect::<TimestampNanosecondArray>()),
            }
        }
    };

    Ok(array)
}
