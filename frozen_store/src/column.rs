//! Typed column storage.
//!
//! A [`Column`] couples a [`ColumnData`] buffer with an optional validity
//! bitmap (bit set = value present) and a cached null count. Value slots and
//! validity bits correspond one to one; reading the value slot of a null row
//! yields the type's filler value and is only meaningful after a validity
//! check. Evaluation kernels match once on the [`ColumnData`] variant and
//! then run over the concrete slice.

use rust_decimal::Decimal;
use schema::{LogicalType, TimeUnit};
use selection::Bitmap;

use crate::value::Scalar;

/// The physical storage of one column.
#[derive(Debug, Clone)]
pub enum ColumnData {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Decimal {
        precision: u8,
        scale: u32,
        values: Vec<Decimal>,
    },
    Bool(Vec<bool>),
    /// Arrow-style string storage: `offsets.len() == rows + 1`, the bytes of
    /// row `i` are `bytes[offsets[i]..offsets[i + 1]]`.
    Utf8 {
        offsets: Vec<u32>,
        bytes: Vec<u8>,
    },
    /// Days since the Unix epoch.
    Date(Vec<i32>),
    Timestamp {
        unit: TimeUnit,
        values: Vec<i64>,
    },
    /// Low-cardinality strings: each row holds a code into `values`. Null
    /// rows carry code 0 as filler.
    Dictionary {
        keys: Vec<i32>,
        values: Vec<String>,
    },
}

impl ColumnData {
    /// Number of rows stored.
    pub fn len(&self) -> usize {
        match self {
            Self::I8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::Decimal { values, .. } => values.len(),
            Self::Bool(v) => v.len(),
            Self::Utf8 { offsets, .. } => offsets.len().saturating_sub(1),
            Self::Date(v) => v.len(),
            Self::Timestamp { values, .. } => values.len(),
            Self::Dictionary { keys, .. } => keys.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The logical type this storage realises.
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Self::I8(_) => LogicalType::Int8,
            Self::I16(_) => LogicalType::Int16,
            Self::I32(_) => LogicalType::Int32,
            Self::I64(_) => LogicalType::Int64,
            Self::F32(_) => LogicalType::Float32,
            Self::F64(_) => LogicalType::Float64,
            Self::Decimal {
                precision, scale, ..
            } => LogicalType::Decimal {
                precision: *precision,
                scale: *scale,
            },
            Self::Bool(_) => LogicalType::Bool,
            Self::Utf8 { .. } => LogicalType::Utf8,
            Self::Date(_) => LogicalType::Date,
            Self::Timestamp { unit, .. } => LogicalType::Timestamp(*unit),
            Self::Dictionary { .. } => LogicalType::Dictionary,
        }
    }
}

/// One frozen column: storage plus null tracking.
#[derive(Debug, Clone)]
pub struct Column {
    data: ColumnData,
    // None = no nulls anywhere in the column.
    validity: Option<Bitmap>,
    null_count: usize,
}

impl Column {
    /// Assemble a column from raw parts. The store builder validates row
    /// counts and bounds at freeze time.
    pub fn from_raw(data: ColumnData, validity: Option<Bitmap>, null_count: usize) -> Self {
        Self {
            data,
            validity,
            null_count,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn logical_type(&self) -> LogicalType {
        self.data.logical_type()
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    /// The validity bitmap, or `None` when the column holds no nulls.
    pub fn validity(&self) -> Option<&Bitmap> {
        self.validity.as_ref()
    }

    pub fn null_count(&self) -> usize {
        self.null_count
    }

    pub fn is_null(&self, row: usize) -> bool {
        match &self.validity {
            Some(validity) => !validity.get(row),
            None => false,
        }
    }

    /// The string at `row` for Utf8 storage. Panics on other storages; the
    /// caller dispatches on [`Self::logical_type`] first.
    pub fn str_at(&self, row: usize) -> &str {
        match &self.data {
            ColumnData::Utf8 { offsets, bytes } => {
                let (lo, hi) = (offsets[row] as usize, offsets[row + 1] as usize);
                // Offsets are validated at freeze time and bytes come from
                // &str inputs, so the slice is valid UTF-8.
                std::str::from_utf8(&bytes[lo..hi]).expect("frozen Utf8 column holds valid UTF-8")
            }
            ColumnData::Dictionary { keys, values } => &values[keys[row] as usize],
            _ => panic!("str_at on non-string column"),
        }
    }

    /// The dictionary of a dictionary-encoded column.
    pub fn dictionary(&self) -> Option<&[String]> {
        match &self.data {
            ColumnData::Dictionary { values, .. } => Some(values),
            _ => None,
        }
    }

    /// The value at `row` as an owned [`Scalar`].
    pub fn scalar_at(&self, row: usize) -> Scalar {
        if self.is_null(row) {
            return Scalar::Null;
        }

        match &self.data {
            ColumnData::I8(v) => Scalar::I8(v[row]),
            ColumnData::I16(v) => Scalar::I16(v[row]),
            ColumnData::I32(v) => Scalar::I32(v[row]),
            ColumnData::I64(v) => Scalar::I64(v[row]),
            ColumnData::F32(v) => Scalar::F32(v[row]),
            ColumnData::F64(v) => Scalar::F64(v[row]),
            ColumnData::Decimal { values, .. } => Scalar::Decimal(values[row]),
            ColumnData::Bool(v) => Scalar::Bool(v[row]),
            ColumnData::Utf8 { .. } => Scalar::Str(self.str_at(row).to_owned()),
            ColumnData::Date(v) => Scalar::Date(v[row]),
            ColumnData::Timestamp { unit, values } => Scalar::Timestamp {
                value: values[row],
                unit: *unit,
            },
            ColumnData::Dictionary { keys, values } => {
                Scalar::Str(values[keys[row] as usize].clone())
            }
        }
    }

    /// Approximate heap footprint in bytes.
    pub fn size(&self) -> usize {
        let data = match &self.data {
            ColumnData::I8(v) => v.len(),
            ColumnData::I16(v) => v.len() * 2,
            ColumnData::I32(v) => v.len() * 4,
            ColumnData::I64(v) => v.len() * 8,
            ColumnData::F32(v) => v.len() * 4,
            ColumnData::F64(v) => v.len() * 8,
            ColumnData::Decimal { values, .. } => values.len() * std::mem::size_of::<Decimal>(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Utf8 { offsets, bytes } => offsets.len() * 4 + bytes.len(),
            ColumnData::Date(v) => v.len() * 4,
            ColumnData::Timestamp { values, .. } => values.len() * 8,
            ColumnData::Dictionary { keys, values } => {
                keys.len() * 4 + values.iter().map(|s| s.len()).sum::<usize>()
            }
        };
        let validity = self
            .validity
            .as_ref()
            .map(|v| v.blocks().len() * 8)
            .unwrap_or(0);
        data + validity
    }
}

// Constructors from optional-value vectors; the filler for null slots is the
// type default so value buffers stay dense.
macro_rules! option_vec_ctor {
    ($fn_name:ident, $ty:ty, $variant:ident) => {
        /// Build a column from per-row optional values.
        pub fn $fn_name(values: Vec<Option<$ty>>) -> Column {
            let (data, validity, null_count) = split_nulls(values);
            Column::from_raw(ColumnData::$variant(data), validity, null_count)
        }
    };
}

impl Column {
    option_vec_ctor!(from_i8_opts, i8, I8);
    option_vec_ctor!(from_i16_opts, i16, I16);
    option_vec_ctor!(from_i32_opts, i32, I32);
    option_vec_ctor!(from_i64_opts, i64, I64);
    option_vec_ctor!(from_f32_opts, f32, F32);
    option_vec_ctor!(from_f64_opts, f64, F64);
    option_vec_ctor!(from_bool_opts, bool, Bool);
    option_vec_ctor!(from_date_opts, i32, Date);

    /// Build a decimal column from per-row optional values.
    pub fn from_decimal_opts(
        precision: u8,
        scale: u32,
        values: Vec<Option<Decimal>>,
    ) -> Self {
        let (values, validity, null_count) = split_nulls(values);
        Self::from_raw(
            ColumnData::Decimal {
                precision,
                scale,
                values,
            },
            validity,
            null_count,
        )
    }

    /// Build a timestamp column from per-row optional values in `unit`.
    pub fn from_timestamp_opts(unit: TimeUnit, values: Vec<Option<i64>>) -> Self {
        let (values, validity, null_count) = split_nulls(values);
        Self::from_raw(ColumnData::Timestamp { unit, values }, validity, null_count)
    }

    /// Build a directly-stored string column.
    pub fn from_utf8_opts(values: Vec<Option<&str>>) -> Self {
        let rows = values.len();
        let mut offsets = Vec::with_capacity(rows + 1);
        let mut bytes = Vec::new();
        let mut validity = Bitmap::all_set(rows);
        let mut null_count = 0;

        offsets.push(0u32);
        for (i, value) in values.iter().enumerate() {
            match value {
                Some(s) => bytes.extend_from_slice(s.as_bytes()),
                None => {
                    validity.clear(i);
                    null_count += 1;
                }
            }
            offsets.push(bytes.len() as u32);
        }

        let validity = (null_count > 0).then_some(validity);
        Self::from_raw(ColumnData::Utf8 { offsets, bytes }, validity, null_count)
    }

    /// Build a dictionary-encoded string column. Distinct values are
    /// assigned codes in first-appearance order.
    pub fn from_dictionary_opts(values: Vec<Option<&str>>) -> Self {
        let rows = values.len();
        let mut dict: Vec<String> = Vec::new();
        let mut lookup: hashbrown::HashMap<String, i32> = hashbrown::HashMap::new();
        let mut keys = Vec::with_capacity(rows);
        let mut validity = Bitmap::all_set(rows);
        let mut null_count = 0;

        for (i, value) in values.iter().enumerate() {
            match value {
                Some(s) => {
                    let code = *lookup.entry_ref(*s).or_insert_with(|| {
                        dict.push((*s).to_owned());
                        (dict.len() - 1) as i32
                    });
                    keys.push(code);
                }
                None => {
                    keys.push(0);
                    validity.clear(i);
                    null_count += 1;
                }
            }
        }

        let validity = (null_count > 0).then_some(validity);
        Self::from_raw(
            ColumnData::Dictionary { keys, values: dict },
            validity,
            null_count,
        )
    }
}

fn split_nulls<T: Default + Copy>(values: Vec<Option<T>>) -> (Vec<T>, Option<Bitmap>, usize) {
    let rows = values.len();
    let mut data = Vec::with_capacity(rows);
    let mut validity = Bitmap::all_set(rows);
    let mut null_count = 0;

    for (i, value) in values.into_iter().enumerate() {
        match value {
            Some(v) => data.push(v),
            None => {
                data.push(T::default());
                validity.clear(i);
                null_count += 1;
            }
        }
    }

    (data, (null_count > 0).then_some(validity), null_count)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn primitive_column() {
        let col = Column::from_i32_opts(vec![Some(1), None, Some(3)]);
        assert_eq!(col.len(), 3);
        assert_eq!(col.null_count(), 1);
        assert!(col.is_null(1));
        assert!(!col.is_null(0));
        assert_eq!(col.scalar_at(0), Scalar::I32(1));
        assert_eq!(col.scalar_at(1), Scalar::Null);
        assert_eq!(col.logical_type(), LogicalType::Int32);
    }

    #[test]
    fn no_null_column_has_no_validity() {
        let col = Column::from_i64_opts(vec![Some(1), Some(2)]);
        assert!(col.validity().is_none());
        assert_eq!(col.null_count(), 0);
    }

    #[test]
    fn utf8_column() {
        let col = Column::from_utf8_opts(vec![Some("alpha"), None, Some(""), Some("z")]);
        assert_eq!(col.len(), 4);
        assert_eq!(col.str_at(0), "alpha");
        assert_eq!(col.str_at(2), "");
        assert_eq!(col.str_at(3), "z");
        assert!(col.is_null(1));
        assert_eq!(col.scalar_at(3), Scalar::Str("z".to_owned()));
    }

    #[test]
    fn dictionary_column() {
        let col =
            Column::from_dictionary_opts(vec![Some("eng"), Some("ops"), Some("eng"), None]);
        assert_eq!(col.dictionary().unwrap(), &["eng".to_owned(), "ops".to_owned()]);
        match col.data() {
            ColumnData::Dictionary { keys, .. } => assert_eq!(keys, &vec![0, 1, 0, 0]),
            _ => unreachable!(),
        }
        assert_eq!(col.str_at(2), "eng");
        assert!(col.is_null(3));
        assert_eq!(col.scalar_at(3), Scalar::Null);
    }

    #[test]
    fn timestamp_column() {
        let col = Column::from_timestamp_opts(TimeUnit::Millisecond, vec![Some(10), None]);
        assert_eq!(col.logical_type(), LogicalType::Timestamp(TimeUnit::Millisecond));
        assert_eq!(
            col.scalar_at(0),
            Scalar::Timestamp {
                value: 10,
                unit: TimeUnit::Millisecond
            }
        );
    }
}
