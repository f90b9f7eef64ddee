//! Owned dynamic values.
//!
//! [`Scalar`] is the exchange currency for anything that leaves the typed
//! column storage: statistics and zone-map bounds, result rows, group keys
//! and sort comparisons. Hot loops never touch it; they operate on the
//! concrete slices behind [`crate::ColumnData`] instead.

use std::cmp::Ordering;
use std::fmt::Display;

use rust_decimal::Decimal;
use schema::TimeUnit;

/// A single dynamically-typed value, possibly null.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Bool(bool),
    Str(String),
    /// Days since the Unix epoch.
    Date(i32),
    /// Elapsed units since the Unix epoch.
    Timestamp { value: i64, unit: TimeUnit },
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The value as an `i64` where the type permits a lossless widening.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I8(v) => Some(*v as i64),
            Self::I16(v) => Some(*v as i64),
            Self::I32(v) => Some(*v as i64),
            Self::I64(v) => Some(*v),
            Self::Date(v) => Some(*v as i64),
            Self::Timestamp { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// The value as an `f64` for numeric types.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F32(v) => Some(*v as f64),
            Self::F64(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Total order with nulls sorted last; used by ORDER BY (ascending) and
    /// flipped by the descending comparator, so nulls come first descending.
    ///
    /// Values of different types do not occur in one column; comparing them
    /// falls back to a stable but meaningless type-rank order.
    pub fn cmp_nulls_last(&self, other: &Self) -> Ordering {
        use Scalar::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Greater,
            (_, Null) => Ordering::Less,
            (I8(a), I8(b)) => a.cmp(b),
            (I16(a), I16(b)) => a.cmp(b),
            (I32(a), I32(b)) => a.cmp(b),
            (I64(a), I64(b)) => a.cmp(b),
            (F32(a), F32(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (F64(a), F64(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Timestamp { value: a, unit: ua }, Timestamp { value: b, unit: ub }) => {
                if ua == ub {
                    a.cmp(b)
                } else {
                    // normalise to the finer unit before comparing
                    let unit = finer_unit(*ua, *ub);
                    unit.convert(*a, *ua).cmp(&unit.convert(*b, *ub))
                }
            }
            (a, b) => type_rank(a).cmp(&type_rank(b)),
        }
    }

    /// Track a running minimum, ignoring nulls.
    pub fn update_min(&mut self, other: &Self) {
        if other.is_null() {
            return;
        }
        if self.is_null() || other.cmp_nulls_last(self) == Ordering::Less {
            *self = other.clone();
        }
    }

    /// Track a running maximum, ignoring nulls.
    pub fn update_max(&mut self, other: &Self) {
        if other.is_null() {
            return;
        }
        if self.is_null() || other.cmp_nulls_last(self) == Ordering::Greater {
            *self = other.clone();
        }
    }
}

fn finer_unit(a: TimeUnit, b: TimeUnit) -> TimeUnit {
    if a.per_second() >= b.per_second() {
        a
    } else {
        b
    }
}

fn type_rank(scalar: &Scalar) -> u8 {
    match scalar {
        Scalar::Null => 0,
        Scalar::I8(_) => 1,
        Scalar::I16(_) => 2,
        Scalar::I32(_) => 3,
        Scalar::I64(_) => 4,
        Scalar::F32(_) => 5,
        Scalar::F64(_) => 6,
        Scalar::Decimal(_) => 7,
        Scalar::Bool(_) => 8,
        Scalar::Str(_) => 9,
        Scalar::Date(_) => 10,
        Scalar::Timestamp { .. } => 11,
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::I8(v) => write!(f, "{}", v),
            Self::I16(v) => write!(f, "{}", v),
            Self::I32(v) => write!(f, "{}", v),
            Self::I64(v) => write!(f, "{}", v),
            Self::F32(v) => write!(f, "{}", v),
            Self::F64(v) => write!(f, "{}", v),
            Self::Decimal(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "{}", v),
            Self::Date(v) => write!(f, "{}d", v),
            Self::Timestamp { value, unit } => write!(f, "{}{}", value, unit),
        }
    }
}
