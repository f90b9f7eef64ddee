//! Comparison literals and their compatibility with column types.

use std::fmt::Display;

use rust_decimal::Decimal;
use schema::{LogicalType, TimeUnit};

use crate::cmp::Operator;

/// The right-hand side of a column comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Bool(bool),
    Str(String),
    /// Days since the Unix epoch.
    Date(i32),
    /// Elapsed units since the Unix epoch.
    Timestamp { value: i64, unit: TimeUnit },
}

impl Literal {
    /// Whether this literal can be compared against a column of
    /// `logical_type` with `op`.
    ///
    /// Integer literals compare against every integer width, decimals,
    /// floats, dates and timestamps. Float literals are restricted to float
    /// columns, decimal literals to decimal columns, strings to string
    /// columns, and booleans to bool columns under equality only.
    pub fn compatible_with(&self, logical_type: LogicalType, op: Operator) -> bool {
        use LogicalType::*;

        if op == Operator::Like {
            return matches!(self, Self::Str(_)) && logical_type.is_string();
        }

        match self {
            Self::Int(_) => matches!(
                logical_type,
                Int8 | Int16
                    | Int32
                    | Int64
                    | Float32
                    | Float64
                    | Decimal { .. }
                    | Date
                    | Timestamp(_)
            ),
            Self::Float(_) => matches!(logical_type, Float32 | Float64),
            Self::Decimal(_) => matches!(logical_type, Decimal { .. }),
            Self::Bool(_) => {
                logical_type == Bool && matches!(op, Operator::Equal | Operator::NotEqual)
            }
            Self::Str(_) => logical_type.is_string(),
            Self::Date(_) => matches!(logical_type, Date | Timestamp(_)),
            Self::Timestamp { .. } => matches!(logical_type, Timestamp(_)),
        }
    }

    /// The literal as an `i64` in the integer comparison domain.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Date(v) => Some(*v as i64),
            Self::Timestamp { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// The literal as an `f64` in the float comparison domain.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// The literal in the decimal comparison domain.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Int(v) => Some(Decimal::from(*v)),
            _ => None,
        }
    }

    /// The literal normalised into the timestamp domain of a column with
    /// unit `column_unit`.
    ///
    /// Bare integers are taken to already carry the column's unit; date
    /// literals convert from whole days.
    pub fn as_timestamp(&self, column_unit: TimeUnit) -> Option<i64> {
        match self {
            Self::Timestamp { value, unit } => Some(column_unit.convert(*value, *unit)),
            Self::Int(v) => Some(*v),
            Self::Date(days) => Some(
                column_unit
                    .per_second()
                    .saturating_mul(86_400)
                    .saturating_mul(*days as i64),
            ),
            _ => None,
        }
    }

    /// The literal in the date domain (days since epoch).
    pub fn as_date(&self) -> Option<i32> {
        match self {
            Self::Date(v) => Some(*v),
            Self::Int(v) => i32::try_from(*v).ok(),
            _ => None,
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
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Decimal(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "'{}'", v),
            Self::Date(v) => write!(f, "date({})", v),
            Self::Timestamp { value, unit } => write!(f, "ts({}{})", value, unit),
        }
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Decimal> for Literal {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compatibility() {
        assert!(Literal::Int(1).compatible_with(LogicalType::Int8, Operator::GT));
        assert!(Literal::Int(1).compatible_with(LogicalType::Float64, Operator::LT));
        assert!(Literal::Int(1)
            .compatible_with(LogicalType::Decimal { precision: 18, scale: 2 }, Operator::Equal));
        assert!(!Literal::Float(1.0).compatible_with(LogicalType::Int64, Operator::GT));
        assert!(Literal::Bool(true).compatible_with(LogicalType::Bool, Operator::Equal));
        assert!(!Literal::Bool(true).compatible_with(LogicalType::Bool, Operator::GT));
        assert!(Literal::Str("x".into()).compatible_with(LogicalType::Dictionary, Operator::Like));
        assert!(!Literal::Str("x".into()).compatible_with(LogicalType::Int32, Operator::Equal));
        assert!(!Literal::Int(1).compatible_with(LogicalType::Utf8, Operator::Like));
    }

    #[test]
    fn timestamp_normalisation() {
        let lit = Literal::Timestamp {
            value: 1,
            unit: TimeUnit::Second,
        };
        assert_eq!(lit.as_timestamp(TimeUnit::Millisecond), Some(1_000));

        let date = Literal::Date(2);
        assert_eq!(date.as_timestamp(TimeUnit::Second), Some(172_800));
        assert_eq!(Literal::Int(5).as_timestamp(TimeUnit::Second), Some(5));
    }
}
