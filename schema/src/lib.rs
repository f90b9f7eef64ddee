//! Schema definition for the frozen columnar store.
//!
//! A [`Schema`] is an ordered collection of named, typed fields. It is built
//! once, validated, and then shared read-only by every component that needs
//! to resolve a column name to an index or check the logical type of a
//! column. Lookups by name are backed by a map built at construction time.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::fmt::Display;

use hashbrown::HashMap;
use snafu::{ensure, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("duplicate column name in schema: \"{}\"", name))]
    DuplicateColumnName { name: String },

    #[snafu(display("schema must contain at least one field"))]
    NoFields {},
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Resolution of a timestamp column, as elapsed units since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

impl TimeUnit {
    /// Number of these units in one second.
    pub fn per_second(&self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Millisecond => 1_000,
            Self::Microsecond => 1_000_000,
            Self::Nanosecond => 1_000_000_000,
        }
    }

    /// Convert `value`, expressed in `from` units, into `self` units.
    ///
    /// Conversion to a coarser unit truncates towards negative infinity so
    /// that, e.g., `-1ms` becomes `-1s` rather than `0s`.
    pub fn convert(&self, value: i64, from: Self) -> i64 {
        let (a, b) = (from.per_second(), self.per_second());
        if a == b {
            value
        } else if b > a {
            value.saturating_mul(b / a)
        } else {
            value.div_euclid(a / b)
        }
    }
}

impl Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Second => write!(f, "s"),
            Self::Millisecond => write!(f, "ms"),
            Self::Microsecond => write!(f, "us"),
            Self::Nanosecond => write!(f, "ns"),
        }
    }
}

/// The logical type of a column.
///
/// The physical storage for a logical type lives in the store crate; the
/// schema only describes what a value in the column means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// 128-bit fixed-point decimal with the given precision and scale.
    Decimal { precision: u8, scale: u32 },
    Bool,
    /// UTF-8 string stored directly.
    Utf8,
    /// Days since the Unix epoch.
    Date,
    /// Elapsed time since the Unix epoch in the embedded unit.
    Timestamp(TimeUnit),
    /// Low-cardinality UTF-8 string stored as `i32` codes into a dictionary
    /// of distinct values.
    Dictionary,
}

impl LogicalType {
    /// Whether values of this type are strings at the logical level.
    pub fn is_string(&self) -> bool {
        matches!(self, Self::Utf8 | Self::Dictionary)
    }

    /// Whether values of this type can be summed / averaged.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Float32
                | Self::Float64
                | Self::Decimal { .. }
        )
    }

    /// Whether values of this type have a total order usable for Min/Max
    /// and ORDER BY.
    pub fn is_orderable(&self) -> bool {
        !matches!(self, Self::Bool)
    }
}

impl Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int8 => write!(f, "i8"),
            Self::Int16 => write!(f, "i16"),
            Self::Int32 => write!(f, "i32"),
            Self::Int64 => write!(f, "i64"),
            Self::Float32 => write!(f, "f32"),
            Self::Float64 => write!(f, "f64"),
            Self::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
            Self::Bool => write!(f, "bool"),
            Self::Utf8 => write!(f, "utf8"),
            Self::Date => write!(f, "date"),
            Self::Timestamp(unit) => write!(f, "timestamp[{}]", unit),
            Self::Dictionary => write!(f, "dictionary[utf8]"),
        }
    }
}

/// A named, typed column in a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    logical_type: LogicalType,
    nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, logical_type: LogicalType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
}

/// An ordered, immutable set of fields with by-name lookup.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<Field>,

    // name -> ordinal, built once.
    index: HashMap<String, usize>,
}

impl Schema {
    /// Construct a schema from fields, validating that names are unique and
    /// that there is at least one field.
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        ensure!(!fields.is_empty(), NoFieldsSnafu);

        let mut index = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            ensure!(
                index.insert(field.name.clone(), i).is_none(),
                DuplicateColumnNameSnafu { name: &field.name }
            );
        }

        Ok(Self { fields, index })
    }

    /// The number of fields in the schema.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields, in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// The field at ordinal `idx`.
    pub fn field(&self, idx: usize) -> &Field {
        &self.fields[idx]
    }

    /// Resolve a column name to its ordinal.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Resolve a column name to its field.
    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    /// Whether the schema contains a column called `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterator over `(ordinal, field)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Field)> + '_ {
        self.fields.iter().enumerate()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Schema {}

#[cfg(test)]
mod test {
    use super::*;

    fn test_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", LogicalType::Int32, false),
            Field::new("name", LogicalType::Utf8, true),
            Field::new("ts", LogicalType::Timestamp(TimeUnit::Millisecond), true),
        ])
        .unwrap()
    }

    #[test]
    fn lookup() {
        let schema = test_schema();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.index_of("name"), Some(1));
        assert_eq!(schema.index_of("nope"), None);
        assert_eq!(schema.field_by_name("id").unwrap().logical_type(), LogicalType::Int32);
        assert!(schema.field(0).name() == "id");
        assert!(!schema.field(0).is_nullable());
        assert!(schema.field(1).is_nullable());
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = Schema::new(vec![
            Field::new("a", LogicalType::Int32, false),
            Field::new("a", LogicalType::Int64, false),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateColumnName { name } if name == "a"));
    }

    #[test]
    fn empty_rejected() {
        assert!(matches!(Schema::new(vec![]), Err(Error::NoFields {})));
    }

    #[test]
    fn time_unit_conversion() {
        use TimeUnit::*;
        // finer target multiplies
        assert_eq!(Nanosecond.convert(2, Second), 2_000_000_000);
        assert_eq!(Microsecond.convert(3, Millisecond), 3_000);
        // coarser target truncates towards negative infinity
        assert_eq!(Second.convert(1_999, Millisecond), 1);
        assert_eq!(Second.convert(-1, Millisecond), -1);
        assert_eq!(Second.convert(-1_001, Millisecond), -2);
        // same unit is identity
        assert_eq!(Millisecond.convert(42, Millisecond), 42);
    }

    #[test]
    fn type_predicates() {
        assert!(LogicalType::Int8.is_numeric());
        assert!(LogicalType::Decimal { precision: 38, scale: 2 }.is_numeric());
        assert!(!LogicalType::Utf8.is_numeric());
        assert!(LogicalType::Utf8.is_string());
        assert!(LogicalType::Dictionary.is_string());
        assert!(!LogicalType::Bool.is_orderable());
        assert!(LogicalType::Date.is_orderable());
    }
}
