//! An immutable, in-memory, Arrow-style columnar store.
//!
//! A [`FrozenStore`] holds a validated [`Schema`], one typed column per
//! field, per-column statistics and zone maps. It is frozen on construction:
//! every downstream component (predicates, aggregation kernels, the query
//! engine) holds shared read-only references and never mutates the data.
//!
//! Construction goes through [`StoreBuilder`], which validates the external
//! builder contract at freeze time: uniform row counts, validity lengths,
//! dictionary code bounds and string offset integrity. An Arrow
//! [`arrow::record_batch::RecordBatch`] can be ingested directly.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod arrow_io;
mod column;
mod row;
mod stats;
mod value;
mod zone_map;

pub use column::{Column, ColumnData};
pub use row::RowView;
pub use stats::ColumnStats;
pub use value::Scalar;
pub use zone_map::{ChunkSummary, ZoneMaps, DEFAULT_CHUNK_ROWS};

use observability_deps::tracing::debug;
use schema::{Field, LogicalType, Schema};
use snafu::{ensure, ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("column \"{}\" does not exist", column))]
    UnknownColumn { column: String },

    #[snafu(display(
        "type mismatch on column \"{}\": expected {}, got {}",
        column,
        expected,
        actual
    ))]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[snafu(display(
        "column \"{}\" has {} rows but the store has {}",
        column,
        actual,
        expected
    ))]
    RowCountMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[snafu(display(
        "validity bitmap of column \"{}\" covers {} rows, expected {}",
        column,
        actual,
        expected
    ))]
    ValidityLength {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[snafu(display(
        "null count of column \"{}\" is {} but its validity bitmap clears {} bits",
        column,
        declared,
        actual
    ))]
    NullCount {
        column: String,
        declared: usize,
        actual: usize,
    },

    #[snafu(display(
        "dictionary code {} of column \"{}\" is outside its dictionary of {} values",
        code,
        column,
        dictionary_len
    ))]
    DictionaryCode {
        column: String,
        code: i32,
        dictionary_len: usize,
    },

    #[snafu(display("string offsets of column \"{}\" are malformed", column))]
    Utf8Offsets { column: String },

    #[snafu(display("invalid schema: {}", source))]
    InvalidSchema { source: schema::Error },

    #[snafu(display("unsupported arrow type for column \"{}\": {}", column, datatype))]
    UnsupportedArrowType { column: String, datatype: String },

    #[snafu(display(
        "decimal value in column \"{}\" does not fit the 96-bit mantissa",
        column
    ))]
    DecimalOutOfRange { column: String },

    #[snafu(display("arrow interop failed: {}", source))]
    Arrow { source: ::arrow::error::ArrowError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The frozen columnar store.
#[derive(Debug)]
pub struct FrozenStore {
    schema: Schema,
    columns: Vec<Column>,
    row_count: usize,
    stats: Vec<ColumnStats>,
    zone_maps: ZoneMaps,
}

impl FrozenStore {
    /// Start building a store.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// The column at ordinal `idx`.
    pub fn column(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    /// Resolve `name` to `(ordinal, column)`.
    pub fn column_by_name(&self, name: &str) -> Result<(usize, &Column)> {
        self.schema
            .index_of(name)
            .map(|idx| (idx, &self.columns[idx]))
            .ok_or_else(|| UnknownColumnSnafu { column: name }.build())
    }

    /// Statistics of the column at ordinal `idx`.
    pub fn stats(&self, idx: usize) -> &ColumnStats {
        &self.stats[idx]
    }

    pub fn zone_maps(&self) -> &ZoneMaps {
        &self.zone_maps
    }

    /// Accessor for logical row `row`; used by materialization terminals.
    pub fn row(&self, row: usize) -> RowView<'_> {
        RowView::new(self, row)
    }

    /// Approximate heap footprint in bytes.
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>() + self.columns.iter().map(|c| c.size()).sum::<usize>()
    }
}

/// Accumulates columns and freezes them into a [`FrozenStore`].
#[derive(Debug)]
pub struct StoreBuilder {
    names: Vec<String>,
    columns: Vec<Column>,
    zone_map_chunk_rows: usize,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            names: vec![],
            columns: vec![],
            zone_map_chunk_rows: DEFAULT_CHUNK_ROWS,
        }
    }

    /// Chunk size used when building the store's zone maps.
    pub fn zone_map_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.zone_map_chunk_rows = chunk_rows;
        self
    }

    /// Append a pre-assembled column.
    pub fn column(mut self, name: impl Into<String>, column: Column) -> Self {
        self.names.push(name.into());
        self.columns.push(column);
        self
    }

    pub fn col_i8(self, name: impl Into<String>, values: Vec<Option<i8>>) -> Self {
        self.column(name, Column::from_i8_opts(values))
    }

    pub fn col_i16(self, name: impl Into<String>, values: Vec<Option<i16>>) -> Self {
        self.column(name, Column::from_i16_opts(values))
    }

    pub fn col_i32(self, name: impl Into<String>, values: Vec<Option<i32>>) -> Self {
        self.column(name, Column::from_i32_opts(values))
    }

    pub fn col_i64(self, name: impl Into<String>, values: Vec<Option<i64>>) -> Self {
        self.column(name, Column::from_i64_opts(values))
    }

    pub fn col_f32(self, name: impl Into<String>, values: Vec<Option<f32>>) -> Self {
        self.column(name, Column::from_f32_opts(values))
    }

    pub fn col_f64(self, name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        self.column(name, Column::from_f64_opts(values))
    }

    pub fn col_bool(self, name: impl Into<String>, values: Vec<Option<bool>>) -> Self {
        self.column(name, Column::from_bool_opts(values))
    }

    pub fn col_date(self, name: impl Into<String>, values: Vec<Option<i32>>) -> Self {
        self.column(name, Column::from_date_opts(values))
    }

    pub fn col_decimal(
        self,
        name: impl Into<String>,
        precision: u8,
        scale: u32,
        values: Vec<Option<rust_decimal::Decimal>>,
    ) -> Self {
        self.column(name, Column::from_decimal_opts(precision, scale, values))
    }

    pub fn col_timestamp(
        self,
        name: impl Into<String>,
        unit: schema::TimeUnit,
        values: Vec<Option<i64>>,
    ) -> Self {
        self.column(name, Column::from_timestamp_opts(unit, values))
    }

    pub fn col_utf8(self, name: impl Into<String>, values: Vec<Option<&str>>) -> Self {
        self.column(name, Column::from_utf8_opts(values))
    }

    pub fn col_dictionary(self, name: impl Into<String>, values: Vec<Option<&str>>) -> Self {
        self.column(name, Column::from_dictionary_opts(values))
    }

    /// Validate the collected columns and freeze them.
    pub fn freeze(self) -> Result<FrozenStore> {
        let row_count = self.columns.first().map(|c| c.len()).unwrap_or(0);

        for (name, column) in self.names.iter().zip(&self.columns) {
            validate_column(name, column, row_count)?;
        }

        let fields = self
            .names
            .iter()
            .zip(&self.columns)
            .map(|(name, column)| {
                Field::new(name, column.logical_type(), column.null_count() > 0)
            })
            .collect();
        let schema = Schema::new(fields).context(InvalidSchemaSnafu)?;

        let stats = self.columns.iter().map(ColumnStats::build).collect();
        let zone_maps = ZoneMaps::build(&self.columns, row_count, self.zone_map_chunk_rows);
        debug!(
            rows = row_count,
            columns = self.columns.len(),
            chunks = zone_maps.num_chunks(),
            "froze store"
        );

        Ok(FrozenStore {
            schema,
            columns: self.columns,
            row_count,
            stats,
            zone_maps,
        })
    }
}

fn validate_column(name: &str, column: &Column, row_count: usize) -> Result<()> {
    ensure!(
        column.len() == row_count,
        RowCountMismatchSnafu {
            column: name,
            expected: row_count,
            actual: column.len(),
        }
    );

    if let Some(validity) = column.validity() {
        ensure!(
            validity.len() == row_count,
            ValidityLengthSnafu {
                column: name,
                expected: row_count,
                actual: validity.len(),
            }
        );
        let cleared = row_count - validity.count_ones();
        ensure!(
            cleared == column.null_count(),
            NullCountSnafu {
                column: name,
                declared: column.null_count(),
                actual: cleared,
            }
        );
    } else {
        ensure!(
            column.null_count() == 0,
            NullCountSnafu {
                column: name,
                declared: column.null_count(),
                actual: 0usize,
            }
        );
    }

    match column.data() {
        ColumnData::Dictionary { keys, values } => {
            for (row, &code) in keys.iter().enumerate() {
                if column.is_null(row) {
                    continue;
                }
                ensure!(
                    code >= 0 && (code as usize) < values.len(),
                    DictionaryCodeSnafu {
                        column: name,
                        code,
                        dictionary_len: values.len(),
                    }
                );
            }
        }
        ColumnData::Utf8 { offsets, bytes } => {
            let well_formed = offsets.len() == row_count + 1
                && offsets.windows(2).all(|w| w[0] <= w[1])
                && offsets.last().map(|&o| o as usize == bytes.len()).unwrap_or(false);
            ensure!(well_formed, Utf8OffsetsSnafu { column: name });
        }
        _ => {}
    }

    Ok(())
}

/// Columns that aggregate kernels understand as numeric, used by callers to
/// pre-validate aggregate requests.
pub fn is_aggregatable(logical_type: LogicalType) -> bool {
    logical_type.is_numeric()
}

#[cfg(test)]
mod test {
    use super::*;
    use rust_decimal::Decimal;
    use selection::Bitmap;

    fn people() -> FrozenStore {
        FrozenStore::builder()
            .col_i32("id", vec![Some(1), Some(2), Some(3)])
            .col_utf8("name", vec![Some("ann"), None, Some("cy")])
            .col_decimal(
                "salary",
                18,
                2,
                vec![
                    Some(Decimal::new(100_00, 2)),
                    Some(Decimal::new(250_50, 2)),
                    None,
                ],
            )
            .freeze()
            .unwrap()
    }

    #[test]
    fn freeze_and_read() {
        let store = people();
        assert_eq!(store.row_count(), 3);
        assert_eq!(store.schema().len(), 3);
        assert!(store.schema().field_by_name("name").unwrap().is_nullable());
        assert!(!store.schema().field_by_name("id").unwrap().is_nullable());

        let row = store.row(1);
        assert_eq!(row.i32("id").unwrap(), Some(2));
        assert_eq!(row.str("name").unwrap(), None);
        assert_eq!(row.decimal("salary").unwrap(), Some(Decimal::new(250_50, 2)));

        // typed access against the wrong type fails
        assert!(matches!(
            row.i64("id"),
            Err(Error::TypeMismatch { column, .. }) if column == "id"
        ));
        assert!(matches!(
            row.i32("nope"),
            Err(Error::UnknownColumn { column }) if column == "nope"
        ));
    }

    #[test]
    fn row_count_mismatch_rejected() {
        let err = FrozenStore::builder()
            .col_i32("a", vec![Some(1), Some(2)])
            .col_i32("b", vec![Some(1)])
            .freeze()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RowCountMismatch { column, expected: 2, actual: 1 } if column == "b"
        ));
    }

    #[test]
    fn validity_length_rejected() {
        let column = Column::from_raw(
            ColumnData::I32(vec![1, 2, 3]),
            Some(Bitmap::all_set(2)),
            0,
        );
        let err = FrozenStore::builder().column("a", column).freeze().unwrap_err();
        assert!(matches!(err, Error::ValidityLength { .. }));
    }

    #[test]
    fn null_count_consistency_rejected() {
        let mut validity = Bitmap::all_set(3);
        validity.clear(0);
        let column = Column::from_raw(ColumnData::I32(vec![0, 2, 3]), Some(validity), 2);
        let err = FrozenStore::builder().column("a", column).freeze().unwrap_err();
        assert!(matches!(
            err,
            Error::NullCount { declared: 2, actual: 1, .. }
        ));
    }

    #[test]
    fn dictionary_bounds_rejected() {
        let column = Column::from_raw(
            ColumnData::Dictionary {
                keys: vec![0, 7],
                values: vec!["only".to_owned()],
            },
            None,
            0,
        );
        let err = FrozenStore::builder().column("cat", column).freeze().unwrap_err();
        assert!(matches!(
            err,
            Error::DictionaryCode { code: 7, dictionary_len: 1, .. }
        ));
    }

    #[test]
    fn malformed_utf8_offsets_rejected() {
        let column = Column::from_raw(
            ColumnData::Utf8 {
                offsets: vec![0, 5, 3],
                bytes: b"abc".to_vec(),
            },
            None,
            0,
        );
        let err = FrozenStore::builder().column("s", column).freeze().unwrap_err();
        assert!(matches!(err, Error::Utf8Offsets { .. }));
    }

    #[test]
    fn empty_store() {
        let store = FrozenStore::builder().col_i32("a", vec![]).freeze().unwrap();
        assert_eq!(store.row_count(), 0);
        assert_eq!(store.zone_maps().num_chunks(), 0);
        assert!(store.stats(0).min.is_null());
    }

    #[test]
    fn duplicate_column_names_rejected() {
        let err = FrozenStore::builder()
            .col_i32("a", vec![Some(1)])
            .col_i64("a", vec![Some(1)])
            .freeze()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }
}
