//! Per-column statistics, built once at freeze time.
//!
//! Statistics are advisory: the optimizer uses them for selectivity
//! estimation and constant folding, and zone maps reuse the same range scan
//! per chunk. Correctness of query results never depends on them.

use selection::Bitmap;

use crate::column::{Column, ColumnData};
use crate::value::Scalar;

/// Summary of one column over a row range.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    /// Minimum non-null value; `Scalar::Null` when the range holds none.
    pub min: Scalar,
    /// Maximum non-null value; `Scalar::Null` when the range holds none.
    pub max: Scalar,
    pub null_count: usize,
    /// Exact for dictionary columns, `None` otherwise.
    pub distinct_count: Option<usize>,
}

impl ColumnStats {
    /// Build whole-column statistics.
    pub fn build(column: &Column) -> Self {
        let (min, max, _) = range_min_max(column, 0, column.len());
        let distinct_count = match column.data() {
            ColumnData::Dictionary { keys, values } => {
                // count codes actually referenced by non-null rows
                let mut seen = Bitmap::all_clear(values.len());
                for (row, &key) in keys.iter().enumerate() {
                    if !column.is_null(row) {
                        seen.set(key as usize);
                    }
                }
                Some(seen.count_ones())
            }
            _ => None,
        };

        Self {
            min,
            max,
            null_count: column.null_count(),
            distinct_count,
        }
    }
}

/// Scan `[start, end)` of a column for its non-null extremes and whether the
/// range contains a null.
pub(crate) fn range_min_max(column: &Column, start: usize, end: usize) -> (Scalar, Scalar, bool) {
    let mut min = Scalar::Null;
    let mut max = Scalar::Null;
    let mut has_nulls = false;

    for row in start..end {
        if column.is_null(row) {
            has_nulls = true;
            continue;
        }
        let value = column.scalar_at(row);
        min.update_min(&value);
        max.update_max(&value);
    }

    (min, max, has_nulls)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn numeric_stats() {
        let col = Column::from_i32_opts(vec![Some(4), None, Some(-1), Some(9)]);
        let stats = ColumnStats::build(&col);
        assert_eq!(stats.min, Scalar::I32(-1));
        assert_eq!(stats.max, Scalar::I32(9));
        assert_eq!(stats.null_count, 1);
        assert_eq!(stats.distinct_count, None);
    }

    #[test]
    fn dictionary_distinct_count() {
        let col = Column::from_dictionary_opts(vec![Some("a"), Some("b"), Some("a"), None]);
        let stats = ColumnStats::build(&col);
        assert_eq!(stats.distinct_count, Some(2));
        assert_eq!(stats.min, Scalar::Str("a".to_owned()));
        assert_eq!(stats.max, Scalar::Str("b".to_owned()));
    }

    #[test]
    fn all_null_stats() {
        let col = Column::from_f64_opts(vec![None, None]);
        let stats = ColumnStats::build(&col);
        assert!(stats.min.is_null());
        assert!(stats.max.is_null());
        assert_eq!(stats.null_count, 2);
    }
}
