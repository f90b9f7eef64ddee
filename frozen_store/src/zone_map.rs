//! Per-column, per-chunk `(min, max, has_nulls)` summaries.
//!
//! Zone maps are a pruning hint: a predicate evaluator may skip a chunk when
//! the summary proves no row in it can match. A summary that fails to prune
//! costs only time; a summary that prunes a matching chunk would be a
//! correctness bug, so every consumer treats "cannot prove" as "keep".

use crate::column::Column;
use crate::stats::range_min_max;
use crate::value::Scalar;

pub const DEFAULT_CHUNK_ROWS: usize = 65_536;

/// Summary of one column over one chunk of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSummary {
    pub min: Scalar,
    pub max: Scalar,
    pub has_nulls: bool,
    pub row_start: usize,
    pub row_end: usize,
}

/// Chunk summaries for every column of a store.
#[derive(Debug, Clone)]
pub struct ZoneMaps {
    chunk_rows: usize,
    row_count: usize,
    // indexed by column ordinal, then chunk ordinal
    per_column: Vec<Vec<ChunkSummary>>,
}

impl ZoneMaps {
    /// Build summaries for `columns` with the given chunk size.
    pub fn build(columns: &[Column], row_count: usize, chunk_rows: usize) -> Self {
        assert!(chunk_rows > 0, "zone map chunk size must be positive");

        let num_chunks = chunk_count(row_count, chunk_rows);
        let per_column = columns
            .iter()
            .map(|column| {
                (0..num_chunks)
                    .map(|chunk| {
                        let row_start = chunk * chunk_rows;
                        let row_end = (row_start + chunk_rows).min(row_count);
                        let (min, max, has_nulls) = range_min_max(column, row_start, row_end);
                        ChunkSummary {
                            min,
                            max,
                            has_nulls,
                            row_start,
                            row_end,
                        }
                    })
                    .collect()
            })
            .collect();

        Self {
            chunk_rows,
            row_count,
            per_column,
        }
    }

    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    pub fn num_chunks(&self) -> usize {
        chunk_count(self.row_count, self.chunk_rows)
    }

    /// Row bounds `[start, end)` of chunk `chunk`.
    pub fn chunk_bounds(&self, chunk: usize) -> (usize, usize) {
        let start = chunk * self.chunk_rows;
        (start, (start + self.chunk_rows).min(self.row_count))
    }

    /// The summaries of column `column_idx`, one per chunk.
    pub fn column_summaries(&self, column_idx: usize) -> &[ChunkSummary] {
        &self.per_column[column_idx]
    }
}

fn chunk_count(row_count: usize, chunk_rows: usize) -> usize {
    if row_count == 0 {
        0
    } else {
        (row_count + chunk_rows - 1) / chunk_rows
    }
}
