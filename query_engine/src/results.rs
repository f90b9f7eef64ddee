//! Query outputs.
//!
//! Everything a plan can produce: a scalar (aggregates), materialized rows,
//! or grouped rows. Row-shaped outputs can egress as an Arrow
//! `RecordBatch`.

use aggregate::GroupedRow;
use arrow::record_batch::RecordBatch;
use frozen_store::{arrow_io, Scalar};
use schema::LogicalType;
use snafu::ResultExt;

use crate::{ArrowEgressSnafu, Result};

/// Materialized, projected rows in result order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowsOutput {
    /// `(name, logical type)` per output column.
    pub fields: Vec<(String, LogicalType)>,
    pub rows: Vec<Vec<Scalar>>,
}

impl RowsOutput {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// The single column of a one-column output, in row order.
    pub fn column(&self, idx: usize) -> impl Iterator<Item = &Scalar> + '_ {
        self.rows.iter().map(move |row| &row[idx])
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        arrow_io::rows_to_record_batch(&self.fields, &self.rows).context(ArrowEgressSnafu)
    }
}

/// Grouped aggregation output, key-ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupsOutput {
    pub key_field: (String, LogicalType),
    pub aggregate_fields: Vec<(String, LogicalType)>,
    pub groups: Vec<GroupedRow>,
}

impl GroupsOutput {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The aggregates of the group with key `key`, if present.
    pub fn group(&self, key: &Scalar) -> Option<&GroupedRow> {
        self.groups.iter().find(|g| &g.key == key)
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = Vec::with_capacity(1 + self.aggregate_fields.len());
        fields.push(self.key_field.clone());
        fields.extend(self.aggregate_fields.iter().cloned());

        let rows = self
            .groups
            .iter()
            .map(|group| {
                let mut row = Vec::with_capacity(fields.len());
                row.push(group.key.clone());
                row.extend(group.aggregates.iter().cloned());
                row
            })
            .collect::<Vec<_>>();

        arrow_io::rows_to_record_batch(&fields, &rows).context(ArrowEgressSnafu)
    }
}

/// What a query evaluates to.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Scalar(Scalar),
    Rows(RowsOutput),
    Groups(GroupsOutput),
}

impl QueryOutput {
    /// The scalar payload; `None` for row-shaped outputs.
    pub fn scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn rows(&self) -> Option<&RowsOutput> {
        match self {
            Self::Rows(r) => Some(r),
            _ => None,
        }
    }

    pub fn groups(&self) -> Option<&GroupsOutput> {
        match self {
            Self::Groups(g) => Some(g),
            _ => None,
        }
    }
}
