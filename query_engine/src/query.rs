//! The method-chained query surface.
//!
//! A [`Query`] accumulates relational steps and lowers them into a
//! [`LogicalPlan`] at its terminal call. Filters take [`Predicate`] values
//! — the engine's embedded expression AST — so arbitrary And/Or/Not shapes
//! compose without host-language expression reflection. Terminals run the
//! plan through the cache, the optimizer, the physical planner and the
//! adaptive executor.

use aggregate::{AggregateSpec, AggregateType};
use frozen_store::{RowView, Scalar};
use predicate::Predicate;

use crate::plan::{LogicalPlan, SortKey};
use crate::results::{GroupsOutput, QueryOutput, RowsOutput};
use crate::{Engine, Error, Result};

/// A query under construction against one engine's store.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    engine: &'a Engine,
    filters: Vec<Predicate>,
    projection: Option<Vec<String>>,
    sort_keys: Vec<SortKey>,
    distinct: bool,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            filters: vec![],
            projection: None,
            sort_keys: vec![],
            distinct: false,
            limit: None,
            offset: None,
        }
    }

    /// Keep rows satisfying `predicate`. Chained filters AND together.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    /// Restrict output to the named columns.
    pub fn select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Primary ascending sort key.
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.sort_keys.push(SortKey {
            column: column.into(),
            descending: false,
        });
        self
    }

    /// Primary descending sort key.
    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.sort_keys.push(SortKey {
            column: column.into(),
            descending: true,
        });
        self
    }

    /// Secondary sort key; ties under earlier keys break on this one.
    pub fn then_by(self, column: impl Into<String>) -> Self {
        self.order_by(column)
    }

    pub fn then_by_desc(self, column: impl Into<String>) -> Self {
        self.order_by_desc(column)
    }

    /// Keep one row per distinct projected-value combination.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Keep at most the first `n` rows.
    pub fn take(mut self, n: usize) -> Self {
        self.limit = Some(self.limit.map(|cur| cur.min(n)).unwrap_or(n));
        self
    }

    /// Drop the first `n` rows.
    pub fn skip(mut self, n: usize) -> Self {
        self.offset = Some(self.offset.unwrap_or(0) + n);
        self
    }

    /// Start a grouped aggregation on `key`.
    pub fn group_by(self, key: impl Into<String>) -> GroupedQuery<'a> {
        GroupedQuery {
            query: self,
            key: key.into(),
            aggregates: vec![],
            having: None,
        }
    }

    // ---- terminals ---------------------------------------------------------

    /// Number of surviving rows.
    pub fn count(self) -> Result<u64> {
        let engine = self.engine;
        let plan = self.aggregate_plan(AggregateType::Count, None);
        match engine.run(plan)? {
            QueryOutput::Scalar(Scalar::I64(n)) => Ok(n as u64),
            other => unreachable!("count produced {:?}", other),
        }
    }

    /// Number of surviving rows with a non-null value in `column`.
    pub fn count_column(self, column: impl Into<String>) -> Result<u64> {
        let engine = self.engine;
        let plan = self.aggregate_plan(AggregateType::Count, Some(column.into()));
        match engine.run(plan)? {
            QueryOutput::Scalar(Scalar::I64(n)) => Ok(n as u64),
            other => unreachable!("count produced {:?}", other),
        }
    }

    pub fn sum(self, column: impl Into<String>) -> Result<Scalar> {
        self.scalar_aggregate(AggregateType::Sum, column.into())
    }

    pub fn avg(self, column: impl Into<String>) -> Result<Scalar> {
        self.scalar_aggregate(AggregateType::Avg, column.into())
    }

    pub fn min(self, column: impl Into<String>) -> Result<Scalar> {
        self.scalar_aggregate(AggregateType::Min, column.into())
    }

    pub fn max(self, column: impl Into<String>) -> Result<Scalar> {
        self.scalar_aggregate(AggregateType::Max, column.into())
    }

    /// Whether any row survives the filters. Streams block by block and
    /// exits on the first match.
    pub fn any(self) -> Result<bool> {
        let engine = self.engine;
        if self.has_row_ops() {
            // ordering/limits don't change emptiness, but offsets do
            let rows = self.rows()?;
            return Ok(!rows.is_empty());
        }
        engine.run_any(self.filters)
    }

    /// The first surviving row, or `EmptySequence`.
    pub fn first(self) -> Result<Vec<Scalar>> {
        self.first_opt()?.ok_or(Error::EmptySequence)
    }

    /// The first surviving row, or `None`.
    pub fn first_opt(self) -> Result<Option<Vec<Scalar>>> {
        let engine = self.engine;
        if self.has_row_ops() {
            let mut rows = self.take(1).rows()?;
            return Ok(if rows.rows.is_empty() {
                None
            } else {
                Some(rows.rows.swap_remove(0))
            });
        }

        // streaming fast path: no ordering, no offset, no distinct
        let projection = self.projection.clone();
        match engine.run_first(self.filters)? {
            None => Ok(None),
            Some(row) => {
                let store = engine.store();
                let ordinals = match &projection {
                    Some(columns) => columns
                        .iter()
                        .map(|name| {
                            store
                                .schema()
                                .index_of(name)
                                .ok_or_else(|| Error::UnknownColumn {
                                    column: name.clone(),
                                })
                        })
                        .collect::<Result<Vec<_>>>()?,
                    None => (0..store.schema().len()).collect(),
                };
                Ok(Some(
                    ordinals
                        .iter()
                        .map(|&col| store.column(col).scalar_at(row))
                        .collect(),
                ))
            }
        }
    }

    /// Exactly one surviving row; `EmptySequence` on zero,
    /// `InvalidArgument` on more.
    pub fn single(self) -> Result<Vec<Scalar>> {
        self.single_opt()?.ok_or(Error::EmptySequence)
    }

    /// At most one surviving row; `InvalidArgument` on more.
    pub fn single_opt(self) -> Result<Option<Vec<Scalar>>> {
        let mut rows = self.take(2).rows()?;
        match rows.rows.len() {
            0 => Ok(None),
            1 => Ok(Some(rows.rows.swap_remove(0))),
            _ => Err(Error::InvalidArgument {
                message: "more than one row matched".to_owned(),
            }),
        }
    }

    /// Materialize projected rows.
    pub fn rows(self) -> Result<RowsOutput> {
        let engine = self.engine;
        let plan = self.row_plan();
        match engine.run(plan)? {
            QueryOutput::Rows(rows) => Ok(rows),
            other => unreachable!("row plan produced {:?}", other),
        }
    }

    /// Materialize caller records through the row-builder callback. The
    /// callback only ever sees surviving rows.
    pub fn records<T>(self, mut build: impl FnMut(&RowView<'_>) -> T) -> Result<Vec<T>> {
        let engine = self.engine;
        let store = engine.store();
        let indices = engine.run_indices(self.row_plan())?;
        Ok(indices
            .iter()
            .map(|&row| build(&store.row(row as usize)))
            .collect())
    }

    // ---- plan assembly -----------------------------------------------------

    fn has_row_ops(&self) -> bool {
        !self.sort_keys.is_empty()
            || self.distinct
            || self.offset.is_some()
            || self.limit.is_some()
    }

    fn scalar_aggregate(self, op: AggregateType, column: String) -> Result<Scalar> {
        let engine = self.engine;
        let plan = self.aggregate_plan(op, Some(column));
        match engine.run(plan)? {
            QueryOutput::Scalar(value) => Ok(value),
            other => unreachable!("aggregate produced {:?}", other),
        }
    }

    fn base_plan(&self) -> LogicalPlan {
        let mut plan = LogicalPlan::scan();
        if !self.filters.is_empty() {
            plan = LogicalPlan::Filter {
                input: Box::new(plan),
                predicates: self.filters.clone(),
            };
        }
        plan
    }

    fn row_plan(self) -> LogicalPlan {
        let mut plan = self.base_plan();
        if let Some(columns) = &self.projection {
            plan = LogicalPlan::Project {
                input: Box::new(plan),
                columns: columns.clone(),
            };
        }
        if self.distinct {
            plan = LogicalPlan::Distinct {
                input: Box::new(plan),
            };
        }
        if !self.sort_keys.is_empty() {
            plan = LogicalPlan::Sort {
                input: Box::new(plan),
                keys: self.sort_keys.clone(),
                unique: false,
            };
        }
        if let Some(offset) = self.offset {
            plan = LogicalPlan::Offset {
                input: Box::new(plan),
                offset,
            };
        }
        if let Some(limit) = self.limit {
            plan = LogicalPlan::Limit {
                input: Box::new(plan),
                limit,
            };
        }
        plan
    }

    fn aggregate_plan(self, op: AggregateType, column: Option<String>) -> LogicalPlan {
        // row-shaping steps (limit/offset/distinct) change what the
        // aggregate sees, so they stay beneath it
        let mut plan = self.base_plan();
        if self.distinct {
            if let Some(columns) = &self.projection {
                plan = LogicalPlan::Project {
                    input: Box::new(plan),
                    columns: columns.clone(),
                };
            }
            plan = LogicalPlan::Distinct {
                input: Box::new(plan),
            };
        }
        if !self.sort_keys.is_empty() {
            plan = LogicalPlan::Sort {
                input: Box::new(plan),
                keys: self.sort_keys.clone(),
                unique: false,
            };
        }
        if let Some(offset) = self.offset {
            plan = LogicalPlan::Offset {
                input: Box::new(plan),
                offset,
            };
        }
        if let Some(limit) = self.limit {
            plan = LogicalPlan::Limit {
                input: Box::new(plan),
                limit,
            };
        }
        LogicalPlan::Aggregate {
            input: Box::new(plan),
            op,
            column,
        }
    }
}

/// A grouped aggregation under construction.
#[derive(Debug, Clone)]
pub struct GroupedQuery<'a> {
    query: Query<'a>,
    key: String,
    aggregates: Vec<AggregateSpec>,
    having: Option<Predicate>,
}

impl GroupedQuery<'_> {
    /// `COUNT(*)` per group, emitted as `output`.
    pub fn count(mut self, output: impl Into<String>) -> Self {
        self.aggregates.push(AggregateSpec {
            output: output.into(),
            op: AggregateType::Count,
            column: None,
        });
        self
    }

    pub fn sum(self, column: impl Into<String>, output: impl Into<String>) -> Self {
        self.push(AggregateType::Sum, column, output)
    }

    pub fn avg(self, column: impl Into<String>, output: impl Into<String>) -> Self {
        self.push(AggregateType::Avg, column, output)
    }

    pub fn min(self, column: impl Into<String>, output: impl Into<String>) -> Self {
        self.push(AggregateType::Min, column, output)
    }

    pub fn max(self, column: impl Into<String>, output: impl Into<String>) -> Self {
        self.push(AggregateType::Max, column, output)
    }

    fn push(
        mut self,
        op: AggregateType,
        column: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.aggregates.push(AggregateSpec {
            output: output.into(),
            op,
            column: Some(column.into()),
        });
        self
    }

    /// Filter groups on the key (the HAVING subset).
    pub fn having(mut self, predicate: Predicate) -> Self {
        self.having = Some(match self.having.take() {
            None => predicate,
            Some(existing) => existing.and(predicate),
        });
        self
    }

    /// Run the grouped aggregation.
    pub fn collect(self) -> Result<GroupsOutput> {
        let engine = self.query.engine;
        let mut plan = LogicalPlan::GroupBy {
            input: Box::new(self.query.base_plan()),
            key: self.key,
            aggregates: self.aggregates,
        };
        if let Some(predicate) = self.having {
            plan = LogicalPlan::GroupFilter {
                input: Box::new(plan),
                predicate,
            };
        }
        if !self.query.sort_keys.is_empty() {
            plan = LogicalPlan::Sort {
                input: Box::new(plan),
                keys: self.query.sort_keys.clone(),
                unique: false,
            };
        }
        if let Some(offset) = self.query.offset {
            plan = LogicalPlan::Offset {
                input: Box::new(plan),
                offset,
            };
        }
        if let Some(limit) = self.query.limit {
            plan = LogicalPlan::Limit {
                input: Box::new(plan),
                limit,
            };
        }

        match engine.run(plan)? {
            QueryOutput::Groups(groups) => Ok(groups),
            other => unreachable!("grouped plan produced {:?}", other),
        }
    }
}
