//! Plan execution.
//!
//! The executor walks an annotated physical plan against the frozen store.
//! Row survival flows through a [`selection::Bitmap`]; ordering operations
//! switch to explicit row-index vectors; grouped plans produce
//! `(key, aggregates)` rows directly. All intermediate buffers are
//! query-local and dropped when execution returns.

use aggregate::{AggregateType, SinglePassPolicy};
use frozen_store::{FrozenStore, Scalar};
use hashbrown::HashSet;
use observability_deps::tracing::debug;
use ordered_float::OrderedFloat;
use predicate::{Literal, Operator, Predicate};
use rayon::ThreadPool;
use rust_decimal::Decimal;
use selection::Bitmap;

use crate::compile::CompiledCache;
use crate::fingerprint::predicates_key;
use crate::physical::{PhysicalPlan, Strategy};
use crate::plan::{LogicalPlan, SortKey};
use crate::results::{GroupsOutput, QueryOutput, RowsOutput};
use crate::{EngineConfig, Error, Result};

pub(crate) struct ExecContext<'a> {
    pub store: &'a FrozenStore,
    pub config: &'a EngineConfig,
    pub pool: Option<&'a ThreadPool>,
    pub compiled: &'a CompiledCache,
}

/// Execute an annotated plan to completion.
pub(crate) fn execute(phys: &PhysicalPlan, ctx: &ExecContext<'_>) -> Result<QueryOutput> {
    match phys.root.as_ref() {
        LogicalPlan::Aggregate { input, op, column } => {
            execute_aggregate(input, *op, column.as_deref(), phys, ctx)
        }
        node if is_grouped(node) => Ok(QueryOutput::Groups(exec_groups(node, phys, ctx)?)),
        node => {
            let state = exec_rowset(node, phys, ctx)?;
            Ok(QueryOutput::Rows(materialize(state, ctx.store)?))
        }
    }
}

/// Row indices of a row-shaped plan, in result order.
pub(crate) fn execute_indices(phys: &PhysicalPlan, ctx: &ExecContext<'_>) -> Result<Vec<u32>> {
    let state = exec_rowset(phys.root.as_ref(), phys, ctx)?;
    Ok(state.indices)
}

fn is_grouped(plan: &LogicalPlan) -> bool {
    match plan {
        LogicalPlan::GroupBy { .. } | LogicalPlan::GroupFilter { .. } => true,
        other => other.input().map(is_grouped).unwrap_or(false),
    }
}

// ---- selections ------------------------------------------------------------

// The surviving-row bitmap of a Scan/Filter chain. Plans that reorder or
// truncate rows fall back to the row-set walk; aggregates are order
// insensitive, so a bitmap built from indices is equivalent.
fn input_selection(
    plan: &LogicalPlan,
    phys: &PhysicalPlan,
    ctx: &ExecContext<'_>,
) -> Result<Bitmap> {
    match plan {
        LogicalPlan::Scan { chunk_mask } => Ok(scan_selection(ctx.store, chunk_mask.as_deref())),
        LogicalPlan::Filter { input, predicates } => {
            let mut selection = input_selection(input, phys, ctx)?;
            apply_filter(predicates, &mut selection, phys.filter_strategy, ctx)?;
            Ok(selection)
        }
        other => {
            let state = exec_rowset(other, phys, ctx)?;
            let mut selection = Bitmap::all_clear(ctx.store.row_count());
            for &row in &state.indices {
                selection.set(row as usize);
            }
            Ok(selection)
        }
    }
}

fn scan_selection(store: &FrozenStore, chunk_mask: Option<&[bool]>) -> Bitmap {
    let mut selection = Bitmap::all_set(store.row_count());
    if let Some(mask) = chunk_mask {
        for (chunk, &keep) in mask.iter().enumerate() {
            if !keep {
                let (start, end) = store.zone_maps().chunk_bounds(chunk);
                selection.clear_range(start, end);
            }
        }
    }
    selection
}

fn apply_filter(
    predicates: &[Predicate],
    selection: &mut Bitmap,
    strategy: Strategy,
    ctx: &ExecContext<'_>,
) -> Result<()> {
    match strategy {
        Strategy::Parallel if ctx.pool.is_some() && predicates.len() > 1 => {
            // each predicate runs against its own copy of the incoming
            // selection; survivors are the intersection
            use rayon::prelude::*;
            let pool = ctx.pool.expect("checked above");
            let incoming = selection.clone();
            let store = ctx.store;
            let partials = pool.install(|| {
                predicates
                    .par_iter()
                    .map(|pred| {
                        let mut local = incoming.clone();
                        pred.evaluate(store, &mut local)?;
                        Ok(local)
                    })
                    .collect::<Result<Vec<_>, predicate::Error>>()
            })?;
            for partial in partials {
                selection
                    .and(&partial)
                    .expect("equal lengths by construction");
            }
            Ok(())
        }
        Strategy::Compiled => {
            let key = predicates_key(predicates);
            match ctx.compiled.get_or_compile(&key, ctx.store, predicates) {
                Some(filter) => {
                    filter.evaluate(ctx.store, selection);
                    Ok(())
                }
                None => {
                    // silent fallback; the interpreter is always legal
                    for pred in predicates {
                        pred.evaluate(ctx.store, selection)?;
                    }
                    Ok(())
                }
            }
        }
        _ => {
            for pred in predicates {
                pred.evaluate(ctx.store, selection)?;
            }
            Ok(())
        }
    }
}

// ---- scalar aggregates -----------------------------------------------------

fn execute_aggregate(
    input: &LogicalPlan,
    op: AggregateType,
    column: Option<&str>,
    phys: &PhysicalPlan,
    ctx: &ExecContext<'_>,
) -> Result<QueryOutput> {
    let selection = input_selection(input, phys, ctx)?;

    if op == AggregateType::Count {
        let count = match column {
            None => aggregate::count_star(&selection),
            Some(name) => {
                let (_, col) = ctx.store.column_by_name(name)?;
                aggregate::count_column(col, &selection)
            }
        };
        return Ok(QueryOutput::Scalar(Scalar::I64(count as i64)));
    }

    let name = column.ok_or_else(|| Error::Unsupported {
        message: format!("{} requires a column", op),
    })?;
    let (_, col) = ctx.store.column_by_name(name)?;

    let mode = aggregate_mode(phys.aggregate_strategy, ctx);
    debug!(op = %op, column = name, strategy = %phys.aggregate_strategy, "scalar aggregate");
    let value = match op {
        AggregateType::Sum => aggregate::sum(col, &selection, mode),
        AggregateType::Avg => aggregate::avg(col, &selection, mode),
        AggregateType::Min => aggregate::min(col, &selection, mode),
        AggregateType::Max => aggregate::max(col, &selection, mode),
        AggregateType::Count => unreachable!("handled above"),
    }?;
    Ok(QueryOutput::Scalar(value))
}

fn aggregate_mode<'a>(strategy: Strategy, ctx: &ExecContext<'a>) -> aggregate::Mode<'a> {
    match (strategy, ctx.pool) {
        (Strategy::Parallel, Some(pool)) => aggregate::Mode::Parallel {
            pool,
            chunk_rows: ctx.config.parallel_chunk_rows,
        },
        (Strategy::Sequential, _) => aggregate::Mode::Sequential,
        // Compiled has no aggregate meaning; the block kernel is the
        // closest equivalent
        _ => aggregate::Mode::Blocked,
    }
}

// ---- grouped plans ---------------------------------------------------------

fn exec_groups(
    plan: &LogicalPlan,
    phys: &PhysicalPlan,
    ctx: &ExecContext<'_>,
) -> Result<GroupsOutput> {
    match plan {
        LogicalPlan::GroupBy {
            input,
            key,
            aggregates,
        } => {
            let selection = input_selection(input, phys, ctx)?;
            let (_, key_col) = ctx.store.column_by_name(key)?;

            let groups = aggregate::group_aggregate(
                ctx.store,
                key,
                aggregates,
                &selection,
                SinglePassPolicy::default(),
            )?;

            let key_type = match key_col.logical_type() {
                schema::LogicalType::Dictionary => schema::LogicalType::Utf8,
                other => other,
            };
            let aggregate_fields = aggregates
                .iter()
                .map(|spec| {
                    let lt = match &spec.column {
                        None => schema::LogicalType::Int64,
                        Some(col) => {
                            let (idx, _) = ctx.store.column_by_name(col)?;
                            aggregate::result_type(
                                spec.op,
                                ctx.store.column(idx).logical_type(),
                            )
                        }
                    };
                    Ok((spec.output.clone(), lt))
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(GroupsOutput {
                key_field: (key.clone(), key_type),
                aggregate_fields,
                groups,
            })
        }
        LogicalPlan::GroupFilter { input, predicate } => {
            let mut output = exec_groups(input, phys, ctx)?;
            let key_name = output.key_field.0.clone();
            let mut kept = Vec::with_capacity(output.groups.len());
            for group in output.groups {
                if eval_key_predicate(predicate, &key_name, &group.key)? {
                    kept.push(group);
                }
            }
            output.groups = kept;
            Ok(output)
        }
        LogicalPlan::Sort { input, keys, .. } => {
            let mut output = exec_groups(input, phys, ctx)?;
            sort_groups(&mut output, keys)?;
            Ok(output)
        }
        LogicalPlan::Limit { input, limit } => {
            let mut output = exec_groups(input, phys, ctx)?;
            output.groups.truncate(*limit);
            Ok(output)
        }
        LogicalPlan::Offset { input, offset } => {
            let mut output = exec_groups(input, phys, ctx)?;
            output.groups.drain(..(*offset).min(output.groups.len()));
            Ok(output)
        }
        other => Err(Error::Unsupported {
            message: format!("unsupported operation over grouped rows: {}", other),
        }),
    }
}

fn sort_groups(output: &mut GroupsOutput, keys: &[SortKey]) -> Result<()> {
    // resolve each sort key to the group key or an aggregate ordinal
    enum Target {
        Key,
        Aggregate(usize),
    }
    let targets = keys
        .iter()
        .map(|key| {
            if key.column == output.key_field.0 {
                Ok((Target::Key, key.descending))
            } else if let Some(idx) = output
                .aggregate_fields
                .iter()
                .position(|(name, _)| name == &key.column)
            {
                Ok((Target::Aggregate(idx), key.descending))
            } else {
                Err(Error::UnknownColumn {
                    column: key.column.clone(),
                })
            }
        })
        .collect::<Result<Vec<_>>>()?;

    output.groups.sort_by(|a, b| {
        for (target, descending) in &targets {
            let ordering = match target {
                Target::Key => a.key.cmp_nulls_last(&b.key),
                Target::Aggregate(idx) => a.aggregates[*idx].cmp_nulls_last(&b.aggregates[*idx]),
            };
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(())
}

// HAVING filters on the group key only; anything else is out of dialect.
fn eval_key_predicate(pred: &Predicate, key_name: &str, key: &Scalar) -> Result<bool> {
    match pred {
        Predicate::Cmp(cmp) => {
            if cmp.column != key_name {
                return Err(Error::Unsupported {
                    message: format!(
                        "HAVING supports the group key only, not \"{}\"",
                        cmp.column
                    ),
                });
            }
            key_matches(cmp.op, key, &cmp.literal)
        }
        Predicate::IsNull { column, negated } => {
            if column != key_name {
                return Err(Error::Unsupported {
                    message: format!("HAVING supports the group key only, not \"{}\"", column),
                });
            }
            // null keys were dropped by grouping
            Ok(*negated)
        }
        Predicate::And(left, right) => Ok(eval_key_predicate(left, key_name, key)?
            && eval_key_predicate(right, key_name, key)?),
        Predicate::Or(left, right) => Ok(eval_key_predicate(left, key_name, key)?
            || eval_key_predicate(right, key_name, key)?),
        Predicate::Not(inner) => Ok(!eval_key_predicate(inner, key_name, key)?),
    }
}

fn key_matches(op: Operator, key: &Scalar, literal: &Literal) -> Result<bool> {
    if op == Operator::Like {
        let (Scalar::Str(value), Literal::Str(pattern)) = (key, literal) else {
            return Err(Error::TypeMismatch {
                message: "LIKE requires a string group key".to_owned(),
            });
        };
        let pattern =
            predicate::like::LikePattern::parse(pattern).map_err(|e| Error::Unsupported {
                message: e.to_string(),
            })?;
        return Ok(pattern.matches(value));
    }

    let ordering = match (key, literal) {
        (Scalar::Str(k), Literal::Str(l)) => k.as_str().cmp(l.as_str()),
        (Scalar::Bool(k), Literal::Bool(l)) => k.cmp(l),
        (Scalar::Decimal(k), _) => match literal.as_decimal() {
            Some(l) => k.cmp(&l),
            None => {
                return Err(Error::TypeMismatch {
                    message: "cannot compare decimal group key to literal".to_owned(),
                })
            }
        },
        (Scalar::F32(_) | Scalar::F64(_), _) => {
            let (Some(k), Some(l)) = (key.as_f64(), literal.as_f64()) else {
                return Err(Error::TypeMismatch {
                    message: "cannot compare float group key to literal".to_owned(),
                });
            };
            match k.partial_cmp(&l) {
                Some(ordering) => ordering,
                None => return Ok(false),
            }
        }
        _ => {
            let (Some(k), Some(l)) = (key.as_i64(), literal.as_i64()) else {
                return Err(Error::TypeMismatch {
                    message: "cannot compare group key to literal".to_owned(),
                });
            };
            k.cmp(&l)
        }
    };
    Ok(op.eval_ordering(ordering))
}

// ---- row sets --------------------------------------------------------------

struct RowState {
    indices: Vec<u32>,
    projection: Option<Vec<String>>,
}

fn exec_rowset(
    plan: &LogicalPlan,
    phys: &PhysicalPlan,
    ctx: &ExecContext<'_>,
) -> Result<RowState> {
    match plan {
        LogicalPlan::Scan { .. } | LogicalPlan::Filter { .. } => {
            let selection = input_selection(plan, phys, ctx)?;
            Ok(RowState {
                indices: selection.iter_set().map(|i| i as u32).collect(),
                projection: None,
            })
        }
        LogicalPlan::Project { input, columns } => {
            for column in columns {
                if !ctx.store.schema().contains(column) {
                    return Err(Error::UnknownColumn {
                        column: column.clone(),
                    });
                }
            }
            let mut state = exec_rowset(input, phys, ctx)?;
            state.projection = Some(columns.clone());
            Ok(state)
        }
        LogicalPlan::Distinct { input } => {
            let mut state = exec_rowset(input, phys, ctx)?;
            dedupe(&mut state, ctx.store);
            Ok(state)
        }
        LogicalPlan::Sort { input, keys, unique } => {
            let mut state = exec_rowset(input, phys, ctx)?;
            sort_rows(&mut state, keys, ctx.store)?;
            if *unique {
                dedupe(&mut state, ctx.store);
            }
            Ok(state)
        }
        LogicalPlan::Limit { input, limit } => {
            let mut state = exec_rowset(input, phys, ctx)?;
            state.indices.truncate(*limit);
            Ok(state)
        }
        LogicalPlan::Offset { input, offset } => {
            let mut state = exec_rowset(input, phys, ctx)?;
            state
                .indices
                .drain(..(*offset).min(state.indices.len()));
            Ok(state)
        }
        other => Err(Error::Unsupported {
            message: format!("cannot materialize rows from: {}", other),
        }),
    }
}

fn sort_rows(state: &mut RowState, keys: &[SortKey], store: &FrozenStore) -> Result<()> {
    let columns = keys
        .iter()
        .map(|key| {
            let (idx, _) = store.column_by_name(&key.column)?;
            Ok((idx, key.descending))
        })
        .collect::<Result<Vec<_>>>()?;

    // stable sort keeps the incoming order for ties
    state.indices.sort_by(|&a, &b| {
        for &(col, descending) in &columns {
            let column = store.column(col);
            let ordering = column
                .scalar_at(a as usize)
                .cmp_nulls_last(&column.scalar_at(b as usize));
            let ordering = if descending { ordering.reverse() } else { ordering };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(())
}

// Hashable projection of one output row; `Distinct` compares projected
// values, not row identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Int(i64),
    Float(OrderedFloat<f64>),
    Dec(Decimal),
    Bool(bool),
    Str(String),
}

impl KeyPart {
    fn from_scalar(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Null => Self::Null,
            Scalar::I8(v) => Self::Int(v as i64),
            Scalar::I16(v) => Self::Int(v as i64),
            Scalar::I32(v) => Self::Int(v as i64),
            Scalar::I64(v) => Self::Int(v),
            Scalar::Date(v) => Self::Int(v as i64),
            Scalar::Timestamp { value, .. } => Self::Int(value),
            Scalar::F32(v) => Self::Float(OrderedFloat(v as f64)),
            Scalar::F64(v) => Self::Float(OrderedFloat(v)),
            Scalar::Decimal(v) => Self::Dec(v),
            Scalar::Bool(v) => Self::Bool(v),
            Scalar::Str(v) => Self::Str(v),
        }
    }
}

fn dedupe(state: &mut RowState, store: &FrozenStore) {
    let columns = projected_ordinals(state, store);
    let mut seen = HashSet::with_capacity(state.indices.len());
    state.indices.retain(|&row| {
        let key = columns
            .iter()
            .map(|&col| KeyPart::from_scalar(store.column(col).scalar_at(row as usize)))
            .collect::<Vec<_>>();
        seen.insert(key)
    });
}

fn projected_ordinals(state: &RowState, store: &FrozenStore) -> Vec<usize> {
    match &state.projection {
        Some(columns) => columns
            .iter()
            .filter_map(|name| store.schema().index_of(name))
            .collect(),
        None => (0..store.schema().len()).collect(),
    }
}

fn materialize(state: RowState, store: &FrozenStore) -> Result<RowsOutput> {
    let ordinals = projected_ordinals(&state, store);
    let fields = ordinals
        .iter()
        .map(|&idx| {
            let field = store.schema().field(idx);
            let lt = match field.logical_type() {
                schema::LogicalType::Dictionary => schema::LogicalType::Utf8,
                other => other,
            };
            (field.name().to_owned(), lt)
        })
        .collect();

    let rows = state
        .indices
        .iter()
        .map(|&row| {
            ordinals
                .iter()
                .map(|&col| store.column(col).scalar_at(row as usize))
                .collect()
        })
        .collect();

    Ok(RowsOutput { fields, rows })
}

// ---- streaming terminals ---------------------------------------------------

// `Any` streams chunk by chunk with an early exit; it never materializes
// the full survivor set.
pub(crate) fn execute_any(
    predicates: &[Predicate],
    chunk_mask: Option<&[bool]>,
    ctx: &ExecContext<'_>,
) -> Result<bool> {
    Ok(first_matching_row(predicates, chunk_mask, ctx)?.is_some())
}

// First surviving row in store order, streaming chunk by chunk.
pub(crate) fn first_matching_row(
    predicates: &[Predicate],
    chunk_mask: Option<&[bool]>,
    ctx: &ExecContext<'_>,
) -> Result<Option<usize>> {
    let store = ctx.store;
    let num_chunks = store.zone_maps().num_chunks();

    for chunk in 0..num_chunks {
        if let Some(mask) = chunk_mask {
            if !mask[chunk] {
                continue;
            }
        }
        let (start, end) = store.zone_maps().chunk_bounds(chunk);
        let mut selection = Bitmap::all_clear(store.row_count());
        selection.set_range(start, end);
        for pred in predicates {
            pred.evaluate(store, &mut selection)?;
            if !selection.any() {
                break;
            }
        }
        if let Some(row) = selection.first_set() {
            debug!(chunk, row, "streaming terminal matched");
            return Ok(Some(row));
        }
    }
    Ok(None)
}
