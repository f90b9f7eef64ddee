//! SQL front-end.
//!
//! Parses the supported dialect with `sqlparser` and lowers the statement
//! onto the same [`LogicalPlan`] nodes the chainable surface emits, so both
//! front-ends share the optimizer, plan cache and executor.
//!
//! Supported: `SELECT [DISTINCT] { * | col [AS alias] | agg(col|*) } FROM t
//! [WHERE expr] [GROUP BY col] [HAVING key-expr] [ORDER BY col [ASC|DESC],…]
//! [LIMIT n] [OFFSET n]` with `AND`/`OR`/`NOT`, the six comparisons,
//! `LIKE`, `IS [NOT] NULL`, and integer / float / decimal / string /
//! boolean / ISO-8601 date and timestamp literals. Joins, subqueries and
//! set operations are rejected with `Unsupported`; malformed input is a
//! `Parse` error carrying the parser's message.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use aggregate::{AggregateSpec, AggregateType};
use chrono::{NaiveDate, NaiveDateTime};
use observability_deps::tracing::debug;
use predicate::{Literal, Operator, Predicate};
use query_engine::{Engine, Error, LogicalPlan, QueryOutput, Result, SortKey};
use rust_decimal::Decimal;
use schema::{LogicalType, Schema, TimeUnit};
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, Ident, Offset as SqlOffset, OrderByExpr,
    Query as SqlQuery, Select, SelectItem, SetExpr, Statement, TableFactor, UnaryOperator, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Parse `sql` and execute it against `engine`.
pub fn execute_sql(engine: &Engine, sql: &str) -> Result<QueryOutput> {
    let plan = plan_sql(engine.store().schema(), sql)?;
    debug!(%plan, "lowered SQL statement");
    engine.run(plan)
}

/// Parse `sql` against `schema` into a logical plan.
pub fn plan_sql(schema: &Schema, sql: &str) -> Result<LogicalPlan> {
    let mut statements = Parser::parse_sql(&GenericDialect {}, sql).map_err(|e| Error::Parse {
        message: e.to_string(),
    })?;

    if statements.len() != 1 {
        return Err(Error::Parse {
            message: format!("expected one statement, found {}", statements.len()),
        });
    }

    let query = match statements.remove(0) {
        Statement::Query(query) => *query,
        other => {
            return Err(Error::Unsupported {
                message: format!("only SELECT is supported, not {}", other),
            })
        }
    };
    let SqlQuery {
        with,
        body,
        order_by,
        limit,
        offset,
        ..
    } = query;

    if with.is_some() {
        return Err(Error::Unsupported {
            message: "common table expressions are not supported".to_owned(),
        });
    }

    let select = match *body {
        SetExpr::Select(select) => select,
        SetExpr::Query(_) => {
            return Err(Error::Unsupported {
                message: "subqueries are not supported".to_owned(),
            })
        }
        _ => {
            return Err(Error::Unsupported {
                message: "set operations are not supported".to_owned(),
            })
        }
    };

    check_from(&select)?;

    let projection = lower_projection(&select)?;
    let mut plan = LogicalPlan::scan();

    if let Some(filter) = &select.selection {
        plan = LogicalPlan::Filter {
            input: Box::new(plan),
            predicates: vec![expr_to_predicate(schema, filter)?],
        };
    }

    let group_key = lower_group_by(&select)?;
    match (&group_key, projection.aggregates.is_empty()) {
        (Some(key), _) => {
            // grouped: plain projected columns must be the key itself
            for column in &projection.columns {
                if column != key {
                    return Err(Error::Unsupported {
                        message: format!(
                            "column \"{}\" must appear in GROUP BY or inside an aggregate",
                            column
                        ),
                    });
                }
            }
            plan = LogicalPlan::GroupBy {
                input: Box::new(plan),
                key: key.clone(),
                aggregates: projection.aggregates,
            };
            if let Some(having) = &select.having {
                plan = LogicalPlan::GroupFilter {
                    input: Box::new(plan),
                    predicate: expr_to_predicate(schema, having)?,
                };
            }
        }
        (None, false) => {
            if select.having.is_some() {
                return Err(Error::Unsupported {
                    message: "HAVING requires GROUP BY".to_owned(),
                });
            }
            if projection.aggregates.len() != 1 || !projection.columns.is_empty() {
                return Err(Error::Unsupported {
                    message: "exactly one aggregate is supported without GROUP BY".to_owned(),
                });
            }
            let spec = projection.aggregates.into_iter().next().expect("length checked");
            return finish_scalar_query(plan, spec, &order_by, limit.as_ref(), offset.as_ref());
        }
        (None, true) => {
            if select.having.is_some() {
                return Err(Error::Unsupported {
                    message: "HAVING requires GROUP BY".to_owned(),
                });
            }
            if !projection.star {
                plan = LogicalPlan::Project {
                    input: Box::new(plan),
                    columns: projection.columns,
                };
            }
        }
    }

    if select.distinct {
        plan = LogicalPlan::Distinct {
            input: Box::new(plan),
        };
    }

    let sort_keys = lower_order_by(&order_by)?;
    if !sort_keys.is_empty() {
        plan = LogicalPlan::Sort {
            input: Box::new(plan),
            keys: sort_keys,
            unique: false,
        };
    }

    if let Some(offset) = &offset {
        plan = LogicalPlan::Offset {
            input: Box::new(plan),
            offset: non_negative(&offset.value, "OFFSET")?,
        };
    }
    if let Some(limit) = &limit {
        plan = LogicalPlan::Limit {
            input: Box::new(plan),
            limit: non_negative(limit, "LIMIT")?,
        };
    }

    Ok(plan)
}

// A scalar aggregate (`SELECT COUNT(*) …`) sits above limits and offsets.
fn finish_scalar_query(
    mut plan: LogicalPlan,
    spec: AggregateSpec,
    order_by: &[OrderByExpr],
    limit: Option<&Expr>,
    offset: Option<&SqlOffset>,
) -> Result<LogicalPlan> {
    if !order_by.is_empty() {
        return Err(Error::Unsupported {
            message: "ORDER BY does not apply to a scalar aggregate".to_owned(),
        });
    }
    if let Some(offset) = offset {
        plan = LogicalPlan::Offset {
            input: Box::new(plan),
            offset: non_negative(&offset.value, "OFFSET")?,
        };
    }
    if let Some(limit) = limit {
        plan = LogicalPlan::Limit {
            input: Box::new(plan),
            limit: non_negative(limit, "LIMIT")?,
        };
    }
    Ok(LogicalPlan::Aggregate {
        input: Box::new(plan),
        op: spec.op,
        column: spec.column,
    })
}

fn check_from(select: &Select) -> Result<()> {
    if select.from.len() != 1 {
        return Err(Error::Unsupported {
            message: "exactly one FROM table is required".to_owned(),
        });
    }
    let table = &select.from[0];
    if !table.joins.is_empty() {
        return Err(Error::Unsupported {
            message: "joins are not supported".to_owned(),
        });
    }
    match &table.relation {
        TableFactor::Table { .. } => Ok(()),
        TableFactor::Derived { .. } => Err(Error::Unsupported {
            message: "subqueries are not supported".to_owned(),
        }),
        other => Err(Error::Unsupported {
            message: format!("unsupported FROM clause: {}", other),
        }),
    }
}

// What the SELECT list asks for.
struct Projection {
    star: bool,
    columns: Vec<String>,
    aggregates: Vec<AggregateSpec>,
}

fn lower_projection(select: &Select) -> Result<Projection> {
    let mut projection = Projection {
        star: false,
        columns: vec![],
        aggregates: vec![],
    };

    for item in &select.projection {
        match item {
            SelectItem::Wildcard => projection.star = true,
            SelectItem::QualifiedWildcard(_) => projection.star = true,
            SelectItem::UnnamedExpr(expr) => lower_projection_expr(expr, None, &mut projection)?,
            SelectItem::ExprWithAlias { expr, alias } => {
                lower_projection_expr(expr, Some(alias), &mut projection)?
            }
        }
    }

    Ok(projection)
}

fn lower_projection_expr(
    expr: &Expr,
    alias: Option<&Ident>,
    projection: &mut Projection,
) -> Result<()> {
    match expr {
        Expr::Identifier(ident) => {
            projection.columns.push(ident.value.clone());
            Ok(())
        }
        Expr::Function(function) => {
            let op = aggregate_op(&function.name.to_string())?;
            let column = match function.args.as_slice() {
                [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] => None,
                [FunctionArg::Unnamed(FunctionArgExpr::Expr(Expr::Identifier(ident)))] => {
                    Some(ident.value.clone())
                }
                _ => {
                    return Err(Error::Unsupported {
                        message: format!(
                            "aggregate arguments must be a column or *, got {}",
                            function
                        ),
                    })
                }
            };
            if op != AggregateType::Count && column.is_none() {
                return Err(Error::Unsupported {
                    message: format!("{}(*) is not supported", op),
                });
            }
            let output = alias.map(|a| a.value.clone()).unwrap_or_else(|| match &column {
                Some(col) => format!("{}_{}", col, op),
                None => op.to_string(),
            });
            projection.aggregates.push(AggregateSpec { output, op, column });
            Ok(())
        }
        other => Err(Error::Unsupported {
            message: format!("unsupported SELECT expression: {}", other),
        }),
    }
}

fn aggregate_op(name: &str) -> Result<AggregateType> {
    match name.to_ascii_uppercase().as_str() {
        "COUNT" => Ok(AggregateType::Count),
        "SUM" => Ok(AggregateType::Sum),
        "AVG" => Ok(AggregateType::Avg),
        "MIN" => Ok(AggregateType::Min),
        "MAX" => Ok(AggregateType::Max),
        other => Err(Error::Unsupported {
            message: format!("unsupported function {}", other),
        }),
    }
}

fn lower_group_by(select: &Select) -> Result<Option<String>> {
    match select.group_by.as_slice() {
        [] => Ok(None),
        [Expr::Identifier(ident)] => Ok(Some(ident.value.clone())),
        _ => Err(Error::Unsupported {
            message: "GROUP BY supports exactly one column".to_owned(),
        }),
    }
}

fn lower_order_by(order_by: &[OrderByExpr]) -> Result<Vec<SortKey>> {
    order_by
        .iter()
        .map(|item| match &item.expr {
            Expr::Identifier(ident) => Ok(SortKey {
                column: ident.value.clone(),
                descending: item.asc == Some(false),
            }),
            other => Err(Error::Unsupported {
                message: format!("ORDER BY supports plain columns, got {}", other),
            }),
        })
        .collect()
}

fn non_negative(expr: &Expr, clause: &str) -> Result<usize> {
    let Expr::Value(Value::Number(text, _)) = expr else {
        return Err(Error::InvalidArgument {
            message: format!("{} requires an integer literal", clause),
        });
    };
    let value: i64 = text.parse().map_err(|_| Error::InvalidArgument {
        message: format!("{} requires an integer literal, got {}", clause, text),
    })?;
    usize::try_from(value).map_err(|_| Error::InvalidArgument {
        message: format!("{} must be non-negative, got {}", clause, value),
    })
}

// ---- WHERE / HAVING lowering -----------------------------------------------

fn expr_to_predicate(schema: &Schema, expr: &Expr) -> Result<Predicate> {
    match expr {
        Expr::Nested(inner) => expr_to_predicate(schema, inner),
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => Ok(expr_to_predicate(schema, expr)?.not()),
        Expr::IsNull(inner) => Ok(Predicate::is_null(identifier(inner)?)),
        Expr::IsNotNull(inner) => Ok(Predicate::is_not_null(identifier(inner)?)),
        Expr::Like {
            negated,
            expr,
            pattern,
            escape_char,
        } => {
            if escape_char.is_some() {
                return Err(Error::Unsupported {
                    message: "custom LIKE escape characters are not supported".to_owned(),
                });
            }
            let column = identifier(expr)?;
            let Expr::Value(Value::SingleQuotedString(pattern)) = pattern.as_ref() else {
                return Err(Error::Unsupported {
                    message: "LIKE pattern must be a string literal".to_owned(),
                });
            };
            let like = Predicate::cmp(column, Operator::Like, pattern.as_str());
            Ok(if *negated { like.not() } else { like })
        }
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => Ok(expr_to_predicate(schema, left)?
                .and(expr_to_predicate(schema, right)?)),
            BinaryOperator::Or => Ok(expr_to_predicate(schema, left)?
                .or(expr_to_predicate(schema, right)?)),
            BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq => lower_comparison(schema, left, op, right),
            other => Err(Error::Unsupported {
                message: format!("unsupported operator {}", other),
            }),
        },
        other => Err(Error::Unsupported {
            message: format!("unsupported WHERE expression: {}", other),
        }),
    }
}

fn lower_comparison(
    schema: &Schema,
    left: &Expr,
    op: &BinaryOperator,
    right: &Expr,
) -> Result<Predicate> {
    // accept `col <op> literal` and the flipped `literal <op> col`
    let (column, value, flipped) = match (left, right) {
        (Expr::Identifier(ident), Expr::Value(value)) => (&ident.value, value, false),
        (Expr::Value(value), Expr::Identifier(ident)) => (&ident.value, value, true),
        _ => {
            return Err(Error::Unsupported {
                message: format!("unsupported comparison: {} {} {}", left, op, right),
            })
        }
    };

    let op = match (op, flipped) {
        (BinaryOperator::Eq, _) => Operator::Equal,
        (BinaryOperator::NotEq, _) => Operator::NotEqual,
        (BinaryOperator::Lt, false) | (BinaryOperator::Gt, true) => Operator::LT,
        (BinaryOperator::LtEq, false) | (BinaryOperator::GtEq, true) => Operator::LTE,
        (BinaryOperator::Gt, false) | (BinaryOperator::Lt, true) => Operator::GT,
        (BinaryOperator::GtEq, false) | (BinaryOperator::LtEq, true) => Operator::GTE,
        _ => unreachable!("caller restricted the operator set"),
    };

    let literal = lower_literal(schema, column, value)?;
    Ok(Predicate::cmp(column.clone(), op, literal))
}

fn identifier(expr: &Expr) -> Result<String> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        other => Err(Error::Unsupported {
            message: format!("expected a column name, got {}", other),
        }),
    }
}

// Literals lower against the column's logical type so numbers land in the
// right comparison domain and strings become dates/timestamps on temporal
// columns.
fn lower_literal(schema: &Schema, column: &str, value: &Value) -> Result<Literal> {
    let logical_type = schema
        .field_by_name(column)
        .map(|f| f.logical_type())
        .ok_or_else(|| Error::UnknownColumn {
            column: column.to_owned(),
        })?;

    match value {
        Value::Number(text, _) => lower_number(text, logical_type),
        Value::Boolean(b) => Ok(Literal::Bool(*b)),
        Value::SingleQuotedString(s) => lower_string(s, logical_type),
        Value::Null => Err(Error::Unsupported {
            message: "compare against NULL with IS [NOT] NULL".to_owned(),
        }),
        other => Err(Error::Unsupported {
            message: format!("unsupported literal {}", other),
        }),
    }
}

fn lower_number(text: &str, logical_type: LogicalType) -> Result<Literal> {
    let parse_error = || Error::Parse {
        message: format!("malformed numeric literal {}", text),
    };

    if !text.contains(['.', 'e', 'E']) {
        let int = text.parse::<i64>().map_err(|_| parse_error())?;
        // `1`/`0` double as booleans on bool columns
        if logical_type == LogicalType::Bool {
            return match int {
                0 => Ok(Literal::Bool(false)),
                1 => Ok(Literal::Bool(true)),
                _ => Err(Error::TypeMismatch {
                    message: format!("{} is not a boolean literal", int),
                }),
            };
        }
        return Ok(Literal::Int(int));
    }

    match logical_type {
        LogicalType::Decimal { .. } => {
            let decimal = text.parse::<Decimal>().map_err(|_| parse_error())?;
            Ok(Literal::Decimal(decimal))
        }
        _ => {
            let float = text.parse::<f64>().map_err(|_| parse_error())?;
            Ok(Literal::Float(float))
        }
    }
}

fn lower_string(text: &str, logical_type: LogicalType) -> Result<Literal> {
    match logical_type {
        LogicalType::Date => Ok(Literal::Date(parse_date(text)?)),
        LogicalType::Timestamp(unit) => {
            // a bare date on a timestamp column means its midnight
            if let Ok(days) = parse_date(text) {
                return Ok(Literal::Timestamp {
                    value: (days as i64) * 86_400 * unit.per_second(),
                    unit,
                });
            }
            Ok(Literal::Timestamp {
                value: parse_timestamp(text, unit)?,
                unit,
            })
        }
        _ => Ok(Literal::Str(text.to_owned())),
    }
}

fn parse_date(text: &str) -> Result<i32> {
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| Error::Parse {
        message: format!("malformed date literal {:?}", text),
    })?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch is a valid date");
    Ok((date - epoch).num_days() as i32)
}

fn parse_timestamp(text: &str, unit: TimeUnit) -> Result<i64> {
    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .ok_or_else(|| Error::Parse {
            message: format!("malformed timestamp literal {:?}", text),
        })?;

    let utc = naive.and_utc();
    Ok(match unit {
        TimeUnit::Second => utc.timestamp(),
        TimeUnit::Millisecond => utc.timestamp_millis(),
        TimeUnit::Microsecond => utc.timestamp_micros(),
        TimeUnit::Nanosecond => utc.timestamp_nanos_opt().ok_or_else(|| Error::Parse {
            message: format!("timestamp {:?} overflows nanoseconds", text),
        })?,
    })
}
