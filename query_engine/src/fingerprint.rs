//! Structural plan fingerprints.
//!
//! A fingerprint is a deterministic string encoding of the surface plan:
//! node kinds in tree order, column names, operators, literal type and
//! value, aggregate kinds, sort keys and limits. Structurally equal plans
//! share a fingerprint; plans differing only in a literal value do not.
//! The source relation contributes nothing beyond the `scan` token — the
//! cache holding the fingerprints is per store already.

use std::fmt::Write;

use predicate::{Literal, Predicate};

use crate::plan::LogicalPlan;

/// Fingerprint `plan` for the plan cache and the adaptive tracker.
pub fn fingerprint(plan: &LogicalPlan) -> String {
    let mut out = String::with_capacity(64);
    write_plan(&mut out, plan);
    out
}

/// Fingerprint a bare predicate list; keys the compiled-filter cache.
pub(crate) fn predicates_key(predicates: &[Predicate]) -> String {
    let mut out = String::with_capacity(32);
    for (i, pred) in predicates.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_predicate(&mut out, pred);
    }
    out
}

fn write_plan(out: &mut String, plan: &LogicalPlan) {
    match plan {
        LogicalPlan::Scan { .. } => out.push_str("scan"),
        LogicalPlan::Filter { input, predicates } => {
            out.push_str("filter(");
            for (i, pred) in predicates.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_predicate(out, pred);
            }
            out.push_str(")<");
            write_plan(out, input);
            out.push('>');
        }
        LogicalPlan::Project { input, columns } => {
            let _ = write!(out, "project({})<", columns.join(","));
            write_plan(out, input);
            out.push('>');
        }
        LogicalPlan::GroupBy {
            input,
            key,
            aggregates,
        } => {
            let _ = write!(out, "group({};", key);
            for (i, agg) in aggregates.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(
                    out,
                    "{}:{}({})",
                    agg.output,
                    agg.op,
                    agg.column.as_deref().unwrap_or("*")
                );
            }
            out.push_str(")<");
            write_plan(out, input);
            out.push('>');
        }
        LogicalPlan::GroupFilter { input, predicate } => {
            out.push_str("having(");
            write_predicate(out, predicate);
            out.push_str(")<");
            write_plan(out, input);
            out.push('>');
        }
        LogicalPlan::Aggregate { input, op, column } => {
            let _ = write!(out, "agg({}:{})<", op, column.as_deref().unwrap_or("*"));
            write_plan(out, input);
            out.push('>');
        }
        LogicalPlan::Distinct { input } => {
            out.push_str("distinct<");
            write_plan(out, input);
            out.push('>');
        }
        LogicalPlan::Sort { input, keys, unique } => {
            let _ = write!(out, "sort{}(", if *unique { "u" } else { "" });
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}{}", key.column, if key.descending { "-" } else { "+" });
            }
            out.push_str(")<");
            write_plan(out, input);
            out.push('>');
        }
        LogicalPlan::Limit { input, limit } => {
            let _ = write!(out, "limit({})<", limit);
            write_plan(out, input);
            out.push('>');
        }
        LogicalPlan::Offset { input, offset } => {
            let _ = write!(out, "offset({})<", offset);
            write_plan(out, input);
            out.push('>');
        }
    }
}

fn write_predicate(out: &mut String, pred: &Predicate) {
    match pred {
        Predicate::Cmp(cmp) => {
            let _ = write!(out, "{}{}", cmp.column, cmp.op);
            write_literal(out, &cmp.literal);
        }
        Predicate::IsNull { column, negated } => {
            let _ = write!(out, "{} is{}null", column, if *negated { "not" } else { "" });
        }
        Predicate::And(left, right) => {
            out.push_str("and[");
            write_predicate(out, left);
            out.push(';');
            write_predicate(out, right);
            out.push(']');
        }
        Predicate::Or(left, right) => {
            out.push_str("or[");
            write_predicate(out, left);
            out.push(';');
            write_predicate(out, right);
            out.push(']');
        }
        Predicate::Not(inner) => {
            out.push_str("not[");
            write_predicate(out, inner);
            out.push(']');
        }
    }
}

// Literals encode as (type, value); `{:?}` on strings escapes delimiters so
// distinct values cannot collide.
fn write_literal(out: &mut String, literal: &Literal) {
    let _ = match literal {
        Literal::Int(v) => write!(out, "i:{}", v),
        Literal::Float(v) => write!(out, "f:{}", v.to_bits()),
        Literal::Decimal(v) => write!(out, "d:{}", v),
        Literal::Bool(v) => write!(out, "b:{}", v),
        Literal::Str(v) => write!(out, "s:{:?}", v),
        Literal::Date(v) => write!(out, "dt:{}", v),
        Literal::Timestamp { value, unit } => write!(out, "ts:{}@{}", value, unit),
    };
}
