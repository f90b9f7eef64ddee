//! Typed column predicates evaluated into selection bitmaps.
//!
//! A [`Predicate`] is a closed tree of typed comparisons over single
//! columns, null tests and the compound combinators And/Or/Not. Evaluation
//! restricts a [`selection::Bitmap`] in place, so chained filters are
//! cumulative and the selection shrinks monotonically.
//!
//! Null semantics: a comparison never selects a null row; [`Predicate::
//! is_null`] is the only selector of nulls. `Or` evaluates each side
//! against a copy of the incoming selection and combines as
//! `incoming AND (left OR right)`; `Not` intersects the complement of its
//! inner result with the incoming selection. There is no single-row
//! evaluator; the batch contract is the only contract.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod cmp;
mod eval;
pub mod like;
mod literal;
mod prune;

pub use cmp::Operator;
pub use literal::Literal;
pub use prune::prune_chunks;

use std::collections::BTreeSet;
use std::fmt::Display;

use frozen_store::FrozenStore;
use schema::Schema;
use selection::Bitmap;
use snafu::{ensure, IntoError, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("column \"{}\" does not exist", column))]
    UnknownColumn { column: String },

    #[snafu(display(
        "cannot compare column \"{}\" of type {} to {}",
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
        "selection covers {} rows but the store has {}",
        actual,
        expected
    ))]
    SelectionLength { expected: usize, actual: usize },

    #[snafu(display("unsupported LIKE pattern on column \"{}\": {}", column, source))]
    UnsupportedLike {
        column: String,
        source: like::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One comparison between a column and a literal.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnCmp {
    pub column: String,
    pub op: Operator,
    pub literal: Literal,
}

impl Display for ColumnCmp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.column, self.op, self.literal)
    }
}

/// A predicate tree over one store's columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Cmp(ColumnCmp),
    IsNull { column: String, negated: bool },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// `column <op> literal`
    pub fn cmp(column: impl Into<String>, op: Operator, literal: impl Into<Literal>) -> Self {
        Self::Cmp(ColumnCmp {
            column: column.into(),
            op,
            literal: literal.into(),
        })
    }

    /// `column IS NULL`
    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull {
            column: column.into(),
            negated: false,
        }
    }

    /// `column IS NOT NULL`
    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNull {
            column: column.into(),
            negated: true,
        }
    }

    pub fn and(self, other: Self) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Self) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Check every comparison in the tree against the schema without
    /// touching data. Run by plan construction so evaluation can assume
    /// well-typed predicates.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        match self {
            Self::Cmp(cmp) => {
                let field = schema
                    .field_by_name(&cmp.column)
                    .ok_or_else(|| UnknownColumnSnafu { column: &cmp.column }.build())?;
                ensure!(
                    cmp.literal.compatible_with(field.logical_type(), cmp.op),
                    TypeMismatchSnafu {
                        column: &cmp.column,
                        expected: field.logical_type().to_string(),
                        actual: cmp.literal.to_string(),
                    }
                );
                if cmp.op == Operator::Like {
                    let pattern = cmp.literal.as_str().expect("LIKE literal is a string");
                    like::LikePattern::parse(pattern).map_err(|source| {
                        UnsupportedLikeSnafu {
                            column: cmp.column.clone(),
                        }
                        .into_error(source)
                    })?;
                }
                Ok(())
            }
            Self::IsNull { column, .. } => {
                ensure!(schema.contains(column), UnknownColumnSnafu { column });
                Ok(())
            }
            Self::And(left, right) | Self::Or(left, right) => {
                left.validate(schema)?;
                right.validate(schema)
            }
            Self::Not(inner) => inner.validate(schema),
        }
    }

    /// Restrict `selection` in place to the rows satisfying this predicate.
    ///
    /// The selection must cover exactly the store's rows. Survivors are a
    /// subset of the incoming selection.
    pub fn evaluate(&self, store: &FrozenStore, selection: &mut Bitmap) -> Result<()> {
        ensure!(
            selection.len() == store.row_count(),
            SelectionLengthSnafu {
                expected: store.row_count(),
                actual: selection.len(),
            }
        );
        self.evaluate_inner(store, selection)
    }

    fn evaluate_inner(&self, store: &FrozenStore, selection: &mut Bitmap) -> Result<()> {
        match self {
            Self::Cmp(cmp) => eval::eval_cmp(cmp, store, selection),
            Self::IsNull { column, negated } => {
                let (_, col) = store
                    .column_by_name(column)
                    .map_err(|_| UnknownColumnSnafu { column }.build())?;
                match (col.validity(), negated) {
                    // nulls are the cleared validity bits
                    (Some(validity), false) => selection
                        .and_not(validity)
                        .expect("validity covers the store's rows"),
                    (Some(validity), true) => selection
                        .and(validity)
                        .expect("validity covers the store's rows"),
                    // no validity bitmap: the column holds no nulls
                    (None, false) => selection.clear_range(0, selection.len()),
                    (None, true) => {}
                }
                Ok(())
            }
            Self::And(left, right) => {
                left.evaluate_inner(store, selection)?;
                right.evaluate_inner(store, selection)
            }
            Self::Or(left, right) => {
                let mut left_sel = selection.clone();
                left.evaluate_inner(store, &mut left_sel)?;
                let mut right_sel = selection.clone();
                right.evaluate_inner(store, &mut right_sel)?;
                left_sel.or(&right_sel).expect("equal lengths by construction");
                selection.and(&left_sel).expect("equal lengths by construction");
                Ok(())
            }
            Self::Not(inner) => {
                let mut inner_sel = selection.clone();
                inner.evaluate_inner(store, &mut inner_sel)?;
                selection
                    .and_not(&inner_sel)
                    .expect("equal lengths by construction");
                Ok(())
            }
        }
    }

    /// Collect the column names the predicate references.
    pub fn columns(&self, dst: &mut BTreeSet<String>) {
        match self {
            Self::Cmp(cmp) => {
                dst.insert(cmp.column.clone());
            }
            Self::IsNull { column, .. } => {
                dst.insert(column.clone());
            }
            Self::And(left, right) | Self::Or(left, right) => {
                left.columns(dst);
                right.columns(dst);
            }
            Self::Not(inner) => inner.columns(dst),
        }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cmp(cmp) => write!(f, "{}", cmp),
            Self::IsNull { column, negated } => {
                write!(f, "{} IS {}NULL", column, if *negated { "NOT " } else { "" })
            }
            Self::And(l, r) => write!(f, "({} AND {})", l, r),
            Self::Or(l, r) => write!(f, "({} OR {})", l, r),
            Self::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}
