//! Comparison operators.

use std::fmt::Display;

/// The comparison applied between a column and a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    GT,
    GTE,
    LT,
    LTE,
    /// String pattern match; wildcards at prefix and/or suffix only.
    Like,
}

impl Operator {
    /// Whether the operator is an ordering comparison.
    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::GT | Self::GTE | Self::LT | Self::LTE)
    }

    /// Evaluate the operator over an ordering result.
    pub fn eval_ordering(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Equal => ordering == Equal,
            Self::NotEqual => ordering != Equal,
            Self::GT => ordering == Greater,
            Self::GTE => ordering != Less,
            Self::LT => ordering == Less,
            Self::LTE => ordering != Greater,
            Self::Like => panic!("LIKE is not an ordering operator"),
        }
    }
}

impl TryFrom<&str> for Operator {
    type Error = String;

    fn try_from(op: &str) -> Result<Self, Self::Error> {
        match op {
            "=" => Ok(Self::Equal),
            "!=" | "<>" => Ok(Self::NotEqual),
            ">" => Ok(Self::GT),
            ">=" => Ok(Self::GTE),
            "<" => Ok(Self::LT),
            "<=" => Ok(Self::LTE),
            "like" | "LIKE" => Ok(Self::Like),
            v => Err(format!("unknown operator {:?}", v)),
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::GT => write!(f, ">"),
            Self::GTE => write!(f, ">="),
            Self::LT => write!(f, "<"),
            Self::LTE => write!(f, "<="),
            Self::Like => write!(f, "LIKE"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn from_str() {
        assert_eq!(Operator::try_from(">").unwrap(), Operator::GT);
        assert_eq!(Operator::try_from("<>").unwrap(), Operator::NotEqual);
        assert!(Operator::try_from("~").is_err());
    }

    #[test]
    fn ordering_eval() {
        assert!(Operator::GTE.eval_ordering(Ordering::Equal));
        assert!(Operator::GTE.eval_ordering(Ordering::Greater));
        assert!(!Operator::GT.eval_ordering(Ordering::Equal));
        assert!(Operator::NotEqual.eval_ordering(Ordering::Less));
        assert!(!Operator::Equal.eval_ordering(Ordering::Less));
    }
}
