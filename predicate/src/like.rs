//! LIKE pattern parsing and matching.
//!
//! The dialect supports a leading wildcard, a trailing wildcard, or both;
//! `\%` escapes a literal percent and `\\` a literal backslash. A `%` in
//! the middle of the pattern is rejected.

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "LIKE pattern {:?} has a wildcard in the middle; only prefix/suffix wildcards are supported",
        pattern
    ))]
    InteriorWildcard { pattern: String },

    #[snafu(display("LIKE pattern {:?} ends in a dangling escape", pattern))]
    DanglingEscape { pattern: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A parsed LIKE pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikePattern {
    /// No wildcards: exact match.
    Exact(String),
    /// `needle%`
    Prefix(String),
    /// `%needle`
    Suffix(String),
    /// `%needle%`
    Contains(String),
}

impl LikePattern {
    /// Parse the SQL-level pattern text.
    pub fn parse(pattern: &str) -> Result<Self> {
        // unescape, tracking where unescaped wildcards sit
        let mut needle = String::with_capacity(pattern.len());
        let mut wildcards = vec![];
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(esc @ ('%' | '\\')) => needle.push(esc),
                    Some(other) => {
                        needle.push('\\');
                        needle.push(other);
                    }
                    None => return DanglingEscapeSnafu { pattern }.fail(),
                },
                '%' => wildcards.push(needle.len()),
                c => needle.push(c),
            }
        }

        let leading = wildcards.first() == Some(&0);
        let trailing = wildcards.last() == Some(&needle.len());
        let interior = wildcards
            .iter()
            .any(|&pos| pos != 0 && pos != needle.len());
        // `%` both leading and trailing over an empty needle is fine ("%")
        if interior || wildcards.len() > 2 {
            return InteriorWildcardSnafu { pattern }.fail();
        }

        Ok(match (leading, trailing) {
            (true, true) => Self::Contains(needle),
            (true, false) => Self::Suffix(needle),
            (false, true) => Self::Prefix(needle),
            (false, false) => Self::Exact(needle),
        })
    }

    /// Whether `value` matches the pattern.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(needle) => value == needle,
            Self::Prefix(needle) => value.starts_with(needle),
            Self::Suffix(needle) => value.ends_with(needle),
            Self::Contains(needle) => value.contains(needle),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_shapes() {
        assert_eq!(LikePattern::parse("abc").unwrap(), LikePattern::Exact("abc".into()));
        assert_eq!(LikePattern::parse("a%").unwrap(), LikePattern::Prefix("a".into()));
        assert_eq!(LikePattern::parse("%c").unwrap(), LikePattern::Suffix("c".into()));
        assert_eq!(LikePattern::parse("%b%").unwrap(), LikePattern::Contains("b".into()));
        assert_eq!(LikePattern::parse("%").unwrap(), LikePattern::Contains("".into()));
    }

    #[test]
    fn escapes() {
        assert_eq!(
            LikePattern::parse(r"100\%").unwrap(),
            LikePattern::Exact("100%".into())
        );
        assert_eq!(
            LikePattern::parse(r"100\%%").unwrap(),
            LikePattern::Prefix("100%".into())
        );
        assert_eq!(
            LikePattern::parse(r"a\\b").unwrap(),
            LikePattern::Exact(r"a\b".into())
        );
        assert!(matches!(
            LikePattern::parse(r"oops\"),
            Err(Error::DanglingEscape { .. })
        ));
    }

    #[test]
    fn interior_wildcard_rejected() {
        assert!(matches!(
            LikePattern::parse("a%b"),
            Err(Error::InteriorWildcard { .. })
        ));
        assert!(matches!(
            LikePattern::parse("%a%b%"),
            Err(Error::InteriorWildcard { .. })
        ));
    }

    #[test]
    fn matching() {
        assert!(LikePattern::parse("Al%").unwrap().matches("Alice"));
        assert!(!LikePattern::parse("Al%").unwrap().matches("Bob"));
        assert!(LikePattern::parse("%ce").unwrap().matches("Alice"));
        assert!(LikePattern::parse("%lic%").unwrap().matches("Alice"));
        assert!(LikePattern::parse("Alice").unwrap().matches("Alice"));
        assert!(LikePattern::parse("%").unwrap().matches(""));
        assert!(LikePattern::parse(r"100\%").unwrap().matches("100%"));
        assert!(!LikePattern::parse(r"100\%").unwrap().matches("1000"));
    }
}
