use regex::Regex;

use crate::error::{GateError, Result};

/// Kind of a matching rule. Variants are declared from most to least
/// specific, so the derived ordering sorts the strongest kind first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchKind {
    Exact,
    Prefix,
    Pattern,
}

/// A single predicate over a fully-qualified method name
/// (`/package.Service/Method`).
#[derive(Debug, Clone)]
pub enum Rule {
    Exact(String),
    Prefix(String),
    Pattern(Regex),
}

impl Rule {
    pub fn exact(method: impl Into<String>) -> Self {
        Rule::Exact(method.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Rule::Prefix(prefix.into())
    }

    /// Compile a pattern rule. Invalid syntax is a configuration error.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Rule::Pattern)
            .map_err(|source| GateError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn kind(&self) -> MatchKind {
        match self {
            Rule::Exact(_) => MatchKind::Exact,
            Rule::Prefix(_) => MatchKind::Prefix,
            Rule::Pattern(_) => MatchKind::Pattern,
        }
    }

    /// Returns the match length when the rule matches `full_method`.
    ///
    /// Exact and prefix rules report the length of their own text; pattern
    /// rules report the length of the leftmost matched span.
    pub fn matches(&self, full_method: &str) -> Option<usize> {
        match self {
            Rule::Exact(method) => (full_method == method).then_some(method.len()),
            Rule::Prefix(prefix) => full_method.starts_with(prefix.as_str()).then_some(prefix.len()),
            Rule::Pattern(re) => re.find(full_method).map(|m| m.end() - m.start()),
        }
    }
}
