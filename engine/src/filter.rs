//! Filter predicate compilation.
//!
//! The engine never interprets pattern syntax itself: glob specs are
//! compiled through `globset` and regex specs through `regex`. Compiled
//! matchers are plain predicates over job-relative paths.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;

use crate::error::SyncError;

/// A filter specification as supplied by the caller: one or more glob
/// patterns, or a regular expression.
#[derive(Debug, Clone)]
pub enum FilterSpec {
    Globs(Vec<String>),
    Regex(String),
}

impl FilterSpec {
    pub fn glob(pattern: impl Into<String>) -> Self {
        Self::Globs(vec![pattern.into()])
    }

    pub fn globs<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Globs(patterns.into_iter().map(Into::into).collect())
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::Regex(pattern.into())
    }

    /// Compile into a reusable predicate. Glob `*` does not cross path
    /// separators; use `**` to match across directories.
    pub fn compile(&self) -> Result<Matcher, SyncError> {
        match self {
            Self::Globs(patterns) => {
                let mut builder = GlobSetBuilder::new();
                for pattern in patterns {
                    let glob = GlobBuilder::new(pattern)
                        .literal_separator(true)
                        .build()
                        .map_err(|e| SyncError::Pattern {
                            pattern: pattern.clone(),
                            message: e.to_string(),
                        })?;
                    builder.add(glob);
                }
                let set = builder.build().map_err(|e| SyncError::Pattern {
                    pattern: patterns.join(","),
                    message: e.to_string(),
                })?;
                Ok(Matcher::Globs(set))
            }
            Self::Regex(pattern) => {
                let regex = Regex::new(pattern).map_err(|e| SyncError::Pattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
                Ok(Matcher::Regex(regex))
            }
        }
    }
}

/// Compiled filter predicate.
#[derive(Debug, Clone)]
pub enum Matcher {
    Globs(GlobSet),
    Regex(Regex),
}

impl Matcher {
    pub fn is_match(&self, relative_path: &str) -> bool {
        match self {
            Self::Globs(set) => set.is_match(relative_path),
            Self::Regex(regex) => regex.is_match(relative_path),
        }
    }
}
