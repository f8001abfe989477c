//! Glob expressions in the two dialects used by the exporter.
//!
//! - [`Pattern::new`] is the shell dialect for names that are not paths
//!   (secret data keys, subject CNs, aliases): `*`, `?` and `[...]` classes
//!   as understood by the `glob` crate. Wildcards never cross a `/`.
//! - [`Pattern::recursive`] is the path dialect for filesystem discovery and
//!   password specs. It is compiled with `globset` and additionally accepts
//!   `**` for any number of directories, `{a,b}` alternation and `\` escapes.

use std::fmt;

use globset::GlobBuilder;

use crate::error::ExportError;

const META: [char; 5] = ['*', '?', '[', '{', '\\'];

const SEGMENT_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Returns the byte offset of the first glob meta character in `expr`.
pub fn first_meta(expr: &str) -> Option<usize> {
    expr.find(META)
}

#[derive(Clone)]
enum Matcher {
    Segment(glob::Pattern),
    Recursive(globset::GlobMatcher),
}

/// A compiled glob expression.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    matcher: Matcher,
}

impl Pattern {
    /// Compiles a shell-style glob (`*`, `?`, `[...]`).
    pub fn new(expr: &str) -> Result<Self, ExportError> {
        let pattern = glob::Pattern::new(expr).map_err(|e| invalid(expr, e))?;
        Ok(Pattern {
            source: expr.to_string(),
            matcher: Matcher::Segment(pattern),
        })
    }

    /// Compiles a path glob that also accepts `**`, `{a,b}` and `\` escapes.
    pub fn recursive(expr: &str) -> Result<Self, ExportError> {
        let glob = GlobBuilder::new(expr)
            .literal_separator(true)
            .backslash_escape(true)
            .empty_alternates(true)
            .build()
            .map_err(|e| invalid(expr, e))?;
        Ok(Pattern {
            source: expr.to_string(),
            matcher: Matcher::Recursive(glob.compile_matcher()),
        })
    }

    /// Whether the whole of `candidate` matches.
    pub fn matches(&self, candidate: &str) -> bool {
        match &self.matcher {
            Matcher::Segment(pattern) => pattern.matches_with(candidate, SEGMENT_OPTIONS),
            Matcher::Recursive(matcher) => matcher.is_match(candidate),
        }
    }

    /// The expression this pattern was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn invalid(expr: &str, reason: impl fmt::Display) -> ExportError {
    ExportError::InvalidGlob {
        pattern: expr.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
