//! Filesystem discovery of certificate files from include/exclude globs.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, error};
use walkdir::WalkDir;

use crate::error::ExportError;
use crate::glob::{first_meta, Pattern};
use crate::metrics::ExporterMetrics;

/// A glob split into a literal search root and the pattern applied below it.
#[derive(Debug, Clone)]
pub struct SourceGlob {
    search_root: PathBuf,
    pattern: Pattern,
}

impl SourceGlob {
    /// Splits `expr` at the last `/` before its first meta character.
    ///
    /// `/etc/ssl/**/*.pem` becomes root `/etc/ssl` and pattern `**/*.pem`;
    /// `certs/tls.crt` becomes root `certs` and pattern `tls.crt`. The root
    /// is cleaned, so `./certs/*.crt` and `certs/*.crt` share root `certs`.
    pub fn parse(expr: &str) -> Result<Self, ExportError> {
        let literal = match first_meta(expr) {
            Some(i) => &expr[..i],
            None => expr,
        };
        let (root, pattern) = match literal.rfind('/') {
            Some(0) => ("/", &expr[1..]),
            Some(i) => (&expr[..i], &expr[i + 1..]),
            None => (".", expr),
        };
        if pattern.is_empty() {
            return Err(ExportError::InvalidGlob {
                pattern: expr.to_string(),
                reason: "nothing to match below the search root".to_string(),
            });
        }

        Ok(SourceGlob {
            search_root: clean(Path::new(root)),
            pattern: Pattern::recursive(pattern)?,
        })
    }

    pub fn search_root(&self) -> &Path {
        &self.search_root
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Regular files below the search root matching the pattern, as
    /// `/`-separated paths relative to the root.
    pub fn apply(&self) -> Result<Vec<String>, ExportError> {
        if !self.search_root.exists() {
            debug!(root = %self.search_root.display(), "Search root does not exist");
            return Ok(Vec::new());
        }

        let mut walker = WalkDir::new(&self.search_root).follow_links(true).min_depth(1);
        let expr = self.pattern.as_str();
        if !expr.contains("**") && !expr.contains('{') {
            walker = walker.max_depth(expr.split('/').count());
        }

        let mut matches = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(ExportError::Discovery {
                        target: self.to_string(),
                        reason: e.to_string(),
                    })
                }
                Err(e) => {
                    debug!(glob = %self, error = %e, "Skipping unreadable path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = relative(entry.path(), &self.search_root) else {
                debug!(path = %entry.path().display(), "Skipping non UTF-8 path");
                continue;
            };
            if self.pattern.matches(&rel) {
                matches.push(rel);
            }
        }
        Ok(matches)
    }

    /// Turns a path returned by [`SourceGlob::apply`] back into a cleaned
    /// path, so the same file reached through differently spelled globs
    /// yields the same identifier.
    pub fn join(&self, rel: &str) -> PathBuf {
        clean(&self.search_root.join(rel))
    }
}

impl std::fmt::Display for SourceGlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.search_root.display(), self.pattern)
    }
}

/// Lexical cleanup: drops `.` components and repeated separators and folds
/// `dir/..` pairs. An empty result is `.`.
fn clean(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        PathBuf::from(".")
    } else {
        parts.iter().collect()
    }
}

fn relative(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts = rel
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

/// Include/exclude glob sets resolved into a set of file paths.
#[derive(Debug, Clone, Default)]
pub struct GlobMatcher {
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl GlobMatcher {
    pub fn new(includes: Vec<String>, excludes: Vec<String>) -> Self {
        GlobMatcher { includes, excludes }
    }

    /// Union of every include match minus every exclude match.
    ///
    /// A glob that fails to compile or to walk is counted on the error
    /// counter and skipped; the others still apply.
    pub fn resolve(&self, metrics: &ExporterMetrics) -> BTreeSet<PathBuf> {
        let mut found = BTreeSet::new();
        for expr in &self.includes {
            found.extend(Self::expand(expr, metrics));
        }
        for expr in &self.excludes {
            for path in Self::expand(expr, metrics) {
                found.remove(&path);
            }
        }
        found
    }

    fn expand(expr: &str, metrics: &ExporterMetrics) -> Vec<PathBuf> {
        let result = SourceGlob::parse(expr).and_then(|glob| {
            let matches = glob.apply()?;
            Ok(matches.iter().map(|rel| glob.join(rel)).collect())
        });
        match result {
            Ok(paths) => paths,
            Err(e) => {
                metrics.record_error();
                error!(glob = expr, error = %e, "Glob failed");
                Vec::new()
            }
        }
    }
}
