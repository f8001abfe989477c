//! Post-decode exclusion of metrics by subject CN, alias and issuer CN.

use tracing::warn;

use crate::certs::CertificateMetric;
use crate::glob::Pattern;

/// One exclude dimension: the raw expressions (needed for the empty-field
/// rule) and the ones that compiled.
#[derive(Debug, Clone, Default)]
struct Excludes {
    raw: Vec<String>,
    compiled: Vec<Pattern>,
}

impl Excludes {
    fn new(dimension: &str, globs: &[String]) -> Self {
        let compiled = globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(dimension, error = %e, "Malformed exclude glob will never match");
                    None
                }
            })
            .collect();
        Excludes {
            raw: globs.to_vec(),
            compiled,
        }
    }

    fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// An empty value only matches the literal globs `""` and `"*"`.
    fn matches(&self, value: &str) -> bool {
        if value.is_empty() {
            return self.raw.iter().any(|g| g.is_empty() || g == "*");
        }
        self.compiled.iter().any(|p| p.matches(value))
    }
}

/// Drops metrics whose subject CN, alias or issuer CN matches any of the
/// configured exclude globs.
#[derive(Debug, Clone, Default)]
pub struct MetricFilter {
    cn: Excludes,
    alias: Excludes,
    issuer: Excludes,
}

impl MetricFilter {
    pub fn new(exclude_cn: &[String], exclude_alias: &[String], exclude_issuer: &[String]) -> Self {
        MetricFilter {
            cn: Excludes::new("cn", exclude_cn),
            alias: Excludes::new("alias", exclude_alias),
            issuer: Excludes::new("issuer", exclude_issuer),
        }
    }

    /// True when no exclude glob is configured at all.
    pub fn is_noop(&self) -> bool {
        self.cn.is_empty() && self.alias.is_empty() && self.issuer.is_empty()
    }

    pub fn excludes(&self, metric: &CertificateMetric) -> bool {
        self.cn.matches(&metric.subject_cn)
            || self.alias.matches(metric.alias.as_deref().unwrap_or(""))
            || self.issuer.matches(&metric.issuer_cn)
    }

    pub fn apply(&self, metrics: Vec<CertificateMetric>) -> Vec<CertificateMetric> {
        if self.is_noop() {
            return metrics;
        }
        metrics.into_iter().filter(|m| !self.excludes(m)).collect()
    }
}
