//! One certificate source per resource kind, plus the cluster and cloud
//! client seams they read through.

pub mod aws;
pub mod certrequests;
pub mod configmaps;
pub mod files;
pub mod kube;
pub mod kubeconfig;
pub mod secrets;
pub mod webhooks;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use strum_macros::Display;
use tracing::error;

use crate::error::ExportError;
use crate::glob::Pattern;
use crate::metrics::ExporterMetrics;

/// The parts of Kubernetes object metadata the sources look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Objects that carry [`ObjectMeta`].
pub trait HasMeta {
    fn meta(&self) -> &ObjectMeta;
}

macro_rules! has_meta {
    ($($ty:ty),*) => {
        $(impl HasMeta for $ty {
            fn meta(&self) -> &ObjectMeta {
                &self.meta
            }
        })*
    };
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretObject {
    pub meta: ObjectMeta,
    pub secret_type: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

/// Lists data keys, never values.
impl fmt::Debug for SecretObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretObject")
            .field("namespace", &self.meta.namespace)
            .field("name", &self.meta.name)
            .field("type", &self.secret_type)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A ConfigMap with `data` and `binaryData` merged into one key space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMapObject {
    pub meta: ObjectMeta,
    pub data: BTreeMap<String, Vec<u8>>,
}

/// Value of the webhook `type_name` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum WebhookKind {
    #[strum(serialize = "mutatingwebhookconfiguration")]
    Mutating,
    #[strum(serialize = "validatingwebhookconfiguration")]
    Validating,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Webhook {
    pub name: String,
    pub ca_bundle: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfiguration {
    pub meta: ObjectMeta,
    pub kind: WebhookKind,
    pub webhooks: Vec<Webhook>,
}

/// A cert-manager CertificateRequest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateRequestObject {
    pub meta: ObjectMeta,
    /// `Ready` condition has status `True`
    pub ready: bool,
    /// Issued certificate, PEM
    pub certificate: Vec<u8>,
}

has_meta!(SecretObject, ConfigMapObject, WebhookConfiguration, CertificateRequestObject);

/// List access to the cluster. An empty `namespace` means all namespaces.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_secrets(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<SecretObject>, ExportError>;

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<ConfigMapObject>, ExportError>;

    async fn list_webhook_configurations(
        &self,
        kind: WebhookKind,
        label_selector: Option<&str>,
    ) -> Result<Vec<WebhookConfiguration>, ExportError>;

    async fn list_certificate_requests(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<CertificateRequestObject>, ExportError>;
}

/// Read access to a cloud secret store.
#[async_trait]
pub trait SecretsClient: Send + Sync {
    /// The string value of `secret_id`, or `None` for binary secrets.
    async fn get_secret_string(&self, secret_id: &str) -> Result<Option<String>, ExportError>;
}

/// Merges a comma-separated namespace list with a single namespace,
/// trimming, dropping empties and keeping the first occurrence of each
/// name. No namespace at all means all namespaces, spelled as a single `""`.
pub fn sanitize_namespaces(list: Option<&str>, single: Option<&str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut selected: Vec<String> = list
        .unwrap_or_default()
        .split(',')
        .chain(single)
        .map(str::trim)
        .filter(|ns| !ns.is_empty() && seen.insert(*ns))
        .map(str::to_string)
        .collect();
    if selected.is_empty() {
        selected.push(String::new());
    }
    selected
}

/// Where and how to list namespaced objects.
#[derive(Debug, Clone)]
pub struct ListScope {
    pub namespaces: Vec<String>,
    pub label_selectors: Vec<String>,
    /// Keep only objects carrying at least one of these annotation keys
    pub annotation_selectors: Vec<String>,
}

impl Default for ListScope {
    fn default() -> Self {
        ListScope {
            namespaces: vec![String::new()],
            label_selectors: Vec::new(),
            annotation_selectors: Vec::new(),
        }
    }
}

impl ListScope {
    /// One `None` when no label selector is configured.
    pub fn selectors(&self) -> Vec<Option<&str>> {
        if self.label_selectors.is_empty() {
            vec![None]
        } else {
            self.label_selectors.iter().map(|s| Some(s.as_str())).collect()
        }
    }

    pub fn admits(&self, meta: &ObjectMeta) -> bool {
        self.annotation_selectors.is_empty()
            || self
                .annotation_selectors
                .iter()
                .any(|key| meta.annotations.contains_key(key))
    }

    /// Runs `list` for every namespace and selector, dropping objects the
    /// annotation selectors reject and objects already returned by an
    /// earlier call. Failed calls are counted and skipped.
    pub async fn collect<T, F, Fut>(&self, what: &str, metrics: &ExporterMetrics, list: F) -> Vec<T>
    where
        T: HasMeta,
        F: Fn(String, Option<String>) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<T>, ExportError>>,
    {
        let mut found = BTreeMap::new();
        for namespace in &self.namespaces {
            for selector in self.selectors() {
                match list(namespace.clone(), selector.map(str::to_string)).await {
                    Ok(items) => {
                        for item in items {
                            let m = item.meta();
                            if self.admits(m) {
                                found
                                    .entry((m.namespace.clone(), m.name.clone()))
                                    .or_insert(item);
                            }
                        }
                    }
                    Err(e) => {
                        metrics.record_error();
                        let e = ExportError::Discovery {
                            target: format!(
                                "{} in namespace '{}' with selector '{}'",
                                what,
                                namespace,
                                selector.unwrap_or_default()
                            ),
                            reason: e.to_string(),
                        };
                        error!(error = %e, "Error requesting {}", what);
                    }
                }
            }
        }
        found.into_values().collect()
    }
}

/// Include/exclude globs over secret and ConfigMap data keys.
#[derive(Debug, Clone)]
pub struct KeyGlobs {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl KeyGlobs {
    /// An empty include list means every key.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, ExportError> {
        let compile = |globs: &[String]| -> Result<Vec<Pattern>, ExportError> {
            globs.iter().map(|g| Pattern::new(g)).collect()
        };
        let mut include = compile(include)?;
        if include.is_empty() {
            include.push(Pattern::new("*")?);
        }
        Ok(KeyGlobs {
            include,
            exclude: compile(exclude)?,
        })
    }

    pub fn selects(&self, key: &str) -> bool {
        self.include.iter().any(|p| p.matches(key)) && !self.exclude.iter().any(|p| p.matches(key))
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{meta, FakeCluster};
    use super::*;

    #[test]
    fn test_sanitize_namespaces() {
        assert_eq!(sanitize_namespaces(None, None), vec![""]);
        assert_eq!(sanitize_namespaces(Some(" , ,"), Some("")), vec![""]);
        assert_eq!(
            sanitize_namespaces(Some("a, b ,,c"), Some("d")),
            vec!["a", "b", "c", "d"]
        );
        assert_eq!(sanitize_namespaces(None, Some(" kube-system ")), vec!["kube-system"]);
        assert_eq!(sanitize_namespaces(Some("a,b,a"), None), vec!["a", "b"]);
        assert_eq!(sanitize_namespaces(Some("b, a"), Some("b")), vec!["b", "a"]);
    }

    #[test]
    fn test_key_globs() {
        let all = KeyGlobs::new(&[], &["*.key".to_string()]).unwrap();
        assert!(all.selects("tls.crt"));
        assert!(!all.selects("tls.key"));

        let only = KeyGlobs::new(&["ca.*".to_string()], &[]).unwrap();
        assert!(only.selects("ca.crt"));
        assert!(!only.selects("tls.crt"));

        assert!(KeyGlobs::new(&["[".to_string()], &[]).is_err());
    }

    #[test]
    fn test_annotation_selectors() {
        let scope = ListScope {
            annotation_selectors: vec!["cert-exporter/watch".to_string()],
            ..ListScope::default()
        };
        let mut m = meta("ns", "a");
        assert!(!scope.admits(&m));
        m.annotations.insert("cert-exporter/watch".to_string(), String::new());
        assert!(scope.admits(&m));
        assert!(ListScope::default().admits(&meta("ns", "b")));
    }

    #[tokio::test]
    async fn test_collect_dedups_and_survives_failed_namespace() {
        let cluster = FakeCluster {
            failing_namespaces: vec!["forbidden".to_string()],
            ..FakeCluster::default()
        };
        let mut labelled = meta("default", "both");
        labelled.labels.insert("app".to_string(), "a".to_string());
        labelled.labels.insert("tier".to_string(), "b".to_string());
        cluster.secrets.lock().unwrap().push(SecretObject {
            meta: labelled,
            ..SecretObject::default()
        });

        let scope = ListScope {
            namespaces: vec!["forbidden".to_string(), "default".to_string()],
            label_selectors: vec!["app=a".to_string(), "tier=b".to_string()],
            annotation_selectors: Vec::new(),
        };
        let metrics = ExporterMetrics::new().unwrap();
        let found = scope
            .collect("secrets", &metrics, |ns, sel| {
                let cluster = &cluster;
                async move { cluster.list_secrets(&ns, sel.as_deref()).await }
            })
            .await;

        assert_eq!(found.len(), 1);
        assert_eq!(metrics.error_count(), 2);
        assert_eq!(cluster.calls.lock().unwrap().len(), 4);
    }
}
