//! Configuration file management for cert-exporter.
//!
//! Settings come from three places, merged with clear precedence:
//!
//! 1. Default values (lowest priority)
//! 2. Configuration file (`--config cert-exporter.toml`)
//! 3. Command-line arguments (highest priority)
//!
//! Every resource kind has its own table; a kind whose table is absent or
//! selects nothing is not checked.
//!
//! # Example Configuration File
//!
//! ```toml
//! polling_period_secs = 3600
//! node_name = "worker-1"
//!
//! [prometheus]
//! listen_address = "0.0.0.0:8080"
//! path = "/metrics"
//!
//! [files]
//! include = ["/etc/kubernetes/pki/**/*.crt"]
//! exclude = ["/etc/kubernetes/pki/etcd/*"]
//!
//! [secrets]
//! namespaces = "cert-manager, ingress"
//! include_keys = ["*.crt"]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::filter::MetricFilter;
use crate::password::{PasswordResolver, PasswordSpec};
use crate::sources::aws::AwsSecretsSettings;
use crate::sources::{sanitize_namespaces, KeyGlobs, ListScope};

/// Main configuration structure.
///
/// All fields are optional to support partial configuration and merging.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    /// Seconds between two checks of the same resource kind
    pub polling_period_secs: Option<u64>,
    /// Upper bound for one check; unset means unbounded
    pub tick_timeout_secs: Option<u64>,
    /// Value of the `nodename` label for files and kubeconfigs
    pub node_name: Option<String>,
    /// Kubeconfig used to reach the cluster; in-cluster config when unset
    pub kubeconfig: Option<String>,
    pub prometheus: Option<PrometheusConfig>,
    pub passwords: Option<PasswordConfig>,
    /// Metrics to drop after decoding
    pub exclude: Option<ExcludeConfig>,
    pub files: Option<GlobConfig>,
    pub kubeconfigs: Option<GlobConfig>,
    pub secrets: Option<SecretsConfig>,
    pub configmaps: Option<ConfigMapsConfig>,
    pub webhooks: Option<ClusterScopedConfig>,
    pub certrequests: Option<CertRequestsConfig>,
    pub aws: Option<AwsConfig>,
}

/// Metrics endpoint configuration.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct PrometheusConfig {
    /// Address to listen on for scrapes (e.g., "0.0.0.0:8080")
    pub listen_address: Option<String>,
    /// Path the metrics are served on
    pub path: Option<String>,
    /// Leave out process_* metrics about the exporter itself
    pub disable_exporter_metrics: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct PasswordConfig {
    /// Passphrase for PKCS#12 and JKS sources no spec matches
    pub default: Option<String>,
    /// `glob:password` pairs, first match wins
    pub specs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ExcludeConfig {
    pub cn: Option<Vec<String>>,
    pub alias: Option<Vec<String>>,
    pub issuer: Option<Vec<String>>,
}

/// Include/exclude path globs for on-disk sources.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct GlobConfig {
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct SecretsConfig {
    pub label_selectors: Option<Vec<String>>,
    pub annotation_selectors: Option<Vec<String>>,
    pub namespace: Option<String>,
    /// Comma-separated list, merged with `namespace`
    pub namespaces: Option<String>,
    /// Data key globs; every key when unset
    pub include_keys: Option<Vec<String>>,
    pub exclude_keys: Option<Vec<String>>,
    /// Secret types to keep (e.g., "kubernetes.io/tls"); every type when unset
    pub types: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ConfigMapsConfig {
    pub label_selectors: Option<Vec<String>>,
    pub annotation_selectors: Option<Vec<String>>,
    pub namespace: Option<String>,
    pub namespaces: Option<String>,
    pub include_keys: Option<Vec<String>>,
    pub exclude_keys: Option<Vec<String>>,
}

/// Webhook configurations are cluster scoped and have no namespace.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ClusterScopedConfig {
    pub enabled: Option<bool>,
    pub label_selectors: Option<Vec<String>>,
    pub annotation_selectors: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct CertRequestsConfig {
    pub enabled: Option<bool>,
    pub label_selectors: Option<Vec<String>>,
    pub annotation_selectors: Option<Vec<String>>,
    pub namespace: Option<String>,
    pub namespaces: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct AwsConfig {
    pub account: Option<String>,
    pub region: Option<String>,
    /// Only secret keys containing this substring are decoded
    pub key_substring: Option<String>,
    pub secrets: Option<Vec<String>>,
}

/// Field-wise override: `Some` values of `other` win.
trait Merge {
    fn merge(self, other: Self) -> Self;
}

macro_rules! impl_merge {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl Merge for $ty {
            fn merge(mut self, other: Self) -> Self {
                $(
                    if other.$field.is_some() {
                        self.$field = other.$field;
                    }
                )*
                self
            }
        }
    };
}

impl_merge!(PrometheusConfig { listen_address, path, disable_exporter_metrics });
impl_merge!(PasswordConfig { default, specs });
impl_merge!(ExcludeConfig { cn, alias, issuer });
impl_merge!(GlobConfig { include, exclude });
impl_merge!(SecretsConfig {
    label_selectors,
    annotation_selectors,
    namespace,
    namespaces,
    include_keys,
    exclude_keys,
    types,
});
impl_merge!(ConfigMapsConfig {
    label_selectors,
    annotation_selectors,
    namespace,
    namespaces,
    include_keys,
    exclude_keys,
});
impl_merge!(ClusterScopedConfig { enabled, label_selectors, annotation_selectors });
impl_merge!(CertRequestsConfig {
    enabled,
    label_selectors,
    annotation_selectors,
    namespace,
    namespaces,
});
impl_merge!(AwsConfig { account, region, key_substring, secrets });

fn merge_section<T: Merge>(base: Option<T>, other: Option<T>) -> Option<T> {
    match (base, other) {
        (Some(base), Some(other)) => Some(base.merge(other)),
        (base, other) => other.or(base),
    }
}

fn non_empty(list: &Option<Vec<String>>) -> bool {
    list.as_ref().is_some_and(|l| !l.is_empty())
}

fn list(list: &Option<Vec<String>>) -> Vec<String> {
    list.clone().unwrap_or_default()
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::Io)` - File could not be read
    /// * `Err(ConfigError::Parse)` - File contains invalid TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Creates a configuration holding the defaults.
    ///
    /// # Default Values
    ///
    /// - `polling_period_secs`: 3600
    /// - `prometheus.listen_address`: "0.0.0.0:8080"
    /// - `prometheus.path`: "/metrics"
    /// - `prometheus.disable_exporter_metrics`: false
    /// - no resource kind is enabled
    pub fn defaults() -> Self {
        Config {
            polling_period_secs: Some(3600),
            prometheus: Some(PrometheusConfig {
                listen_address: Some("0.0.0.0:8080".to_string()),
                path: Some("/metrics".to_string()),
                disable_exporter_metrics: Some(false),
            }),
            ..Config::default()
        }
    }

    /// Merges this configuration with another, prioritizing the other's values.
    ///
    /// Tables merge field by field, so a file that only sets
    /// `[prometheus] path` keeps the default listen address.
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.polling_period_secs.is_some() {
            self.polling_period_secs = other.polling_period_secs;
        }
        if other.tick_timeout_secs.is_some() {
            self.tick_timeout_secs = other.tick_timeout_secs;
        }
        if other.node_name.is_some() {
            self.node_name = other.node_name;
        }
        if other.kubeconfig.is_some() {
            self.kubeconfig = other.kubeconfig;
        }
        self.prometheus = merge_section(self.prometheus, other.prometheus);
        self.passwords = merge_section(self.passwords, other.passwords);
        self.exclude = merge_section(self.exclude, other.exclude);
        self.files = merge_section(self.files, other.files);
        self.kubeconfigs = merge_section(self.kubeconfigs, other.kubeconfigs);
        self.secrets = merge_section(self.secrets, other.secrets);
        self.configmaps = merge_section(self.configmaps, other.configmaps);
        self.webhooks = merge_section(self.webhooks, other.webhooks);
        self.certrequests = merge_section(self.certrequests, other.certrequests);
        self.aws = merge_section(self.aws, other.aws);
        self
    }

    /// Checks values that cannot be expressed in the TOML types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling_period_secs == Some(0) {
            return Err(ConfigError::Validation(
                "polling_period_secs must be greater than zero".to_string(),
            ));
        }
        if self.tick_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "tick_timeout_secs must be greater than zero".to_string(),
            ));
        }
        self.listen_address()?;
        self.password_resolver()?;
        if let Some(secrets) = &self.secrets {
            KeyGlobs::new(&list(&secrets.include_keys), &list(&secrets.exclude_keys))
                .map_err(|e| ConfigError::Validation(format!("secrets: {}", e)))?;
        }
        if let Some(configmaps) = &self.configmaps {
            KeyGlobs::new(&list(&configmaps.include_keys), &list(&configmaps.exclude_keys))
                .map_err(|e| ConfigError::Validation(format!("configmaps: {}", e)))?;
        }
        if let Some(aws) = &self.aws {
            if non_empty(&aws.secrets) && (aws.account.is_none() || aws.region.is_none()) {
                return Err(ConfigError::Validation(
                    "aws secrets need both account and region".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn polling_period(&self) -> Duration {
        Duration::from_secs(self.polling_period_secs.unwrap_or(3600))
    }

    pub fn tick_timeout(&self) -> Option<Duration> {
        self.tick_timeout_secs.map(Duration::from_secs)
    }

    pub fn node_name(&self) -> String {
        self.node_name.clone().unwrap_or_default()
    }

    fn prometheus(&self) -> PrometheusConfig {
        self.prometheus.clone().unwrap_or_default()
    }

    pub fn listen_address(&self) -> Result<SocketAddr, ConfigError> {
        let address = self
            .prometheus()
            .listen_address
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());
        // ":8080" is accepted as shorthand for all interfaces.
        let address = match address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port),
            None => address,
        };
        address
            .parse()
            .map_err(|e| ConfigError::Validation(format!("listen address '{}': {}", address, e)))
    }

    pub fn metrics_path(&self) -> String {
        self.prometheus().path.unwrap_or_else(|| "/metrics".to_string())
    }

    pub fn exporter_metrics_enabled(&self) -> bool {
        !self.prometheus().disable_exporter_metrics.unwrap_or(false)
    }

    pub fn password_resolver(&self) -> Result<PasswordResolver, ConfigError> {
        let passwords = self.passwords.clone().unwrap_or_default();
        let specs = list(&passwords.specs)
            .iter()
            .map(|spec| PasswordSpec::parse(spec))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(PasswordResolver::new(specs, passwords.default))
    }

    pub fn metric_filter(&self) -> MetricFilter {
        let exclude = self.exclude.clone().unwrap_or_default();
        MetricFilter::new(&list(&exclude.cn), &list(&exclude.alias), &list(&exclude.issuer))
    }

    /// Include and exclude globs of the cert file check, if enabled.
    pub fn file_globs(&self) -> Option<(Vec<String>, Vec<String>)> {
        Self::globs(&self.files)
    }

    pub fn kubeconfig_globs(&self) -> Option<(Vec<String>, Vec<String>)> {
        Self::globs(&self.kubeconfigs)
    }

    fn globs(section: &Option<GlobConfig>) -> Option<(Vec<String>, Vec<String>)> {
        let section = section.as_ref()?;
        non_empty(&section.include).then(|| (list(&section.include), list(&section.exclude)))
    }

    /// Scope and key globs of the Secret check, if any selector or key glob
    /// enables it.
    pub fn secret_check(&self) -> Option<(ListScope, Vec<String>, Vec<String>)> {
        let s = self.secrets.as_ref()?;
        let enabled =
            non_empty(&s.label_selectors) || non_empty(&s.annotation_selectors) || non_empty(&s.include_keys);
        enabled.then(|| {
            let scope = ListScope {
                namespaces: sanitize_namespaces(s.namespaces.as_deref(), s.namespace.as_deref()),
                label_selectors: list(&s.label_selectors),
                annotation_selectors: list(&s.annotation_selectors),
            };
            (scope, list(&s.include_keys), list(&s.exclude_keys))
        })
    }

    pub fn secret_types(&self) -> Vec<String> {
        self.secrets
            .as_ref()
            .map(|s| list(&s.types))
            .unwrap_or_default()
    }

    pub fn configmap_check(&self) -> Option<(ListScope, Vec<String>, Vec<String>)> {
        let c = self.configmaps.as_ref()?;
        let enabled =
            non_empty(&c.label_selectors) || non_empty(&c.annotation_selectors) || non_empty(&c.include_keys);
        enabled.then(|| {
            let scope = ListScope {
                namespaces: sanitize_namespaces(c.namespaces.as_deref(), c.namespace.as_deref()),
                label_selectors: list(&c.label_selectors),
                annotation_selectors: list(&c.annotation_selectors),
            };
            (scope, list(&c.include_keys), list(&c.exclude_keys))
        })
    }

    pub fn webhook_check(&self) -> Option<ListScope> {
        let w = self.webhooks.as_ref()?;
        w.enabled.unwrap_or(false).then(|| ListScope {
            namespaces: vec![String::new()],
            label_selectors: list(&w.label_selectors),
            annotation_selectors: list(&w.annotation_selectors),
        })
    }

    pub fn certrequest_check(&self) -> Option<ListScope> {
        let c = self.certrequests.as_ref()?;
        let enabled = c.enabled.unwrap_or(false)
            || non_empty(&c.label_selectors)
            || non_empty(&c.annotation_selectors);
        enabled.then(|| ListScope {
            namespaces: sanitize_namespaces(c.namespaces.as_deref(), c.namespace.as_deref()),
            label_selectors: list(&c.label_selectors),
            annotation_selectors: list(&c.annotation_selectors),
        })
    }

    /// Enabled when account, region and at least one secret are set.
    pub fn aws_check(&self) -> Option<AwsSecretsSettings> {
        let a = self.aws.as_ref()?;
        match (&a.account, &a.region) {
            (Some(account), Some(region)) if non_empty(&a.secrets) => Some(AwsSecretsSettings {
                account: account.clone(),
                region: region.clone(),
                key_substring: a.key_substring.clone().unwrap_or_default(),
                secrets: list(&a.secrets),
            }),
            _ => None,
        }
    }

    /// Whether any check needs the Kubernetes API.
    pub fn needs_cluster(&self) -> bool {
        self.secret_check().is_some()
            || self.configmap_check().is_some()
            || self.webhook_check().is_some()
            || self.certrequest_check().is_some()
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            polling_period_secs: Some(3600),
            tick_timeout_secs: Some(300),
            node_name: Some("worker-1".to_string()),
            kubeconfig: None,
            prometheus: Some(PrometheusConfig {
                listen_address: Some("0.0.0.0:8080".to_string()),
                path: Some("/metrics".to_string()),
                disable_exporter_metrics: Some(false),
            }),
            passwords: Some(PasswordConfig {
                default: Some("changeit".to_string()),
                specs: Some(vec!["/etc/keystores/**/*.p12:p12-password".to_string()]),
            }),
            exclude: Some(ExcludeConfig {
                cn: Some(vec!["*.test".to_string()]),
                alias: None,
                issuer: Some(vec!["Internal Dev CA".to_string()]),
            }),
            files: Some(GlobConfig {
                include: Some(vec!["/etc/kubernetes/pki/**/*.crt".to_string()]),
                exclude: Some(vec!["/etc/kubernetes/pki/front-proxy-*".to_string()]),
            }),
            kubeconfigs: Some(GlobConfig {
                include: Some(vec!["/etc/kubernetes/*.conf".to_string()]),
                exclude: None,
            }),
            secrets: Some(SecretsConfig {
                label_selectors: None,
                annotation_selectors: Some(vec!["cert-manager.io/certificate-name".to_string()]),
                namespace: None,
                namespaces: Some("cert-manager, ingress-nginx".to_string()),
                include_keys: Some(vec!["*.crt".to_string()]),
                exclude_keys: Some(vec!["ca.crt".to_string()]),
                types: Some(vec!["kubernetes.io/tls".to_string()]),
            }),
            configmaps: Some(ConfigMapsConfig {
                label_selectors: Some(vec!["app=trust-bundle".to_string()]),
                annotation_selectors: None,
                namespace: Some("kube-system".to_string()),
                namespaces: None,
                include_keys: Some(vec!["*.pem".to_string()]),
                exclude_keys: None,
            }),
            webhooks: Some(ClusterScopedConfig {
                enabled: Some(true),
                label_selectors: None,
                annotation_selectors: None,
            }),
            certrequests: Some(CertRequestsConfig {
                enabled: Some(false),
                label_selectors: None,
                annotation_selectors: None,
                namespace: None,
                namespaces: None,
            }),
            aws: Some(AwsConfig {
                account: Some("123456789012".to_string()),
                region: Some("eu-west-1".to_string()),
                key_substring: Some("crt".to_string()),
                secrets: Some(vec!["prod/tls".to_string()]),
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (invalid values, bad globs, etc.)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
