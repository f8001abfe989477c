//! Metrics collection and export module.
//!
//! All metrics live in an explicitly constructed [`ExporterMetrics`] handle
//! rather than in the process-global default registry, so independent
//! registries can coexist (one per test, for instance).
//!
//! Every resource kind owns a triplet of gauge vectors:
//!
//! - `cert_exporter_<kind>_expires_in_seconds`
//! - `cert_exporter_<kind>_not_after_timestamp`
//! - `cert_exporter_<kind>_not_before_timestamp`
//!
//! # Submodules
//!
//! - `prom` - Prometheus scrape endpoint

pub mod prom;

use prometheus::{GaugeVec, IntCounter, IntGaugeVec, Opts, Registry};
use strum_macros::{Display, EnumIter};

use crate::certs::CertificateMetric;
use crate::error::ExportError;

/// Prefix shared by every metric this crate registers.
pub const NAMESPACE: &str = "cert_exporter";

/// The kinds of certificate sources, one periodic checker each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ResourceKind {
    /// Certificate files on disk
    #[strum(serialize = "cert")]
    File,
    /// Certificates referenced from kubeconfig files
    #[strum(serialize = "kubeconfig")]
    KubeConfig,
    /// Kubernetes Secrets
    #[strum(serialize = "secret")]
    Secret,
    /// Kubernetes ConfigMaps
    #[strum(serialize = "configmap")]
    ConfigMap,
    /// CA bundles of admission webhook configurations
    #[strum(serialize = "webhook")]
    Webhook,
    /// cert-manager CertificateRequests
    #[strum(serialize = "certrequest")]
    CertRequest,
    /// AWS Secrets Manager secrets
    #[strum(serialize = "aws_secret")]
    AwsSecret,
}

impl ResourceKind {
    /// Labels identifying the resource a sample came from, in the order
    /// sources fill [`crate::checker::Payload::identity`].
    pub fn identity_labels(self) -> &'static [&'static str] {
        match self {
            ResourceKind::File => &["filename", "nodename"],
            ResourceKind::KubeConfig => &["filename", "type", "name", "nodename"],
            ResourceKind::Secret => &["key_name", "secret_name", "secret_namespace"],
            ResourceKind::ConfigMap => &["key_name", "configmap_name", "configmap_namespace"],
            ResourceKind::Webhook => &["type_name", "webhook_name", "admission_review_version_name"],
            ResourceKind::CertRequest => &["cert_request", "certrequest_namespace"],
            ResourceKind::AwsSecret => &["secret_name", "key"],
        }
    }

    /// Whether samples of this kind carry the keystore `alias` label.
    pub fn carries_alias(self) -> bool {
        matches!(
            self,
            ResourceKind::File
                | ResourceKind::Secret
                | ResourceKind::ConfigMap
                | ResourceKind::AwsSecret
        )
    }

    /// Full label schema: identity labels, then `issuer`, `cn` and
    /// optionally `alias`.
    pub fn label_names(self) -> Vec<&'static str> {
        let mut names = self.identity_labels().to_vec();
        names.push("issuer");
        names.push("cn");
        if self.carries_alias() {
            names.push("alias");
        }
        names
    }
}

/// Shared handle on the registry and the process-wide counters.
///
/// Cloning is cheap; clones record into the same series.
#[derive(Clone, Debug)]
pub struct ExporterMetrics {
    registry: Registry,
    errors: IntCounter,
    discovered: IntGaugeVec,
}

impl ExporterMetrics {
    /// Creates the handle on a fresh, empty registry.
    pub fn new() -> Result<Self, ExportError> {
        Self::with_registry(Registry::new())
    }

    /// Creates the handle and registers the shared counters on `registry`.
    pub fn with_registry(registry: Registry) -> Result<Self, ExportError> {
        let errors = IntCounter::with_opts(
            Opts::new("error_total", "Cert Exporter Errors").namespace(NAMESPACE),
        )?;
        let discovered = IntGaugeVec::new(
            Opts::new(
                "discovered",
                "Number of certificate sources discovered after include and exclude rules",
            )
            .namespace(NAMESPACE),
            &["source"],
        )?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(discovered.clone()))?;

        Ok(ExporterMetrics {
            registry,
            errors,
            discovered,
        })
    }

    /// The registry backing every metric of this handle.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Increments `cert_exporter_error_total`.
    pub fn record_error(&self) {
        self.errors.inc();
    }

    /// Current value of the error counter.
    pub fn error_count(&self) -> u64 {
        self.errors.get()
    }

    /// Publishes how many candidates a source resolved on its last tick.
    pub fn set_discovered(&self, kind: ResourceKind, count: usize) {
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        self.discovered
            .with_label_values(&[kind.to_string().as_str()])
            .set(count);
    }

    /// Registers the gauge triplet for `kind`.
    ///
    /// Fails with [`prometheus::Error::AlreadyReg`] if the same kind is
    /// registered twice on one registry.
    pub fn register_gauges(&self, kind: ResourceKind) -> Result<KindGauges, ExportError> {
        KindGauges::register(kind, &self.registry)
    }
}

/// The `expires_in_seconds` / `not_after_timestamp` /
/// `not_before_timestamp` gauges of one resource kind.
#[derive(Clone, Debug)]
pub struct KindGauges {
    kind: ResourceKind,
    expires_in: GaugeVec,
    not_after: GaugeVec,
    not_before: GaugeVec,
}

impl KindGauges {
    fn register(kind: ResourceKind, registry: &Registry) -> Result<Self, ExportError> {
        let labels = kind.label_names();
        let gauge_vec = |suffix: &str, help: &str| -> Result<GaugeVec, ExportError> {
            let gauge = GaugeVec::new(
                Opts::new(format!("{}_{}", kind, suffix), help).namespace(NAMESPACE),
                &labels,
            )?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        Ok(KindGauges {
            kind,
            expires_in: gauge_vec("expires_in_seconds", "Number of seconds til the cert expires.")?,
            not_after: gauge_vec(
                "not_after_timestamp",
                "Timestamp of when the certificate expires.",
            )?,
            not_before: gauge_vec(
                "not_before_timestamp",
                "Timestamp of when the certificate becomes valid.",
            )?,
        })
    }

    /// The resource kind these gauges belong to.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Drops every series of the triplet.
    pub fn reset(&self) {
        self.expires_in.reset();
        self.not_after.reset();
        self.not_before.reset();
    }

    /// Sets one sample per gauge for `metric`, labelled with `identity`
    /// (in [`ResourceKind::identity_labels`] order) plus issuer, cn and
    /// alias.
    pub fn record(&self, identity: &[String], metric: &CertificateMetric) -> Result<(), ExportError> {
        let mut values: Vec<&str> = identity.iter().map(String::as_str).collect();
        values.push(&metric.issuer_cn);
        values.push(&metric.subject_cn);
        if self.kind.carries_alias() {
            values.push(metric.alias.as_deref().unwrap_or(""));
        }

        self.expires_in
            .get_metric_with_label_values(&values)?
            .set(metric.duration_until_expiry);
        self.not_after
            .get_metric_with_label_values(&values)?
            .set(metric.not_after.timestamp() as f64);
        self.not_before
            .get_metric_with_label_values(&values)?
            .set(metric.not_before.timestamp() as f64);
        Ok(())
    }
}
