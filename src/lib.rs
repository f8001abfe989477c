//! # cert-exporter
//!
//! Periodically discovers X.509 certificates and exports their validity
//! window as Prometheus gauges.
//!
//! Certificates are read from:
//!
//! - files on disk selected by include/exclude globs
//! - client and CA certificates referenced from kubeconfig files
//! - Kubernetes Secrets and ConfigMaps
//! - CA bundles of admission webhook configurations
//! - issued cert-manager CertificateRequests
//! - AWS Secrets Manager secrets
//!
//! Payloads may be PEM, PKCS#12 or JKS; see [`certs::decode`].

pub mod certs;
pub mod checker;
pub mod config;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod glob;
pub mod kubeconfig;
pub mod metrics;
pub mod password;
pub mod sources;

pub use checker::{CertificateSource, Payload, PeriodicChecker, TickReport};
pub use config::{Config, ConfigError};
pub use error::ExportError;
pub use metrics::{ExporterMetrics, ResourceKind};
