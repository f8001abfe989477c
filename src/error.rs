//! Error types for certificate discovery, decoding and export.
//!
//! Nothing in here is fatal to the process. Each variant is recorded on the
//! shared error counter by whoever observes it, and the affected source is
//! retried on the next tick.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error type for everything that can go wrong while turning a source into
/// expiry metrics.
#[derive(Debug, Error)]
pub enum ExportError {
    /// A glob expression could not be compiled
    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidGlob {
        /// The offending expression
        pattern: String,
        /// What is wrong with it
        reason: String,
    },

    /// Candidate discovery failed (walk error, list call failure, ...)
    #[error("Discovery failed for {target}: {reason}")]
    Discovery {
        /// What was being discovered (glob, namespace, selector)
        target: String,
        /// Underlying failure
        reason: String,
    },

    /// The bytes were recognized by none of the supported container formats
    #[error(
        "Failed to parse certificate data: as pem ({pem}), as pkcs12 ({pkcs12}), as jks ({jks})"
    )]
    Format {
        /// Why the PEM stage gave up
        pem: String,
        /// Why the PKCS#12 stage gave up
        pkcs12: String,
        /// Why the JKS stage gave up
        jks: String,
    },

    /// A recognized container holds entries that could not be read
    #[error("Unreadable certificate entries: {}", details.join("; "))]
    Entry {
        /// One message per failed entry
        details: Vec<String>,
    },

    /// Reading a source from disk failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The path being read
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A kubeconfig file could not be interpreted
    #[error("Kubeconfig error in {}: {reason}", path.display())]
    Kubeconfig {
        /// The kubeconfig file
        path: PathBuf,
        /// Description of what went wrong
        reason: String,
    },

    /// A Kubernetes API call failed
    #[error("Cluster API error: {0}")]
    Cluster(String),

    /// Fetching a cloud-stored secret failed
    #[error("Cloud secret '{secret}' error: {reason}")]
    CloudSecret {
        /// Secret name
        secret: String,
        /// Description of the failure
        reason: String,
    },

    /// A `glob:password` specification could not be parsed
    #[error("Invalid password spec '{spec}': {reason}")]
    InvalidPasswordSpec {
        /// The spec with the password masked
        spec: String,
        /// Why it was rejected
        reason: String,
    },

    /// Registering or recording a metric failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// OpenSSL error occurred
    #[error("OpenSSL error: {details}")]
    OpenSSL {
        /// The rendered OpenSSL error stack
        details: String,
    },
}

impl ExportError {
    /// Builds an [`ExportError::Entry`] holding a single message.
    pub fn entry(detail: impl Into<String>) -> Self {
        Self::Entry {
            details: vec![detail.into()],
        }
    }
}

impl From<openssl::error::ErrorStack> for ExportError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSL {
            details: e.to_string(),
        }
    }
}

impl From<kube::Error> for ExportError {
    fn from(e: kube::Error) -> Self {
        Self::Cluster(e.to_string())
    }
}
