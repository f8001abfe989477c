//! Certificate expiry extraction.
//!
//! [`decode`] turns an opaque byte blob into one [`CertificateMetric`] per
//! certificate it contains. The blob may be concatenated PEM, a PKCS#12
//! archive or a JKS keystore; the formats are tried in that order and the
//! first one that recognizes the input wins, even if it then reports an
//! error for some of its entries.

pub mod jks;
pub mod pem;
pub mod pkcs12;

#[cfg(test)]
pub(crate) mod testutil;

use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref};
use strum_macros::Display;

use crate::error::ExportError;

/// Expiry facts about one certificate, recomputed on every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateMetric {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Seconds from the observation time until `not_after`; negative once
    /// expired.
    pub duration_until_expiry: f64,
    pub issuer_cn: String,
    pub subject_cn: String,
    /// Keystore alias, set for JKS entries only.
    pub alias: Option<String>,
}

impl CertificateMetric {
    /// Extracts the metric from a parsed certificate as observed at `now`.
    pub fn from_x509(cert: &X509Ref, now: DateTime<Utc>) -> Result<Self, ExportError> {
        let not_before = asn1_to_utc(cert.not_before())?;
        let not_after = asn1_to_utc(cert.not_after())?;
        let duration_until_expiry = (not_after - now).num_milliseconds() as f64 / 1000.0;

        Ok(CertificateMetric {
            not_before,
            not_after,
            duration_until_expiry,
            issuer_cn: common_name(cert.issuer_name()),
            subject_cn: common_name(cert.subject_name()),
            alias: None,
        })
    }

    /// Same metric tagged with a keystore alias.
    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }
}

/// The last CN attribute of a distinguished name, or `""` if there is none.
fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .last()
        .map(|entry| match entry.data().as_utf8() {
            Ok(s) => s.to_string(),
            Err(_) => String::from_utf8_lossy(entry.data().as_slice()).into_owned(),
        })
        .unwrap_or_default()
}

fn asn1_to_utc(time: &Asn1TimeRef) -> Result<DateTime<Utc>, ExportError> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ExportError::entry(format!("validity timestamp {} is out of range", secs)))
}

/// Outcome of one format stage.
#[derive(Debug)]
pub enum Attempt {
    /// The input is in this stage's format; stop the chain here. `error`
    /// reports entries that could not be read.
    Recognized {
        metrics: Vec<CertificateMetric>,
        error: Option<ExportError>,
    },
    /// Not this format; the reason only feeds the aggregate error.
    Unrecognized(String),
}

impl Attempt {
    /// Wraps collected metrics and per-entry failure messages.
    pub(crate) fn recognized(metrics: Vec<CertificateMetric>, failures: Vec<String>) -> Self {
        let error = if failures.is_empty() {
            None
        } else {
            Some(ExportError::Entry { details: failures })
        };
        Attempt::Recognized { metrics, error }
    }
}

/// Container formats understood by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Format {
    #[strum(serialize = "pem")]
    Pem,
    #[strum(serialize = "pkcs12")]
    Pkcs12,
    #[strum(serialize = "jks")]
    Jks,
}

/// Result of a successful [`decode`]: the recognizing format, the metrics in
/// encounter order, and an optional entry error for partial results.
#[derive(Debug)]
pub struct Decoded {
    pub format: Format,
    pub metrics: Vec<CertificateMetric>,
    pub error: Option<ExportError>,
}

/// Decodes `bytes` as PEM, then PKCS#12, then JKS, observing expiry now.
pub fn decode(bytes: &[u8], passphrase: &str) -> Result<Decoded, ExportError> {
    decode_at(bytes, passphrase, Utc::now())
}

/// [`decode`] with an explicit observation time.
///
/// Returns [`ExportError::Format`] naming each stage's failure when no
/// format recognizes the input.
pub fn decode_at(bytes: &[u8], passphrase: &str, now: DateTime<Utc>) -> Result<Decoded, ExportError> {
    let pem = match pem::decode(bytes, now) {
        Attempt::Recognized { metrics, error } => {
            return Ok(Decoded {
                format: Format::Pem,
                metrics,
                error,
            })
        }
        Attempt::Unrecognized(reason) => reason,
    };

    let pkcs12 = match pkcs12::decode(bytes, passphrase, now) {
        Attempt::Recognized { metrics, error } => {
            return Ok(Decoded {
                format: Format::Pkcs12,
                metrics,
                error,
            })
        }
        Attempt::Unrecognized(reason) => reason,
    };

    let jks = match jks::decode(bytes, passphrase, now) {
        Attempt::Recognized { metrics, error } => {
            return Ok(Decoded {
                format: Format::Jks,
                metrics,
                error,
            })
        }
        Attempt::Unrecognized(reason) => reason,
    };

    Err(ExportError::Format { pem, pkcs12, jks })
}
