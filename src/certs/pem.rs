//! PEM stage: sequential `-----BEGIN <label>-----` blocks, read with the
//! `pem` crate.
//!
//! The input counts as PEM as soon as one block of any label decodes, so a
//! file holding only a private key is recognized with zero metrics. Bytes
//! around the blocks (leading comments, trailing garbage) are ignored. A
//! block whose body is not valid base64, or whose END label does not match,
//! makes the whole input unrecognized here.

use chrono::{DateTime, Utc};
use openssl::x509::X509;
use tracing::{debug, warn};

use super::{Attempt, CertificateMetric};
use crate::error::ExportError;

const CERTIFICATE: &str = "CERTIFICATE";

/// Runs the PEM stage over `bytes`.
pub fn decode(bytes: &[u8], now: DateTime<Utc>) -> Attempt {
    let blocks = match ::pem::parse_many(bytes) {
        Ok(blocks) => blocks,
        Err(e) => return Attempt::Unrecognized(format!("malformed PEM data: {}", e)),
    };
    if blocks.is_empty() {
        return Attempt::Unrecognized("no PEM data found in input".to_string());
    }

    let mut metrics = Vec::new();
    let mut failures = Vec::new();
    for (index, block) in blocks.iter().enumerate() {
        let number = index + 1;
        if block.tag() != CERTIFICATE {
            debug!(label = block.tag(), "Skipping PEM block");
            continue;
        }
        let parsed = X509::from_der(block.contents())
            .map_err(ExportError::from)
            .and_then(|cert| CertificateMetric::from_x509(&cert, now));
        match parsed {
            Ok(metric) => metrics.push(metric),
            Err(e) => {
                warn!(block = number, error = %e, "Error parsing an X.509 certificate from a PEM block");
                failures.push(format!("PEM block {}: {}", number, e));
            }
        }
    }
    Attempt::recognized(metrics, failures)
}
