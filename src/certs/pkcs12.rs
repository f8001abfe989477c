//! PKCS#12 stage: the leaf certificate followed by the CA certificates of
//! the archive. Any failure to open the archive, including a wrong
//! passphrase, hands the input on to the next stage.
//!
//! Archives written by Java keytool and older openssl releases encrypt with
//! RC2 and 3DES, which OpenSSL 3 only offers through its legacy provider.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use openssl::pkcs12::Pkcs12;
use openssl::provider::Provider;
use tracing::{debug, warn};

use super::{Attempt, CertificateMetric};

lazy_static! {
    static ref LEGACY_PROVIDER: Option<Provider> = match Provider::try_load(None, "legacy", true) {
        Ok(provider) => {
            debug!("Loaded the OpenSSL legacy provider");
            Some(provider)
        }
        Err(e) => {
            warn!(error = %e, "OpenSSL legacy provider unavailable, RC2 encrypted PKCS#12 archives will not open");
            None
        }
    };
}

/// Makes the legacy ciphers available to every later OpenSSL call. Loading
/// happens once per process.
pub fn load_legacy_provider() -> bool {
    LEGACY_PROVIDER.is_some()
}

pub fn decode(bytes: &[u8], passphrase: &str, now: DateTime<Utc>) -> Attempt {
    load_legacy_provider();
    let parsed = match Pkcs12::from_der(bytes).and_then(|archive| archive.parse2(passphrase)) {
        Ok(parsed) => parsed,
        Err(e) => return Attempt::Unrecognized(format!("failed to open PKCS#12 archive: {}", e)),
    };
    let Some(leaf) = parsed.cert else {
        return Attempt::Unrecognized("PKCS#12 archive holds no certificate".to_string());
    };

    let mut metrics = Vec::new();
    let mut failures = Vec::new();
    let chain = std::iter::once(leaf).chain(parsed.ca.into_iter().flatten());
    for (index, cert) in chain.enumerate() {
        match CertificateMetric::from_x509(&cert, now) {
            Ok(metric) => metrics.push(metric),
            Err(e) => failures.push(format!("PKCS#12 certificate {}: {}", index, e)),
        }
    }
    Attempt::recognized(metrics, failures)
}
