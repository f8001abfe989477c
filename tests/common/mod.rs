//! Fixtures minted with openssl at test time.

#![allow(dead_code)]

use cert_exporter::metrics::prom;
use cert_exporter::ExporterMetrics;
use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::provider::Provider;
use openssl::sha::Sha1;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use std::sync::atomic::{AtomicU32, Ordering};

static SERIAL: AtomicU32 = AtomicU32::new(1);

pub struct Issued {
    pub cert: X509,
    pub key: PKey<Private>,
}

/// A self-signed P-256 certificate valid from `not_before` to `not_after`.
pub fn self_signed(cn: &str, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Issued {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(SERIAL.fetch_add(1, Ordering::Relaxed))
        .unwrap()
        .to_asn1_integer()
        .unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(not_before.timestamp()).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(not_after.timestamp()).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    Issued {
        cert: builder.build(),
        key,
    }
}

pub fn pem(issued: &Issued) -> Vec<u8> {
    issued.cert.to_pem().unwrap()
}

pub fn pkcs12(issued: &Issued, alias: &str, password: &str) -> Vec<u8> {
    let mut builder = Pkcs12::builder();
    builder.name(alias).pkey(&issued.key).cert(&issued.cert);
    builder.build2(password).unwrap().to_der().unwrap()
}

/// An archive encrypted the way keytool and openssl 1.x wrote them: 3DES
/// for the key bag, 40-bit RC2 for the certificates, SHA-1 MAC.
///
/// The legacy provider is only held while building, so decoding has to
/// load it on its own.
pub fn legacy_pkcs12(issued: &Issued, alias: &str, password: &str) -> Vec<u8> {
    let _legacy = Provider::try_load(None, "legacy", true).unwrap();
    let mut builder = Pkcs12::builder();
    builder
        .name(alias)
        .pkey(&issued.key)
        .cert(&issued.cert)
        .key_algorithm(Nid::PBE_WITHSHA1AND3_KEY_TRIPLEDES_CBC)
        .cert_algorithm(Nid::PBE_WITHSHA1AND40BITRC2_CBC)
        .mac_md(MessageDigest::sha1());
    builder.build2(password).unwrap().to_der().unwrap()
}

/// A version 2 keystore of trusted certificate entries, in the given order.
pub fn jks(entries: &[(&str, &Issued)], password: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(0xFEED_FEEDu32.to_be_bytes());
    out.extend(2u32.to_be_bytes());
    out.extend((entries.len() as u32).to_be_bytes());
    for (alias, issued) in entries {
        let der = issued.cert.to_der().unwrap();
        out.extend(2u32.to_be_bytes());
        out.extend((alias.len() as u16).to_be_bytes());
        out.extend(alias.as_bytes());
        out.extend(1_700_000_000_000u64.to_be_bytes());
        out.extend(5u16.to_be_bytes());
        out.extend(b"X.509");
        out.extend((der.len() as u32).to_be_bytes());
        out.extend(der);
    }

    let mut sha = Sha1::new();
    for unit in password.encode_utf16() {
        sha.update(&unit.to_be_bytes());
    }
    sha.update(b"Mighty Aphrodite");
    sha.update(&out);
    out.extend(sha.finish());
    out
}

/// Sample lines of the metric `name` in the rendered registry of `metrics`.
pub fn series(metrics: &ExporterMetrics, name: &str) -> Vec<String> {
    let text = prom::render(metrics.registry()).unwrap();
    let labelled = format!("{}{{", name);
    let bare = format!("{} ", name);
    text.lines()
        .filter(|line| line.starts_with(&labelled) || line.starts_with(&bare))
        .map(str::to_string)
        .collect()
}
