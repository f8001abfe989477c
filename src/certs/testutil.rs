//! Certificate fixtures minted at test time.

use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use std::sync::atomic::{AtomicU32, Ordering};

static SERIAL: AtomicU32 = AtomicU32::new(1);

pub(crate) struct Issued {
    pub cert: X509,
    pub key: PKey<Private>,
}

pub(crate) fn mint(
    cn: Option<&str>,
    issuer: Option<&Issued>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Issued {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    if let Some(cn) = cn {
        name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    }
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(SERIAL.fetch_add(1, Ordering::Relaxed))
        .unwrap()
        .to_asn1_integer()
        .unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some(issuer) => builder.set_issuer_name(issuer.cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(not_before.timestamp()).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(not_after.timestamp()).unwrap())
        .unwrap();
    let signing_key = issuer.map(|i| &i.key).unwrap_or(&key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();

    Issued {
        cert: builder.build(),
        key,
    }
}

pub(crate) fn self_signed(cn: &str, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Issued {
    mint(Some(cn), None, not_before, not_after)
}

pub(crate) fn signed_by(
    cn: &str,
    issuer: &Issued,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Issued {
    mint(Some(cn), Some(issuer), not_before, not_after)
}

pub(crate) fn to_pem(cert: &X509) -> Vec<u8> {
    cert.to_pem().unwrap()
}
