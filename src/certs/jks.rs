//! JKS stage: Java keystores (magic `0xFEEDFEED`, versions 1 and 2).
//!
//! The keystore counts as recognized once its structure parses and its
//! integrity digest matches the passphrase. From then on every alias is
//! attempted; entries that cannot be read are collected into one
//! [`ExportError::Entry`](crate::error::ExportError::Entry) returned next to
//! the metrics of the entries that could.

use chrono::{DateTime, Utc};
use openssl::pkey::PKey;
use openssl::sha::Sha1;
use openssl::x509::X509;

use super::{Attempt, CertificateMetric};
use crate::error::ExportError;

const MAGIC: u32 = 0xFEED_FEED;
const PRIVATE_KEY_TAG: u32 = 1;
const TRUSTED_CERT_TAG: u32 = 2;
const DIGEST_LEN: usize = 20;
const WHITENER: &[u8] = b"Mighty Aphrodite";

/// DER contents of OID 1.3.6.1.4.1.42.2.17.1.1, Sun's JKS key protector.
const KEY_PROTECTOR_OID: &[u8] = &[0x2B, 0x06, 0x01, 0x04, 0x01, 0x2A, 0x02, 0x11, 0x01, 0x01];

/// A keystore whose integrity has been verified.
#[derive(Debug)]
pub struct Keystore {
    pub version: u32,
    /// Entries in file order.
    pub entries: Vec<Entry>,
}

#[derive(Debug)]
pub struct Entry {
    pub alias: String,
    pub kind: EntryKind,
}

#[derive(Debug)]
pub enum EntryKind {
    PrivateKey {
        /// DER `EncryptedPrivateKeyInfo`
        protected_key: Vec<u8>,
        /// DER certificates, leaf first
        chain: Vec<Vec<u8>>,
    },
    TrustedCertificate {
        certificate: Vec<u8>,
    },
}

/// Parses a keystore and checks its digest against `password`.
pub fn load(bytes: &[u8], password: &str) -> Result<Keystore, String> {
    let mut reader = Reader::new(bytes);
    if reader.u32()? != MAGIC {
        return Err("invalid keystore magic".to_string());
    }
    let version = reader.u32()?;
    if version != 1 && version != 2 {
        return Err(format!("unsupported keystore version {}", version));
    }

    let count = reader.u32()?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let tag = reader.u32()?;
        let alias = reader.utf()?;
        let _created_millis = reader.u64()?;
        let kind = match tag {
            PRIVATE_KEY_TAG => {
                let protected_key = reader.block()?.to_vec();
                let chain_len = reader.u32()?;
                let mut chain = Vec::new();
                for _ in 0..chain_len {
                    chain.push(reader.certificate(version)?.to_vec());
                }
                EntryKind::PrivateKey {
                    protected_key,
                    chain,
                }
            }
            TRUSTED_CERT_TAG => EntryKind::TrustedCertificate {
                certificate: reader.certificate(version)?.to_vec(),
            },
            other => return Err(format!("unknown entry tag {} for alias '{}'", other, alias)),
        };
        entries.push(Entry { alias, kind });
    }

    let body_len = reader.pos;
    let stored = reader.take(DIGEST_LEN)?;
    if integrity_digest(&bytes[..body_len], password) != stored {
        return Err("keystore was tampered with, or password was incorrect".to_string());
    }

    Ok(Keystore { version, entries })
}

/// SHA-1 over UTF-16BE(password) ‖ "Mighty Aphrodite" ‖ body.
pub(crate) fn integrity_digest(body: &[u8], password: &str) -> [u8; DIGEST_LEN] {
    let mut sha = Sha1::new();
    sha.update(&password_bytes(password));
    sha.update(WHITENER);
    sha.update(body);
    sha.finish()
}

fn password_bytes(password: &str) -> Vec<u8> {
    password.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

/// Unwraps a private key protected with Sun's JKS key protector and returns
/// the PKCS#8 `PrivateKeyInfo` DER.
pub fn recover_key(protected_key: &[u8], password: &str) -> Result<Vec<u8>, String> {
    let (info, _) = der::read(protected_key, der::SEQUENCE)?;
    let (algorithm, rest) = der::read(info, der::SEQUENCE)?;
    let (oid, _) = der::read(algorithm, der::OID)?;
    if oid != KEY_PROTECTOR_OID {
        return Err("unsupported private key protection algorithm".to_string());
    }
    let (encrypted, _) = der::read(rest, der::OCTET_STRING)?;
    if encrypted.len() < 2 * DIGEST_LEN {
        return Err("protected key is too short".to_string());
    }

    let (salt, tail) = encrypted.split_at(DIGEST_LEN);
    let (ciphertext, check) = tail.split_at(tail.len() - DIGEST_LEN);
    let key = keystream_xor(ciphertext, salt, password);

    let mut sha = Sha1::new();
    sha.update(&password_bytes(password));
    sha.update(&key);
    if sha.finish() != check {
        return Err("cannot recover key, password may be incorrect".to_string());
    }
    Ok(key)
}

/// XORs `data` with SHA-1(pw ‖ salt), SHA-1(pw ‖ d1), SHA-1(pw ‖ d2), ...
pub(crate) fn keystream_xor(data: &[u8], salt: &[u8], password: &str) -> Vec<u8> {
    let password = password_bytes(password);
    let mut digest = salt.to_vec();
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(DIGEST_LEN) {
        let mut sha = Sha1::new();
        sha.update(&password);
        sha.update(&digest);
        digest = sha.finish().to_vec();
        out.extend(chunk.iter().zip(&digest).map(|(b, k)| b ^ k));
    }
    out
}

/// Runs the JKS stage over `bytes`.
pub fn decode(bytes: &[u8], passphrase: &str, now: DateTime<Utc>) -> Attempt {
    let keystore = match load(bytes, passphrase) {
        Ok(keystore) => keystore,
        Err(reason) => return Attempt::Unrecognized(format!("failed to decode JKS: {}", reason)),
    };

    let mut metrics = Vec::new();
    let mut failures = Vec::new();
    for entry in &keystore.entries {
        let alias = entry.alias.as_str();
        match &entry.kind {
            EntryKind::TrustedCertificate { certificate } => match metric(certificate, alias, now) {
                Ok(m) => metrics.push(m),
                Err(e) => failures.push(format!(
                    "failed to parse trusted certificate for alias '{}': {}",
                    alias, e
                )),
            },
            EntryKind::PrivateKey {
                protected_key,
                chain,
            } => {
                let opened = recover_key(protected_key, passphrase).and_then(|key| {
                    PKey::private_key_from_pkcs8(&key)
                        .map(|_| ())
                        .map_err(|e| format!("recovered key is not PKCS#8: {}", e))
                });
                if let Err(reason) = opened {
                    failures.push(format!(
                        "failed to get private key entry '{}' (key may have a different password than the keystore): {}",
                        alias, reason
                    ));
                    continue;
                }
                for (index, der) in chain.iter().enumerate() {
                    match metric(der, alias, now) {
                        Ok(m) => metrics.push(m),
                        Err(e) => failures.push(format!(
                            "failed to parse certificate in chain for private key entry '{}' at index {}: {}",
                            alias, index, e
                        )),
                    }
                }
            }
        }
    }
    Attempt::recognized(metrics, failures)
}

fn metric(der: &[u8], alias: &str, now: DateTime<Utc>) -> Result<CertificateMetric, ExportError> {
    let cert = X509::from_der(der)?;
    Ok(CertificateMetric::from_x509(&cert, now)?.with_alias(alias))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| format!("unexpected end of keystore at offset {}", self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, String> {
        let hi = u64::from(self.u32()?);
        let lo = u64::from(self.u32()?);
        Ok(hi << 32 | lo)
    }

    /// Java `writeUTF`: u16 length then (modified) UTF-8.
    fn utf(&mut self) -> Result<String, String> {
        let len = usize::from(self.u16()?);
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    /// u32 length-prefixed bytes.
    fn block(&mut self) -> Result<&'a [u8], String> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Version 2 stores prefix each certificate with its type name.
    fn certificate(&mut self, version: u32) -> Result<&'a [u8], String> {
        if version == 2 {
            let cert_type = self.utf()?;
            if cert_type != "X.509" {
                return Err(format!("unsupported certificate type '{}'", cert_type));
            }
        }
        self.block()
    }
}

/// Just enough DER to walk an `EncryptedPrivateKeyInfo`.
mod der {
    pub const SEQUENCE: u8 = 0x30;
    pub const OID: u8 = 0x06;
    pub const OCTET_STRING: u8 = 0x04;

    /// Reads one TLV with the expected tag; returns (contents, rest).
    pub fn read(data: &[u8], tag: u8) -> Result<(&[u8], &[u8]), String> {
        let (&actual, data) = data.split_first().ok_or("truncated DER")?;
        if actual != tag {
            return Err(format!("expected DER tag {:#04x}, found {:#04x}", tag, actual));
        }
        let (&first, mut data) = data.split_first().ok_or("truncated DER length")?;
        let len = if first < 0x80 {
            usize::from(first)
        } else {
            let octets = usize::from(first & 0x7f);
            if octets == 0 || octets > 4 || data.len() < octets {
                return Err("unsupported DER length".to_string());
            }
            let len = data[..octets]
                .iter()
                .fold(0usize, |acc, &b| acc << 8 | usize::from(b));
            data = &data[octets..];
            len
        };
        if data.len() < len {
            return Err("DER value runs past end of input".to_string());
        }
        Ok(data.split_at(len))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{self_signed, signed_by};
    use super::*;
    use chrono::Duration;

    /// Minimal keystore writer mirroring what `keytool` produces.
    struct Writer {
        version: u32,
        entries: Vec<u8>,
        count: u32,
    }

    impl Writer {
        fn new(version: u32) -> Self {
            Writer {
                version,
                entries: Vec::new(),
                count: 0,
            }
        }

        fn header(&mut self, tag: u32, alias: &str) {
            self.count += 1;
            self.entries.extend(tag.to_be_bytes());
            self.entries.extend((alias.len() as u16).to_be_bytes());
            self.entries.extend(alias.as_bytes());
            self.entries.extend(1_700_000_000_000u64.to_be_bytes());
        }

        fn cert(&mut self, der: &[u8]) {
            if self.version == 2 {
                self.entries.extend(5u16.to_be_bytes());
                self.entries.extend(b"X.509");
            }
            self.entries.extend((der.len() as u32).to_be_bytes());
            self.entries.extend(der);
        }

        fn trusted(mut self, alias: &str, der: &[u8]) -> Self {
            self.header(TRUSTED_CERT_TAG, alias);
            self.cert(der);
            self
        }

        fn private_key(mut self, alias: &str, protected: &[u8], chain: &[Vec<u8>]) -> Self {
            self.header(PRIVATE_KEY_TAG, alias);
            self.entries.extend((protected.len() as u32).to_be_bytes());
            self.entries.extend(protected);
            self.entries.extend((chain.len() as u32).to_be_bytes());
            for der in chain {
                self.cert(der);
            }
            self
        }

        fn finish(self, password: &str) -> Vec<u8> {
            let mut out = Vec::new();
            out.extend(MAGIC.to_be_bytes());
            out.extend(self.version.to_be_bytes());
            out.extend(self.count.to_be_bytes());
            out.extend(self.entries);
            let digest = integrity_digest(&out, password);
            out.extend(digest);
            out
        }
    }

    fn tlv(tag: u8, contents: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        if contents.len() < 0x80 {
            out.push(contents.len() as u8);
        } else {
            out.push(0x82);
            out.extend((contents.len() as u16).to_be_bytes());
        }
        out.extend(contents);
        out
    }

    fn protect(pkcs8: &[u8], password: &str) -> Vec<u8> {
        let salt = [7u8; DIGEST_LEN];
        let mut sha = Sha1::new();
        sha.update(&password_bytes(password));
        sha.update(pkcs8);
        let check = sha.finish();

        let mut encrypted = salt.to_vec();
        encrypted.extend(keystream_xor(pkcs8, &salt, password));
        encrypted.extend(check);

        let algorithm = [tlv(der::OID, KEY_PROTECTOR_OID), vec![0x05, 0x00]].concat();
        let info = [tlv(der::SEQUENCE, &algorithm), tlv(der::OCTET_STRING, &encrypted)].concat();
        tlv(der::SEQUENCE, &info)
    }

    fn recognized(attempt: Attempt) -> (Vec<CertificateMetric>, Option<ExportError>) {
        match attempt {
            Attempt::Recognized { metrics, error } => (metrics, error),
            Attempt::Unrecognized(reason) => panic!("expected JKS, got: {}", reason),
        }
    }

    #[test]
    fn test_trusted_entries_keep_file_order_and_alias() {
        let now = Utc::now();
        let b = self_signed("b-ca", now, now + Duration::days(10));
        let a = self_signed("a-ca", now, now + Duration::days(20));
        let store = Writer::new(2)
            .trusted("zeta", &b.cert.to_der().unwrap())
            .trusted("alpha", &a.cert.to_der().unwrap())
            .finish("changeit");

        let (metrics, error) = recognized(decode(&store, "changeit", now));
        assert!(error.is_none());
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].alias.as_deref(), Some("zeta"));
        assert_eq!(metrics[0].subject_cn, "b-ca");
        assert_eq!(metrics[1].alias.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_version_one_keystore() {
        let now = Utc::now();
        let ca = self_signed("v1", now, now + Duration::days(1));
        let store = Writer::new(1)
            .trusted("ca", &ca.cert.to_der().unwrap())
            .finish("pw");

        let keystore = load(&store, "pw").unwrap();
        assert_eq!(keystore.version, 1);
        let (metrics, _) = recognized(decode(&store, "pw", now));
        assert_eq!(metrics.len(), 1);
    }

    #[test]
    fn test_private_key_entry_emits_whole_chain() {
        let now = Utc::now();
        let root = self_signed("root", now, now + Duration::days(300));
        let leaf = signed_by("server", &root, now, now + Duration::days(30));
        let protected = protect(&leaf.key.private_key_to_pkcs8().unwrap(), "secret");
        let chain = vec![leaf.cert.to_der().unwrap(), root.cert.to_der().unwrap()];
        let store = Writer::new(2)
            .private_key("server", &protected, &chain)
            .finish("secret");

        let (metrics, error) = recognized(decode(&store, "secret", now));
        assert!(error.is_none());
        let names: Vec<_> = metrics.iter().map(|m| m.subject_cn.as_str()).collect();
        assert_eq!(names, vec!["server", "root"]);
        assert!(metrics.iter().all(|m| m.alias.as_deref() == Some("server")));
    }

    #[test]
    fn test_recover_key_round_trip_and_wrong_password() {
        let now = Utc::now();
        let issued = self_signed("k", now, now + Duration::days(1));
        let pkcs8 = issued.key.private_key_to_pkcs8().unwrap();
        let protected = protect(&pkcs8, "one");

        assert_eq!(recover_key(&protected, "one").unwrap(), pkcs8);
        assert!(recover_key(&protected, "two").is_err());
    }

    #[test]
    fn test_key_with_other_password_is_partial_result() {
        let now = Utc::now();
        let ca = self_signed("ca", now, now + Duration::days(10));
        let leaf = signed_by("leaf", &ca, now, now + Duration::days(5));
        let protected = protect(&leaf.key.private_key_to_pkcs8().unwrap(), "key-password");
        let store = Writer::new(2)
            .trusted("ca", &ca.cert.to_der().unwrap())
            .private_key("leaf", &protected, &[leaf.cert.to_der().unwrap()])
            .trusted("ca-again", &ca.cert.to_der().unwrap())
            .finish("store-password");

        let (metrics, error) = recognized(decode(&store, "store-password", now));
        let aliases: Vec<_> = metrics.iter().filter_map(|m| m.alias.as_deref()).collect();
        assert_eq!(aliases, vec!["ca", "ca-again"]);
        match error {
            Some(ExportError::Entry { details }) => {
                assert_eq!(details.len(), 1);
                assert!(details[0].contains("'leaf'"));
            }
            other => panic!("expected entry error, got {:?}", other),
        }
    }

    #[test]
    fn test_unparsable_certificates_are_all_reported() {
        let now = Utc::now();
        let good = self_signed("good", now, now + Duration::days(1));
        let store = Writer::new(2)
            .trusted("broken-1", b"not der")
            .trusted("good", &good.cert.to_der().unwrap())
            .trusted("broken-2", b"also not der")
            .finish("");

        let (metrics, error) = recognized(decode(&store, "", now));
        assert_eq!(metrics.len(), 1);
        match error {
            Some(ExportError::Entry { details }) => assert_eq!(details.len(), 2),
            other => panic!("expected entry error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_keystore() {
        let store = Writer::new(2).finish("changeit");
        let (metrics, error) = recognized(decode(&store, "changeit", Utc::now()));
        assert!(metrics.is_empty());
        assert!(error.is_none());
    }

    #[test]
    fn test_wrong_store_password_is_unrecognized() {
        let store = Writer::new(2).finish("changeit");
        match decode(&store, "nope", Utc::now()) {
            Attempt::Unrecognized(reason) => assert!(reason.contains("password")),
            Attempt::Recognized { .. } => panic!("wrong password must not open the store"),
        }
    }

    #[test]
    fn test_structural_failures() {
        assert!(load(b"", "").unwrap_err().contains("unexpected end"));
        assert!(load(&[0, 0, 0, 0, 0, 0, 0, 2], "").unwrap_err().contains("magic"));

        let mut store = Writer::new(2).finish("");
        store[7] = 3;
        assert!(load(&store, "").unwrap_err().contains("version"));

        let store = Writer::new(2).finish("");
        assert!(load(&store[..store.len() - 1], "").is_err());
    }

    #[test]
    fn test_der_read() {
        let long = vec![0xAB; 200];
        let encoded = [tlv(der::OCTET_STRING, &long), vec![0x01]].concat();
        let (contents, rest) = der::read(&encoded, der::OCTET_STRING).unwrap();
        assert_eq!(contents, &long[..]);
        assert_eq!(rest, &[0x01]);
        assert!(der::read(&encoded, der::SEQUENCE).is_err());
        assert!(der::read(&[0x04, 0x05, 0x00], der::OCTET_STRING).is_err());
    }
}
