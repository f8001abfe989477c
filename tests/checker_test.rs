//! File and kubeconfig checkers against fixtures on disk.

mod common;

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cert_exporter::discovery::GlobMatcher;
use cert_exporter::filter::MetricFilter;
use cert_exporter::password::{PasswordResolver, PasswordSpec};
use cert_exporter::sources::files::FileSource;
use cert_exporter::sources::kubeconfig::KubeConfigSource;
use cert_exporter::{ExporterMetrics, PeriodicChecker, TickReport};
use chrono::{Duration, Utc};
use common::series;
use tempfile::TempDir;

fn write_cert(dir: &Path, name: &str, cn: &str, days: i64) {
    let now = Utc::now();
    let cert = common::self_signed(cn, now, now + Duration::days(days));
    fs::write(dir.join(name), common::pem(&cert)).unwrap();
}

fn glob(dir: &TempDir, pattern: &str) -> String {
    format!("{}/{}", dir.path().display(), pattern)
}

#[tokio::test]
async fn test_file_checker_follows_the_filesystem() {
    let dir = TempDir::new().unwrap();
    write_cert(dir.path(), "a.crt", "a", 10);
    write_cert(dir.path(), "b.crt", "b", 20);
    fs::write(dir.path().join("notes.txt"), "not matched").unwrap();

    let metrics = ExporterMetrics::new().unwrap();
    let matcher = GlobMatcher::new(vec![glob(&dir, "*.crt")], vec![]);
    let source = FileSource::new(matcher, "node-1".to_string(), PasswordResolver::default());
    let checker = PeriodicChecker::new(source, MetricFilter::default(), metrics.clone()).unwrap();

    let report = checker.tick().await;
    assert_eq!(report, TickReport { candidates: 2, samples: 2, errors: 0 });
    let expiring = series(&metrics, "cert_exporter_cert_expires_in_seconds");
    assert_eq!(expiring.len(), 2);
    assert!(expiring.iter().all(|s| s.contains("nodename=\"node-1\"")));
    assert!(expiring.iter().all(|s| s.contains("alias=\"\"")));

    fs::remove_file(dir.path().join("b.crt")).unwrap();
    checker.tick().await;
    let expiring = series(&metrics, "cert_exporter_cert_expires_in_seconds");
    assert_eq!(expiring.len(), 1);
    assert!(expiring[0].contains("cn=\"a\""));
}

#[tokio::test]
async fn test_file_checker_excludes_and_passwords() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("pki/etcd")).unwrap();
    write_cert(&dir.path().join("pki"), "apiserver.crt", "kube-apiserver", 300);
    write_cert(&dir.path().join("pki/etcd"), "server.crt", "etcd", 300);

    let now = Utc::now();
    let client = common::self_signed("client", now, now + Duration::days(30));
    fs::write(dir.path().join("pki/client.p12"), common::pkcs12(&client, "client", "p12-pass")).unwrap();

    let specs = vec![PasswordSpec::parse(&glob(&dir, "**/*.p12:p12-pass")).unwrap()];
    let metrics = ExporterMetrics::new().unwrap();
    let matcher = GlobMatcher::new(
        vec![glob(&dir, "pki/**/*.crt"), glob(&dir, "pki/*.p12")],
        vec![glob(&dir, "pki/etcd/*")],
    );
    let source = FileSource::new(matcher, String::new(), PasswordResolver::new(specs, None));
    let checker = PeriodicChecker::new(source, MetricFilter::default(), metrics.clone()).unwrap();

    let report = checker.tick().await;
    assert_eq!(report.candidates, 2);
    assert_eq!(report.samples, 2);
    assert_eq!(metrics.error_count(), 0);
    assert_eq!(
        series(&metrics, "cert_exporter_discovered"),
        vec!["cert_exporter_discovered{source=\"cert\"} 2"]
    );
}

#[tokio::test]
async fn test_file_checker_counts_undecodable_files() {
    let dir = TempDir::new().unwrap();
    write_cert(dir.path(), "good.pem", "good", 5);
    fs::write(dir.path().join("bad.pem"), "garbage").unwrap();

    let metrics = ExporterMetrics::new().unwrap();
    let matcher = GlobMatcher::new(vec![glob(&dir, "*.pem")], vec![]);
    let source = FileSource::new(matcher, String::new(), PasswordResolver::default());
    let checker = PeriodicChecker::new(source, MetricFilter::default(), metrics.clone()).unwrap();

    let report = checker.tick().await;
    assert_eq!(report.samples, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(metrics.error_count(), 1);
}

#[tokio::test]
async fn test_kubeconfig_checker() {
    let dir = TempDir::new().unwrap();
    let now = Utc::now();
    let ca = common::self_signed("kubernetes", now, now + Duration::days(3650));
    let admin = common::self_signed("kubernetes-admin", now, now + Duration::days(365));
    fs::write(dir.path().join("admin.crt"), common::pem(&admin)).unwrap();

    let kubeconfig = format!(
        r#"apiVersion: v1
kind: Config
clusters:
- name: production
  cluster:
    server: https://10.0.0.1:6443
    certificate-authority-data: {}
users:
- name: admin
  user:
    client-certificate: admin.crt
- name: token-only
  user:
    token: abc
"#,
        STANDARD.encode(common::pem(&ca))
    );
    fs::write(dir.path().join("admin.conf"), kubeconfig).unwrap();

    let metrics = ExporterMetrics::new().unwrap();
    let matcher = GlobMatcher::new(vec![glob(&dir, "*.conf")], vec![]);
    let source = KubeConfigSource::new(matcher, "cp-1".to_string());
    let checker = PeriodicChecker::new(source, MetricFilter::default(), metrics.clone()).unwrap();

    let report = checker.tick().await;
    assert_eq!(report, TickReport { candidates: 1, samples: 2, errors: 0 });

    let expiring = series(&metrics, "cert_exporter_kubeconfig_expires_in_seconds");
    assert!(expiring
        .iter()
        .any(|s| s.contains("type=\"cluster\"") && s.contains("name=\"production\"") && s.contains("cn=\"kubernetes\"")));
    assert!(expiring
        .iter()
        .any(|s| s.contains("type=\"user\"") && s.contains("name=\"admin\"")));
    assert!(expiring.iter().all(|s| !s.contains("alias=")));
}
