//! Certificates stored as JSON values in AWS Secrets Manager.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tracing::{debug, info};

use super::SecretsClient;
use crate::checker::{CertificateSource, Payload};
use crate::error::ExportError;
use crate::metrics::{ExporterMetrics, ResourceKind};
use crate::password::PasswordResolver;

/// [`SecretsClient`] backed by the AWS SDK default credential chain.
pub struct AwsSecretsClient {
    client: SecretsManagerClient,
    region: String,
}

impl std::fmt::Debug for AwsSecretsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSecretsClient")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl AwsSecretsClient {
    pub async fn new(region: &str) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        AwsSecretsClient {
            client: SecretsManagerClient::new(&sdk_config),
            region: region.to_string(),
        }
    }
}

#[async_trait]
impl SecretsClient for AwsSecretsClient {
    async fn get_secret_string(&self, secret_id: &str) -> Result<Option<String>, ExportError> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| ExportError::CloudSecret {
                secret: secret_id.to_string(),
                reason: aws_sdk_secretsmanager::error::DisplayErrorContext(&e).to_string(),
            })?;
        Ok(response.secret_string().map(str::to_string))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsSecretsSettings {
    pub account: String,
    pub region: String,
    /// Only keys containing this substring are decoded
    pub key_substring: String,
    pub secrets: Vec<String>,
}

impl AwsSecretsSettings {
    pub fn arn(&self, secret: &str) -> String {
        format!(
            "arn:aws:secretsmanager:{}:{}:secret:{}",
            self.region, self.account, secret
        )
    }
}

pub struct AwsSecretSource {
    client: Arc<dyn SecretsClient>,
    settings: AwsSecretsSettings,
    passwords: PasswordResolver,
}

impl AwsSecretSource {
    pub fn new(client: Arc<dyn SecretsClient>, settings: AwsSecretsSettings, passwords: PasswordResolver) -> Self {
        AwsSecretSource {
            client,
            settings,
            passwords,
        }
    }
}

/// Raw PEM is used as is, anything else must be base64.
fn value_bytes(secret: &str, key: &str, value: &str) -> Result<Vec<u8>, ExportError> {
    if value.starts_with("-----BEGIN") {
        return Ok(value.as_bytes().to_vec());
    }
    let compact: String = value.split_whitespace().collect();
    STANDARD.decode(compact).map_err(|e| ExportError::CloudSecret {
        secret: secret.to_string(),
        reason: format!("value of key '{}' is neither PEM nor base64: {}", key, e),
    })
}

#[async_trait]
impl CertificateSource for AwsSecretSource {
    type Candidate = String;

    fn kind(&self) -> ResourceKind {
        ResourceKind::AwsSecret
    }

    async fn discover(&self, _metrics: &ExporterMetrics) -> Vec<String> {
        self.settings.secrets.clone()
    }

    async fn fetch(&self, secret: &String) -> Vec<Result<Payload, ExportError>> {
        info!(secret = %secret, "Getting secret from AWS Secrets Manager");
        let value = match self.client.get_secret_string(&self.settings.arn(secret)).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                info!(secret = %secret, "Secret has no string value");
                return Vec::new();
            }
            Err(e) => return vec![Err(e)],
        };

        let map = match serde_json::from_str::<serde_json::Map<String, Value>>(&value) {
            Ok(map) => map,
            Err(e) => {
                return vec![Err(ExportError::CloudSecret {
                    secret: secret.clone(),
                    reason: format!("secret string is not a JSON object: {}", e),
                })]
            }
        };

        map.iter()
            .filter(|(key, _)| key.contains(&self.settings.key_substring))
            .filter_map(|(key, value)| match value.as_str() {
                Some(text) => Some((key, text)),
                None => {
                    debug!(secret = %secret, key = %key, "Skipping non-string value");
                    None
                }
            })
            .map(|(key, text)| {
                let bytes = value_bytes(secret, key, text)?;
                Ok(Payload::new(vec![secret.clone(), key.clone()], bytes)
                    .with_passphrase(self.passwords.resolve(&format!("{}/{}", secret, key))))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::fake::FakeSecrets;
    use super::*;

    fn settings(secrets: &[&str]) -> AwsSecretsSettings {
        AwsSecretsSettings {
            account: "123456789012".to_string(),
            region: "eu-west-1".to_string(),
            key_substring: "crt".to_string(),
            secrets: secrets.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_arn() {
        assert_eq!(
            settings(&[]).arn("prod/tls"),
            "arn:aws:secretsmanager:eu-west-1:123456789012:secret:prod/tls"
        );
    }

    #[test]
    fn test_value_bytes() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAEC\n-----END CERTIFICATE-----\n";
        assert_eq!(value_bytes("s", "k", pem).unwrap(), pem.as_bytes());
        assert_eq!(value_bytes("s", "k", "aGVs\nbG8=").unwrap(), b"hello");
        assert!(value_bytes("s", "k", "%%%").is_err());
    }

    #[tokio::test]
    async fn test_fetch_filters_keys() {
        let cfg = settings(&["web"]);
        let mut fake = FakeSecrets::default();
        fake.values.insert(
            cfg.arn("web"),
            Some(r#"{"tls.crt":"aGVsbG8=","tls.key":"c2VjcmV0","ca.crt":42,"bad.crt":"%%"}"#.to_string()),
        );
        let source = AwsSecretSource::new(Arc::new(fake), cfg, PasswordResolver::default());

        let payloads = source.fetch(&"web".to_string()).await;
        assert_eq!(payloads.len(), 2);
        let ok: Vec<_> = payloads.iter().filter_map(|p| p.as_ref().ok()).collect();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].identity, vec!["web", "tls.crt"]);
        assert_eq!(ok[0].bytes, b"hello");
    }

    #[tokio::test]
    async fn test_missing_and_binary_secrets() {
        let cfg = settings(&["binary", "missing"]);
        let mut fake = FakeSecrets::default();
        fake.values.insert(cfg.arn("binary"), None);
        let source = AwsSecretSource::new(Arc::new(fake), cfg, PasswordResolver::default());

        let metrics = ExporterMetrics::new().unwrap();
        assert_eq!(source.discover(&metrics).await, vec!["binary", "missing"]);
        assert!(source.fetch(&"binary".to_string()).await.is_empty());
        let missing = source.fetch(&"missing".to_string()).await;
        assert!(matches!(missing[..], [Err(ExportError::CloudSecret { .. })]));
    }
}
