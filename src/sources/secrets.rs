//! Kubernetes Secrets, one payload per selected data key.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ClusterClient, KeyGlobs, ListScope, SecretObject};
use crate::checker::{CertificateSource, Payload};
use crate::error::ExportError;
use crate::metrics::{ExporterMetrics, ResourceKind};
use crate::password::PasswordResolver;

pub struct SecretSource {
    client: Arc<dyn ClusterClient>,
    scope: ListScope,
    keys: KeyGlobs,
    /// Keep only these secret types; empty keeps every type
    types: Vec<String>,
    passwords: PasswordResolver,
}

impl SecretSource {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        scope: ListScope,
        keys: KeyGlobs,
        types: Vec<String>,
        passwords: PasswordResolver,
    ) -> Self {
        SecretSource {
            client,
            scope,
            keys,
            types,
            passwords,
        }
    }
}

#[async_trait]
impl CertificateSource for SecretSource {
    type Candidate = SecretObject;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Secret
    }

    async fn discover(&self, metrics: &ExporterMetrics) -> Vec<SecretObject> {
        let secrets = self
            .scope
            .collect("secrets", metrics, |namespace, selector| async move {
                self.client.list_secrets(&namespace, selector.as_deref()).await
            })
            .await;
        secrets
            .into_iter()
            .filter(|s| self.types.is_empty() || self.types.contains(&s.secret_type))
            .collect()
    }

    async fn fetch(&self, secret: &SecretObject) -> Vec<Result<Payload, ExportError>> {
        let meta = &secret.meta;
        secret
            .data
            .iter()
            .filter(|(key, _)| self.keys.selects(key))
            .map(|(key, bytes)| {
                let identifier = format!("{}/{}/{}", meta.namespace, meta.name, key);
                Ok(Payload::new(
                    vec![key.clone(), meta.name.clone(), meta.namespace.clone()],
                    bytes.clone(),
                )
                .with_passphrase(self.passwords.resolve(&identifier)))
            })
            .collect()
    }
}
