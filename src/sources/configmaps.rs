//! Kubernetes ConfigMaps, one payload per selected `data` or `binaryData` key.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ClusterClient, ConfigMapObject, KeyGlobs, ListScope};
use crate::checker::{CertificateSource, Payload};
use crate::error::ExportError;
use crate::metrics::{ExporterMetrics, ResourceKind};
use crate::password::PasswordResolver;

pub struct ConfigMapSource {
    client: Arc<dyn ClusterClient>,
    scope: ListScope,
    keys: KeyGlobs,
    passwords: PasswordResolver,
}

impl ConfigMapSource {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        scope: ListScope,
        keys: KeyGlobs,
        passwords: PasswordResolver,
    ) -> Self {
        ConfigMapSource {
            client,
            scope,
            keys,
            passwords,
        }
    }
}

#[async_trait]
impl CertificateSource for ConfigMapSource {
    type Candidate = ConfigMapObject;

    fn kind(&self) -> ResourceKind {
        ResourceKind::ConfigMap
    }

    async fn discover(&self, metrics: &ExporterMetrics) -> Vec<ConfigMapObject> {
        self.scope
            .collect("configmaps", metrics, |namespace, selector| async move {
                self.client
                    .list_config_maps(&namespace, selector.as_deref())
                    .await
            })
            .await
    }

    async fn fetch(&self, config_map: &ConfigMapObject) -> Vec<Result<Payload, ExportError>> {
        let meta = &config_map.meta;
        config_map
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
