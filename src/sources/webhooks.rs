//! CA bundles of mutating and validating admission webhook configurations.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use super::{ClusterClient, ListScope, WebhookConfiguration, WebhookKind};
use crate::checker::{CertificateSource, Payload};
use crate::error::ExportError;
use crate::metrics::{ExporterMetrics, ResourceKind};

pub struct WebhookSource {
    client: Arc<dyn ClusterClient>,
    /// Namespaces are ignored; webhook configurations are cluster scoped.
    scope: ListScope,
}

impl WebhookSource {
    pub fn new(client: Arc<dyn ClusterClient>, scope: ListScope) -> Self {
        WebhookSource { client, scope }
    }
}

#[async_trait]
impl CertificateSource for WebhookSource {
    type Candidate = WebhookConfiguration;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Webhook
    }

    async fn discover(&self, metrics: &ExporterMetrics) -> Vec<WebhookConfiguration> {
        let mut found = BTreeMap::new();
        for kind in [WebhookKind::Mutating, WebhookKind::Validating] {
            for selector in self.scope.selectors() {
                match self.client.list_webhook_configurations(kind, selector).await {
                    Ok(configurations) => {
                        for configuration in configurations {
                            if self.scope.admits(&configuration.meta) {
                                found
                                    .entry((kind.to_string(), configuration.meta.name.clone()))
                                    .or_insert(configuration);
                            }
                        }
                    }
                    Err(e) => {
                        metrics.record_error();
                        error!(%kind, selector = selector.unwrap_or_default(), error = %e, "Error requesting webhook configurations");
                    }
                }
            }
        }
        found.into_values().collect()
    }

    async fn fetch(&self, configuration: &WebhookConfiguration) -> Vec<Result<Payload, ExportError>> {
        configuration
            .webhooks
            .iter()
            .filter(|webhook| {
                let has_bundle = !webhook.ca_bundle.is_empty();
                if !has_bundle {
                    info!(
                        configuration = %configuration.meta.name,
                        webhook = %webhook.name,
                        "Ignoring webhook without caBundle"
                    );
                }
                has_bundle
            })
            .map(|webhook| {
                Ok(Payload::new(
                    vec![
                        configuration.kind.to_string(),
                        configuration.meta.name.clone(),
                        webhook.name.clone(),
                    ],
                    webhook.ca_bundle.clone(),
                ))
            })
            .collect()
    }
}
