//! [`ClusterClient`] on top of the Kubernetes API.

use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as KubeObjectMeta;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::Value;
use tracing::warn;

use super::{
    CertificateRequestObject, ClusterClient, ConfigMapObject, ObjectMeta, SecretObject, Webhook,
    WebhookConfiguration, WebhookKind,
};
use crate::error::ExportError;

/// Lists objects with a `kube` client.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    certificate_requests: ApiResource,
}

impl KubeClusterClient {
    /// Builds a client from `kubeconfig`, or from the in-cluster/default
    /// environment when no path is given.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, ExportError> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| ExportError::Cluster(format!("reading {}: {}", path.display(), e)))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| ExportError::Cluster(e.to_string()))?
            }
            None => Config::infer()
                .await
                .map_err(|e| ExportError::Cluster(e.to_string()))?,
        };
        Ok(Self::new(Client::try_from(config)?))
    }

    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("cert-manager.io", "v1", "CertificateRequest");
        KubeClusterClient {
            client,
            certificate_requests: ApiResource::from_gvk_with_plural(&gvk, "certificaterequests"),
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

fn list_params(label_selector: Option<&str>) -> ListParams {
    match label_selector {
        Some(selector) => ListParams::default().labels(selector),
        None => ListParams::default(),
    }
}

fn object_meta(meta: &KubeObjectMeta) -> ObjectMeta {
    ObjectMeta {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
    }
}

/// Reads `status.conditions` and `status.certificate` of a
/// CertificateRequest. The certificate is base64 encoded PEM.
pub fn certificate_request(object: &DynamicObject) -> Result<CertificateRequestObject, ExportError> {
    let status = object.data.get("status").unwrap_or(&Value::Null);
    let ready = status
        .get("conditions")
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Ready")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        });
    let certificate = match status.get("certificate").and_then(Value::as_str) {
        Some(encoded) => STANDARD.decode(encoded).map_err(|e| {
            ExportError::entry(format!(
                "CertificateRequest {}/{} has invalid status.certificate: {}",
                object.metadata.namespace.as_deref().unwrap_or_default(),
                object.metadata.name.as_deref().unwrap_or_default(),
                e
            ))
        })?,
        None => Vec::new(),
    };

    Ok(CertificateRequestObject {
        meta: object_meta(&object.metadata),
        ready,
        certificate,
    })
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_secrets(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<SecretObject>, ExportError> {
        let list = self
            .api::<Secret>(namespace)
            .list(&list_params(label_selector))
            .await?;
        Ok(list
            .items
            .into_iter()
            .map(|secret| SecretObject {
                meta: object_meta(&secret.metadata),
                secret_type: secret.type_.unwrap_or_default(),
                data: secret
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(key, value)| (key, value.0))
                    .collect(),
            })
            .collect())
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<ConfigMapObject>, ExportError> {
        let list = self
            .api::<ConfigMap>(namespace)
            .list(&list_params(label_selector))
            .await?;
        Ok(list
            .items
            .into_iter()
            .map(|config_map| {
                let text = config_map
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(key, value)| (key, value.into_bytes()));
                let binary = config_map
                    .binary_data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(key, value)| (key, value.0));
                ConfigMapObject {
                    meta: object_meta(&config_map.metadata),
                    data: text.chain(binary).collect(),
                }
            })
            .collect())
    }

    async fn list_webhook_configurations(
        &self,
        kind: WebhookKind,
        label_selector: Option<&str>,
    ) -> Result<Vec<WebhookConfiguration>, ExportError> {
        let params = list_params(label_selector);
        let configurations = match kind {
            WebhookKind::Mutating => Api::<MutatingWebhookConfiguration>::all(self.client.clone())
                .list(&params)
                .await?
                .items
                .into_iter()
                .map(|c| {
                    let webhooks = c
                        .webhooks
                        .unwrap_or_default()
                        .into_iter()
                        .map(|w| Webhook {
                            name: w.name,
                            ca_bundle: w.client_config.ca_bundle.map(|b| b.0).unwrap_or_default(),
                        })
                        .collect::<Vec<_>>();
                    (object_meta(&c.metadata), webhooks)
                })
                .collect::<Vec<_>>(),
            WebhookKind::Validating => Api::<ValidatingWebhookConfiguration>::all(self.client.clone())
                .list(&params)
                .await?
                .items
                .into_iter()
                .map(|c| {
                    let webhooks = c
                        .webhooks
                        .unwrap_or_default()
                        .into_iter()
                        .map(|w| Webhook {
                            name: w.name,
                            ca_bundle: w.client_config.ca_bundle.map(|b| b.0).unwrap_or_default(),
                        })
                        .collect::<Vec<_>>();
                    (object_meta(&c.metadata), webhooks)
                })
                .collect::<Vec<_>>(),
        };

        Ok(configurations
            .into_iter()
            .map(|(meta, webhooks)| WebhookConfiguration {
                meta,
                kind,
                webhooks,
            })
            .collect())
    }

    async fn list_certificate_requests(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<CertificateRequestObject>, ExportError> {
        let api: Api<DynamicObject> = if namespace.is_empty() {
            Api::all_with(self.client.clone(), &self.certificate_requests)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &self.certificate_requests)
        };
        let list = api.list(&list_params(label_selector)).await?;
        Ok(list
            .items
            .iter()
            .filter_map(|object| match certificate_request(object) {
                Ok(request) => Some(request),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable CertificateRequest");
                    None
                }
            })
            .collect())
    }
}
