//! Issued certificates of cert-manager CertificateRequests.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{CertificateRequestObject, ClusterClient, ListScope};
use crate::checker::{CertificateSource, Payload};
use crate::error::ExportError;
use crate::metrics::{ExporterMetrics, ResourceKind};

pub struct CertRequestSource {
    client: Arc<dyn ClusterClient>,
    scope: ListScope,
}

impl CertRequestSource {
    pub fn new(client: Arc<dyn ClusterClient>, scope: ListScope) -> Self {
        CertRequestSource { client, scope }
    }
}

#[async_trait]
impl CertificateSource for CertRequestSource {
    type Candidate = CertificateRequestObject;

    fn kind(&self) -> ResourceKind {
        ResourceKind::CertRequest
    }

    /// Only requests whose `Ready` condition is `True`.
    async fn discover(&self, metrics: &ExporterMetrics) -> Vec<CertificateRequestObject> {
        self.scope
            .collect("certificaterequests", metrics, |namespace, selector| async move {
                self.client
                    .list_certificate_requests(&namespace, selector.as_deref())
                    .await
            })
            .await
            .into_iter()
            .filter(|request| {
                if !request.ready {
                    debug!(namespace = %request.meta.namespace, name = %request.meta.name, "Skipping CertificateRequest that is not ready");
                }
                request.ready
            })
            .collect()
    }

    async fn fetch(&self, request: &CertificateRequestObject) -> Vec<Result<Payload, ExportError>> {
        if request.certificate.is_empty() {
            return Vec::new();
        }
        vec![Ok(Payload::new(
            vec![request.meta.name.clone(), request.meta.namespace.clone()],
            request.certificate.clone(),
        ))]
    }
}
