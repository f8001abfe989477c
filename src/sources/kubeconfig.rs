//! Cluster CA and client certificates of kubeconfig files on disk.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::checker::{CertificateSource, Payload};
use crate::discovery::GlobMatcher;
use crate::error::ExportError;
use crate::kubeconfig::KubeConfig;
use crate::metrics::{ExporterMetrics, ResourceKind};

#[derive(Debug, Clone)]
pub struct KubeConfigSource {
    matcher: GlobMatcher,
    node_name: String,
}

impl KubeConfigSource {
    pub fn new(matcher: GlobMatcher, node_name: String) -> Self {
        KubeConfigSource { matcher, node_name }
    }
}

#[async_trait]
impl CertificateSource for KubeConfigSource {
    type Candidate = PathBuf;

    fn kind(&self) -> ResourceKind {
        ResourceKind::KubeConfig
    }

    async fn discover(&self, metrics: &ExporterMetrics) -> Vec<PathBuf> {
        self.matcher.resolve(metrics).into_iter().collect()
    }

    async fn fetch(&self, path: &PathBuf) -> Vec<Result<Payload, ExportError>> {
        let config = match KubeConfig::load(path).await {
            Ok(config) => config,
            Err(e) => return vec![Err(e)],
        };
        let filename = path.to_string_lossy().into_owned();

        let mut payloads = Vec::new();
        for entry in config.entries(path) {
            let payload = entry.read().await.map(|bytes| {
                Payload::new(
                    vec![
                        filename.clone(),
                        entry.entry_type.to_string(),
                        entry.name.clone(),
                        self.node_name.clone(),
                    ],
                    bytes,
                )
            });
            payloads.push(payload);
        }
        payloads
    }
}
