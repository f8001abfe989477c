//! Certificate files on the local filesystem.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use crate::checker::{CertificateSource, Payload};
use crate::discovery::GlobMatcher;
use crate::error::ExportError;
use crate::metrics::{ExporterMetrics, ResourceKind};
use crate::password::PasswordResolver;

#[derive(Debug, Clone)]
pub struct FileSource {
    matcher: GlobMatcher,
    node_name: String,
    passwords: PasswordResolver,
}

impl FileSource {
    pub fn new(matcher: GlobMatcher, node_name: String, passwords: PasswordResolver) -> Self {
        FileSource {
            matcher,
            node_name,
            passwords,
        }
    }
}

#[async_trait]
impl CertificateSource for FileSource {
    type Candidate = PathBuf;

    fn kind(&self) -> ResourceKind {
        ResourceKind::File
    }

    async fn discover(&self, metrics: &ExporterMetrics) -> Vec<PathBuf> {
        self.matcher.resolve(metrics).into_iter().collect()
    }

    async fn fetch(&self, path: &PathBuf) -> Vec<Result<Payload, ExportError>> {
        let identifier = path.to_string_lossy().into_owned();
        let payload = fs::read(path)
            .await
            .map_err(|source| ExportError::Io {
                path: path.clone(),
                source,
            })
            .map(|bytes| {
                Payload::new(vec![identifier.clone(), self.node_name.clone()], bytes)
                    .with_passphrase(self.passwords.resolve(&identifier))
            });
        vec![payload]
    }
}
