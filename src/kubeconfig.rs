//! Certificates embedded in or referenced by kubeconfig files.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use strum_macros::Display;
use tokio::fs;
use tracing::debug;

use crate::error::ExportError;

#[derive(Debug, Default, Deserialize)]
pub struct KubeConfig {
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub users: Vec<NamedUser>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NamedCluster {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cluster: Cluster,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    pub certificate_authority: Option<String>,
    pub certificate_authority_data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NamedUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user: User,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct User {
    pub client_certificate: Option<String>,
    pub client_certificate_data: Option<String>,
}

/// Value of the `type` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EntryType {
    Cluster,
    User,
}

/// Where an entry's certificate bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertData {
    /// Base64 from a `*-data` field
    Inline(String),
    /// A file path, already resolved against the kubeconfig's directory
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertEntry {
    pub entry_type: EntryType,
    pub name: String,
    pub data: CertData,
}

impl CertEntry {
    /// Reads the certificate bytes of this entry.
    pub async fn read(&self) -> Result<Vec<u8>, ExportError> {
        match &self.data {
            CertData::Inline(encoded) => {
                let compact: String = encoded.split_whitespace().collect();
                STANDARD.decode(compact).map_err(|e| {
                    ExportError::entry(format!(
                        "{} '{}' certificate data is not base64: {}",
                        self.entry_type, self.name, e
                    ))
                })
            }
            CertData::File(path) => fs::read(path).await.map_err(|source| ExportError::Io {
                path: path.clone(),
                source,
            }),
        }
    }
}

impl KubeConfig {
    pub fn parse(text: &str, path: &Path) -> Result<Self, ExportError> {
        serde_yaml::from_str(text).map_err(|e| ExportError::Kubeconfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub async fn load(path: &Path) -> Result<Self, ExportError> {
        let text = fs::read_to_string(path).await.map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Cluster CAs then user client certificates, in file order. Inline
    /// data wins over a file reference; entries with neither are skipped.
    pub fn entries(&self, kubeconfig: &Path) -> Vec<CertEntry> {
        let clusters = self.clusters.iter().map(|c| {
            (
                EntryType::Cluster,
                &c.name,
                &c.cluster.certificate_authority_data,
                &c.cluster.certificate_authority,
            )
        });
        let users = self.users.iter().map(|u| {
            (
                EntryType::User,
                &u.name,
                &u.user.client_certificate_data,
                &u.user.client_certificate,
            )
        });

        clusters
            .chain(users)
            .filter_map(|(entry_type, name, data, file)| {
                let data = match (non_empty(data), non_empty(file)) {
                    (Some(data), _) => CertData::Inline(data.to_string()),
                    (None, Some(file)) => CertData::File(resolve_relative(file, kubeconfig)),
                    (None, None) => {
                        debug!(%entry_type, name = %name, "Kubeconfig entry has no certificate");
                        return None;
                    }
                };
                Some(CertEntry {
                    entry_type,
                    name: name.clone(),
                    data,
                })
            })
            .collect()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Relative references are relative to the kubeconfig's own directory.
pub fn resolve_relative(file: &str, kubeconfig: &Path) -> PathBuf {
    let file = Path::new(file);
    if file.is_absolute() {
        return file.to_path_buf();
    }
    match kubeconfig.parent() {
        Some(dir) => dir.join(file),
        None => file.to_path_buf(),
    }
}
