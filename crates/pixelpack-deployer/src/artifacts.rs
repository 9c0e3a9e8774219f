//! Deployment artifact store.
//!
//! Holds at most one [`Artifact`] per `(network, name)` key. Writes are
//! serialised through a single lock and, when a path is configured, written
//! through to a JSON file so a later run can resume instead of redeploying.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::chain::AbiValue;
use crate::error::StoreError;

/// A recorded deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub address: Address,
    /// Network id the artifact was deployed on.
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,
    /// Constructor arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<AbiValue>,
    pub deployed_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(name: &str, address: Address, network: &str) -> Self {
        Self {
            name: name.to_string(),
            address,
            network: network.to_string(),
            transaction_hash: None,
            args: Vec::new(),
            deployed_at: Utc::now(),
        }
    }

    pub fn with_transaction(mut self, hash: B256) -> Self {
        self.transaction_hash = Some(hash);
        self
    }

    pub fn with_args(mut self, args: Vec<AbiValue>) -> Self {
        self.args = args;
        self
    }
}

/// network id -> artifact name -> artifact
type Records = BTreeMap<String, BTreeMap<String, Artifact>>;

/// Keyed artifact store.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    records: RwLock<Records>,
    path: Option<PathBuf>,
}

impl ArtifactStore {
    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed store, loading existing records if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Records>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Records::new(),
            Err(e) => return Err(e.into()),
        };

        for (network, artifacts) in &records {
            for (name, artifact) in artifacts {
                if &artifact.network != network {
                    return Err(StoreError::NetworkMismatch {
                        name: name.clone(),
                        expected: network.clone(),
                        actual: artifact.network.clone(),
                    });
                }
            }
        }

        tracing::debug!(
            path = %path.display(),
            networks = records.len(),
            "Artifact store opened"
        );

        Ok(Self {
            records: RwLock::new(records),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn get(&self, network: &str, name: &str) -> Option<Artifact> {
        self.records
            .read()
            .await
            .get(network)
            .and_then(|artifacts| artifacts.get(name))
            .cloned()
    }

    pub async fn contains(&self, network: &str, name: &str) -> bool {
        self.get(network, name).await.is_some()
    }

    /// Names from `names` with no artifact on `network`, in the given order.
    pub async fn missing(&self, network: &str, names: &[String]) -> Vec<String> {
        let records = self.records.read().await;
        let existing = records.get(network);
        names
            .iter()
            .filter(|name| !existing.is_some_and(|a| a.contains_key(name.as_str())))
            .cloned()
            .collect()
    }

    /// Insert or overwrite the artifact under its key, returning the previous one.
    pub async fn put(&self, artifact: Artifact) -> Result<Option<Artifact>, StoreError> {
        let mut records = self.records.write().await;
        let previous = records
            .entry(artifact.network.clone())
            .or_default()
            .insert(artifact.name.clone(), artifact);

        if let Some(path) = &self.path {
            persist(path, &records).await?;
        }
        Ok(previous)
    }

    /// All artifacts on `network`, ordered by name.
    pub async fn list(&self, network: &str) -> Vec<Artifact> {
        self.records
            .read()
            .await
            .get(network)
            .map(|artifacts| artifacts.values().cloned().collect())
            .unwrap_or_default()
    }
}

async fn persist(path: &Path, records: &Records) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(records)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
