//! # Artifact Store
//!
//! Content-addressed storage for descriptor sets, resource blobs and
//! localized output.
//!
//! Artifacts are never mutated: every stage fetches its input, transforms it
//! and stores the result under the digest of the new bytes.

pub mod archive;

use crate::crd::ArtifactRef;
use crate::oci::{
    sha256_digest, OciDescriptor, OciManifest, RegistryClient, RegistryError,
    OCI_EMPTY_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub use archive::{ArchiveError, ArchiveFormat, FileSet};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("artifact {0} not found")]
    NotFound(String),
    #[error("artifact digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("artifact store unavailable after {0:?}")]
    Unavailable(Duration),
    #[error("artifact store state is poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Registry(e) => e.is_retryable(),
            StoreError::DigestMismatch { .. } => false,
            StoreError::NotFound(_) | StoreError::Unavailable(_) | StoreError::Poisoned => true,
        }
    }
}

/// Content-addressed blob storage
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `data`, returning its reference
    async fn put(&self, data: &[u8], media_type: &str) -> Result<ArtifactRef, StoreError>;
    /// Fetch the bytes stored under `digest`, verifying the digest
    async fn get(&self, digest: &str) -> Result<Vec<u8>, StoreError>;
    /// Remove an artifact; removing an absent artifact succeeds
    async fn delete(&self, digest: &str) -> Result<(), StoreError>;
    async fn ping(&self) -> Result<(), StoreError>;
}

fn verify_digest(digest: &str, data: &[u8]) -> Result<(), StoreError> {
    let actual = sha256_digest(data);
    if actual != digest {
        return Err(StoreError::DigestMismatch {
            expected: digest.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Artifact store held in memory
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.blobs
            .lock()
            .map(|b| b.contains_key(digest))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, data: &[u8], media_type: &str) -> Result<ArtifactRef, StoreError> {
        let digest = sha256_digest(data);
        self.blobs
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .insert(digest.clone(), data.to_vec());
        Ok(ArtifactRef {
            digest,
            media_type: media_type.to_string(),
            size: data.len() as u64,
        })
    }

    async fn get(&self, digest: &str) -> Result<Vec<u8>, StoreError> {
        let data = self
            .blobs
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .get(digest)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(digest.to_string()))?;
        verify_digest(digest, &data)?;
        Ok(data)
    }

    async fn delete(&self, digest: &str) -> Result<(), StoreError> {
        self.blobs
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .remove(digest);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Artifact store in a repository of an OCI registry.
///
/// Each artifact is a blob referenced by a single-layer manifest tagged
/// `sha256-<hex>` so registry garbage collection keeps it.
#[derive(Debug)]
pub struct RegistryArtifactStore {
    client: RegistryClient,
    repository: String,
}

fn artifact_tag(digest: &str) -> String {
    digest.replace(':', "-")
}

impl RegistryArtifactStore {
    pub fn new(client: RegistryClient, repository: impl Into<String>) -> Self {
        Self {
            client,
            repository: repository.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for RegistryArtifactStore {
    async fn put(&self, data: &[u8], media_type: &str) -> Result<ArtifactRef, StoreError> {
        let digest = self.client.push_blob(&self.repository, data).await?;
        let config = b"{}";
        let config_digest = self.client.push_blob(&self.repository, config).await?;
        let manifest = OciManifest {
            schema_version: 2,
            media_type: Some(OCI_MANIFEST_MEDIA_TYPE.to_string()),
            config: OciDescriptor {
                media_type: OCI_EMPTY_MEDIA_TYPE.to_string(),
                digest: config_digest,
                size: config.len() as u64,
                annotations: None,
            },
            layers: vec![OciDescriptor {
                media_type: media_type.to_string(),
                digest: digest.clone(),
                size: data.len() as u64,
                annotations: None,
            }],
        };
        self.client
            .push_manifest(&self.repository, &artifact_tag(&digest), &manifest)
            .await?;
        Ok(ArtifactRef {
            digest,
            media_type: media_type.to_string(),
            size: data.len() as u64,
        })
    }

    async fn get(&self, digest: &str) -> Result<Vec<u8>, StoreError> {
        match self.client.get_blob(&self.repository, digest).await {
            Ok(data) => Ok(data),
            Err(RegistryError::NotFound { .. }) => Err(StoreError::NotFound(digest.to_string())),
            Err(RegistryError::DigestMismatch { expected, actual }) => {
                Err(StoreError::DigestMismatch { expected, actual })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, digest: &str) -> Result<(), StoreError> {
        if let Some(manifest_digest) = self
            .client
            .head_manifest(&self.repository, &artifact_tag(digest))
            .await?
        {
            self.client
                .delete_manifest(&self.repository, &manifest_digest)
                .await?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(self.client.ping().await?)
    }
}

/// Wait until the store answers, checking every `interval` for at most `timeout`
pub async fn wait_for_store(
    store: &dyn ArtifactStore,
    timeout: Duration,
    interval: Duration,
) -> Result<(), StoreError> {
    let started = tokio::time::Instant::now();
    loop {
        match store.ping().await {
            Ok(()) => {
                info!("Artifact store is available");
                return Ok(());
            }
            Err(e) => {
                if started.elapsed() + interval > timeout {
                    return Err(StoreError::Unavailable(timeout));
                }
                warn!(error = %e, "Artifact store not available yet, retrying in {:?}", interval);
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Blobs fetched during one reconciliation, keyed by digest
///
/// Discarded when the reconciliation ends.
#[derive(Debug, Default)]
pub struct BlobArena {
    blobs: HashMap<String, Vec<u8>>,
}

impl BlobArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch `digest` from `store` unless already fetched in this reconciliation
    pub async fn fetch(
        &mut self,
        store: &dyn ArtifactStore,
        digest: &str,
    ) -> Result<&[u8], StoreError> {
        if !self.blobs.contains_key(digest) {
            let data = store.get(digest).await?;
            self.blobs.insert(digest.to_string(), data);
        }
        self.blobs
            .get(digest)
            .map(Vec::as_slice)
            .ok_or_else(|| StoreError::NotFound(digest.to_string()))
    }
}
