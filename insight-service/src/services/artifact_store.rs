//! Size- and count-bounded staging area for uploaded artifacts.
//!
//! Every staged artifact holds one permit of the staging semaphore and
//! carries its own expiry. Expiry is enforced by `sweep_expired`, never by
//! reference counting, so an abandoned workflow cannot leak storage.

use crate::models::{ArtifactKind, ArtifactRef};
use crate::services::storage::Storage;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Instant};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    SizeExceeded { size: usize, max: usize },

    #[error("Unsupported artifact kind: {0}")]
    UnsupportedKind(String),

    #[error("Artifact payload is empty")]
    EmptyPayload,

    #[error("Artifact store is full ({max} staged artifacts)")]
    CapacityExceeded { max: usize },

    #[error("Artifact {0} not found")]
    NotFound(Uuid),

    #[error("Artifact {0} has expired")]
    Expired(Uuid),

    #[error("Artifact transfer timed out after {0:?}")]
    TransferTimeout(Duration),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub max_bytes: usize,
    pub max_staged: usize,
    pub ttl: Duration,
    /// Bound on a single upload/download to the byte backend.
    pub io_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            max_staged: 256,
            ttl: Duration::from_secs(3600),
            io_timeout: Duration::from_secs(5),
        }
    }
}

struct StagedArtifact {
    artifact: ArtifactRef,
    storage_key: String,
    expires_at: Instant,
    _slot: OwnedSemaphorePermit,
}

pub struct ArtifactStore {
    storage: Arc<dyn Storage>,
    entries: DashMap<Uuid, StagedArtifact>,
    slots: Arc<Semaphore>,
    config: StoreConfig,
}

impl ArtifactStore {
    pub fn new(storage: Arc<dyn Storage>, config: StoreConfig) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            slots: Arc::new(Semaphore::new(config.max_staged)),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Stages a payload. Fails fast instead of waiting for a free slot.
    pub async fn put(&self, bytes: Vec<u8>, declared_kind: &str) -> Result<ArtifactRef, StoreError> {
        let kind = ArtifactKind::from_declared(declared_kind)
            .ok_or_else(|| StoreError::UnsupportedKind(declared_kind.to_string()))?;

        if bytes.is_empty() {
            return Err(StoreError::EmptyPayload);
        }

        if bytes.len() > self.config.max_bytes {
            return Err(StoreError::SizeExceeded {
                size: bytes.len(),
                max: self.config.max_bytes,
            });
        }

        let slot = self.slots.clone().try_acquire_owned().map_err(|_| {
            metrics::counter!("artifact_store_rejected_total", "reason" => "capacity").increment(1);
            StoreError::CapacityExceeded {
                max: self.config.max_staged,
            }
        })?;

        let artifact = ArtifactRef {
            id: Uuid::new_v4(),
            kind,
            digest: hex::encode(Sha256::digest(&bytes)),
            size: bytes.len(),
        };
        let storage_key = format!("{}/{}", &artifact.digest[..2], artifact.id);

        let written = match timeout(self.config.io_timeout, self.storage.upload(&storage_key, bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StoreError::Storage(e)),
            Err(_) => Err(StoreError::TransferTimeout(self.config.io_timeout)),
        };
        if let Err(err) = written {
            // A write abandoned mid-flight may still land; nothing else knows the key.
            self.delete_bytes(artifact.id, &storage_key).await;
            return Err(err);
        }

        tracing::debug!(
            artifact_id = %artifact.id,
            kind = %artifact.kind,
            size = artifact.size,
            digest = %artifact.digest,
            "Artifact staged"
        );

        self.entries.insert(
            artifact.id,
            StagedArtifact {
                artifact: artifact.clone(),
                storage_key,
                expires_at: Instant::now() + self.config.ttl,
                _slot: slot,
            },
        );

        metrics::counter!("artifacts_staged_total", "kind" => kind.to_string()).increment(1);
        metrics::gauge!("artifacts_staged").set(self.entries.len() as f64);

        Ok(artifact)
    }

    pub async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StoreError> {
        let storage_key = {
            let entry = self
                .entries
                .get(&artifact.id)
                .ok_or(StoreError::NotFound(artifact.id))?;
            if entry.expires_at <= Instant::now() {
                return Err(StoreError::Expired(artifact.id));
            }
            entry.storage_key.clone()
        };

        match timeout(self.config.io_timeout, self.storage.download(&storage_key)).await {
            Ok(Ok(bytes)) => Ok(bytes),
            // Released between the lookup and the read.
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(artifact.id))
            }
            Ok(Err(e)) => Err(StoreError::Storage(e)),
            Err(_) => Err(StoreError::TransferTimeout(self.config.io_timeout)),
        }
    }

    /// Drops an artifact and its bytes. Releasing twice is a no-op.
    pub async fn release(&self, artifact: &ArtifactRef) {
        if let Some((_, staged)) = self.entries.remove(&artifact.id) {
            self.discard(staged).await;
            metrics::gauge!("artifacts_staged").set(self.entries.len() as f64);
        }
    }

    /// Removes every artifact whose expiry has passed. Returns the count.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut removed = 0;
        for id in expired {
            if let Some((_, staged)) = self.entries.remove_if(&id, |_, s| s.expires_at <= now) {
                tracing::info!(artifact_id = %id, "Artifact expired");
                self.discard(staged).await;
                removed += 1;
            }
        }

        if removed > 0 {
            metrics::counter!("artifacts_expired_total").increment(removed as u64);
            metrics::gauge!("artifacts_staged").set(self.entries.len() as f64);
        }

        removed
    }

    pub fn staged_count(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, artifact: &ArtifactRef) -> bool {
        self.entries.contains_key(&artifact.id)
    }

    async fn discard(&self, staged: StagedArtifact) {
        self.delete_bytes(staged.artifact.id, &staged.storage_key).await;
    }

    async fn delete_bytes(&self, artifact_id: Uuid, storage_key: &str) {
        match timeout(self.config.io_timeout, self.storage.delete(storage_key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                artifact_id = %artifact_id,
                error = %e,
                "Failed to delete artifact bytes"
            ),
            Err(_) => tracing::warn!(
                artifact_id = %artifact_id,
                "Timed out deleting artifact bytes"
            ),
        }
        // The staging slot is returned when `staged` drops here.
    }
}
