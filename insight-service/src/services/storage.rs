use async_trait::async_trait;
use dashmap::DashMap;
use std::io;
use std::path::PathBuf;
use tokio::fs;

/// Byte backend behind the artifact store.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload(&self, key: &str, data: Vec<u8>) -> io::Result<()>;
    async fn download(&self, key: &str) -> io::Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> io::Result<()>;
}

/// Keeps payloads in process memory.
#[derive(Default)]
pub struct MemoryStorage {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload(&self, key: &str, data: Vec<u8>) -> io::Result<()> {
        self.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn download(&self, key: &str) -> io::Result<Vec<u8>> {
        self.objects
            .get(key)
            .map(|data| data.value().clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no object {}", key)))
    }

    async fn delete(&self, key: &str) -> io::Result<()> {
        self.objects.remove(key);
        Ok(())
    }
}

/// Writes one file per key below a base directory.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub async fn new(base_path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
        }
        Ok(Self { base_path })
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(&self, key: &str, data: Vec<u8>) -> io::Result<()> {
        let path = self.base_path.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await
    }

    async fn download(&self, key: &str) -> io::Result<Vec<u8>> {
        fs::read(self.base_path.join(key)).await
    }

    async fn delete(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.base_path.join(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_storage_round_trips_and_deletes_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("artifacts")).await.unwrap();

        storage.upload("ab/key", b"payload".to_vec()).await.unwrap();
        assert_eq!(storage.download("ab/key").await.unwrap(), b"payload");

        storage.delete("ab/key").await.unwrap();
        storage.delete("ab/key").await.unwrap();
        assert!(storage.download("ab/key").await.is_err());
    }

    #[tokio::test]
    async fn memory_storage_reports_missing_keys() {
        let storage = MemoryStorage::new();
        let err = storage.download("missing").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
