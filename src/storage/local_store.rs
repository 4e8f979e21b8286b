//! Local filesystem blob storage

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::storage::{RetrievalLocator, StagedBlob, Storage, StorageKey};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Keeps blobs as plain files inside one directory
pub struct LocalFileStore {
    storage_path: PathBuf,
}

impl LocalFileStore {
    pub fn new(config: &StorageConfig) -> io::Result<Self> {
        Self::with_directory(&config.base_path)
    }

    /// Use `path` as the storage directory, creating it if needed
    pub fn with_directory(path: impl AsRef<Path>) -> io::Result<Self> {
        let storage_path = path.as_ref().to_path_buf();
        if !storage_path.exists() {
            std::fs::create_dir_all(&storage_path)?;
        }
        info!("Using local storage directory: {}", storage_path.display());
        Ok(Self { storage_path })
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Fresh file path for a blob. The uploader's name never reaches the
    /// filesystem.
    fn next_blob_path(&self) -> PathBuf {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        self.storage_path
            .join(format!("{}-{}.blob", Utc::now().timestamp_millis(), suffix))
    }
}

/// Move `from` to `to`, copying when a rename is not possible (e.g. the
/// staging directory is on another filesystem)
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(e) => {
            debug!("Rename {} -> {} failed ({}), copying instead", from.display(), to.display(), e);
            if let Err(copy_err) = fs::copy(from, to).await {
                let _ = fs::remove_file(to).await;
                return Err(copy_err);
            }
            if let Err(e) = fs::remove_file(from).await {
                warn!("Could not remove staging file {}: {}", from.display(), e);
            }
            Ok(())
        }
    }
}

#[async_trait]
impl Storage for LocalFileStore {
    async fn save(&self, blob: StagedBlob) -> Result<StorageKey, StorageError> {
        let target = self.next_blob_path();
        move_file(&blob.path, &target).await?;
        info!("Stored {} at {}", blob.original_name, target.display());
        Ok(StorageKey::new(target.to_string_lossy()))
    }

    async fn issue_retrieval_locator(
        &self,
        key: &StorageKey,
        _display_name: &str,
    ) -> Result<RetrievalLocator, StorageError> {
        Ok(RetrievalLocator::LocalPath(PathBuf::from(key.as_str())))
    }

    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        match fs::remove_file(key.as_str()).await {
            Ok(()) => {
                debug!("Deleted local blob {}", key);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Local blob {} already gone", key);
                Ok(())
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
