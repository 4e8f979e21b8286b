//! Backend selection for blob storage

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::storage::local_store::LocalFileStore;
use crate::storage::mock_store::InMemoryObjectStore;
use crate::storage::remote_store::{ObjectStoreClient, RemoteObjectStore};
use crate::storage::Storage;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Available blob storage backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StorageBackend {
    /// Files on local disk
    #[default]
    Local,
    /// Remote object store reached through an injected client
    Remote,
    /// Remote code path over an in-process object store
    Mock,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "disk" | "fs" => Ok(StorageBackend::Local),
            "remote" | "s3" | "object" => Ok(StorageBackend::Remote),
            "mock" | "memory" => Ok(StorageBackend::Mock),
            _ => Err(format!("Unknown storage backend: {}", s)),
        }
    }
}

/// Build the configured backend.
///
/// `client` is only consulted for [`StorageBackend::Remote`], which fails
/// without one.
pub fn create_store(
    config: &StorageConfig,
    client: Option<Arc<dyn ObjectStoreClient>>,
) -> Result<Arc<dyn Storage>, StorageError> {
    let ttl = Duration::from_secs(config.signed_url_ttl_secs);
    match config.backend {
        StorageBackend::Local => {
            info!("Using local storage backend with base_path: {}", config.base_path);
            Ok(Arc::new(LocalFileStore::new(config)?))
        }
        StorageBackend::Remote => {
            let client = client.ok_or_else(|| {
                StorageError::Remote(
                    "remote backend selected but no object store client was provided".to_string(),
                )
            })?;
            info!("Using remote storage backend, signed URLs valid for {}s", ttl.as_secs());
            Ok(Arc::new(RemoteObjectStore::new(client).with_signed_url_ttl(ttl)))
        }
        StorageBackend::Mock => {
            warn!("Using in-process object store for bucket {}; uploads are lost on restart", config.bucket);
            let client = Arc::new(InMemoryObjectStore::new(config.bucket.clone()));
            Ok(Arc::new(RemoteObjectStore::new(client).with_signed_url_ttl(ttl)))
        }
    }
}
