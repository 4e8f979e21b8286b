//! Application State Management
//!
//! This module provides the application state that contains the registry
//! and its storage backend, following the dependency injection pattern.

use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{AppConfig, StorageBackend};
use crate::error::StorageError;
use crate::registry::ObjectRegistry;
use crate::storage::config::create_store;
use crate::storage::remote_store::ObjectStoreClient;

/// Application state shared by every HTTP worker
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ObjectRegistry>,
    pub config: AppConfig,
}

impl AppState {
    /// Create application state from configuration
    pub fn from_config(config: AppConfig) -> Result<Self, StorageError> {
        Self::with_object_store(config, None)
    }

    /// Like [`AppState::from_config`], with the client the remote backend
    /// should talk to
    pub fn with_object_store(
        config: AppConfig,
        client: Option<Arc<dyn ObjectStoreClient>>,
    ) -> Result<Self, StorageError> {
        info!("Initializing application state with {:?} storage", config.storage.backend);
        std::fs::create_dir_all(&config.storage.temp_path)?;

        let storage = create_store(&config.storage, client)?;
        let registry = Arc::new(ObjectRegistry::new(storage));

        info!("Application state initialized successfully");
        Ok(Self::with_registry(config, registry))
    }

    pub fn with_registry(config: AppConfig, registry: Arc<ObjectRegistry>) -> Self {
        Self { registry, config }
    }

    /// Create application state for testing with local storage under `root`
    pub fn new_for_testing(root: &Path) -> Result<Self, StorageError> {
        let mut config = AppConfig::default();
        config.storage.backend = StorageBackend::Local;
        config.storage.base_path = root.join("storage").to_string_lossy().into_owned();
        config.storage.temp_path = root.join("temp").to_string_lossy().into_owned();
        config.reclamation.enabled = false;
        Self::from_config(config)
    }

    /// Directory uploads are staged in
    pub fn staging_dir(&self) -> &Path {
        Path::new(&self.config.storage.temp_path)
    }

    pub fn storage_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.storage.base_path)
    }
}
