//! Application Configuration
//!
//! This module provides configuration management for the relay,
//! supporting YAML configuration files with sensible defaults.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

pub use crate::storage::config::StorageBackend;

/// Environment variable that overrides the configured storage backend
pub const STORAGE_TYPE_ENV: &str = "STORAGE_TYPE";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Reclamation worker configuration
    pub reclamation: ReclamationConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Largest accepted upload in bytes
    pub max_payload_size: u64,
    /// Browser origins allowed to call the API; `*` allows any
    pub cors_allowed_origins: Vec<String>,
}

/// Blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory holding blobs for the local backend
    pub base_path: String,
    /// Directory uploads are staged in before they reach a backend
    pub temp_path: String,
    /// Bucket name for the remote and mock backends
    pub bucket: String,
    /// Validity window of signed download URLs
    pub signed_url_ttl_secs: u64,
}

/// Reclamation worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclamationConfig {
    pub enabled: bool,
    /// Seconds between sweeps
    pub interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to the log4rs configuration file
    pub config_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: 4,
            max_payload_size: 1073741824, // 1GB
            cors_allowed_origins: vec![
                "https://momentshare.vercel.app".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            base_path: "./uploads".to_string(),
            temp_path: "./temp-uploads".to_string(),
            bucket: "momentary".to_string(),
            signed_url_ttl_secs: 300,
        }
    }
}

impl Default for ReclamationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "server_log.yaml".to_string(),
        }
    }
}

impl AppConfig {
    /// Load `config.yaml` from the working directory, use defaults if not found
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_from("config.yaml")
    }

    pub fn load_from(config_path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = config_path.as_ref();
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let config: AppConfig = serde_yaml::from_str(&content)?;
            info!("Loaded configuration from {}", config_path.display());
            config
        } else {
            warn!("Config file {} not found, using defaults", config_path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `STORAGE_TYPE` on top of whatever the file said
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var(STORAGE_TYPE_ENV) {
            match value.parse::<StorageBackend>() {
                Ok(backend) => {
                    info!("Using storage backend from environment: {:?}", backend);
                    self.storage.backend = backend;
                }
                Err(e) => warn!("Ignoring {}: {}", STORAGE_TYPE_ENV, e),
            }
        }
    }
}
