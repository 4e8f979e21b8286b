//! Blob Storage Layer Abstraction
//!
//! This module provides an abstraction over the place uploaded bytes live,
//! so the registry can work against local disk or a remote object store
//! without knowing which one was selected at startup.

pub mod local_store;
pub mod remote_store;
pub mod mock_store;
pub mod config;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::StorageError;

/// Backend-specific locator for a stored blob. Opaque to everything but the
/// backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An upload that has been written to a staging file and is waiting to be
/// handed to a backend
#[derive(Debug, Clone, PartialEq)]
pub struct StagedBlob {
    /// Staging file holding the uploaded bytes
    pub path: PathBuf,
    /// Name supplied by the uploader. Untrusted.
    pub original_name: String,
    /// Content type reported by the uploader, if any
    pub content_type: Option<String>,
}

impl StagedBlob {
    pub fn new(path: impl Into<PathBuf>, original_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            original_name: original_name.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }
}

/// Uploader-supplied name made safe for a response header: control
/// characters are dropped
pub fn sanitize_display_name(name: &str) -> String {
    name.chars().filter(|c| !c.is_control()).collect()
}

/// What a downloader needs to obtain the bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalLocator {
    /// Stream the file at this path
    LocalPath(PathBuf),
    /// Redirect to this time-limited URL
    SignedUrl(String),
}

/// Trait defining the blob storage interface
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist the staged blob and return the key it can be found under
    async fn save(&self, blob: StagedBlob) -> Result<StorageKey, StorageError>;

    /// Produce a locator a client can use to fetch the blob as `display_name`
    async fn issue_retrieval_locator(
        &self,
        key: &StorageKey,
        display_name: &str,
    ) -> Result<RetrievalLocator, StorageError>;

    /// Remove the blob. A blob that is already gone is not an error.
    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError>;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_display() {
        let key = StorageKey::new("1700000000000-report.pdf");
        assert_eq!(key.as_str(), "1700000000000-report.pdf");
        assert_eq!(key.to_string(), "1700000000000-report.pdf");
    }

    #[test]
    fn test_sanitize_display_name() {
        assert_eq!(sanitize_display_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_display_name("a\nb\t.txt\u{7f}"), "ab.txt");
        assert_eq!(sanitize_display_name("résumé \"v2\".pdf"), "résumé \"v2\".pdf");
    }

    #[test]
    fn test_staged_blob_builder() {
        let blob = StagedBlob::new("/tmp/upload-1", "photo.jpg")
            .with_content_type(Some("image/jpeg".to_string()));
        assert_eq!(blob.path, PathBuf::from("/tmp/upload-1"));
        assert_eq!(blob.original_name, "photo.jpg");
        assert_eq!(blob.content_type.as_deref(), Some("image/jpeg"));
    }
}
