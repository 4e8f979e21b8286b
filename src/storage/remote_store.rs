//! Remote object store blob storage
//!
//! Bytes are streamed to an object store through an [`ObjectStoreClient`] and
//! served back through pre-signed download URLs. The provider-specific
//! client is supplied by the caller.

use crate::error::StorageError;
use crate::storage::{sanitize_display_name, RetrievalLocator, StagedBlob, Storage, StorageKey};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Validity window of issued download URLs
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(300);

/// Size of the chunks read from a staging file while uploading
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Object body handed to a client, one chunk at a time
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Minimal contract an object store client has to satisfy
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Store `body` (`content_length` bytes in total) under `key`
    async fn put_object(
        &self,
        key: &str,
        body: ByteStream,
        content_length: u64,
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Pre-signed GET URL that answers with the given `Content-Disposition`
    async fn presign_get(
        &self,
        key: &str,
        content_disposition: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;

    /// Must return [`StorageError::NotFound`] for a missing key
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;
}

/// Stream the contents of `file` in [`UPLOAD_CHUNK_SIZE`] chunks
pub fn file_stream(file: File) -> ByteStream {
    stream::try_unfold(file, |mut file| async move {
        let mut buf = BytesMut::with_capacity(UPLOAD_CHUNK_SIZE);
        let read = file.read_buf(&mut buf).await?;
        if read == 0 {
            Ok::<_, io::Error>(None)
        } else {
            Ok(Some((buf.freeze(), file)))
        }
    })
    .boxed()
}

/// Object key for an upload: upload time in millis, a random tag, then the
/// original name. The tag keeps same-name uploads in the same millisecond
/// apart.
pub fn remote_key(uploaded_at: DateTime<Utc>, original_name: &str) -> String {
    let tag: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{}-{}-{}", uploaded_at.timestamp_millis(), tag, original_name)
}

/// `attachment` disposition naming `display_name`, escaped for a quoted string
pub fn content_disposition(display_name: &str) -> String {
    let clean = sanitize_display_name(display_name);
    let mut escaped = String::with_capacity(clean.len());
    for c in clean.chars() {
        if c == '"' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("attachment; filename=\"{}\"", escaped)
}

/// Removes the staging file when dropped, so a cancelled upload future
/// cleans up as well. The unlink is a synchronous call on the runtime
/// thread; it is a single metadata operation.
struct StagingGuard {
    path: PathBuf,
}

impl StagingGuard {
    fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf() }
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staging file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove staging file {}: {}", self.path.display(), e),
        }
    }
}

/// Blob storage backed by a remote object store
pub struct RemoteObjectStore {
    client: Arc<dyn ObjectStoreClient>,
    signed_url_ttl: Duration,
}

impl RemoteObjectStore {
    pub fn new(client: Arc<dyn ObjectStoreClient>) -> Self {
        Self {
            client,
            signed_url_ttl: DEFAULT_SIGNED_URL_TTL,
        }
    }

    pub fn with_signed_url_ttl(mut self, ttl: Duration) -> Self {
        self.signed_url_ttl = ttl;
        self
    }

    pub fn signed_url_ttl(&self) -> Duration {
        self.signed_url_ttl
    }
}

#[async_trait]
impl Storage for RemoteObjectStore {
    async fn save(&self, blob: StagedBlob) -> Result<StorageKey, StorageError> {
        let _staging = StagingGuard::new(&blob.path);

        let key = remote_key(Utc::now(), &blob.original_name);
        let file = File::open(&blob.path).await?;
        let size = file.metadata().await?.len();
        self.client
            .put_object(&key, file_stream(file), size, blob.content_type.as_deref())
            .await?;

        info!("Uploaded {} bytes to object store as {}", size, key);
        Ok(StorageKey::new(key))
    }

    async fn issue_retrieval_locator(
        &self,
        key: &StorageKey,
        display_name: &str,
    ) -> Result<RetrievalLocator, StorageError> {
        let url = self
            .client
            .presign_get(key.as_str(), &content_disposition(display_name), self.signed_url_ttl)
            .await?;
        Ok(RetrievalLocator::SignedUrl(url))
    }

    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        match self.client.delete_object(key.as_str()).await {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound(_)) => {
                debug!("Remote object {} already gone", key);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn backend_name(&self) -> &'static str {
        "remote"
    }
}
