//! In-process object store client, used by the `Mock` backend and tests

use crate::error::StorageError;
use crate::storage::remote_store::{ByteStream, ObjectStoreClient};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Percent-encode everything outside the URL unreserved set
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

struct StoredObject {
    body: Bytes,
    content_type: Option<String>,
}

/// Object store that keeps everything in a map
pub struct InMemoryObjectStore {
    bucket: String,
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get the number of objects in the store
    pub fn object_count(&self) -> usize {
        self.objects().len()
    }

    pub fn object_exists(&self, key: &str) -> bool {
        self.objects().contains_key(key)
    }

    pub fn get_object(&self, key: &str) -> Option<Bytes> {
        self.objects().get(key).map(|o| o.body.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects().get(key).and_then(|o| o.content_type.clone())
    }

    pub fn clear(&self) {
        self.objects().clear();
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new("momentary")
    }
}

#[async_trait]
impl ObjectStoreClient for InMemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: ByteStream,
        content_length: u64,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut body = body;
        let mut data = BytesMut::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }
        if data.len() as u64 != content_length {
            warn!("Mock: {} declared {} bytes but sent {}", key, content_length, data.len());
        }

        info!("Mock: stored {} bytes under {}/{}", data.len(), self.bucket, key);
        self.objects().insert(
            key.to_string(),
            StoredObject {
                body: data.freeze(),
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn presign_get(
        &self,
        key: &str,
        content_disposition: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!(
            "memory://{}/{}?expires={}&response-content-disposition={}",
            self.bucket,
            encode_component(key),
            expires_in.as_secs(),
            encode_component(content_disposition)
        ))
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        match self.objects().remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }
}
