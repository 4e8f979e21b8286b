//! Object Registry
//!
//! Maps short codes to stored objects and owns their expiry. The mapping is
//! the one piece of shared mutable state in the relay; it sits behind a
//! single reader/writer lock that is never held across backend I/O.

pub mod code;
pub mod expiry;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::clock::{Clock, SystemClock};
use crate::error::{RelayError, RelayResult};
use crate::storage::{RetrievalLocator, StagedBlob, Storage, StorageKey};
use code::{CodeGenerator, RandomCodeGenerator};
use expiry::compute_expiry;

/// How many codes `create` draws before giving up
pub const MAX_CODE_ATTEMPTS: usize = 32;

/// One active upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObjectRecord {
    pub code: String,
    /// Display name given by the uploader. Untrusted.
    pub original_name: String,
    pub storage_key: StorageKey,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StoredObjectRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Running totals since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub created: u64,
    pub evicted: u64,
    /// Backend deletes that failed; each one left an orphaned blob behind
    pub delete_failures: u64,
    pub code_collisions: u64,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    evicted: AtomicU64,
    delete_failures: AtomicU64,
    code_collisions: AtomicU64,
}

/// Code to record mapping with expiry
pub struct ObjectRegistry {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    codes: Arc<dyn CodeGenerator>,
    records: RwLock<HashMap<String, StoredObjectRecord>>,
    counters: Counters,
}

impl ObjectRegistry {
    /// Registry over `storage` using wall-clock time and random codes
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            codes: Arc::new(RandomCodeGenerator),
            records: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_code_generator(mut self, codes: Arc<dyn CodeGenerator>) -> Self {
        self.codes = codes;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn read_records(&self) -> RwLockReadGuard<'_, HashMap<String, StoredObjectRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_records(&self) -> RwLockWriteGuard<'_, HashMap<String, StoredObjectRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of records currently mapped, expired or not
    pub fn len(&self) -> usize {
        self.read_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            created: self.counters.created.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            delete_failures: self.counters.delete_failures.load(Ordering::Relaxed),
            code_collisions: self.counters.code_collisions.load(Ordering::Relaxed),
        }
    }

    /// Store `blob` and register it under a fresh code.
    ///
    /// Nothing is registered when the backend cannot persist the blob. A code
    /// that is already mapped is never reused; if no free code turns up within
    /// [`MAX_CODE_ATTEMPTS`] draws the blob is deleted again and the upload
    /// fails.
    pub async fn create(&self, blob: StagedBlob, retention: &str) -> RelayResult<String> {
        let original_name = blob.original_name.clone();
        let storage_key = self.storage.save(blob).await.map_err(|e| {
            error!("Failed to save {} to {} storage: {}", original_name, self.storage.backend_name(), e);
            RelayError::BackendSave(e)
        })?;

        let created_at = self.clock.now();
        let expires_at = compute_expiry(retention, created_at);

        let claimed = {
            let mut records = self.write_records();
            let code = self.claim_code(&records);
            if let Some(code) = &code {
                records.insert(
                    code.clone(),
                    StoredObjectRecord {
                        code: code.clone(),
                        original_name: original_name.clone(),
                        storage_key: storage_key.clone(),
                        created_at,
                        expires_at,
                    },
                );
            }
            code
        };

        match claimed {
            Some(code) => {
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                info!(
                    "File stored with code: {} (key: {}, expires at {})",
                    code, storage_key, expires_at
                );
                Ok(code)
            }
            None => {
                error!(
                    "No free code for {} after {} attempts, discarding {}",
                    original_name, MAX_CODE_ATTEMPTS, storage_key
                );
                if let Err(e) = self.storage.delete(&storage_key).await {
                    self.counters.delete_failures.fetch_add(1, Ordering::Relaxed);
                    error!("Error deleting from storage {}: {}", storage_key, e);
                }
                Err(RelayError::CodeSpaceExhausted { attempts: MAX_CODE_ATTEMPTS })
            }
        }
    }

    fn claim_code(&self, records: &HashMap<String, StoredObjectRecord>) -> Option<String> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = self.codes.generate();
            if !records.contains_key(&candidate) {
                return Some(candidate);
            }
            self.counters.code_collisions.fetch_add(1, Ordering::Relaxed);
            debug!("Code {} already in use, drawing again", candidate);
        }
        None
    }

    /// Active record for `code`.
    ///
    /// An expired record is reclaimed on the spot and reported exactly like a
    /// code that never existed.
    pub async fn lookup(&self, code: &str) -> RelayResult<StoredObjectRecord> {
        let now = self.clock.now();
        let record = self
            .read_records()
            .get(code)
            .cloned()
            .ok_or(RelayError::NotFoundOrExpired)?;

        if !record.is_expired(now) {
            return Ok(record);
        }

        if self.remove_if_expired(&record, now) {
            info!("File {} ({}) expired before download, deleting", record.code, record.original_name);
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            self.delete_blob(&record).await;
        }
        Err(RelayError::NotFoundOrExpired)
    }

    /// Look up `code` and ask the backend how to fetch its bytes
    pub async fn retrieve(&self, code: &str) -> RelayResult<(StoredObjectRecord, RetrievalLocator)> {
        let record = self.lookup(code).await?;
        let locator = self
            .storage
            .issue_retrieval_locator(&record.storage_key, &record.original_name)
            .await
            .map_err(|e| {
                error!("Failed to issue locator for {}: {}", record.storage_key, e);
                RelayError::Retrieval(e)
            })?;
        Ok((record, locator))
    }

    /// Drop the mapping for `record` if it is still the one registered and
    /// still expired. Whoever gets `true` owns the backend delete.
    fn remove_if_expired(&self, record: &StoredObjectRecord, now: DateTime<Utc>) -> bool {
        let mut records = self.write_records();
        let still_there = records
            .get(&record.code)
            .is_some_and(|current| current.storage_key == record.storage_key && current.is_expired(now));
        if still_there {
            records.remove(&record.code);
        }
        still_there
    }

    /// Remove every record with `expires_at <= now` and delete its blob.
    ///
    /// Returns how many records were removed. A failed backend delete is
    /// logged and counted but the record is gone regardless.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<StoredObjectRecord> = {
            let mut records = self.write_records();
            let codes: Vec<String> = records
                .values()
                .filter(|r| r.is_expired(now))
                .map(|r| r.code.clone())
                .collect();
            codes.iter().filter_map(|c| records.remove(c)).collect()
        };

        for record in &expired {
            info!("File {} ({}) has expired. Deleting...", record.code, record.original_name);
            self.delete_blob(record).await;
        }

        let count = expired.len();
        self.counters.evicted.fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            info!("Cleanup complete. Evicted {}, {} remaining", count, self.len());
        } else {
            debug!("Cleanup complete. Nothing expired, {} active", self.len());
        }
        count
    }

    async fn delete_blob(&self, record: &StoredObjectRecord) {
        match self.storage.delete(&record.storage_key).await {
            Ok(()) => debug!("Successfully deleted from storage: {}", record.storage_key),
            Err(e) => {
                self.counters.delete_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Error deleting from storage {} (code {}), blob is orphaned: {}",
                    record.storage_key, record.code, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StorageError;
    use crate::storage::local_store::LocalFileStore;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::{HashSet, VecDeque};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Hands out a fixed sequence of codes, then repeats the last one
    struct ScriptedCodes(Mutex<VecDeque<String>>);

    impl ScriptedCodes {
        fn new(codes: &[&str]) -> Self {
            Self(Mutex::new(codes.iter().map(|c| c.to_string()).collect()))
        }
    }

    impl CodeGenerator for ScriptedCodes {
        fn generate(&self) -> String {
            let mut codes = self.0.lock().unwrap();
            if codes.len() > 1 {
                codes.pop_front().unwrap()
            } else {
                codes.front().cloned().unwrap()
            }
        }
    }

    /// Backend that records calls and can be told to fail
    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<HashSet<String>>,
        deletes: Mutex<Vec<String>>,
        fail_save: bool,
        fail_delete: bool,
    }

    #[async_trait]
    impl Storage for RecordingStore {
        async fn save(&self, blob: StagedBlob) -> Result<StorageKey, StorageError> {
            if self.fail_save {
                return Err(StorageError::Remote("disk full".into()));
            }
            let key = format!("key-{}", blob.path.display());
            self.saved.lock().unwrap().insert(key.clone());
            Ok(StorageKey::new(key))
        }

        async fn issue_retrieval_locator(
            &self,
            key: &StorageKey,
            _display_name: &str,
        ) -> Result<RetrievalLocator, StorageError> {
            Ok(RetrievalLocator::LocalPath(PathBuf::from(key.as_str())))
        }

        async fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
            tokio::task::yield_now().await;
            self.deletes.lock().unwrap().push(key.to_string());
            if self.fail_delete {
                return Err(StorageError::Remote("access denied".into()));
            }
            self.saved.lock().unwrap().remove(key.as_str());
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "recording"
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn registry_with(store: Arc<RecordingStore>) -> (ObjectRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let registry = ObjectRegistry::new(store).with_clock(clock.clone());
        (registry, clock)
    }

    fn blob(n: usize) -> StagedBlob {
        StagedBlob::new(format!("/staging/{}", n), format!("file-{}.txt", n))
    }

    #[tokio::test]
    async fn test_create_then_lookup() {
        let store = Arc::new(RecordingStore::default());
        let (registry, _clock) = registry_with(store.clone());

        let code = registry.create(blob(1), "10").await.unwrap();
        assert!(code::is_valid_code(&code));

        let record = registry.lookup(&code).await.unwrap();
        assert_eq!(record.code, code);
        assert_eq!(record.original_name, "file-1.txt");
        assert_eq!(record.created_at, start());
        assert_eq!(record.expires_at, start() + Duration::minutes(10));
        assert!(store.saved.lock().unwrap().contains(record.storage_key.as_str()));
        assert_eq!(registry.stats().created, 1);
    }

    #[tokio::test]
    async fn test_zero_retention_falls_back_to_ten_minutes() {
        let (registry, _clock) = registry_with(Arc::new(RecordingStore::default()));
        let code = registry.create(blob(1), "0").await.unwrap();
        let record = registry.lookup(&code).await.unwrap();
        assert_eq!(record.expires_at, start() + Duration::minutes(10));
    }

    #[tokio::test]
    async fn test_lookup_after_expiry_is_not_found_and_reclaims() {
        let store = Arc::new(RecordingStore::default());
        let (registry, clock) = registry_with(store.clone());
        let code = registry.create(blob(1), "5").await.unwrap();

        clock.advance(Duration::minutes(5) + Duration::seconds(1));

        assert!(matches!(registry.lookup(&code).await, Err(RelayError::NotFoundOrExpired)));
        assert!(registry.is_empty());
        assert_eq!(store.deletes.lock().unwrap().len(), 1);
        assert!(store.saved.lock().unwrap().is_empty());

        // a second lookup must not delete again
        assert!(matches!(registry.lookup(&code).await, Err(RelayError::NotFoundOrExpired)));
        assert_eq!(store.deletes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_expires_exactly_at_expires_at() {
        let (registry, clock) = registry_with(Arc::new(RecordingStore::default()));
        let code = registry.create(blob(1), "5").await.unwrap();

        clock.advance(Duration::minutes(5) - Duration::milliseconds(1));
        assert!(registry.lookup(&code).await.is_ok());

        clock.advance(Duration::milliseconds(1));
        assert!(registry.lookup(&code).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_code_is_not_found() {
        let (registry, _clock) = registry_with(Arc::new(RecordingStore::default()));
        assert!(matches!(registry.lookup("Zz99").await, Err(RelayError::NotFoundOrExpired)));
    }

    #[tokio::test]
    async fn test_failed_save_registers_nothing() {
        let store = Arc::new(RecordingStore { fail_save: true, ..Default::default() });
        let (registry, _clock) = registry_with(store);

        let err = registry.create(blob(1), "10").await.unwrap_err();
        assert!(matches!(err, RelayError::BackendSave(_)));
        assert!(registry.is_empty());
        assert_eq!(registry.stats().created, 0);
    }

    #[tokio::test]
    async fn test_evict_expired_removes_exactly_the_expired() {
        let store = Arc::new(RecordingStore::default());
        let (registry, _clock) = registry_with(store.clone());

        let short = registry.create(blob(1), "1").await.unwrap();
        let medium = registry.create(blob(2), "5").await.unwrap();
        let long = registry.create(blob(3), "30").await.unwrap();

        // expires_at == now counts as expired
        let evicted = registry.evict_expired(start() + Duration::minutes(5)).await;
        assert_eq!(evicted, 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(store.deletes.lock().unwrap().len(), 2);

        assert!(registry.lookup(&short).await.is_err());
        assert!(registry.lookup(&medium).await.is_err());
        assert!(registry.lookup(&long).await.is_ok());

        assert_eq!(registry.evict_expired(start() + Duration::minutes(5)).await, 0);
        assert_eq!(registry.stats().evicted, 2);
    }

    #[tokio::test]
    async fn test_delete_failure_still_removes_mapping() {
        let store = Arc::new(RecordingStore { fail_delete: true, ..Default::default() });
        let (registry, _clock) = registry_with(store.clone());
        registry.create(blob(1), "1").await.unwrap();
        registry.create(blob(2), "1").await.unwrap();

        let evicted = registry.evict_expired(start() + Duration::minutes(2)).await;

        assert_eq!(evicted, 2);
        assert!(registry.is_empty());
        assert_eq!(store.deletes.lock().unwrap().len(), 2);
        assert_eq!(registry.stats().delete_failures, 2);
    }

    #[tokio::test]
    async fn test_colliding_code_is_redrawn() {
        let store = Arc::new(RecordingStore::default());
        let clock = Arc::new(ManualClock::new(start()));
        let registry = ObjectRegistry::new(store)
            .with_clock(clock)
            .with_code_generator(Arc::new(ScriptedCodes::new(&["AAAA", "AAAA", "BBBB"])));

        let first = registry.create(blob(1), "10").await.unwrap();
        let second = registry.create(blob(2), "10").await.unwrap();

        assert_eq!(first, "AAAA");
        assert_eq!(second, "BBBB");
        assert_eq!(registry.lookup("AAAA").await.unwrap().original_name, "file-1.txt");
        assert_eq!(registry.lookup("BBBB").await.unwrap().original_name, "file-2.txt");
        assert_eq!(registry.stats().code_collisions, 1);
    }

    #[tokio::test]
    async fn test_exhausted_code_space_discards_blob() {
        let store = Arc::new(RecordingStore::default());
        let clock = Arc::new(ManualClock::new(start()));
        let registry = ObjectRegistry::new(store.clone())
            .with_clock(clock)
            .with_code_generator(Arc::new(ScriptedCodes::new(&["SAME"])));

        registry.create(blob(1), "10").await.unwrap();
        let err = registry.create(blob(2), "10").await.unwrap_err();

        assert!(matches!(err, RelayError::CodeSpaceExhausted { attempts: MAX_CODE_ATTEMPTS }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("SAME").await.unwrap().original_name, "file-1.txt");
        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert_eq!(registry.stats().code_collisions, MAX_CODE_ATTEMPTS as u64);
    }

    #[tokio::test]
    async fn test_two_objects_are_independent_on_local_disk() {
        let root = TempDir::new().unwrap();
        let storage: Arc<dyn Storage> =
            Arc::new(LocalFileStore::with_directory(root.path().join("storage")).unwrap());
        let registry = ObjectRegistry::new(storage.clone());

        let mut codes = Vec::new();
        for (name, data) in [("a.txt", "alpha"), ("b.txt", "beta")] {
            let staged = root.path().join(format!("staged-{}", name));
            std::fs::write(&staged, data).unwrap();
            codes.push(registry.create(StagedBlob::new(staged, name), "10").await.unwrap());
        }
        assert_ne!(codes[0], codes[1]);

        let (first, locator) = registry.retrieve(&codes[0]).await.unwrap();
        assert_eq!(first.original_name, "a.txt");
        match locator {
            RetrievalLocator::LocalPath(path) => assert_eq!(std::fs::read_to_string(path).unwrap(), "alpha"),
            other => panic!("unexpected locator {:?}", other),
        }

        storage.delete(&first.storage_key).await.unwrap();

        let (second, locator) = registry.retrieve(&codes[1]).await.unwrap();
        assert_eq!(second.original_name, "b.txt");
        match locator {
            RetrievalLocator::LocalPath(path) => assert_eq!(std::fs::read_to_string(path).unwrap(), "beta"),
            other => panic!("unexpected locator {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lookup_and_eviction_delete_each_blob_once() {
        let store = Arc::new(RecordingStore::default());
        let (registry, clock) = registry_with(store.clone());
        let registry = Arc::new(registry);

        let mut codes = Vec::new();
        for i in 0..20 {
            codes.push(registry.create(blob(i), "1").await.unwrap());
        }
        clock.advance(Duration::minutes(2));
        let now = registry.now();

        let mut handles = Vec::new();
        for round in 0..3 {
            for code in &codes {
                let registry = Arc::clone(&registry);
                let code = code.clone();
                handles.push(tokio::spawn(async move {
                    assert!(registry.lookup(&code).await.is_err());
                    0
                }));
            }
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                if round == 1 {
                    tokio::task::yield_now().await;
                }
                registry.evict_expired(now).await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let deletes = store.deletes.lock().unwrap().clone();
        let unique: HashSet<_> = deletes.iter().cloned().collect();
        assert_eq!(deletes.len(), 20);
        assert_eq!(unique.len(), 20);
        assert!(registry.is_empty());
        assert_eq!(registry.stats().evicted, 20);
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_distinct_codes() {
        let store = Arc::new(RecordingStore::default());
        let registry = Arc::new(ObjectRegistry::new(store));

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.create(blob(i), "10").await.unwrap() })
            })
            .collect();

        let mut codes = HashSet::new();
        for handle in handles {
            codes.insert(handle.await.unwrap());
        }
        assert_eq!(codes.len(), 50);
        assert_eq!(registry.len(), 50);
    }
}
