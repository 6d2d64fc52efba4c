//! In-memory content-addressed store.

use async_trait::async_trait;
use medchain_core::effects::{ContentStoreEffects, PinMetadata};
use medchain_core::ContentStoreError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A payload held by [`MemoryContentStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Payload bytes
    pub payload: Vec<u8>,
    /// Pinning metadata
    pub metadata: PinMetadata,
}

/// Content store keyed by the BLAKE3 hash of each payload.
///
/// Identical payloads land under the same hash. Taking the store offline makes
/// every `put` fail without storing anything.
#[derive(Debug, Clone, Default)]
pub struct MemoryContentStore {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
    offline: Arc<AtomicBool>,
    put_calls: Arc<AtomicUsize>,
}

impl MemoryContentStore {
    /// Create an empty, online store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash used for `payload`.
    pub fn hash_of(payload: &[u8]) -> String {
        blake3::hash(payload).to_hex().to_string()
    }

    /// Toggle availability.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `put` calls, successful or not.
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Look up a stored object.
    pub fn get(&self, hash: &str) -> Option<StoredObject> {
        self.objects.lock().get(hash).cloned()
    }

    /// Number of distinct stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl ContentStoreEffects for MemoryContentStore {
    async fn put(
        &self,
        payload: Vec<u8>,
        metadata: &PinMetadata,
    ) -> Result<String, ContentStoreError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(ContentStoreError::new("storage network unreachable"));
        }

        let hash = Self::hash_of(&payload);
        self.objects.lock().insert(
            hash.clone(),
            StoredObject {
                payload,
                metadata: metadata.clone(),
            },
        );
        Ok(hash)
    }
}
