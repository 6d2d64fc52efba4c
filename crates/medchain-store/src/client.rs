//! Upload client for the content-addressed store.

use crate::errors::StoreError;
use crate::receipt::StoredContent;
use medchain_core::effects::{ContentStoreEffects, PinMetadata};
use medchain_core::{ContentHash, FileUpload, StoreConfig};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Client for the content-addressed store.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn ContentStoreEffects>,
    gateway_base: String,
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("gateway_base", &self.gateway_base)
            .finish_non_exhaustive()
    }
}

impl StoreClient {
    /// Client over `store`, building retrieval URLs from `config.gateway_url`.
    pub fn new(store: Arc<dyn ContentStoreEffects>, config: &StoreConfig) -> Self {
        Self {
            store,
            gateway_base: config.gateway_url.trim_end_matches('/').to_string(),
        }
    }

    /// Serialize `value` as JSON and store it under `name`.
    pub async fn upload_json<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<StoredContent, StoreError> {
        let payload = serde_json::to_vec(value).map_err(|e| StoreError::Serialization {
            message: e.to_string(),
        })?;
        self.put(payload, name, JSON_CONTENT_TYPE).await
    }

    /// Store an uploaded file as-is.
    pub async fn upload_file(&self, file: &FileUpload) -> Result<StoredContent, StoreError> {
        self.put(file.bytes.clone(), &file.name, &file.content_type)
            .await
    }

    /// Public retrieval URL for `hash`.
    pub fn gateway_url(&self, hash: &ContentHash) -> String {
        format!("{}/{}", self.gateway_base, hash)
    }

    async fn put(
        &self,
        payload: Vec<u8>,
        name: &str,
        content_type: &str,
    ) -> Result<StoredContent, StoreError> {
        let size = payload.len() as u64;
        let metadata = PinMetadata {
            name: name.to_string(),
            content_type: content_type.to_string(),
        };

        let raw_hash = self.store.put(payload, &metadata).await.map_err(|e| {
            warn!(name, error = %e, "Content upload failed");
            StoreError::unavailable(e.to_string())
        })?;
        let hash = ContentHash::parse(raw_hash).ok_or_else(|| {
            warn!(name, "Content store returned an empty hash");
            StoreError::unavailable("store returned an empty content hash")
        })?;

        debug!(name, size, hash = %hash, "Stored content");
        Ok(StoredContent::new(
            hash,
            metadata.name,
            metadata.content_type,
            size,
        ))
    }
}
