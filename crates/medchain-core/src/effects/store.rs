//! Content-addressed store effect trait.

use crate::errors::ContentStoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Metadata attached to a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMetadata {
    /// Display name
    pub name: String,
    /// MIME type
    pub content_type: String,
}

/// Content-addressed storage network.
#[async_trait]
pub trait ContentStoreEffects: Send + Sync {
    /// Durably store `payload` and return its content hash.
    async fn put(
        &self,
        payload: Vec<u8>,
        metadata: &PinMetadata,
    ) -> Result<String, ContentStoreError>;
}
