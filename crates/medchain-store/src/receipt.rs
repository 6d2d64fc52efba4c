//! Proof that a payload was stored.

use medchain_core::ContentHash;
use serde::Serialize;

/// Proof that a payload is held by the content store.
///
/// Only [`crate::StoreClient`] can construct one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredContent {
    hash: ContentHash,
    name: String,
    content_type: String,
    size: u64,
}

impl StoredContent {
    pub(crate) fn new(hash: ContentHash, name: String, content_type: String, size: u64) -> Self {
        Self {
            hash,
            name,
            content_type,
            size,
        }
    }

    /// Content hash returned by the store.
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// Name the payload was pinned under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// MIME type the payload was pinned with.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}
