//! Wall-clock time.

use async_trait::async_trait;

/// Physical time source for throttling and timestamps.
#[async_trait]
pub trait PhysicalTimeEffects: Send + Sync {
    /// Milliseconds since the Unix epoch.
    async fn now_ms(&self) -> u64;
}
