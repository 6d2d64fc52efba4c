//! Session state storage handlers.

use async_trait::async_trait;
use medchain_core::effects::{PersistedSession, SessionStorageEffects};
use medchain_core::SessionStorageError;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory session storage for tests and ephemeral runs.
///
/// Clones share state, which is how a test simulates "a later load" with a
/// fresh manager over the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStorage {
    state: Arc<RwLock<PersistedSession>>,
}

impl MemorySessionStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage pre-loaded with `session`.
    pub fn with_session(session: PersistedSession) -> Self {
        Self {
            state: Arc::new(RwLock::new(session)),
        }
    }

    /// Current stored value.
    pub async fn snapshot(&self) -> PersistedSession {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl SessionStorageEffects for MemorySessionStorage {
    async fn load(&self) -> Result<PersistedSession, SessionStorageError> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, session: &PersistedSession) -> Result<(), SessionStorageError> {
        *self.state.write().await = session.clone();
        Ok(())
    }
}

/// JSON file session storage with atomic replace.
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    /// Store state at `path`; parent directories are created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        PathBuf::from(temp)
    }
}

#[async_trait]
impl SessionStorageEffects for FileSessionStorage {
    async fn load(&self) -> Result<PersistedSession, SessionStorageError> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| SessionStorageError::Corrupt {
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedSession::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, session: &PersistedSession) -> Result<(), SessionStorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(session).map_err(|e| SessionStorageError::Corrupt {
            message: e.to_string(),
        })?;

        let temp = self.temp_path();
        fs::write(&temp, &bytes).await?;
        fs::rename(&temp, &self.path).await?;
        debug!(path = %self.path.display(), "Persisted wallet session state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use medchain_core::{Address, ChainId};

    fn sample_session() -> PersistedSession {
        PersistedSession {
            explicitly_disconnected: true,
            last_address: Some(Address::from_bytes([0xab; 20])),
            last_chain_id: Some(ChainId(11155111)),
        }
    }

    #[tokio::test]
    async fn test_memory_storage_clones_share_state() {
        let storage = MemorySessionStorage::new();
        let other = storage.clone();
        storage.save(&sample_session()).await.unwrap();
        assert_eq!(other.load().await.unwrap(), sample_session());
    }

    #[tokio::test]
    async fn test_file_storage_missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSessionStorage::new(dir.path().join("nested/session.json"));
        assert_eq!(storage.load().await.unwrap(), PersistedSession::default());

        storage.save(&sample_session()).await.unwrap();
        let reloaded = FileSessionStorage::new(dir.path().join("nested/session.json"));
        assert_eq!(reloaded.load().await.unwrap(), sample_session());
    }

    #[tokio::test]
    async fn test_file_storage_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();
        let storage = FileSessionStorage::new(path);
        assert_matches!(
            storage.load().await,
            Err(SessionStorageError::Corrupt { .. })
        );
    }
}
