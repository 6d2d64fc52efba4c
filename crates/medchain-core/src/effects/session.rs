//! Client-persisted session state.

use crate::errors::SessionStorageError;
use crate::types::{Address, ChainId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Session facts that survive a reload.
///
/// Used only to suppress unwanted silent reconnection. Never an
/// authentication credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Set by an explicit disconnect, cleared by an explicit connect
    pub explicitly_disconnected: bool,
    /// Last address the session was bound to
    pub last_address: Option<Address>,
    /// Last chain the session was on
    pub last_chain_id: Option<ChainId>,
}

/// Storage for [`PersistedSession`].
#[async_trait]
pub trait SessionStorageEffects: Send + Sync {
    /// Load persisted state; missing state loads as the default.
    async fn load(&self) -> Result<PersistedSession, SessionStorageError>;

    /// Replace persisted state.
    async fn save(&self, session: &PersistedSession) -> Result<(), SessionStorageError>;
}
