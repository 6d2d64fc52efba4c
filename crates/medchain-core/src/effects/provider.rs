//! Signing provider effect trait.

use crate::errors::RawProviderError;
use crate::types::{Address, ChainId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Notification pushed by the signing provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderEvent {
    /// The exposed account list changed; empty means the user locked or
    /// disconnected the wallet. Entries are unnormalized provider strings.
    AccountsChanged(Vec<String>),
    /// The provider switched chains
    ChainChanged(ChainId),
    /// The provider lost its connection to every chain
    Disconnected,
}

/// Message-signing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningScheme {
    /// Prefixed personal-message signature (`personal_sign`)
    PersonalSign,
    /// Raw message signature (`eth_sign`), used as fallback
    RawSign,
}

/// User-controlled signing provider.
#[async_trait]
pub trait WalletProviderEffects: Send + Sync {
    /// Accounts already authorised for this application. Never prompts.
    async fn accounts(&self) -> Result<Vec<String>, RawProviderError>;

    /// Ask the user to expose an account. Prompts.
    async fn request_accounts(&self) -> Result<Vec<String>, RawProviderError>;

    /// Currently selected chain.
    async fn chain_id(&self) -> Result<ChainId, RawProviderError>;

    /// Sign an application challenge with `address`.
    async fn sign_message(
        &self,
        scheme: SigningScheme,
        message: &str,
        address: &Address,
    ) -> Result<String, RawProviderError>;

    /// Register for provider notifications.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}
