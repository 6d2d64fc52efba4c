//! Composition root
//!
//! Builds every component from a [`MedchainConfig`] and hands out the one
//! wallet session manager shared by the gateway and the coordinator.

use anyhow::{Context, Result};
use medchain_approval::ApprovalCoordinator;
use medchain_core::effects::{PhysicalTimeEffects, SessionStorageEffects};
use medchain_core::{Address, ChainId, MedchainConfig};
use medchain_effects::{
    FileSessionStorage, MemoryBackend, MemoryContentStore, MemorySessionStorage, SandboxLedger,
    SandboxWalletProvider, SystemClock,
};
use medchain_ledger::{GatewaySettings, LedgerGateway};
use medchain_store::StoreClient;
use medchain_wallet::WalletSessionManager;
use std::sync::Arc;
use tracing::info;

/// Chain reported by the sandbox provider.
pub const SANDBOX_CHAIN: ChainId = ChainId(11_155_111);

/// Wired application over the sandbox handlers.
pub struct App {
    /// Signing provider holding the demo account
    pub provider: SandboxWalletProvider,
    /// Backend persistence
    pub backend: MemoryBackend,
    /// Anchoring contract
    pub ledger: SandboxLedger,
    /// Approval and anchoring workflows
    pub coordinator: ApprovalCoordinator,
}

impl App {
    /// Wire the sandbox with `account` as the provider's only account.
    pub async fn sandbox(config: MedchainConfig, account: &Address) -> Result<Self> {
        let clock: Arc<dyn PhysicalTimeEffects> = Arc::new(SystemClock);
        let provider = SandboxWalletProvider::with_account(account, SANDBOX_CHAIN);
        let storage: Arc<dyn SessionStorageEffects> = match &config.session.state_file {
            Some(path) => {
                info!(path = %path.display(), "Persisting wallet session to file");
                Arc::new(FileSessionStorage::new(path.clone()))
            }
            None => Arc::new(MemorySessionStorage::new()),
        };

        let backend = MemoryBackend::with_clock(Arc::clone(&clock));
        backend.set_coordinates(SandboxLedger::coordinates()).await;
        let ledger = SandboxLedger::new();

        let wallet = WalletSessionManager::new(
            Arc::new(provider.clone()),
            storage,
            Arc::clone(&clock),
            config.wallet.clone(),
        );
        let gateway = LedgerGateway::connect(
            Arc::new(ledger.clone()),
            &backend,
            wallet.clone(),
            GatewaySettings::from_config(&config),
        )
        .await
        .context("binding the anchoring contract")?;
        let store = StoreClient::new(Arc::new(MemoryContentStore::new()), &config.store);

        let coordinator = ApprovalCoordinator::new(
            Arc::new(backend.clone()),
            wallet,
            gateway,
            store,
            clock,
        );

        Ok(Self {
            provider,
            backend,
            ledger,
            coordinator,
        })
    }
}
