//! Sandbox wiring of every MedChain component.

use medchain_approval::ApprovalCoordinator;
use medchain_core::effects::BackendEffects;
use medchain_core::{Address, ChainId, MedchainConfig, PatientId};
use medchain_effects::{
    MemoryBackend, MemoryContentStore, MemorySessionStorage, SandboxLedger, SandboxWalletProvider,
    SimulatedClock,
};
use medchain_ledger::{GatewaySettings, LedgerGateway};
use medchain_store::StoreClient;
use medchain_wallet::WalletSessionManager;
use std::sync::Arc;

/// Chain the sandbox provider reports.
pub const SANDBOX_CHAIN: ChainId = ChainId(11_155_111);

/// Start time of the harness clock (ms since epoch).
pub const HARNESS_START_MS: u64 = 1_700_000_000_000;

/// Every handler plus the wallet manager built over them.
///
/// Handlers are cheap clones sharing state, so a test keeps its harness
/// around to inject failures and count calls after handing components to
/// the code under test.
#[derive(Clone)]
pub struct TestHarness {
    /// Signing provider
    pub provider: SandboxWalletProvider,
    /// Persisted session state
    pub storage: MemorySessionStorage,
    /// Shared clock
    pub clock: SimulatedClock,
    /// Anchoring contract
    pub ledger: SandboxLedger,
    /// Content store
    pub content: MemoryContentStore,
    /// Backend, serving the sandbox contract coordinates
    pub backend: MemoryBackend,
    /// Session manager over `provider` and `storage`
    pub wallet: WalletSessionManager,
    /// Configuration used for the wiring
    pub config: MedchainConfig,
}

impl TestHarness {
    /// Harness whose provider holds `account`, with default configuration.
    pub async fn new(account: &Address) -> Self {
        Self::with_config(account, MedchainConfig::default()).await
    }

    /// Harness whose provider holds `account`.
    pub async fn with_config(account: &Address, config: MedchainConfig) -> Self {
        let provider = SandboxWalletProvider::with_account(account, SANDBOX_CHAIN);
        let storage = MemorySessionStorage::new();
        let clock = SimulatedClock::new(HARNESS_START_MS);
        let backend = MemoryBackend::with_clock(Arc::new(clock.clone()));
        backend.set_coordinates(SandboxLedger::coordinates()).await;

        let wallet = WalletSessionManager::new(
            Arc::new(provider.clone()),
            Arc::new(storage.clone()),
            Arc::new(clock.clone()),
            config.wallet.clone(),
        );

        Self {
            provider,
            storage,
            clock,
            ledger: SandboxLedger::new(),
            content: MemoryContentStore::new(),
            backend,
            wallet,
            config,
        }
    }

    /// Bind `patient_id` to `address` in the backend.
    pub async fn bind_patient(&self, patient_id: &PatientId, address: Address) {
        self.backend.bind_patient(patient_id.clone(), address).await;
    }

    /// Store client over the memory content store.
    pub fn store_client(&self) -> StoreClient {
        StoreClient::new(Arc::new(self.content.clone()), &self.config.store)
    }

    /// Gateway bound to the sandbox contract.
    pub async fn gateway(&self) -> LedgerGateway {
        LedgerGateway::connect(
            Arc::new(self.ledger.clone()),
            &self.backend,
            self.wallet.clone(),
            GatewaySettings::from_config(&self.config),
        )
        .await
        .unwrap()
    }

    /// Coordinator over the whole sandbox.
    pub async fn coordinator(&self) -> ApprovalCoordinator {
        self.coordinator_over(Arc::new(self.backend.clone())).await
    }

    /// Coordinator whose backend is `backend`, typically a wrapper around
    /// [`Self::backend`] that injects a fault.
    pub async fn coordinator_over(&self, backend: Arc<dyn BackendEffects>) -> ApprovalCoordinator {
        let gateway = LedgerGateway::connect(
            Arc::new(self.ledger.clone()),
            backend.as_ref(),
            self.wallet.clone(),
            GatewaySettings::from_config(&self.config),
        )
        .await
        .unwrap();
        ApprovalCoordinator::new(
            backend,
            self.wallet.clone(),
            gateway,
            self.store_client(),
            Arc::new(self.clock.clone()),
        )
    }
}
