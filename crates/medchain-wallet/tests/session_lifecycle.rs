//! Session lifecycle across managers, storage backends and provider events.

use futures::future::join_all;
use medchain_core::effects::SessionStorageEffects;
use medchain_core::{Address, ChainId, WalletConfig};
use medchain_effects::{
    FileSessionStorage, MemorySessionStorage, SandboxWalletProvider, SimulatedClock,
};
use medchain_wallet::{ConnectionState, SessionEvent, WalletSessionManager};
use std::sync::Arc;
use std::time::Duration;

const ACCOUNT_A: &str = "0x1111111111111111111111111111111111111111";
const ACCOUNT_B: &str = "0x2222222222222222222222222222222222222222";

fn manager_over(
    provider: &SandboxWalletProvider,
    storage: Arc<dyn SessionStorageEffects>,
) -> WalletSessionManager {
    WalletSessionManager::new(
        Arc::new(provider.clone()),
        storage,
        Arc::new(SimulatedClock::new(1_000)),
        WalletConfig::default(),
    )
}

#[tokio::test]
async fn concurrent_initialize_burst_shares_one_handshake() {
    let provider = SandboxWalletProvider::new(vec![ACCOUNT_A.to_string()], ChainId(1));
    provider.set_authorized(true);
    provider.set_latency(Duration::from_millis(20));
    let manager = manager_over(&provider, Arc::new(MemorySessionStorage::new()));

    let results = join_all((0..10).map(|_| {
        let manager = manager.clone();
        async move { manager.initialize().await }
    }))
    .await;

    let expected = Address::parse(ACCOUNT_A).unwrap();
    for result in results {
        assert_eq!(result.unwrap(), Some(expected));
    }
    assert_eq!(provider.accounts_calls(), 1);
    assert_eq!(provider.request_calls(), 0);
}

#[tokio::test]
async fn spawned_initialize_burst_shares_one_handshake() {
    let provider = SandboxWalletProvider::new(vec![ACCOUNT_A.to_string()], ChainId(1));
    provider.set_authorized(true);
    provider.set_latency(Duration::from_millis(20));
    let manager = manager_over(&provider, Arc::new(MemorySessionStorage::new()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.initialize().await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_some());
    }
    assert_eq!(provider.accounts_calls(), 1);
}

#[tokio::test]
async fn explicit_disconnect_survives_a_fresh_manager() {
    let provider = SandboxWalletProvider::new(vec![ACCOUNT_A.to_string()], ChainId(1));
    let storage = MemorySessionStorage::new();

    let first = manager_over(&provider, Arc::new(storage.clone()));
    first.connect_wallet().await.unwrap();
    first.disconnect_wallet().await.unwrap();

    let second = manager_over(&provider, Arc::new(storage.clone()));
    let calls_before = provider.accounts_calls();
    assert_eq!(second.initialize().await.unwrap(), None);
    assert_eq!(second.current_address(), None);
    assert_eq!(provider.accounts_calls(), calls_before);

    // An explicit connect clears the flag again.
    second.connect_wallet().await.unwrap();
    assert!(!storage.snapshot().await.explicitly_disconnected);
}

#[tokio::test]
async fn explicit_disconnect_survives_restart_with_file_storage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let provider = SandboxWalletProvider::new(vec![ACCOUNT_A.to_string()], ChainId(1));

    let first = manager_over(&provider, Arc::new(FileSessionStorage::new(&path)));
    first.connect_wallet().await.unwrap();
    first.disconnect_wallet().await.unwrap();
    drop(first);

    let second = manager_over(&provider, Arc::new(FileSessionStorage::new(&path)));
    assert_eq!(second.initialize().await.unwrap(), None);
}

#[tokio::test]
async fn provider_notifications_are_republished() {
    let provider = SandboxWalletProvider::new(vec![ACCOUNT_A.to_string()], ChainId(1));
    let manager = manager_over(&provider, Arc::new(MemorySessionStorage::new()));
    manager.connect_wallet().await.unwrap();
    let mut events = manager.subscribe();
    let epoch = manager.epoch();

    provider.switch_accounts(vec![ACCOUNT_B.to_string()]);
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    let b = Address::parse(ACCOUNT_B).unwrap();
    assert_eq!(event, SessionEvent::AccountChanged { address: b });
    assert_eq!(manager.current_address(), Some(b));
    assert!(manager.epoch() > epoch);

    provider.lock();
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, SessionEvent::Disconnected);
    assert_eq!(manager.connection_state(), ConnectionState::Idle);
}
