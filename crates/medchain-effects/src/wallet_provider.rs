//! Sandbox signing provider
//!
//! Behaves like a browser-injected wallet: it holds a list of accounts, only
//! exposes them silently once the application has been authorised, prompts on
//! `request_accounts`, and pushes account/chain notifications. Tests script the
//! user's answers through [`ConsentBehavior`].

use async_trait::async_trait;
use medchain_core::effects::{ProviderEvent, SigningScheme, WalletProviderEffects};
use medchain_core::{Address, ChainId, RawProviderError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_BUFFER: usize = 64;

/// How the simulated user answers prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentBehavior {
    /// Accept every prompt
    Approve,
    /// Decline every prompt
    Reject,
    /// Leave the prompt open (provider reports a pending request)
    Pending,
}

#[derive(Debug)]
struct ProviderState {
    accounts: Mutex<Vec<String>>,
    chain_id: Mutex<ChainId>,
    consent: Mutex<ConsentBehavior>,
    authorized: AtomicBool,
    available: AtomicBool,
    personal_sign_supported: AtomicBool,
    latency_ms: AtomicU64,
    events: broadcast::Sender<ProviderEvent>,
    accounts_calls: AtomicUsize,
    request_calls: AtomicUsize,
    sign_calls: AtomicUsize,
}

/// Scriptable signing provider.
#[derive(Debug, Clone)]
pub struct SandboxWalletProvider {
    state: Arc<ProviderState>,
}

impl SandboxWalletProvider {
    /// Provider holding `accounts` on `chain_id`, not yet authorised.
    pub fn new(accounts: Vec<String>, chain_id: ChainId) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Arc::new(ProviderState {
                accounts: Mutex::new(accounts),
                chain_id: Mutex::new(chain_id),
                consent: Mutex::new(ConsentBehavior::Approve),
                authorized: AtomicBool::new(false),
                available: AtomicBool::new(true),
                personal_sign_supported: AtomicBool::new(true),
                latency_ms: AtomicU64::new(0),
                events,
                accounts_calls: AtomicUsize::new(0),
                request_calls: AtomicUsize::new(0),
                sign_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Provider with a single account.
    pub fn with_account(address: &Address, chain_id: ChainId) -> Self {
        Self::new(vec![address.to_canonical()], chain_id)
    }

    /// Mark the application as already authorised (silent access allowed).
    pub fn set_authorized(&self, authorized: bool) {
        self.state.authorized.store(authorized, Ordering::SeqCst);
    }

    /// Script the user's answer to prompts.
    pub fn set_consent(&self, behavior: ConsentBehavior) {
        *self.state.consent.lock() = behavior;
    }

    /// Simulate the provider being missing or disconnected.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Toggle support for the personal-message scheme.
    pub fn set_personal_sign_supported(&self, supported: bool) {
        self.state
            .personal_sign_supported
            .store(supported, Ordering::SeqCst);
    }

    /// Delay every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Switch to another account list and notify subscribers.
    pub fn switch_accounts(&self, accounts: Vec<String>) {
        *self.state.accounts.lock() = accounts.clone();
        self.emit(ProviderEvent::AccountsChanged(accounts));
    }

    /// User locks the wallet: notify an empty account list.
    pub fn lock(&self) {
        self.state.authorized.store(false, Ordering::SeqCst);
        self.emit(ProviderEvent::AccountsChanged(Vec::new()));
    }

    /// Switch chains and notify subscribers.
    pub fn switch_chain(&self, chain_id: ChainId) {
        *self.state.chain_id.lock() = chain_id;
        self.emit(ProviderEvent::ChainChanged(chain_id));
    }

    /// Push an arbitrary notification.
    pub fn emit(&self, event: ProviderEvent) {
        // No receivers is fine; nothing is listening yet.
        let _ = self.state.events.send(event);
    }

    /// Live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.state.events.receiver_count()
    }

    /// Silent `accounts` calls so far.
    pub fn accounts_calls(&self) -> usize {
        self.state.accounts_calls.load(Ordering::SeqCst)
    }

    /// Consent prompts so far.
    pub fn request_calls(&self) -> usize {
        self.state.request_calls.load(Ordering::SeqCst)
    }

    /// Signing requests so far.
    pub fn sign_calls(&self) -> usize {
        self.state.sign_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = self.state.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    fn ensure_available(&self) -> Result<(), RawProviderError> {
        if self.state.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RawProviderError::with_code(
                4900,
                "The provider is disconnected from all chains.",
            ))
        }
    }

    fn signature_for(scheme: SigningScheme, message: &str, address: &Address) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(match scheme {
            SigningScheme::PersonalSign => b"personal_sign".as_slice(),
            SigningScheme::RawSign => b"eth_sign".as_slice(),
        });
        hasher.update(address.as_bytes());
        hasher.update(message.as_bytes());
        let mut signature = [0u8; 65];
        hasher.finalize_xof().fill(&mut signature);
        format!("0x{}", hex::encode(signature))
    }
}

#[async_trait]
impl WalletProviderEffects for SandboxWalletProvider {
    async fn accounts(&self) -> Result<Vec<String>, RawProviderError> {
        self.state.accounts_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.ensure_available()?;
        if self.state.authorized.load(Ordering::SeqCst) {
            Ok(self.state.accounts.lock().clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn request_accounts(&self) -> Result<Vec<String>, RawProviderError> {
        self.state.request_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.ensure_available()?;
        let behavior = *self.state.consent.lock();
        match behavior {
            ConsentBehavior::Approve => {
                self.state.authorized.store(true, Ordering::SeqCst);
                Ok(self.state.accounts.lock().clone())
            }
            ConsentBehavior::Reject => Err(RawProviderError::with_code(
                4001,
                "User rejected the request.",
            )),
            ConsentBehavior::Pending => Err(RawProviderError::with_code(
                -32002,
                "Request of type 'eth_requestAccounts' already pending",
            )),
        }
    }

    async fn chain_id(&self) -> Result<ChainId, RawProviderError> {
        self.ensure_available()?;
        Ok(*self.state.chain_id.lock())
    }

    async fn sign_message(
        &self,
        scheme: SigningScheme,
        message: &str,
        address: &Address,
    ) -> Result<String, RawProviderError> {
        self.state.sign_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.ensure_available()?;
        if !self.state.authorized.load(Ordering::SeqCst) {
            return Err(RawProviderError::with_code(
                4100,
                "The requested account has not been authorized by the user.",
            ));
        }
        if scheme == SigningScheme::PersonalSign
            && !self.state.personal_sign_supported.load(Ordering::SeqCst)
        {
            return Err(RawProviderError::with_code(
                4200,
                "The requested method is not supported by this provider.",
            ));
        }
        if *self.state.consent.lock() == ConsentBehavior::Reject {
            return Err(RawProviderError::with_code(
                4001,
                "User denied message signature.",
            ));
        }
        Ok(Self::signature_for(scheme, message, address))
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.state.events.subscribe()
    }
}
