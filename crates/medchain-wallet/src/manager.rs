//! Wallet session manager
//!
//! # Invariants
//!
//! - At most one provider handshake is in flight; concurrent `initialize`
//!   callers await the same shared future
//! - Handshakes start at least `init_throttle_ms` apart
//! - The explicit-disconnect flag wins over anything the provider reports,
//!   until the next explicit `connect_wallet`
//! - Every account change, chain change and disconnect bumps the session epoch
//!
//! # Blocking Lock Usage
//!
//! Uses `parking_lot::Mutex` for session state, the in-flight handshake slot
//! and the listener handle. Locks are taken in that order, never held across
//! `.await`, and the handshake slot check and insert happen under one lock.

use crate::errors::WalletError;
use crate::state::{ConnectionState, RoutePolicy, SessionEvent, SessionGuard, SessionState};
use futures::future::{BoxFuture, FutureExt, Shared};
use medchain_core::effects::{
    PersistedSession, PhysicalTimeEffects, ProviderEvent, SessionStorageEffects, SigningScheme,
    WalletProviderEffects,
};
use medchain_core::{Address, ChainId, ProviderErrorKind, WalletConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type HandshakeResult = Result<Option<Address>, WalletError>;
type SharedHandshake = Shared<BoxFuture<'static, HandshakeResult>>;

const EVENT_BUFFER: usize = 64;

struct InFlightHandshake {
    generation: u64,
    future: SharedHandshake,
}

#[derive(Default)]
struct HandshakeSlot {
    next_generation: u64,
    in_flight: Option<InFlightHandshake>,
}

struct Inner {
    provider: Arc<dyn WalletProviderEffects>,
    storage: Arc<dyn SessionStorageEffects>,
    clock: Arc<dyn PhysicalTimeEffects>,
    config: WalletConfig,
    state: Mutex<SessionState>,
    handshake: Mutex<HandshakeSlot>,
    listener: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

/// Single source of truth for which signing address, if any, is usable.
///
/// Cheap to clone; clones share one session. Construct it once in the
/// composition root and hand it to every component that needs a signer.
#[derive(Clone)]
pub struct WalletSessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WalletSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WalletSessionManager")
            .field("connection", &state.connection)
            .field("address", &state.address)
            .field("chain_id", &state.chain_id)
            .field("epoch", &state.epoch)
            .finish_non_exhaustive()
    }
}

impl WalletSessionManager {
    /// Create a manager. Nothing is read from the provider or storage until
    /// [`initialize`](Self::initialize) or [`connect_wallet`](Self::connect_wallet).
    pub fn new(
        provider: Arc<dyn WalletProviderEffects>,
        storage: Arc<dyn SessionStorageEffects>,
        clock: Arc<dyn PhysicalTimeEffects>,
        config: WalletConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                provider,
                storage,
                clock,
                config,
                state: Mutex::new(SessionState::default()),
                handshake: Mutex::new(HandshakeSlot::default()),
                listener: Mutex::new(None),
                events,
            }),
        }
    }

    /// Restore the session silently.
    ///
    /// Reads the provider's already-authorised accounts without prompting.
    /// Returns `None` without contacting the provider when the route forces a
    /// disconnected state or the user explicitly disconnected. Inside the
    /// throttle window the current address is returned as is.
    pub async fn initialize(&self) -> Result<Option<Address>, WalletError> {
        if self.route_policy() == RoutePolicy::ForceDisconnected {
            debug!("Route forces a disconnected session; skipping handshake");
            return Ok(None);
        }
        self.inner.load_persisted().await;
        if self.inner.state.lock().explicitly_disconnected {
            debug!("Session was explicitly disconnected; skipping handshake");
            return Ok(None);
        }

        let now = self.inner.clock.now_ms().await;
        let handshake = {
            let mut slot = self.inner.handshake.lock();
            if let Some(in_flight) = slot.in_flight.as_ref() {
                debug!(
                    generation = in_flight.generation,
                    "Joining in-flight wallet handshake"
                );
                in_flight.future.clone()
            } else {
                let mut state = self.inner.state.lock();
                if let Some(last) = state.last_handshake_ms {
                    if now.saturating_sub(last) < self.inner.config.init_throttle_ms {
                        debug!(
                            since_last_ms = now.saturating_sub(last),
                            "Wallet handshake throttled"
                        );
                        return Ok(state.address);
                    }
                }
                state.last_handshake_ms = Some(now);
                if state.connection != ConnectionState::Connected {
                    state.connection = ConnectionState::Connecting;
                }
                let epoch = state.epoch;
                drop(state);

                let generation = slot.next_generation;
                slot.next_generation += 1;
                let future = Inner::handshake(Arc::clone(&self.inner), generation, epoch)
                    .boxed()
                    .shared();
                slot.in_flight = Some(InFlightHandshake {
                    generation,
                    future: future.clone(),
                });
                future
            }
        };
        handshake.await
    }

    /// Ask the user to connect a wallet.
    ///
    /// Clears the explicit-disconnect flag, prompts for consent, persists and
    /// returns the normalized address.
    pub async fn connect_wallet(&self) -> Result<Address, WalletError> {
        let _attempt = ConnectAttempt::begin(&self.inner)?;
        self.inner.load_persisted().await;
        {
            let mut state = self.inner.state.lock();
            state.explicitly_disconnected = false;
            state.connection = ConnectionState::Connecting;
        }

        match self.inner.request_signer().await {
            Ok(address) => {
                Inner::ensure_listener(&self.inner);
                Ok(address)
            }
            Err(err) => {
                self.inner.state.lock().connection = ConnectionState::Error;
                warn!(error = %err, "Wallet connection failed");
                Err(err)
            }
        }
    }

    /// Last known signer, or `None` after an explicit disconnect.
    pub fn current_address(&self) -> Option<Address> {
        let state = self.inner.state.lock();
        if state.explicitly_disconnected || state.route_policy == RoutePolicy::ForceDisconnected {
            None
        } else {
            state.address
        }
    }

    /// Drop the session, stop listening to the provider and remember the
    /// user's choice across restarts.
    pub async fn disconnect_wallet(&self) -> Result<(), WalletError> {
        {
            let mut state = self.inner.state.lock();
            state.connection = ConnectionState::Disconnecting;
            state.explicitly_disconnected = true;
            state.persisted_loaded = true;
            state.last_handshake_ms = None;
            state.clear_signer();
        }
        self.inner.handshake.lock().in_flight = None;

        let listener = self.inner.listener.lock().take();
        if let Some(handle) = listener {
            handle.abort();
            // Wait for the task to drop its provider subscription.
            let _ = handle.await;
        }

        let persisted = self.inner.persist().await;
        self.inner.state.lock().connection = ConnectionState::Idle;
        self.inner.publish(SessionEvent::Disconnected);
        info!("Wallet disconnected");
        persisted
    }

    /// Whether `expected` names the current signer. Never fails; input that
    /// is not an address is simply `false`.
    pub fn verify_wallet_connection(&self, expected: &str) -> bool {
        match (Address::parse(expected), self.current_address()) {
            (Ok(expected), Some(current)) => expected == current,
            _ => false,
        }
    }

    /// Sign an application challenge for authentication.
    ///
    /// Falls back to raw signing when the provider refuses the personal
    /// scheme for any reason other than the user declining. A decline is
    /// returned as `ConnectionRejected` and never re-prompts.
    pub async fn sign_message(
        &self,
        message: &str,
        address: &Address,
    ) -> Result<String, WalletError> {
        let provider = &self.inner.provider;
        match provider
            .sign_message(SigningScheme::PersonalSign, message, address)
            .await
        {
            Ok(signature) => Ok(signature),
            Err(raw) if raw.kind() == ProviderErrorKind::UserRejected => {
                debug!("User declined the signature request");
                Err(WalletError::from(raw))
            }
            Err(raw) => {
                debug!(error = %raw, "Personal signing refused; falling back to raw signing");
                Ok(provider
                    .sign_message(SigningScheme::RawSign, message, address)
                    .await?)
            }
        }
    }

    /// Register for session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot the current signer, or `None` when nothing is connected.
    pub fn guard(&self) -> Option<SessionGuard> {
        let state = self.inner.state.lock();
        if state.route_policy == RoutePolicy::ForceDisconnected {
            return None;
        }
        state.guard()
    }

    /// Fail with `SessionChanged` if the session moved on since `guard` was taken.
    pub fn ensure_current(&self, guard: &SessionGuard) -> Result<(), WalletError> {
        let state = self.inner.state.lock();
        if state.explicitly_disconnected || state.address.is_none() {
            return Err(WalletError::SessionChanged {
                reason: "wallet disconnected".to_string(),
            });
        }
        if state.epoch != guard.epoch {
            return Err(WalletError::SessionChanged {
                reason: format!("session epoch moved from {} to {}", guard.epoch, state.epoch),
            });
        }
        Ok(())
    }

    /// Apply a route-level override.
    pub fn set_route_policy(&self, policy: RoutePolicy) {
        self.inner.state.lock().route_policy = policy;
    }

    /// Current route-level override.
    pub fn route_policy(&self) -> RoutePolicy {
        self.inner.state.lock().route_policy
    }

    /// Current lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    /// Chain the signer is on, if known.
    pub fn chain_id(&self) -> Option<ChainId> {
        self.inner.state.lock().chain_id
    }

    /// Current session epoch.
    pub fn epoch(&self) -> u64 {
        self.inner.state.lock().epoch
    }

    /// Feed one provider notification through the session state machine.
    ///
    /// The listener task calls this for every notification; it is public so
    /// hosts that pump provider events themselves can do the same.
    pub async fn apply_provider_event(&self, event: ProviderEvent) {
        self.inner.apply_event(event).await;
    }
}

impl Inner {
    async fn handshake(self: Arc<Self>, generation: u64, epoch: u64) -> HandshakeResult {
        let result = self.run_handshake(epoch).await;
        {
            let mut slot = self.handshake.lock();
            if slot
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.generation == generation)
            {
                slot.in_flight = None;
            }
        }
        match &result {
            Ok(Some(_)) => Inner::ensure_listener(&self),
            Ok(None) => {}
            Err(err) => {
                let mut state = self.state.lock();
                state.connection = ConnectionState::Error;
                state.last_handshake_ms = None;
                warn!(error = %err, "Wallet handshake failed");
            }
        }
        result
    }

    async fn run_handshake(&self, epoch: u64) -> HandshakeResult {
        let accounts = self.provider.accounts().await?;
        let Some(raw) = accounts.first() else {
            let mut state = self.state.lock();
            if state.connection == ConnectionState::Connecting {
                state.connection = ConnectionState::Idle;
            }
            debug!("Provider has no authorised accounts");
            return Ok(None);
        };
        let address = parse_account(raw)?;
        let chain_id = self.provider.chain_id().await?;

        {
            let mut state = self.state.lock();
            if state.explicitly_disconnected {
                debug!("Disconnected during handshake; discarding result");
                return Ok(None);
            }
            if state.epoch != epoch {
                debug!("Session changed during handshake; keeping newer state");
                return Ok(state.address);
            }
            if state.address.is_some_and(|previous| previous != address) {
                state.epoch += 1;
            }
            state.address = Some(address);
            state.chain_id = Some(chain_id);
            state.connection = ConnectionState::Connected;
        }

        if let Err(err) = self.persist().await {
            warn!(error = %err, "Could not persist restored wallet session");
        }
        self.publish(SessionEvent::Connected {
            address,
            chain_id: Some(chain_id),
        });
        info!(address = %address, chain = %chain_id, "Wallet session restored");
        Ok(Some(address))
    }

    async fn request_signer(&self) -> Result<Address, WalletError> {
        let accounts = self.provider.request_accounts().await?;
        let raw = accounts
            .first()
            .ok_or_else(|| WalletError::ConnectionRejected {
                message: "no accounts were granted".to_string(),
            })?;
        let address = parse_account(raw)?;
        let chain_id = self.provider.chain_id().await?;

        {
            let mut state = self.state.lock();
            if state.address.is_some_and(|previous| previous != address) {
                state.epoch += 1;
            }
            state.address = Some(address);
            state.chain_id = Some(chain_id);
            state.connection = ConnectionState::Connected;
        }
        self.persist().await?;
        self.publish(SessionEvent::Connected {
            address,
            chain_id: Some(chain_id),
        });
        info!(address = %address, chain = %chain_id, "Wallet connected");
        Ok(address)
    }

    async fn apply_event(&self, event: ProviderEvent) {
        if self.state.lock().explicitly_disconnected {
            debug!(?event, "Ignoring provider notification after explicit disconnect");
            return;
        }
        match event {
            ProviderEvent::AccountsChanged(accounts) => match accounts.first() {
                None => self.drop_signer("provider reported no accounts"),
                Some(raw) => match Address::parse(raw) {
                    Ok(address) => self.adopt_account(address).await,
                    Err(err) => {
                        warn!(account = %raw, error = %err, "Ignoring unparseable provider account")
                    }
                },
            },
            ProviderEvent::ChainChanged(chain_id) => {
                {
                    let mut state = self.state.lock();
                    state.epoch += 1;
                    state.chain_id = Some(chain_id);
                }
                self.publish(SessionEvent::ChainChanged { chain_id });
                info!(chain = %chain_id, "Provider switched chains; re-reading accounts");
                self.rederive().await;
            }
            ProviderEvent::Disconnected => self.drop_signer("provider disconnected"),
        }
    }

    async fn adopt_account(&self, address: Address) {
        let changed = {
            let mut state = self.state.lock();
            if state.address == Some(address) && state.connection == ConnectionState::Connected {
                false
            } else {
                state.epoch += 1;
                state.address = Some(address);
                state.connection = ConnectionState::Connected;
                true
            }
        };
        if changed {
            info!(address = %address, "Provider switched accounts");
            self.publish(SessionEvent::AccountChanged { address });
            if let Err(err) = self.persist().await {
                warn!(error = %err, "Could not persist account change");
            }
        }
    }

    async fn rederive(&self) {
        match self.provider.accounts().await {
            Ok(accounts) => match accounts.first().map(|raw| Address::parse(raw)) {
                None => self.drop_signer("no accounts after chain change"),
                Some(Ok(address)) => self.adopt_account(address).await,
                Some(Err(err)) => warn!(error = %err, "Ignoring unparseable provider account"),
            },
            Err(raw) => {
                warn!(error = %raw, "Could not re-read accounts after chain change");
                self.state.lock().connection = ConnectionState::Error;
            }
        }
    }

    fn drop_signer(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            state.clear_signer();
            state.connection = ConnectionState::Idle;
        }
        info!(reason, "Wallet session ended by provider");
        self.publish(SessionEvent::Disconnected);
    }

    /// Load the persisted session once per manager. A corrupt or unreadable
    /// record is treated as empty.
    async fn load_persisted(&self) {
        if self.state.lock().persisted_loaded {
            return;
        }
        let persisted = match self.storage.load().await {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!(error = %err, "Ignoring unreadable persisted session");
                PersistedSession::default()
            }
        };
        let mut state = self.state.lock();
        if state.persisted_loaded {
            return;
        }
        state.persisted_loaded = true;
        state.explicitly_disconnected = persisted.explicitly_disconnected;
        if !persisted.explicitly_disconnected && state.address.is_none() {
            state.address = persisted.last_address;
            state.chain_id = persisted.last_chain_id;
        }
    }

    async fn persist(&self) -> Result<(), WalletError> {
        let snapshot = {
            let state = self.state.lock();
            PersistedSession {
                explicitly_disconnected: state.explicitly_disconnected,
                last_address: state.address,
                last_chain_id: state.chain_id,
            }
        };
        self.storage.save(&snapshot).await?;
        Ok(())
    }

    fn publish(&self, event: SessionEvent) {
        // Having no subscribers is normal.
        let _ = self.events.send(event);
    }

    fn ensure_listener(inner: &Arc<Inner>) {
        let mut listener = inner.listener.lock();
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let mut notifications = inner.provider.subscribe();
        let weak = Arc::downgrade(inner);
        *listener = Some(tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(event) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.apply_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Provider notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
        debug!("Subscribed to provider notifications");
    }
}

/// Marks a consent request as outstanding for its lifetime.
struct ConnectAttempt<'a> {
    inner: &'a Inner,
}

impl<'a> ConnectAttempt<'a> {
    fn begin(inner: &'a Inner) -> Result<Self, WalletError> {
        let mut state = inner.state.lock();
        if state.connect_in_flight {
            return Err(WalletError::ConnectionPending);
        }
        state.connect_in_flight = true;
        Ok(Self { inner })
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        self.inner.state.lock().connect_in_flight = false;
    }
}

fn parse_account(raw: &str) -> Result<Address, WalletError> {
    Address::parse(raw).map_err(|err| WalletError::InvalidAccount {
        value: raw.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use medchain_effects::{
        ConsentBehavior, MemorySessionStorage, SandboxWalletProvider, SimulatedClock,
    };

    const ACCOUNT: &str = "0xAbCdEf0123456789aBcDeF0123456789AbCdEf01";

    struct Fixture {
        provider: SandboxWalletProvider,
        storage: MemorySessionStorage,
        clock: SimulatedClock,
        manager: WalletSessionManager,
    }

    fn fixture() -> Fixture {
        let provider = SandboxWalletProvider::new(vec![ACCOUNT.to_string()], ChainId(11155111));
        let storage = MemorySessionStorage::new();
        let clock = SimulatedClock::new(10_000);
        let manager = WalletSessionManager::new(
            Arc::new(provider.clone()),
            Arc::new(storage.clone()),
            Arc::new(clock.clone()),
            WalletConfig::default(),
        );
        Fixture {
            provider,
            storage,
            clock,
            manager,
        }
    }

    #[tokio::test]
    async fn test_initialize_without_authorisation_is_not_connected() {
        let f = fixture();
        assert_eq!(f.manager.initialize().await.unwrap(), None);
        assert_eq!(f.provider.request_calls(), 0);
        assert_eq!(f.manager.connection_state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_initialize_is_throttled() {
        let f = fixture();
        f.provider.set_authorized(true);
        let expected = Address::parse(ACCOUNT).unwrap();

        assert_eq!(f.manager.initialize().await.unwrap(), Some(expected));
        assert_eq!(f.manager.initialize().await.unwrap(), Some(expected));
        assert_eq!(f.provider.accounts_calls(), 1);

        f.clock.advance(1_000);
        f.manager.initialize().await.unwrap();
        assert_eq!(f.provider.accounts_calls(), 2);
    }

    #[tokio::test]
    async fn test_forced_disconnect_never_contacts_provider() {
        let f = fixture();
        f.provider.set_authorized(true);
        f.manager.set_route_policy(RoutePolicy::ForceDisconnected);
        assert_eq!(f.manager.initialize().await.unwrap(), None);
        assert_eq!(f.provider.accounts_calls(), 0);
        assert!(f.manager.guard().is_none());
    }

    #[tokio::test]
    async fn test_connect_normalizes_and_persists() {
        let f = fixture();
        let address = f.manager.connect_wallet().await.unwrap();
        assert_eq!(address.to_canonical(), ACCOUNT.to_ascii_lowercase());
        let shouted = ACCOUNT.to_ascii_uppercase().replace("0X", "0x");
        assert!(f.manager.verify_wallet_connection(&shouted));
        assert!(!f.manager.verify_wallet_connection("not an address"));

        let persisted = f.storage.snapshot().await;
        assert_eq!(persisted.last_address, Some(address));
        assert!(!persisted.explicitly_disconnected);
    }

    #[tokio::test]
    async fn test_connect_rejection_and_pending() {
        let f = fixture();
        f.provider.set_consent(ConsentBehavior::Reject);
        assert_matches!(
            f.manager.connect_wallet().await,
            Err(WalletError::ConnectionRejected { .. })
        );
        assert_eq!(f.manager.connection_state(), ConnectionState::Error);

        f.provider.set_consent(ConsentBehavior::Pending);
        assert_matches!(
            f.manager.connect_wallet().await,
            Err(WalletError::ConnectionPending)
        );
    }

    #[tokio::test]
    async fn test_empty_grant_is_rejection() {
        let provider = SandboxWalletProvider::new(Vec::new(), ChainId(1));
        let manager = WalletSessionManager::new(
            Arc::new(provider),
            Arc::new(MemorySessionStorage::new()),
            Arc::new(SimulatedClock::default()),
            WalletConfig::default(),
        );
        assert_matches!(
            manager.connect_wallet().await,
            Err(WalletError::ConnectionRejected { .. })
        );
    }

    #[tokio::test]
    async fn test_guard_goes_stale_on_disconnect() {
        let f = fixture();
        f.manager.connect_wallet().await.unwrap();
        let guard = f.manager.guard().unwrap();
        assert!(f.manager.ensure_current(&guard).is_ok());

        f.manager.disconnect_wallet().await.unwrap();
        assert_matches!(
            f.manager.ensure_current(&guard),
            Err(WalletError::SessionChanged { .. })
        );
        assert_eq!(f.manager.current_address(), None);
        assert_eq!(f.provider.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_sign_falls_back_to_raw_scheme() {
        let f = fixture();
        let address = f.manager.connect_wallet().await.unwrap();
        f.provider.set_personal_sign_supported(false);

        let signature = f.manager.sign_message("challenge", &address).await.unwrap();
        assert!(signature.starts_with("0x"));
        assert_eq!(f.provider.sign_calls(), 2);
    }

    #[tokio::test]
    async fn test_sign_decline_never_reprompts() {
        let f = fixture();
        let address = f.manager.connect_wallet().await.unwrap();
        f.provider.set_consent(ConsentBehavior::Reject);

        assert_matches!(
            f.manager.sign_message("challenge", &address).await,
            Err(WalletError::ConnectionRejected { .. })
        );
        assert_eq!(f.provider.sign_calls(), 1);
    }

    #[tokio::test]
    async fn test_provider_events_move_the_epoch() {
        let f = fixture();
        f.manager.connect_wallet().await.unwrap();
        let start = f.manager.epoch();

        f.manager
            .apply_provider_event(ProviderEvent::ChainChanged(ChainId(1)))
            .await;
        assert!(f.manager.epoch() > start);
        assert_eq!(f.manager.chain_id(), Some(ChainId(1)));
        assert_eq!(f.manager.connection_state(), ConnectionState::Connected);

        f.manager
            .apply_provider_event(ProviderEvent::AccountsChanged(Vec::new()))
            .await;
        assert_eq!(f.manager.connection_state(), ConnectionState::Idle);
        assert_eq!(f.manager.current_address(), None);
    }
}
