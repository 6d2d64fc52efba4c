//! Session state, events and guards.

use medchain_core::{Address, ChainId};
use serde::{Deserialize, Serialize};

/// Connection lifecycle.
///
/// `Idle -> Connecting -> Connected -> (Error | Disconnecting -> Idle)`.
/// `Connected` also drops back to `Idle` when the provider reports an empty
/// account list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No signer
    #[default]
    Idle,
    /// Handshake or consent request in progress
    Connecting,
    /// A signer is usable
    Connected,
    /// The last handshake or consent request failed
    Error,
    /// Tearing down after an explicit disconnect
    Disconnecting,
}

/// Route-level override of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePolicy {
    /// Normal behaviour
    #[default]
    Normal,
    /// Report "not connected" and never contact the provider
    ForceDisconnected,
}

/// Notification published to session dependents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A signer became usable
    Connected {
        /// Normalized signer address
        address: Address,
        /// Chain the signer is on, if known
        chain_id: Option<ChainId>,
    },
    /// The provider switched to another account
    AccountChanged {
        /// New normalized signer address
        address: Address,
    },
    /// The provider switched chains
    ChainChanged {
        /// New chain
        chain_id: ChainId,
    },
    /// No signer is usable any more
    Disconnected,
}

/// Snapshot of the session taken before a ledger write.
///
/// Every account change, chain change or disconnect bumps the session epoch;
/// a guard from an older epoch is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionGuard {
    pub(crate) address: Address,
    pub(crate) chain_id: Option<ChainId>,
    pub(crate) epoch: u64,
}

impl SessionGuard {
    /// Signer address at snapshot time.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Chain at snapshot time.
    pub fn chain_id(&self) -> Option<ChainId> {
        self.chain_id
    }

    /// Session epoch at snapshot time.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) connection: ConnectionState,
    pub(crate) address: Option<Address>,
    pub(crate) chain_id: Option<ChainId>,
    pub(crate) epoch: u64,
    pub(crate) explicitly_disconnected: bool,
    pub(crate) persisted_loaded: bool,
    pub(crate) last_handshake_ms: Option<u64>,
    pub(crate) connect_in_flight: bool,
    pub(crate) route_policy: RoutePolicy,
}

impl SessionState {
    /// Drop the signer and invalidate outstanding guards.
    pub(crate) fn clear_signer(&mut self) {
        self.address = None;
        self.chain_id = None;
        self.epoch += 1;
    }

    pub(crate) fn guard(&self) -> Option<SessionGuard> {
        if self.explicitly_disconnected || self.connection != ConnectionState::Connected {
            return None;
        }
        self.address.map(|address| SessionGuard {
            address,
            chain_id: self.chain_id,
            epoch: self.epoch,
        })
    }
}
