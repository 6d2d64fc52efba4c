//! # MedChain Wallet - Session Manager
//!
//! [`WalletSessionManager`] owns the answer to "which signing address, if
//! any, is usable right now". It restores sessions silently, prompts for
//! consent only on an explicit connect, remembers an explicit disconnect
//! across restarts, and republishes provider notifications as
//! [`SessionEvent`]s.
//!
//! Ledger writers take a [`SessionGuard`] before simulating a call and check
//! it with [`WalletSessionManager::ensure_current`] right before submitting,
//! so an account or chain switch in between aborts the write.

#![forbid(unsafe_code)]

mod errors;
mod manager;
mod state;

pub use errors::WalletError;
pub use manager::WalletSessionManager;
pub use state::{ConnectionState, RoutePolicy, SessionEvent, SessionGuard};
