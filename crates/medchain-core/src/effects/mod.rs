//! Effect traits for MedChain's external collaborators
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `medchain-effects` (in-memory, file and sandbox
//!   handlers); production deployments supply their own
//! - **Usage**: the wallet, store, ledger and approval crates
//!
//! Feature crates are generic over these traits and receive handlers through
//! `Arc`, so each component can be tested against a minimal mock.

mod backend;
mod ledger;
mod provider;
mod session;
mod store;
mod time;

pub use backend::{BackendEffects, DocumentFilter};
pub use ledger::LedgerEffects;
pub use provider::{ProviderEvent, SigningScheme, WalletProviderEffects};
pub use session::{PersistedSession, SessionStorageEffects};
pub use store::{ContentStoreEffects, PinMetadata};
pub use time::PhysicalTimeEffects;
