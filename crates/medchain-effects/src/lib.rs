//! # MedChain Effects - Layer 3: Effect Handlers
//!
//! Handlers for the effect traits declared in `medchain-core`.
//!
//! - [`SystemClock`] / [`SimulatedClock`]: physical time
//! - [`MemorySessionStorage`] / [`FileSessionStorage`]: client-persisted
//!   session state
//! - [`MemoryContentStore`]: content-addressed store keyed by BLAKE3
//! - [`SandboxWalletProvider`]: scriptable signing provider
//! - [`SandboxLedger`]: in-process model of the anchoring contract
//! - [`MemoryBackend`]: in-process backend with single-transition enforcement
//!
//! The sandbox and memory handlers count calls and accept injected failures,
//! which is what the feature crates' tests and the CLI demo run against.

#![forbid(unsafe_code)]

/// In-memory backend persistence
pub mod backend;

/// In-memory content store
pub mod content_store;

/// Sandbox anchoring contract
pub mod ledger;

/// Session state storage
pub mod session_storage;

/// Physical time handlers
pub mod time;

/// Sandbox signing provider
pub mod wallet_provider;

pub use backend::MemoryBackend;
pub use content_store::MemoryContentStore;
pub use ledger::{sandbox_contract_abi, LedgerOp, SandboxLedger};
pub use session_storage::{FileSessionStorage, MemorySessionStorage};
pub use time::{SimulatedClock, SystemClock};
pub use wallet_provider::{ConsentBehavior, SandboxWalletProvider};
