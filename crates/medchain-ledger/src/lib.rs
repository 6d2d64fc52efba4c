//! # MedChain Ledger - Gateway to the Anchoring Contract
//!
//! [`LedgerGateway`] wraps every read and write against the patient-records
//! contract. Writes acquire their signer from the wallet session manager,
//! simulate the call first, re-check the session epoch, submit with a safety
//! margin over the estimate and wait for confirmation. Reads need no signer.
//!
//! Record anchoring takes a [`medchain_store::StoredContent`] receipt rather
//! than a bare hash.

#![forbid(unsafe_code)]

mod errors;
mod gateway;

pub use errors::LedgerError;
pub use gateway::{cost_limit, GatewaySettings, LedgerGateway, REQUIRED_FUNCTIONS};
