//! # MedChain Store - Content-Addressed Store Client
//!
//! Uploads record payloads and files to the content store and hands back a
//! [`StoredContent`] receipt. The receipt can only be produced by a successful
//! upload, and the ledger gateway's anchoring calls take one, so a content
//! hash cannot reach the ledger before its payload is durably stored.
//!
//! Uploads are never retried here; a failed upload surfaces immediately as
//! [`StoreError::StoreUnavailable`] and the caller decides what to do.

#![forbid(unsafe_code)]

mod client;
mod errors;
mod receipt;

pub use client::StoreClient;
pub use errors::StoreError;
pub use receipt::StoredContent;
