//! Ledger effect trait.

use crate::errors::RawProviderError;
use crate::types::{
    Address, ContractCall, ContractCoordinates, ContractQuery, QueryResponse, TransactionId,
    TxReceipt,
};
use async_trait::async_trait;

/// Connection to the anchoring contract.
///
/// Writes are split into estimate / submit / confirm so the caller controls
/// the cost limit and can abort before anything irreversible happens.
#[async_trait]
pub trait LedgerEffects: Send + Sync {
    /// Point the handle at the deployed contract.
    async fn bind(&self, coordinates: &ContractCoordinates) -> Result<(), RawProviderError>;

    /// Simulate `call` from `from` and return its estimated cost.
    async fn estimate(&self, from: &Address, call: &ContractCall) -> Result<u64, RawProviderError>;

    /// Submit `call` signed by `from` with the given cost limit.
    async fn submit(
        &self,
        from: &Address,
        call: &ContractCall,
        cost_limit: u64,
    ) -> Result<TransactionId, RawProviderError>;

    /// Wait until `transaction` is mined.
    async fn confirm(&self, transaction: &TransactionId) -> Result<TxReceipt, RawProviderError>;

    /// Evaluate a read-only query.
    async fn query(&self, query: &ContractQuery) -> Result<QueryResponse, RawProviderError>;
}
