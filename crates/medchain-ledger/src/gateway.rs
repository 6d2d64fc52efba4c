//! Ledger gateway

use crate::errors::LedgerError;
use medchain_core::effects::{BackendEffects, LedgerEffects};
use medchain_core::{
    Address, ChainId, ContractCall, ContractCoordinates, ContractQuery, DocumentId, LedgerConfig,
    LedgerRecord, MedchainConfig, PatientId, QueryResponse, RecordDraft, TxReceipt,
};
use medchain_store::StoredContent;
use medchain_wallet::{SessionGuard, WalletError, WalletSessionManager};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Every contract function the gateway may call.
pub const REQUIRED_FUNCTIONS: [&str; 12] = [
    "registerPatient",
    "authorizeDoctor",
    "revokeDoctor",
    "addPatientRecord",
    "updatePatientRecord",
    "approveDocument",
    "getPatientRecord",
    "verifyRecord",
    "getRecordCount",
    "getAuthorizedDoctors",
    "isDoctorAuthorized",
    "getPatientRecords",
];

/// Cost limit for a call estimated at `estimate`, with `margin_percent` on
/// top, rounded up. Saturates at `u64::MAX`.
pub fn cost_limit(estimate: u64, margin_percent: u64) -> u64 {
    let scaled = u128::from(estimate) * (100 + u128::from(margin_percent));
    u64::try_from(scaled.div_ceil(100)).unwrap_or(u64::MAX)
}

/// Gateway settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Percentage added on top of each cost estimate
    pub cost_margin_percent: u64,
    /// Chain every write must be signed on, if pinned
    pub expected_chain_id: Option<ChainId>,
}

impl GatewaySettings {
    /// Settings from the workspace configuration.
    pub fn from_config(config: &MedchainConfig) -> Self {
        Self {
            cost_margin_percent: config.ledger.cost_margin_percent,
            expected_chain_id: config.wallet.expected_chain_id.map(ChainId),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            cost_margin_percent: LedgerConfig::default().cost_margin_percent,
            expected_chain_id: None,
        }
    }
}

/// Read and write access to the anchoring contract.
///
/// Writes always acquire their signer through the wallet session manager and
/// follow estimate, epoch check, submit, confirm. Nothing is submitted when
/// the estimate fails.
#[derive(Clone)]
pub struct LedgerGateway {
    ledger: Arc<dyn LedgerEffects>,
    wallet: WalletSessionManager,
    coordinates: ContractCoordinates,
    settings: GatewaySettings,
}

impl std::fmt::Debug for LedgerGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerGateway")
            .field("contract", &self.coordinates.address)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl LedgerGateway {
    /// Fetch the contract coordinates from the backend, check the ABI and
    /// bind the ledger handle.
    ///
    /// A missing ABI function fails with `ContractMismatch` before the ledger
    /// is contacted.
    pub async fn connect(
        ledger: Arc<dyn LedgerEffects>,
        backend: &dyn BackendEffects,
        wallet: WalletSessionManager,
        settings: GatewaySettings,
    ) -> Result<Self, LedgerError> {
        let coordinates = backend
            .contract_coordinates()
            .await
            .map_err(LedgerError::Backend)?;

        let missing: Vec<String> = REQUIRED_FUNCTIONS
            .iter()
            .filter(|name| !coordinates.declares_function(name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            warn!(contract = %coordinates.address, ?missing, "Contract ABI mismatch");
            return Err(LedgerError::ContractMismatch { missing });
        }

        ledger
            .bind(&coordinates)
            .await
            .map_err(LedgerError::from_provider)?;
        info!(contract = %coordinates.address, "Ledger gateway bound");

        Ok(Self {
            ledger,
            wallet,
            coordinates,
            settings,
        })
    }

    /// Bound contract.
    pub fn coordinates(&self) -> &ContractCoordinates {
        &self.coordinates
    }

    /// Session manager providing signers.
    pub fn wallet(&self) -> &WalletSessionManager {
        &self.wallet
    }

    /// Guard for the connected signer, prompting the user to connect if
    /// nothing is connected yet.
    pub async fn ensure_wallet_connected(&self) -> Result<SessionGuard, LedgerError> {
        if let Some(guard) = self.wallet.guard() {
            return Ok(guard);
        }
        self.wallet.connect_wallet().await?;
        self.wallet
            .guard()
            .ok_or(LedgerError::Wallet(WalletError::NotConnected))
    }

    // Writes

    /// Register the signer as `patient_id`.
    pub async fn register_patient(&self, patient_id: &PatientId) -> Result<TxReceipt, LedgerError> {
        self.write(
            ContractCall::RegisterPatient {
                patient_id: patient_id.clone(),
            },
            None,
        )
        .await
    }

    /// Grant `doctor` access to the signer's records.
    pub async fn authorize_doctor(&self, doctor: &Address) -> Result<TxReceipt, LedgerError> {
        self.write(ContractCall::AuthorizeDoctor { doctor: *doctor }, None)
            .await
    }

    /// Revoke `doctor`'s access to the signer's records.
    pub async fn revoke_doctor(&self, doctor: &Address) -> Result<TxReceipt, LedgerError> {
        self.write(ContractCall::RevokeDoctor { doctor: *doctor }, None)
            .await
    }

    /// Anchor a stored payload as a new record.
    pub async fn add_patient_record(
        &self,
        content: &StoredContent,
        draft: RecordDraft,
    ) -> Result<TxReceipt, LedgerError> {
        self.write(
            ContractCall::AddPatientRecord {
                content_hash: content.hash().clone(),
                draft,
            },
            None,
        )
        .await
    }

    /// Replace record `record_index` with a newly stored payload.
    pub async fn update_patient_record(
        &self,
        record_index: u64,
        content: &StoredContent,
        draft: RecordDraft,
    ) -> Result<TxReceipt, LedgerError> {
        self.write(
            ContractCall::UpdatePatientRecord {
                record_index,
                content_hash: content.hash().clone(),
                draft,
            },
            None,
        )
        .await
    }

    /// Record a patient's approval of `document_id`.
    ///
    /// The connected signer must be `expected_patient`; otherwise this fails
    /// with `IdentityMismatch` without touching the ledger.
    pub async fn approve_document(
        &self,
        document_id: &DocumentId,
        expected_patient: &Address,
    ) -> Result<TxReceipt, LedgerError> {
        self.write(
            ContractCall::ApproveDocument {
                document_id: document_id.to_string(),
            },
            Some(*expected_patient),
        )
        .await
    }

    async fn write(
        &self,
        call: ContractCall,
        expected_signer: Option<Address>,
    ) -> Result<TxReceipt, LedgerError> {
        let function = call.function_name();
        let guard = self.ensure_wallet_connected().await?;
        let from = guard.address();

        if let Some(expected) = expected_signer {
            if expected != from {
                warn!(function, expected = %expected, actual = %from, "Signer identity mismatch");
                return Err(LedgerError::IdentityMismatch {
                    expected,
                    actual: from,
                });
            }
        }
        if let Some(expected) = self.settings.expected_chain_id {
            if guard.chain_id() != Some(expected) {
                warn!(
                    function,
                    expected = %expected,
                    actual = ?guard.chain_id(),
                    "Signer on wrong chain"
                );
                return Err(LedgerError::WrongChain {
                    expected,
                    actual: guard.chain_id(),
                });
            }
        }

        let estimate = self
            .ledger
            .estimate(&from, &call)
            .await
            .map_err(|raw| {
                warn!(function, error = %raw, "Cost simulation failed; not submitting");
                LedgerError::from_estimate(raw)
            })?;
        let limit = cost_limit(estimate, self.settings.cost_margin_percent);

        self.wallet.ensure_current(&guard)?;

        let transaction_id = self
            .ledger
            .submit(&from, &call, limit)
            .await
            .map_err(LedgerError::from_provider)?;
        debug!(
            function,
            estimate,
            limit,
            transaction = %transaction_id,
            "Transaction submitted"
        );

        let receipt = self.ledger.confirm(&transaction_id).await.map_err(|raw| {
            error!(
                function,
                transaction = %transaction_id,
                error = %raw,
                "Submitted transaction could not be confirmed"
            );
            LedgerError::ConfirmationFailed {
                transaction_id: transaction_id.clone(),
                message: raw.message,
            }
        })?;
        if !receipt.succeeded {
            warn!(function, transaction = %transaction_id, "Transaction reverted");
            return Err(LedgerError::TransactionReverted { transaction_id });
        }

        info!(
            function,
            transaction = %receipt.transaction_id,
            block = receipt.block_number,
            "Transaction confirmed"
        );
        Ok(receipt)
    }

    // Reads

    /// Record `index` of `patient`.
    pub async fn get_patient_record(
        &self,
        patient: &Address,
        index: u64,
    ) -> Result<LedgerRecord, LedgerError> {
        let query = ContractQuery::PatientRecord {
            patient: *patient,
            index,
        };
        match self.read(&query).await? {
            QueryResponse::Record(record) => Ok(record),
            other => Err(unexpected(&query, &other)),
        }
    }

    /// Validity flag of record `index` of `patient`.
    pub async fn verify_record(&self, patient: &Address, index: u64) -> Result<bool, LedgerError> {
        let query = ContractQuery::VerifyRecord {
            patient: *patient,
            index,
        };
        match self.read(&query).await? {
            QueryResponse::Flag(valid) => Ok(valid),
            other => Err(unexpected(&query, &other)),
        }
    }

    /// Number of records anchored for `patient`.
    pub async fn get_record_count(&self, patient: &Address) -> Result<u64, LedgerError> {
        let query = ContractQuery::RecordCount { patient: *patient };
        match self.read(&query).await? {
            QueryResponse::Count(count) => Ok(count),
            other => Err(unexpected(&query, &other)),
        }
    }

    /// Doctors `patient` has authorised.
    pub async fn get_authorized_doctors(
        &self,
        patient: &Address,
    ) -> Result<Vec<Address>, LedgerError> {
        let query = ContractQuery::AuthorizedDoctors { patient: *patient };
        match self.read(&query).await? {
            QueryResponse::Addresses(doctors) => Ok(doctors),
            other => Err(unexpected(&query, &other)),
        }
    }

    /// Whether `doctor` may write `patient`'s records.
    pub async fn is_doctor_authorized(
        &self,
        patient: &Address,
        doctor: &Address,
    ) -> Result<bool, LedgerError> {
        let query = ContractQuery::IsDoctorAuthorized {
            patient: *patient,
            doctor: *doctor,
        };
        match self.read(&query).await? {
            QueryResponse::Flag(authorized) => Ok(authorized),
            other => Err(unexpected(&query, &other)),
        }
    }

    /// Every record anchored for `patient`.
    pub async fn get_patient_records(
        &self,
        patient: &Address,
    ) -> Result<Vec<LedgerRecord>, LedgerError> {
        let query = ContractQuery::PatientRecords { patient: *patient };
        match self.read(&query).await? {
            QueryResponse::Records(records) => Ok(records),
            other => Err(unexpected(&query, &other)),
        }
    }

    async fn read(&self, query: &ContractQuery) -> Result<QueryResponse, LedgerError> {
        self.ledger.query(query).await.map_err(|raw| {
            debug!(function = query.function_name(), error = %raw, "Ledger query failed");
            LedgerError::from_provider(raw)
        })
    }
}

fn unexpected(query: &ContractQuery, got: &QueryResponse) -> LedgerError {
    LedgerError::UnexpectedResponse {
        function: query.function_name().to_string(),
        got: got.kind().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cost_limit_rounds_up() {
        assert_eq!(cost_limit(100, 20), 120);
        assert_eq!(cost_limit(101, 20), 122);
        assert_eq!(cost_limit(0, 20), 0);
        assert_eq!(cost_limit(63_000, 0), 63_000);
        assert_eq!(cost_limit(u64::MAX, 20), u64::MAX);
    }

    proptest! {
        #[test]
        fn prop_cost_limit_covers_margin(estimate in 0u64..=u64::MAX / 2, margin in 0u64..=500) {
            let limit = cost_limit(estimate, margin);
            let exact = u128::from(estimate) * (100 + u128::from(margin));
            prop_assert!(u128::from(limit) * 100 >= exact);
            prop_assert!(u128::from(limit) * 100 < exact + 100);
            prop_assert!(limit >= estimate);
        }
    }
}
