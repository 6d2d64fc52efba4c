//! Sandbox anchoring contract
//!
//! An in-process model of the patient-records contract. It enforces the same
//! preconditions the deployed contract does (registration, doctor
//! authorisation, single approval per document) so estimation fails exactly
//! where a real node would refuse to simulate the call.

use async_trait::async_trait;
use medchain_core::effects::LedgerEffects;
use medchain_core::{
    Address, ContractCall, ContractCoordinates, ContractQuery, LedgerRecord, PatientId,
    QueryResponse, RawProviderError, TransactionId, TxReceipt,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_INTERVAL_SECS: u64 = 12;
const SANDBOX_CONTRACT_ADDRESS: [u8; 20] = [
    0x5f, 0xbd, 0xb2, 0x31, 0x56, 0x78, 0xaf, 0xec, 0xb3, 0x67, 0xf0, 0x32, 0xd9, 0x3f, 0x64,
    0x2f, 0x64, 0x18, 0x0a, 0xa3,
];

/// ABI of the anchoring contract: every call and query the gateway issues,
/// plus the events the contract emits.
pub fn sandbox_contract_abi() -> Value {
    let function = |name: &str, mutability: &str| {
        json!({ "type": "function", "name": name, "stateMutability": mutability })
    };
    json!([
        function("registerPatient", "nonpayable"),
        function("authorizeDoctor", "nonpayable"),
        function("revokeDoctor", "nonpayable"),
        function("addPatientRecord", "nonpayable"),
        function("updatePatientRecord", "nonpayable"),
        function("approveDocument", "nonpayable"),
        function("getPatientRecord", "view"),
        function("verifyRecord", "view"),
        function("getRecordCount", "view"),
        function("getAuthorizedDoctors", "view"),
        function("isDoctorAuthorized", "view"),
        function("getPatientRecords", "view"),
        { "type": "event", "name": "PatientRegistered" },
        { "type": "event", "name": "DocumentApproved" },
        { "type": "event", "name": "RecordAdded" },
    ])
}

/// Ledger operation targeted by an injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    /// `bind`
    Bind,
    /// `estimate`
    Estimate,
    /// `submit`
    Submit,
    /// `confirm`
    Confirm,
    /// `query`
    Query,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    error: RawProviderError,
    persistent: bool,
}

#[derive(Debug, Default)]
struct ContractState {
    bound: Option<Address>,
    patients: HashMap<Address, PatientId>,
    doctors: HashMap<Address, Vec<Address>>,
    records: HashMap<Address, Vec<LedgerRecord>>,
    approved_documents: HashMap<String, Address>,
    receipts: HashMap<TransactionId, TxReceipt>,
    block: u64,
    nonce: u64,
}

impl ContractState {
    fn patient_address(&self, patient_id: &PatientId) -> Option<Address> {
        self.patients
            .iter()
            .find_map(|(address, id)| (id == patient_id).then_some(*address))
    }

    fn may_write_records(&self, caller: &Address, patient: &Address) -> bool {
        caller == patient
            || self
                .doctors
                .get(patient)
                .is_some_and(|doctors| doctors.contains(caller))
    }

    /// Check `call` against the contract's preconditions.
    fn check(&self, from: &Address, call: &ContractCall) -> Result<(), String> {
        match call {
            ContractCall::RegisterPatient { .. } => {
                if self.patients.contains_key(from) {
                    return Err("patient already registered".to_string());
                }
            }
            ContractCall::AuthorizeDoctor { doctor } => {
                if !self.patients.contains_key(from) {
                    return Err("caller is not a registered patient".to_string());
                }
                if doctor == from {
                    return Err("patient cannot authorize themselves".to_string());
                }
                if self
                    .doctors
                    .get(from)
                    .is_some_and(|doctors| doctors.contains(doctor))
                {
                    return Err("doctor already authorized".to_string());
                }
            }
            ContractCall::RevokeDoctor { doctor } => {
                if !self.patients.contains_key(from) {
                    return Err("caller is not a registered patient".to_string());
                }
                if !self
                    .doctors
                    .get(from)
                    .is_some_and(|doctors| doctors.contains(doctor))
                {
                    return Err("doctor not authorized".to_string());
                }
            }
            ContractCall::AddPatientRecord { draft, .. } => {
                let patient = self
                    .patient_address(&draft.patient_id)
                    .ok_or_else(|| "patient not registered".to_string())?;
                if !self.may_write_records(from, &patient) {
                    return Err("caller not authorized for patient records".to_string());
                }
            }
            ContractCall::UpdatePatientRecord {
                record_index,
                draft,
                ..
            } => {
                let patient = self
                    .patient_address(&draft.patient_id)
                    .ok_or_else(|| "patient not registered".to_string())?;
                if !self.may_write_records(from, &patient) {
                    return Err("caller not authorized for patient records".to_string());
                }
                let count = self.records.get(&patient).map_or(0, Vec::len) as u64;
                if *record_index >= count {
                    return Err("record index out of bounds".to_string());
                }
            }
            ContractCall::ApproveDocument { document_id } => {
                if document_id.trim().is_empty() {
                    return Err("document id required".to_string());
                }
                if self.approved_documents.contains_key(document_id) {
                    return Err("document already approved".to_string());
                }
            }
        }
        Ok(())
    }

    /// Apply a call that already passed [`ContractState::check`].
    fn apply(&mut self, from: &Address, call: &ContractCall, timestamp: u64) {
        match call {
            ContractCall::RegisterPatient { patient_id } => {
                self.patients.insert(*from, patient_id.clone());
            }
            ContractCall::AuthorizeDoctor { doctor } => {
                self.doctors.entry(*from).or_default().push(*doctor);
            }
            ContractCall::RevokeDoctor { doctor } => {
                if let Some(doctors) = self.doctors.get_mut(from) {
                    doctors.retain(|d| d != doctor);
                }
            }
            ContractCall::AddPatientRecord {
                content_hash,
                draft,
            } => {
                if let Some(patient) = self.patient_address(&draft.patient_id) {
                    self.records.entry(patient).or_default().push(LedgerRecord {
                        patient_id: draft.patient_id.clone(),
                        content_hash: content_hash.clone(),
                        creator: *from,
                        timestamp,
                        record_type: draft.record_type.clone(),
                        diagnosis: draft.diagnosis.clone(),
                        notes: draft.notes.clone(),
                        is_valid: true,
                    });
                }
            }
            ContractCall::UpdatePatientRecord {
                record_index,
                content_hash,
                draft,
            } => {
                let patient = self.patient_address(&draft.patient_id);
                let record = patient
                    .and_then(|p| self.records.get_mut(&p))
                    .and_then(|records| records.get_mut(*record_index as usize));
                if let Some(record) = record {
                    record.content_hash = content_hash.clone();
                    record.creator = *from;
                    record.timestamp = timestamp;
                    record.record_type = draft.record_type.clone();
                    record.diagnosis = draft.diagnosis.clone();
                    record.notes = draft.notes.clone();
                }
            }
            ContractCall::ApproveDocument { document_id } => {
                self.approved_documents.insert(document_id.clone(), *from);
            }
        }
    }
}

fn cost_of(call: &ContractCall) -> u64 {
    match call {
        ContractCall::RegisterPatient { .. } => 92_000,
        ContractCall::AuthorizeDoctor { .. } => 51_000,
        ContractCall::RevokeDoctor { .. } => 29_000,
        ContractCall::AddPatientRecord { draft, .. } => {
            180_000 + 16 * (draft.diagnosis.len() + draft.notes.len()) as u64
        }
        ContractCall::UpdatePatientRecord { draft, .. } => {
            120_000 + 16 * (draft.diagnosis.len() + draft.notes.len()) as u64
        }
        ContractCall::ApproveDocument { .. } => 63_000,
    }
}

fn revert(reason: &str) -> RawProviderError {
    RawProviderError::with_code(3, format!("execution reverted: {reason}"))
}

/// In-process ledger.
///
/// Clones share the same contract state, so a test can keep one handle for
/// inspection while the gateway owns another.
#[derive(Debug, Clone, Default)]
pub struct SandboxLedger {
    state: Arc<Mutex<ContractState>>,
    failures: Arc<Mutex<HashMap<LedgerOp, InjectedFailure>>>,
    bind_calls: Arc<AtomicUsize>,
    estimate_calls: Arc<AtomicUsize>,
    submit_calls: Arc<AtomicUsize>,
    confirm_calls: Arc<AtomicUsize>,
    query_calls: Arc<AtomicUsize>,
    revert_next: Arc<AtomicBool>,
}

impl SandboxLedger {
    /// Fresh contract with no patients.
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinates of the sandbox deployment.
    pub fn coordinates() -> ContractCoordinates {
        ContractCoordinates {
            address: Address::from_bytes(SANDBOX_CONTRACT_ADDRESS),
            abi: sandbox_contract_abi(),
        }
    }

    /// Fail the next call to `op` with `error`.
    pub fn fail_next(&self, op: LedgerOp, error: RawProviderError) {
        self.failures.lock().insert(
            op,
            InjectedFailure {
                error,
                persistent: false,
            },
        );
    }

    /// Fail every call to `op` with `error` until cleared.
    pub fn fail_always(&self, op: LedgerOp, error: RawProviderError) {
        self.failures.lock().insert(
            op,
            InjectedFailure {
                error,
                persistent: true,
            },
        );
    }

    /// Mine the next submitted transaction with a reverted receipt, as if
    /// the contract state changed between estimation and inclusion.
    pub fn revert_next_submit(&self) {
        self.revert_next.store(true, Ordering::SeqCst);
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Register a patient without going through a transaction.
    pub fn seed_patient(&self, address: Address, patient_id: PatientId) {
        self.state.lock().patients.insert(address, patient_id);
    }

    /// Whether `address` is registered as a patient.
    pub fn is_registered(&self, address: &Address) -> bool {
        self.state.lock().patients.contains_key(address)
    }

    /// Address that approved `document_id`, if any.
    pub fn document_approver(&self, document_id: &str) -> Option<Address> {
        self.state.lock().approved_documents.get(document_id).copied()
    }

    /// Number of approved documents.
    pub fn approval_count(&self) -> usize {
        self.state.lock().approved_documents.len()
    }

    /// Records anchored for `patient`.
    pub fn records_for(&self, patient: &Address) -> Vec<LedgerRecord> {
        self.state
            .lock()
            .records
            .get(patient)
            .cloned()
            .unwrap_or_default()
    }

    /// `bind` calls so far.
    pub fn bind_calls(&self) -> usize {
        self.bind_calls.load(Ordering::SeqCst)
    }

    /// `estimate` calls so far.
    pub fn estimate_calls(&self) -> usize {
        self.estimate_calls.load(Ordering::SeqCst)
    }

    /// `submit` calls so far.
    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// `confirm` calls so far.
    pub fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    /// `query` calls so far.
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Every call that would have reached the network.
    pub fn network_calls(&self) -> usize {
        self.bind_calls()
            + self.estimate_calls()
            + self.submit_calls()
            + self.confirm_calls()
            + self.query_calls()
    }

    fn take_failure(&self, op: LedgerOp) -> Result<(), RawProviderError> {
        let mut failures = self.failures.lock();
        match failures.get(&op) {
            Some(failure) if failure.persistent => Err(failure.error.clone()),
            Some(_) => match failures.remove(&op) {
                Some(failure) => Err(failure.error),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn ensure_bound(state: &ContractState) -> Result<(), RawProviderError> {
        if state.bound.is_some() {
            Ok(())
        } else {
            Err(RawProviderError::message("contract handle is not bound"))
        }
    }
}

#[async_trait]
impl LedgerEffects for SandboxLedger {
    async fn bind(&self, coordinates: &ContractCoordinates) -> Result<(), RawProviderError> {
        self.bind_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure(LedgerOp::Bind)?;
        self.state.lock().bound = Some(coordinates.address);
        Ok(())
    }

    async fn estimate(&self, from: &Address, call: &ContractCall) -> Result<u64, RawProviderError> {
        self.estimate_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure(LedgerOp::Estimate)?;
        let state = self.state.lock();
        Self::ensure_bound(&state)?;
        state.check(from, call).map_err(|reason| {
            RawProviderError::with_symbol(
                "UNPREDICTABLE_GAS_LIMIT",
                format!(
                    "cannot estimate gas; transaction may fail or may require manual gas limit \
                     (execution reverted: {reason})"
                ),
            )
        })?;
        Ok(cost_of(call))
    }

    async fn submit(
        &self,
        from: &Address,
        call: &ContractCall,
        cost_limit: u64,
    ) -> Result<TransactionId, RawProviderError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure(LedgerOp::Submit)?;
        let mut state = self.state.lock();
        Self::ensure_bound(&state)?;

        state.nonce += 1;
        state.block += 1;
        let timestamp = GENESIS_TIMESTAMP + state.block * BLOCK_INTERVAL_SECS;

        let mut hasher = blake3::Hasher::new();
        hasher.update(&state.nonce.to_be_bytes());
        hasher.update(from.as_bytes());
        hasher.update(call.function_name().as_bytes());
        let hex_id = format!("0x{}", hasher.finalize().to_hex());
        let transaction_id = TransactionId::parse(hex_id)
            .ok_or_else(|| RawProviderError::message("empty transaction id"))?;

        let cost = cost_of(call);
        let outcome = if self.revert_next.swap(false, Ordering::SeqCst) {
            Err("state changed before inclusion".to_string())
        } else if cost > cost_limit {
            Err("out of gas".to_string())
        } else {
            state.check(from, call)
        };
        let succeeded = match outcome {
            Ok(()) => {
                state.apply(from, call, timestamp);
                true
            }
            Err(reason) => {
                debug!(
                    function = call.function_name(),
                    reason = %reason,
                    "Sandbox transaction reverted"
                );
                false
            }
        };

        let receipt = TxReceipt {
            transaction_id: transaction_id.clone(),
            block_number: state.block,
            timestamp,
            succeeded,
            cost_used: if succeeded { cost } else { cost_limit },
        };
        state.receipts.insert(transaction_id.clone(), receipt);
        Ok(transaction_id)
    }

    async fn confirm(&self, transaction: &TransactionId) -> Result<TxReceipt, RawProviderError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure(LedgerOp::Confirm)?;
        self.state
            .lock()
            .receipts
            .get(transaction)
            .cloned()
            .ok_or_else(|| {
                RawProviderError::message(format!("transaction {transaction} not found"))
            })
    }

    async fn query(&self, query: &ContractQuery) -> Result<QueryResponse, RawProviderError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure(LedgerOp::Query)?;
        let state = self.state.lock();
        Self::ensure_bound(&state)?;

        let records_of =
            |patient: &Address| state.records.get(patient).cloned().unwrap_or_default();
        let response = match query {
            ContractQuery::PatientRecord { patient, index } => records_of(patient)
                .get(*index as usize)
                .cloned()
                .map(QueryResponse::Record)
                .ok_or_else(|| revert("record index out of bounds"))?,
            ContractQuery::VerifyRecord { patient, index } => records_of(patient)
                .get(*index as usize)
                .map(|record| QueryResponse::Flag(record.is_valid))
                .ok_or_else(|| revert("record index out of bounds"))?,
            ContractQuery::RecordCount { patient } => {
                QueryResponse::Count(records_of(patient).len() as u64)
            }
            ContractQuery::AuthorizedDoctors { patient } => {
                QueryResponse::Addresses(state.doctors.get(patient).cloned().unwrap_or_default())
            }
            ContractQuery::IsDoctorAuthorized { patient, doctor } => QueryResponse::Flag(
                state
                    .doctors
                    .get(patient)
                    .is_some_and(|doctors| doctors.contains(doctor)),
            ),
            ContractQuery::PatientRecords { patient } => {
                QueryResponse::Records(records_of(patient))
            }
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medchain_core::{ContentHash, ProviderErrorKind, RecordDraft};

    fn patient() -> Address {
        Address::from_bytes([0x01; 20])
    }

    fn doctor() -> Address {
        Address::from_bytes([0x02; 20])
    }

    async fn bound_ledger() -> SandboxLedger {
        let ledger = SandboxLedger::new();
        ledger.bind(&SandboxLedger::coordinates()).await.unwrap();
        ledger
    }

    fn draft() -> RecordDraft {
        RecordDraft {
            patient_id: PatientId::new("patient-1"),
            record_type: "lab-result".to_string(),
            diagnosis: "healthy".to_string(),
            notes: String::new(),
        }
    }

    #[test]
    fn test_abi_declares_every_call_and_query() {
        let coordinates = SandboxLedger::coordinates();
        for name in [
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
        ] {
            assert!(coordinates.declares_function(name), "missing {name}");
        }
    }

    #[tokio::test]
    async fn test_duplicate_approval_fails_estimation() {
        let ledger = bound_ledger().await;
        let call = ContractCall::ApproveDocument {
            document_id: "doc-1".to_string(),
        };
        let cost = ledger.estimate(&patient(), &call).await.unwrap();
        let tx = ledger.submit(&patient(), &call, cost).await.unwrap();
        assert!(ledger.confirm(&tx).await.unwrap().succeeded);

        let err = ledger.estimate(&patient(), &call).await.unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::UnpredictableCost);
        assert_eq!(ledger.document_approver("doc-1"), Some(patient()));
    }

    #[tokio::test]
    async fn test_low_cost_limit_mines_reverted_receipt() {
        let ledger = bound_ledger().await;
        let call = ContractCall::RegisterPatient {
            patient_id: PatientId::new("patient-1"),
        };
        let tx = ledger.submit(&patient(), &call, 10).await.unwrap();
        let receipt = ledger.confirm(&tx).await.unwrap();
        assert!(!receipt.succeeded);
        assert!(!ledger.is_registered(&patient()));
    }

    #[tokio::test]
    async fn test_forced_revert_applies_to_one_submit() {
        let ledger = bound_ledger().await;
        let call = ContractCall::RegisterPatient {
            patient_id: PatientId::new("patient-1"),
        };
        ledger.revert_next_submit();
        let tx = ledger.submit(&patient(), &call, 1_000_000).await.unwrap();
        assert!(!ledger.confirm(&tx).await.unwrap().succeeded);
        assert!(!ledger.is_registered(&patient()));

        let tx = ledger.submit(&patient(), &call, 1_000_000).await.unwrap();
        assert!(ledger.confirm(&tx).await.unwrap().succeeded);
        assert!(ledger.is_registered(&patient()));
    }

    #[tokio::test]
    async fn test_authorized_doctor_may_add_records() {
        let ledger = bound_ledger().await;
        ledger.seed_patient(patient(), PatientId::new("patient-1"));
        let add = ContractCall::AddPatientRecord {
            content_hash: ContentHash::parse("bafy-record").unwrap(),
            draft: draft(),
        };
        assert!(ledger.estimate(&doctor(), &add).await.is_err());

        let authorize = ContractCall::AuthorizeDoctor { doctor: doctor() };
        let tx = ledger.submit(&patient(), &authorize, 1_000_000).await.unwrap();
        assert!(ledger.confirm(&tx).await.unwrap().succeeded);

        let tx = ledger.submit(&doctor(), &add, 1_000_000).await.unwrap();
        assert!(ledger.confirm(&tx).await.unwrap().succeeded);
        assert_eq!(ledger.records_for(&patient()).len(), 1);

        let count = ledger
            .query(&ContractQuery::RecordCount { patient: patient() })
            .await
            .unwrap();
        assert_eq!(count, QueryResponse::Count(1));
    }

    #[tokio::test]
    async fn test_unbound_ledger_refuses_queries() {
        let ledger = SandboxLedger::new();
        let result = ledger
            .query(&ContractQuery::RecordCount { patient: patient() })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let ledger = bound_ledger().await;
        let call = ContractCall::RegisterPatient {
            patient_id: PatientId::new("patient-1"),
        };
        ledger.fail_next(
            LedgerOp::Estimate,
            RawProviderError::with_symbol("NETWORK_ERROR", "could not detect network"),
        );
        assert!(ledger.estimate(&patient(), &call).await.is_err());
        assert!(ledger.estimate(&patient(), &call).await.is_ok());

        ledger.fail_always(LedgerOp::Submit, RawProviderError::message("boom"));
        assert!(ledger.submit(&patient(), &call, 1_000_000).await.is_err());
        assert!(ledger.submit(&patient(), &call, 1_000_000).await.is_err());
        ledger.clear_failures();
        assert!(ledger.submit(&patient(), &call, 1_000_000).await.is_ok());
    }
}
