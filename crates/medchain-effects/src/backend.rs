//! In-memory backend persistence.

use crate::time::SystemClock;
use async_trait::async_trait;
use medchain_core::effects::{BackendEffects, DocumentFilter, PhysicalTimeEffects};
use medchain_core::{
    Address, ApprovalStamp, ApprovalableDocument, BackendError, ContractCoordinates, DocumentId,
    DocumentStatus, FileReference, NewDocument, PatientId, PatientIdentityBinding, RecordWorkflow,
    RecordWorkflowId, WorkflowStage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct BackendState {
    coordinates: Option<ContractCoordinates>,
    documents: HashMap<DocumentId, ApprovalableDocument>,
    files: HashMap<DocumentId, Vec<u8>>,
    bindings: HashMap<PatientId, Address>,
    workflows: HashMap<RecordWorkflowId, RecordWorkflow>,
}

#[derive(Debug, Default)]
struct FaultSwitches {
    unavailable: AtomicBool,
    approvals: AtomicBool,
    stage_writes: AtomicBool,
    workflow_saves: AtomicBool,
}

/// Backend held in process memory.
///
/// Status transitions happen under one write lock, so at most one of several
/// racing `approve_document` / `reject_document` calls can succeed. Individual
/// write paths can be switched to fail for saga tests.
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<RwLock<BackendState>>,
    faults: Arc<FaultSwitches>,
    coordinates_calls: Arc<AtomicUsize>,
    approve_calls: Arc<AtomicUsize>,
    clock: Arc<dyn PhysicalTimeEffects>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("coordinates_calls", &self.coordinates_calls)
            .field("approve_calls", &self.approve_calls)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty backend stamped by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty backend stamped by `clock`.
    pub fn with_clock(clock: Arc<dyn PhysicalTimeEffects>) -> Self {
        Self {
            state: Arc::new(RwLock::new(BackendState::default())),
            faults: Arc::new(FaultSwitches::default()),
            coordinates_calls: Arc::new(AtomicUsize::new(0)),
            approve_calls: Arc::new(AtomicUsize::new(0)),
            clock,
        }
    }

    /// Serve `coordinates` as the deployed contract.
    pub async fn set_coordinates(&self, coordinates: ContractCoordinates) {
        self.state.write().await.coordinates = Some(coordinates);
    }

    /// Bind `patient_id` to `address`.
    pub async fn bind_patient(&self, patient_id: PatientId, address: Address) {
        self.state.write().await.bindings.insert(patient_id, address);
    }

    /// Make every call fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `approve_document` fail with `Unavailable`.
    pub fn fail_approvals(&self, fail: bool) {
        self.faults.approvals.store(fail, Ordering::SeqCst);
    }

    /// Make `set_document_stage` fail with `Unavailable`.
    pub fn fail_stage_writes(&self, fail: bool) {
        self.faults.stage_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `save_record_workflow` fail with `Unavailable`.
    pub fn fail_workflow_saves(&self, fail: bool) {
        self.faults.workflow_saves.store(fail, Ordering::SeqCst);
    }

    /// `contract_coordinates` calls so far.
    pub fn coordinates_calls(&self) -> usize {
        self.coordinates_calls.load(Ordering::SeqCst)
    }

    /// `approve_document` calls so far, including refused ones.
    pub fn approve_calls(&self) -> usize {
        self.approve_calls.load(Ordering::SeqCst)
    }

    /// Bytes of an uploaded file.
    pub async fn file_bytes(&self, id: &DocumentId) -> Option<Vec<u8>> {
        self.state.read().await.files.get(id).cloned()
    }

    /// A saved record workflow.
    pub async fn workflow(&self, id: &RecordWorkflowId) -> Option<RecordWorkflow> {
        self.state.read().await.workflows.get(id).cloned()
    }

    /// Every saved record workflow.
    pub async fn workflows(&self) -> Vec<RecordWorkflow> {
        self.state.read().await.workflows.values().cloned().collect()
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            Err(BackendError::unavailable("backend is not reachable"))
        } else {
            Ok(())
        }
    }

    fn check_switch(switch: &AtomicBool, what: &str) -> Result<(), BackendError> {
        if switch.load(Ordering::SeqCst) {
            Err(BackendError::unavailable(format!("{what} write failed")))
        } else {
            Ok(())
        }
    }

    fn pending_mut<'a>(
        state: &'a mut BackendState,
        id: &DocumentId,
        next: DocumentStatus,
    ) -> Result<&'a mut ApprovalableDocument, BackendError> {
        let document = state
            .documents
            .get_mut(id)
            .ok_or_else(|| BackendError::not_found(format!("document {id}")))?;
        if !document.status.can_transition_to(next) {
            return Err(BackendError::invalid_transition(format!(
                "document {id} is {:?}",
                document.status
            )));
        }
        Ok(document)
    }
}

#[async_trait]
impl BackendEffects for MemoryBackend {
    async fn contract_coordinates(&self) -> Result<ContractCoordinates, BackendError> {
        self.coordinates_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.state
            .read()
            .await
            .coordinates
            .clone()
            .ok_or_else(|| BackendError::not_found("contract coordinates"))
    }

    async fn create_document(
        &self,
        document: NewDocument,
    ) -> Result<ApprovalableDocument, BackendError> {
        self.check_available()?;
        let id = DocumentId::new();
        let created_at_ms = self.clock.now_ms().await;
        let file = FileReference {
            uri: format!("memory://documents/{id}/{}", document.file.name),
            file_name: document.file.name.clone(),
            content_type: document.file.content_type.clone(),
            size: document.file.bytes.len() as u64,
        };
        let stored = ApprovalableDocument {
            id,
            patient_id: document.patient_id,
            appointment_id: document.appointment_id,
            uploader: document.uploader,
            description: document.description,
            file,
            status: DocumentStatus::Pending,
            approval: None,
            stage: WorkflowStage::AwaitingApproval,
            created_at_ms,
        };

        let mut state = self.state.write().await;
        state.files.insert(id, document.file.bytes);
        state.documents.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_document(&self, id: &DocumentId) -> Result<ApprovalableDocument, BackendError> {
        self.check_available()?;
        self.state
            .read()
            .await
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::not_found(format!("document {id}")))
    }

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
    ) -> Result<Vec<ApprovalableDocument>, BackendError> {
        self.check_available()?;
        let mut documents: Vec<_> = self
            .state
            .read()
            .await
            .documents
            .values()
            .filter(|document| filter.matches(document))
            .cloned()
            .collect();
        documents.sort_by_key(|document| (document.created_at_ms, document.id.0));
        Ok(documents)
    }

    async fn set_document_stage(
        &self,
        id: &DocumentId,
        expected: &WorkflowStage,
        stage: WorkflowStage,
    ) -> Result<(), BackendError> {
        self.check_available()?;
        Self::check_switch(&self.faults.stage_writes, "stage")?;
        let mut state = self.state.write().await;
        let document = state
            .documents
            .get_mut(id)
            .ok_or_else(|| BackendError::not_found(format!("document {id}")))?;
        if document.status.is_final() {
            return Err(BackendError::invalid_transition(format!(
                "document {id} is already {:?}",
                document.status
            )));
        }
        if document.stage != *expected {
            return Err(BackendError::invalid_transition(format!(
                "document {id} is at stage {:?}, expected {expected:?}",
                document.stage
            )));
        }
        document.stage = stage;
        Ok(())
    }

    async fn approve_document(
        &self,
        id: &DocumentId,
        stamp: ApprovalStamp,
    ) -> Result<ApprovalableDocument, BackendError> {
        self.approve_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Self::check_switch(&self.faults.approvals, "approval")?;
        let mut state = self.state.write().await;
        let document = Self::pending_mut(&mut state, id, DocumentStatus::Approved)?;
        document.status = DocumentStatus::Approved;
        document.approval = Some(stamp);
        document.stage = WorkflowStage::Completed;
        Ok(document.clone())
    }

    async fn reject_document(&self, id: &DocumentId) -> Result<ApprovalableDocument, BackendError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let document = Self::pending_mut(&mut state, id, DocumentStatus::Rejected)?;
        if document.stage != WorkflowStage::AwaitingApproval {
            return Err(BackendError::invalid_transition(format!(
                "document {id} is at stage {:?}",
                document.stage
            )));
        }
        document.status = DocumentStatus::Rejected;
        Ok(document.clone())
    }

    async fn patient_binding(
        &self,
        patient_id: &PatientId,
    ) -> Result<Option<PatientIdentityBinding>, BackendError> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .bindings
            .get(patient_id)
            .map(|address| PatientIdentityBinding {
                patient_id: patient_id.clone(),
                address: *address,
            }))
    }

    async fn save_record_workflow(&self, workflow: &RecordWorkflow) -> Result<(), BackendError> {
        self.check_available()?;
        Self::check_switch(&self.faults.workflow_saves, "record workflow")?;
        self.state
            .write()
            .await
            .workflows
            .insert(workflow.id, workflow.clone());
        Ok(())
    }
}
