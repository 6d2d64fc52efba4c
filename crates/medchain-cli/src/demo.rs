//! Upload, approve and anchor against the sandbox, printing what a UI would
//! receive at each step.

use crate::app::App;
use anyhow::Result;
use medchain_approval::{Role, UploadOutcome};
use medchain_core::{Address, FileUpload, MedchainConfig, NewDocument, PatientId, RecordDraft};
use serde::Serialize;
use serde_json::json;
use tracing::info;

const PATIENT: &str = "0xa11ce00000000000000000000000000000000001";
const LAB: &str = "0x1ab0000000000000000000000000000000000002";

fn print_step<T: Serialize>(step: &str, value: &T) -> Result<()> {
    println!("== {step}");
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the demo flow.
pub async fn run(config: MedchainConfig) -> Result<()> {
    let patient = Address::parse(PATIENT)?;
    let lab = Address::parse(LAB)?;
    let patient_id = PatientId::new("patient-001");

    let app = App::sandbox(config, &patient).await?;
    app.backend.bind_patient(patient_id.clone(), patient).await;
    let coordinator = &app.coordinator;

    print_step("connect", &coordinator.connect().await)?;

    let registration = coordinator.gateway().register_patient(&patient_id).await?;
    info!(transaction = %registration.transaction_id, "Patient registered on the ledger");

    let xray = FileUpload::new("xray.png", "image/png", b"\x89PNG\r\n\x1a\nchest-pa".to_vec());
    let stored = coordinator.store().upload_file(&xray).await?;
    print_step("upload", &UploadOutcome::from(&stored))?;
    println!("   retrieval: {}", coordinator.store().gateway_url(stored.hash()));

    let document = coordinator
        .submit_document(NewDocument {
            patient_id: patient_id.clone(),
            appointment_id: Some("appt-42".to_string()),
            uploader: lab,
            description: "Chest X-ray, PA view".to_string(),
            file: xray,
        })
        .await?;
    print_step("submitted", &document)?;

    print_step("approve", &coordinator.approve_outcome(&document.id).await)?;
    print_step("approve again", &coordinator.approve_outcome(&document.id).await)?;

    let anchored = coordinator
        .anchor_medical_record(
            RecordDraft {
                patient_id: patient_id.clone(),
                record_type: "imaging".to_string(),
                diagnosis: "No acute findings".to_string(),
                notes: "Follow up only if symptomatic".to_string(),
            },
            &json!({ "document": document.id, "modality": "XR", "view": "PA" }),
        )
        .await?;
    print_step("record", &anchored.workflow)?;

    let record_count = coordinator.gateway().get_record_count(&patient).await?;
    let verified = coordinator.gateway().verify_record(&patient, 0).await?;
    print_step(
        "ledger",
        &json!({
            "records": record_count,
            "firstRecordValid": verified,
            "approvals": app.ledger.approval_count(),
        }),
    )?;

    print_step("feed", &coordinator.feed_for(&Role::Patient(patient_id)).await?)?;
    print_step("disconnect", &coordinator.disconnect().await)?;
    info!(provider_prompts = app.provider.request_calls(), "Demo finished");
    Ok(())
}
