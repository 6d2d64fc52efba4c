//! Reusable identities, uploads and record payloads.

use medchain_core::{Address, FileUpload, NewDocument, PatientId, RecordDraft};
use serde_json::{json, Value};

/// Patient wallet.
pub const PATIENT_ADDRESS: &str = "0xa11ce00000000000000000000000000000000001";
/// Doctor / lab wallet.
pub const DOCTOR_ADDRESS: &str = "0xd0c0000000000000000000000000000000000002";
/// A wallet bound to nobody.
pub const STRANGER_ADDRESS: &str = "0x5742a00000000000000000000000000000000003";

/// Patient id used by the fixtures.
pub const PATIENT_ID: &str = "patient-001";

/// First 8 bytes of every PNG file.
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

fn address(raw: &str) -> Address {
    Address::parse(raw).unwrap()
}

/// The patient's address.
pub fn patient_address() -> Address {
    address(PATIENT_ADDRESS)
}

/// The doctor's address.
pub fn doctor_address() -> Address {
    address(DOCTOR_ADDRESS)
}

/// An address unrelated to the patient.
pub fn stranger_address() -> Address {
    address(STRANGER_ADDRESS)
}

/// The fixture patient.
pub fn patient_id() -> PatientId {
    PatientId::new(PATIENT_ID)
}

/// A chest X-ray uploaded by the doctor for the fixture patient.
pub fn xray_upload() -> NewDocument {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(b"chest-pa-view");
    NewDocument {
        patient_id: patient_id(),
        appointment_id: Some("appt-42".to_string()),
        uploader: doctor_address(),
        description: "Chest X-ray, PA view".to_string(),
        file: FileUpload::new("xray.png", "image/png", bytes),
    }
}

/// A lab-result draft for the fixture patient.
pub fn lab_result_draft() -> RecordDraft {
    RecordDraft {
        patient_id: patient_id(),
        record_type: "lab-result".to_string(),
        diagnosis: "Iron deficiency anaemia".to_string(),
        notes: "Repeat CBC in 6 weeks".to_string(),
    }
}

/// Structured payload stored alongside [`lab_result_draft`].
pub fn lab_result_payload() -> Value {
    json!({
        "panel": "CBC",
        "haemoglobin_g_dl": 10.9,
        "ferritin_ng_ml": 8,
        "collected": "2024-03-04",
    })
}
