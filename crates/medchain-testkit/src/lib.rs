//! MedChain Testing Infrastructure
//!
//! Fixtures and a fully wired sandbox ([`TestHarness`]) for integration
//! tests of the feature crates.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! ```rust,no_run
//! use medchain_testkit::*;
//!
//! # async fn demo() {
//! let harness = TestHarness::new(&patient_address()).await;
//! harness.bind_patient(&patient_id(), patient_address()).await;
//! let coordinator = harness.coordinator().await;
//! let document = coordinator.submit_document(xray_upload()).await.unwrap();
//! coordinator.approve(&document.id).await.unwrap();
//! # }
//! ```

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;

/// Route `tracing` output to the test writer. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("medchain=debug,warn"))
        .with_test_writer()
        .try_init();
}
