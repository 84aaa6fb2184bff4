//! Ingest pipeline for Temple.
//!
//! Submissions are persisted as [`IngestItem`](temple_core::ingest::IngestItem)s,
//! enriched in the background by the [`EnrichmentWorker`] and, when the
//! extractor is unsure, parked for human review in the [`ReviewQueue`].

pub mod policy;
pub mod store;
pub mod worker;
pub mod review;

pub use policy::{Band, ConfidencePolicy, PolicyPlan};
pub use store::{derive_idempotency_key, validate_item_type, FileIngestStore, LoadReport, SubmitOutcome};
pub use worker::EnrichmentWorker;
pub use review::ReviewQueue;
