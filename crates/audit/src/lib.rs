//! Audit trail for Temple.
//!
//! Provides:
//! - **AuditLogger**: fans entries out to sinks, keeps a short in-memory tail
//! - **JsonlAuditSink**: append-only JSONL file per scope with read and compaction
//! - **TracingSink**: mirrors entries into the tracing log

pub mod audit;
pub mod jsonl;

pub use audit::{AuditAction, AuditEntry, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use jsonl::{AuditError, JsonlAuditSink};
