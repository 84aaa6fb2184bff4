//! Error types for the Temple domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Temple operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Scope errors ---
    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Graph errors ---
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    // --- Extraction errors ---
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    // --- Ingest errors ---
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Invalid or inactive scope. Always surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("Invalid scope '{0}': expected 'global', 'project:<name>' or 'session:<id>'")]
    Invalid(String),

    #[error("Scope '{scope}' is not active for this context")]
    Inactive { scope: String },

    #[error("Session '{id}' has expired")]
    Expired { id: String },
}

#[derive(Debug, Error)]
pub enum MemoryError {
    /// Content with the same hash already lives in the partition.
    #[error("Duplicate content {hash} in {partition}")]
    DuplicateContent { partition: String, hash: String },

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Memory content is empty")]
    EmptyContent,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum GraphError {
    /// A relation references an entity that does not exist at commit time.
    #[error("Graph write conflict: entity '{entity}' missing in {scope}")]
    WriteConflict { entity: String, scope: String },

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("Extraction backend {backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("Extraction backend {backend} timed out after {timeout_secs}s")]
    Timeout { backend: String, timeout_secs: u64 },

    #[error("Extraction backend not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid extraction response: {0}")]
    InvalidResponse(String),

    #[error("All extraction backends failed. Last error: {0}")]
    AllFailed(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// The same idempotency key was reused with a different payload.
    #[error("Idempotency key '{key}' already used for item {item_id} with a different payload")]
    IdempotencyConflict { key: String, item_id: String },

    /// A persisted record could not be read back.
    #[error("Corrupted ingest record {path}: {reason}")]
    StateCorruption { path: String, reason: String },

    #[error("Invalid state transition for item {item_id}: {from} -> {to}")]
    InvalidTransition {
        item_id: String,
        from: String,
        to: String,
    },

    #[error("Ingest item not found: {0}")]
    ItemNotFound(String),

    #[error("Review candidate not found: {0}")]
    ReviewNotFound(String),

    #[error("Review candidate {0} was already decided")]
    AlreadyDecided(String),

    #[error("Invalid ingest submission: {0}")]
    InvalidSubmission(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_content_displays_partition_and_hash() {
        let err = Error::Memory(MemoryError::DuplicateContent {
            partition: "temple_global".into(),
            hash: "abc123".into(),
        });
        assert!(err.to_string().contains("temple_global"));
        assert!(err.to_string().contains("abc123"));
    }

    #[test]
    fn scope_error_converts_into_top_level() {
        let err: Error = ScopeError::Inactive {
            scope: "project:apollo".into(),
        }
        .into();
        assert!(matches!(err, Error::Scope(_)));
        assert!(err.to_string().contains("project:apollo"));
    }

    #[test]
    fn idempotency_conflict_names_the_key() {
        let err = IngestError::IdempotencyConflict {
            key: "k1".into(),
            item_id: "item-1".into(),
        };
        assert!(err.to_string().contains("'k1'"));
        assert!(err.to_string().contains("item-1"));
    }
}
