//! Memory entries and the vector/embedding collaborators behind them.
//!
//! A [`MemoryEntry`] is a unit of free text stored in exactly one scope
//! partition. Entries are persisted through a [`VectorBackend`] as
//! [`VectorRecord`]s: the embedding plus the document and a flat metadata map.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MemoryError;
use crate::scope::Scope;

/// A single memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique ID within the partition. Equal to the content hash.
    pub id: String,

    /// The content of the memory
    pub content: String,

    /// SHA-256 of the normalized content
    pub content_hash: String,

    /// The scope (and therefore partition) this entry lives in
    pub scope: Scope,

    /// Tags for categorization
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Free-form caller metadata
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Embedding vector, owned by the vector backend
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl MemoryEntry {
    /// Convert into the record shape a [`VectorBackend`] persists.
    pub fn to_record(&self, vector: Vec<f32>) -> VectorRecord {
        let mut metadata = Map::new();
        metadata.insert("content_hash".into(), Value::String(self.content_hash.clone()));
        metadata.insert("scope".into(), Value::String(self.scope.key()));
        metadata.insert(
            "tags".into(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        metadata.insert("created_at".into(), Value::String(self.created_at.to_rfc3339()));
        metadata.insert("updated_at".into(), Value::String(self.updated_at.to_rfc3339()));
        if !self.metadata.is_empty() {
            metadata.insert("metadata".into(), Value::Object(self.metadata.clone()));
        }
        VectorRecord {
            id: self.id.clone(),
            vector,
            document: self.content.clone(),
            metadata,
        }
    }

    /// Rebuild an entry from a stored record.
    pub fn from_record(record: &VectorRecord) -> Result<Self, MemoryError> {
        let meta = &record.metadata;
        let scope = meta
            .get("scope")
            .and_then(Value::as_str)
            .ok_or_else(|| MemoryError::Storage(format!("record {} has no scope", record.id)))?
            .parse::<Scope>()
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        let timestamp = |key: &str| {
            meta.get(key)
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };
        let created_at = timestamp("created_at").unwrap_or_else(Utc::now);
        Ok(Self {
            id: record.id.clone(),
            content: record.document.clone(),
            content_hash: meta
                .get("content_hash")
                .and_then(Value::as_str)
                .unwrap_or(&record.id)
                .to_string(),
            scope,
            tags: meta
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(|t| t.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
            metadata: meta
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            created_at,
            updated_at: timestamp("updated_at").unwrap_or(created_at),
            embedding: (!record.vector.is_empty()).then(|| record.vector.clone()),
        })
    }

    /// True when the entry carries every tag in `tags`.
    pub fn has_all_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }
}

/// What a vector backend stores per id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub document: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A ranked query hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub record: VectorRecord,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// The vector store collaborator: isolated partitions of embedded records.
///
/// Implementations: in-memory (for testing), JSONL files.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// The backend name (e.g., "file", "memory").
    fn name(&self) -> &str;

    /// Insert or replace a record by id.
    async fn upsert(&self, partition: &str, record: VectorRecord) -> std::result::Result<(), MemoryError>;

    /// Top-`k` records by cosine similarity, best first.
    async fn query(
        &self,
        partition: &str,
        vector: &[f32],
        k: usize,
    ) -> std::result::Result<Vec<VectorHit>, MemoryError>;

    async fn get(&self, partition: &str, id: &str) -> std::result::Result<Option<VectorRecord>, MemoryError>;

    /// Delete by id. Returns whether a record was removed.
    async fn delete(&self, partition: &str, id: &str) -> std::result::Result<bool, MemoryError>;

    /// Page through a partition in insertion order.
    async fn list(
        &self,
        partition: &str,
        limit: usize,
        offset: usize,
    ) -> std::result::Result<Vec<VectorRecord>, MemoryError>;

    async fn count(&self, partition: &str) -> std::result::Result<usize, MemoryError>;

    /// Names of every non-empty partition.
    async fn partitions(&self) -> std::result::Result<Vec<String>, MemoryError>;

    /// Remove a partition and everything in it.
    async fn drop_partition(&self, partition: &str) -> std::result::Result<bool, MemoryError>;

    async fn health_check(&self) -> std::result::Result<(), MemoryError> {
        self.partitions().await.map(|_| ())
    }
}

/// The embedding collaborator. Synchronous and possibly CPU-bound, so
/// async callers run it on the blocking pool.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, MemoryError>;
}
