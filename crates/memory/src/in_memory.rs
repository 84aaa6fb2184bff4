//! In-memory vector store — useful for testing and ephemeral deployments.

use async_trait::async_trait;
use std::sync::Arc;
use temple_core::error::MemoryError;
use temple_core::memory::{VectorBackend, VectorHit, VectorRecord};
use tokio::sync::RwLock;

use crate::vector::PartitionMap;

/// Keeps every partition in a map guarded by an async lock.
pub struct InMemoryVectorStore {
    partitions: Arc<RwLock<PartitionMap>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            partitions: Arc::new(RwLock::new(PartitionMap::default())),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, partition: &str, record: VectorRecord) -> Result<(), MemoryError> {
        self.partitions.write().await.upsert(partition, record);
        Ok(())
    }

    async fn query(&self, partition: &str, vector: &[f32], k: usize) -> Result<Vec<VectorHit>, MemoryError> {
        Ok(self.partitions.read().await.query(partition, vector, k))
    }

    async fn get(&self, partition: &str, id: &str) -> Result<Option<VectorRecord>, MemoryError> {
        Ok(self.partitions.read().await.get(partition, id).cloned())
    }

    async fn delete(&self, partition: &str, id: &str) -> Result<bool, MemoryError> {
        Ok(self.partitions.write().await.delete(partition, id))
    }

    async fn list(&self, partition: &str, limit: usize, offset: usize) -> Result<Vec<VectorRecord>, MemoryError> {
        Ok(self.partitions.read().await.list(partition, limit, offset))
    }

    async fn count(&self, partition: &str) -> Result<usize, MemoryError> {
        Ok(self.partitions.read().await.records(partition).len())
    }

    async fn partitions(&self) -> Result<Vec<String>, MemoryError> {
        Ok(self.partitions.read().await.names())
    }

    async fn drop_partition(&self, partition: &str) -> Result<bool, MemoryError> {
        Ok(self.partitions.write().await.drop_partition(partition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.into(),
            vector,
            document: id.into(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn upsert_and_query() {
        let store = InMemoryVectorStore::new();
        store.upsert("temple_global", record("a", vec![1.0, 0.0])).await.unwrap();
        store.upsert("temple_global", record("b", vec![0.0, 1.0])).await.unwrap();

        let hits = store.query("temple_global", &[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "a");
        assert_eq!(store.count("temple_global").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn query_unknown_partition_is_empty() {
        let store = InMemoryVectorStore::new();
        assert!(store.query("nope", &[1.0], 5).await.unwrap().is_empty());
        assert_eq!(store.count("nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_and_drop() {
        let store = InMemoryVectorStore::new();
        store.upsert("p", record("a", vec![1.0])).await.unwrap();
        store.upsert("q", record("b", vec![1.0])).await.unwrap();

        assert!(store.delete("p", "a").await.unwrap());
        assert!(!store.delete("p", "a").await.unwrap());
        assert!(store.drop_partition("q").await.unwrap());
        assert!(store.partitions().await.unwrap().is_empty());
        assert!(store.health_check().await.is_ok());
    }
}
