//! Vector similarity and the partition map shared by the vector stores.

use std::collections::HashMap;

use temple_core::memory::{VectorHit, VectorRecord};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot / denom) as f32
}

/// Top-`k` records by similarity to `query`, best first. Ties keep insertion order.
pub fn rank_records<'a>(
    records: impl IntoIterator<Item = &'a VectorRecord>,
    query: &[f32],
    k: usize,
) -> Vec<VectorHit> {
    let mut hits: Vec<VectorHit> = records
        .into_iter()
        .map(|record| VectorHit {
            score: cosine_similarity(&record.vector, query),
            record: record.clone(),
        })
        .collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(k);
    hits
}

/// Named partitions of records, each kept in insertion order.
#[derive(Debug, Default)]
pub(crate) struct PartitionMap {
    partitions: HashMap<String, Vec<VectorRecord>>,
}

impl PartitionMap {
    pub(crate) fn from_partitions(partitions: HashMap<String, Vec<VectorRecord>>) -> Self {
        Self { partitions }
    }

    /// Replace in place when the id exists, append otherwise.
    pub(crate) fn upsert(&mut self, partition: &str, record: VectorRecord) {
        let records = self.partitions.entry(partition.to_string()).or_default();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    pub(crate) fn get(&self, partition: &str, id: &str) -> Option<&VectorRecord> {
        self.partitions.get(partition)?.iter().find(|r| r.id == id)
    }

    pub(crate) fn delete(&mut self, partition: &str, id: &str) -> bool {
        let Some(records) = self.partitions.get_mut(partition) else {
            return false;
        };
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() < before
    }

    pub(crate) fn records(&self, partition: &str) -> &[VectorRecord] {
        self.partitions
            .get(partition)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn query(&self, partition: &str, vector: &[f32], k: usize) -> Vec<VectorHit> {
        rank_records(self.records(partition), vector, k)
    }

    pub(crate) fn list(&self, partition: &str, limit: usize, offset: usize) -> Vec<VectorRecord> {
        self.records(partition)
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .partitions
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub(crate) fn drop_partition(&mut self, partition: &str) -> bool {
        self.partitions.remove(partition).is_some()
    }
}
