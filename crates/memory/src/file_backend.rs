//! File-based vector store — one JSON-lines file per partition.
//!
//! Layout: `<dir>/<partition>.jsonl`, each line a serialized `VectorRecord`
//! (embedding included). Characters outside `[A-Za-z0-9._-]` in partition
//! names are percent-encoded in the file name.
//!
//! Partitions are loaded into memory on creation and the touched partition is
//! rewritten on every mutation. Fast reads, durable writes, human-inspectable.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use temple_core::error::MemoryError;
use temple_core::memory::{VectorBackend, VectorHit, VectorRecord};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::vector::PartitionMap;

const EXTENSION: &str = "jsonl";

pub struct FileVectorStore {
    dir: PathBuf,
    partitions: Arc<RwLock<PartitionMap>>,
}

impl FileVectorStore {
    /// Open (or lazily create) a store rooted at `dir`.
    pub fn new(dir: PathBuf) -> Self {
        let loaded = Self::load_from_disk(&dir);
        debug!(dir = %dir.display(), partitions = loaded.len(), "File vector store loaded");
        Self {
            dir,
            partitions: Arc::new(RwLock::new(PartitionMap::from_partitions(loaded))),
        }
    }

    fn load_from_disk(dir: &Path) -> HashMap<String, Vec<VectorRecord>> {
        let Ok(read_dir) = std::fs::read_dir(dir) else {
            return HashMap::new(); // Directory doesn't exist yet
        };

        let mut partitions = HashMap::new();
        for path in read_dir.flatten().map(|e| e.path()) {
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(partition) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(decode_name)
            else {
                continue;
            };
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable partition file");
                    continue;
                }
            };
            let records: Vec<VectorRecord> = content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .filter_map(|line| match serde_json::from_str::<VectorRecord>(line) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(partition = %partition, error = %e, "Skipping corrupted vector record");
                        None
                    }
                })
                .collect();
            partitions.insert(partition, records);
        }
        partitions
    }

    fn partition_path(&self, partition: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{EXTENSION}", encode_name(partition)))
    }

    /// Rewrite one partition file (write to a temp file, then rename).
    fn flush(&self, partition: &str, records: &[VectorRecord]) -> Result<(), MemoryError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            MemoryError::Storage(format!("Failed to create vector directory: {e}"))
        })?;

        let mut content = String::new();
        for record in records {
            let line = serde_json::to_string(record).map_err(|e| {
                MemoryError::Storage(format!("Failed to serialize vector record: {e}"))
            })?;
            content.push_str(&line);
            content.push('\n');
        }

        let path = self.partition_path(partition);
        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, &content)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| MemoryError::Storage(format!("Failed to write partition {partition}: {e}")))
    }
}

fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(byte as char),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

fn decode_name(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Some(value) = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        {
            out.push(value);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[async_trait]
impl VectorBackend for FileVectorStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn upsert(&self, partition: &str, record: VectorRecord) -> Result<(), MemoryError> {
        let mut map = self.partitions.write().await;
        map.upsert(partition, record);
        self.flush(partition, map.records(partition))
    }

    async fn query(&self, partition: &str, vector: &[f32], k: usize) -> Result<Vec<VectorHit>, MemoryError> {
        Ok(self.partitions.read().await.query(partition, vector, k))
    }

    async fn get(&self, partition: &str, id: &str) -> Result<Option<VectorRecord>, MemoryError> {
        Ok(self.partitions.read().await.get(partition, id).cloned())
    }

    async fn delete(&self, partition: &str, id: &str) -> Result<bool, MemoryError> {
        let mut map = self.partitions.write().await;
        let deleted = map.delete(partition, id);
        if deleted {
            self.flush(partition, map.records(partition))?;
        }
        Ok(deleted)
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
        let mut map = self.partitions.write().await;
        let existed = map.drop_partition(partition);
        let path = self.partition_path(partition);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                MemoryError::Storage(format!("Failed to remove partition {partition}: {e}"))
            })?;
        }
        Ok(existed)
    }

    async fn health_check(&self) -> Result<(), MemoryError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| MemoryError::Storage(format!("Vector directory not writable: {e}")))
    }
}
