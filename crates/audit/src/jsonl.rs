//! Append-only JSONL audit files, one per scope.
//!
//! `global.jsonl`, `project_<name>.jsonl`, `session_<id>.jsonl` under the
//! audit directory.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use temple_core::scope::Scope;
use thiserror::Error;
use tracing::warn;

use crate::audit::{AuditEntry, AuditSink};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Writes each entry to the file of its scope.
pub struct JsonlAuditSink {
    dir: PathBuf,
    // Serializes appends and compaction.
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, scope: &Scope) -> PathBuf {
        self.dir.join(format!("{}.jsonl", scope.file_stem()))
    }

    fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> AuditError + '_ {
        move |source| AuditError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let line = serde_json::to_string(entry)?;
        let path = self.path_for(&entry.scope);
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        std::fs::create_dir_all(&self.dir).map_err(Self::io_error(&self.dir))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Self::io_error(&path))?;
        writeln!(file, "{line}").map_err(Self::io_error(&path))
    }

    /// The last `limit` entries for `scope`, oldest first. Unparseable lines are skipped.
    pub fn read(&self, scope: &Scope, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let path = self.path_for(scope);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error(&path)(e)),
        };
        let entries: Vec<AuditEntry> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable audit line");
                    None
                }
            })
            .collect();
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.into_iter().skip(skip).collect())
    }

    /// Keep only the last `keep` lines for `scope`. Returns how many were removed.
    pub fn compact(&self, scope: &Scope, keep: usize) -> Result<usize, AuditError> {
        let path = self.path_for(scope);
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Self::io_error(&path)(e)),
        };
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() <= keep {
            return Ok(0);
        }
        let removed = lines.len() - keep;
        let mut kept = lines[removed..].join("\n");
        kept.push('\n');

        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, kept)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(Self::io_error(&path))?;
        Ok(removed)
    }

    /// Scopes that have an audit file.
    pub fn scopes(&self) -> Vec<String> {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut stems: Vec<String> = read_dir
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        stems.sort();
        stems
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, entry: &AuditEntry) {
        if let Err(e) = self.append(entry) {
            warn!(error = %e, "Failed to write audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditLogger, AuditOutcome};
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[test]
    fn entries_land_in_their_scope_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(JsonlAuditSink::new(dir.path()));
        let logger = AuditLogger::with_sinks(vec![sink.clone()]);

        logger.log(AuditAction::Store, &Scope::Global, AuditOutcome::Success, json!({"id": "a"}));
        logger.log(AuditAction::Store, &Scope::project("x"), AuditOutcome::Success, json!({"id": "b"}));

        assert!(dir.path().join("global.jsonl").exists());
        assert!(dir.path().join("project_x.jsonl").exists());
        let global = sink.read(&Scope::Global, 100).unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].details["id"], "a");
        assert_eq!(sink.scopes(), vec!["global", "project_x"]);
    }

    #[test]
    fn read_returns_tail() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(JsonlAuditSink::new(dir.path()));
        let logger = AuditLogger::with_sinks(vec![sink.clone()]);
        for i in 0..5 {
            logger.log(AuditAction::Store, &Scope::Global, AuditOutcome::Success, json!({"i": i}));
        }
        let tail = sink.read(&Scope::Global, 2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].details["i"], 3);
        assert_eq!(tail[1].details["i"], 4);
    }

    #[test]
    fn read_missing_scope_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("not-yet"));
        assert!(sink.read(&Scope::session("s"), 10).unwrap().is_empty());
        assert_eq!(sink.compact(&Scope::Global, 1).unwrap(), 0);
    }

    #[test]
    fn compact_keeps_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(JsonlAuditSink::new(dir.path()));
        let logger = AuditLogger::with_sinks(vec![sink.clone()]);
        for i in 0..10 {
            logger.log(AuditAction::Delete, &Scope::Global, AuditOutcome::Success, json!({"i": i}));
        }

        assert_eq!(sink.compact(&Scope::Global, 3).unwrap(), 7);
        let left = sink.read(&Scope::Global, 100).unwrap();
        assert_eq!(left.len(), 3);
        assert_eq!(left[0].details["i"], 7);
        assert_eq!(sink.compact(&Scope::Global, 3).unwrap(), 0);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlAuditSink::new(dir.path());
        std::fs::write(dir.path().join("global.jsonl"), "{broken\n").unwrap();
        let logger = AuditLogger::with_sinks(vec![Arc::new(JsonlAuditSink::new(dir.path()))]);
        logger.log(AuditAction::Store, &Scope::Global, AuditOutcome::Success, Value::Null);

        assert_eq!(sink.read(&Scope::Global, 10).unwrap().len(), 1);
    }
}
