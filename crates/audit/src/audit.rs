//! Audit logging — structured records of every state-changing operation.
//!
//! The core only writes audit entries; nothing reads them back for
//! decision-making.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use temple_core::scope::Scope;

/// Entries kept in memory for `recent()`.
const RECENT_CAPACITY: usize = 256;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub scope: Scope,
    pub outcome: AuditOutcome,
    /// Free-form fields, flattened into the JSON line
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Types of auditable operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Store,
    Delete,
    EntityCreate,
    EntityUpdate,
    EntityDelete,
    RelationCreate,
    RelationDelete,
    ObservationAdd,
    ObservationRemove,
    IngestSubmit,
    IngestTransition,
    IngestApply,
    ReviewDecision,
    ContextChange,
    ExpireSession,
    GraphMigrate,
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    /// A no-op, e.g. a duplicate store
    Skipped,
    Failure,
}

/// Where audit entries are written.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Fans entries out to its sinks and keeps a short in-memory tail.
pub struct AuditLogger {
    enabled: bool,
    recent: Mutex<VecDeque<AuditEntry>>,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("enabled", &self.enabled)
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// A logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    pub fn with_sinks(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self {
            enabled: true,
            recent: Mutex::new(VecDeque::new()),
            sinks,
        }
    }

    /// A logger that drops everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    fn recent_guard(&self) -> MutexGuard<'_, VecDeque<AuditEntry>> {
        self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an audit event.
    pub fn log(&self, action: AuditAction, scope: &Scope, outcome: AuditOutcome, details: Value) {
        if !self.enabled {
            return;
        }
        let details = match details {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => Map::from_iter([("detail".to_string(), other)]),
        };
        let entry = AuditEntry {
            timestamp: Utc::now(),
            action,
            scope: scope.clone(),
            outcome,
            details,
        };

        {
            let mut recent = self.recent_guard();
            if recent.len() == RECENT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(entry.clone());
        }

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    /// Most recent entries, oldest first.
    pub fn recent(&self) -> Vec<AuditEntry> {
        self.recent_guard().iter().cloned().collect()
    }

    pub fn entries_by_action(&self, action: AuditAction) -> Vec<AuditEntry> {
        self.recent_guard()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.recent_guard().len()
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            action = ?entry.action,
            scope = %entry.scope,
            outcome = ?entry.outcome,
            details = %serde_json::Value::Object(entry.details.clone()),
            "AUDIT"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_and_filter_entries() {
        let logger = AuditLogger::new();
        logger.log(AuditAction::Store, &Scope::Global, AuditOutcome::Success, json!({"id": "abc"}));
        logger.log(AuditAction::Store, &Scope::project("x"), AuditOutcome::Skipped, Value::Null);
        logger.log(AuditAction::Delete, &Scope::Global, AuditOutcome::Success, json!("gone"));

        assert_eq!(logger.count(), 3);
        let stores = logger.entries_by_action(AuditAction::Store);
        assert_eq!(stores.len(), 2);
        assert_eq!(stores[0].details["id"], "abc");
        assert_eq!(logger.recent()[2].details["detail"], "gone");
    }

    #[test]
    fn recent_is_bounded() {
        let logger = AuditLogger::new();
        for i in 0..RECENT_CAPACITY + 10 {
            logger.log(AuditAction::Store, &Scope::Global, AuditOutcome::Success, json!({"i": i}));
        }
        let recent = logger.recent();
        assert_eq!(recent.len(), RECENT_CAPACITY);
        assert_eq!(recent[0].details["i"], 10);
    }

    #[test]
    fn disabled_logger_records_nothing() {
        let logger = AuditLogger::disabled();
        logger.log(AuditAction::Store, &Scope::Global, AuditOutcome::Success, Value::Null);
        assert_eq!(logger.count(), 0);
    }

    #[test]
    fn entry_serializes_flat() {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            action: AuditAction::ExpireSession,
            scope: Scope::session("s1"),
            outcome: AuditOutcome::Success,
            details: Map::from_iter([("dropped".to_string(), json!(3))]),
        };

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["action"], "expire_session");
        assert_eq!(value["scope"], "session:s1");
        assert_eq!(value["dropped"], 3);

        let back: AuditEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back.action, AuditAction::ExpireSession);
        assert_eq!(back.details["dropped"], 3);
    }

    #[test]
    fn custom_sink_receives_events() {
        struct TestSink {
            received: Arc<Mutex<Vec<AuditAction>>>,
        }

        impl AuditSink for TestSink {
            fn record(&self, entry: &AuditEntry) {
                self.received.lock().unwrap().push(entry.action);
            }
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = TestSink { received: received.clone() };
        let logger = AuditLogger::with_sinks(vec![Arc::new(sink), Arc::new(TracingSink)]);

        logger.log(AuditAction::IngestSubmit, &Scope::Global, AuditOutcome::Success, Value::Null);
        logger.log(AuditAction::Store, &Scope::Global, AuditOutcome::Success, json!({"id": "m1"}));

        assert_eq!(
            *received.lock().unwrap(),
            vec![AuditAction::IngestSubmit, AuditAction::Store]
        );
    }

    #[test]
    fn debug_format() {
        let logger = AuditLogger::default();
        let debug_str = format!("{logger:?}");
        assert!(debug_str.contains("AuditLogger"));
        assert!(debug_str.contains("entry_count"));
    }
}
