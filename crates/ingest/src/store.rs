//! Durable ingest state store — one JSON file per item.
//!
//! Layout under the ingest root:
//! - `items/<sha256(idempotency_key)>.json` — current records (`schema_version` 2)
//! - `jobs.json` — legacy single-file store, migrated on open
//!
//! Every mutation is written to disk (temp file + rename) before the call
//! returns, and all mutations are serialized behind one async mutex.
//! Unreadable records are renamed to `*.corrupt` and reported; the rest load.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use temple_core::error::IngestError;
use temple_core::ingest::{
    IngestItem, IngestState, IngestSubmission, ReviewCandidate, ReviewStatus, StateTransition,
    INGEST_SCHEMA_VERSION,
};
use temple_core::scope::Scope;
use temple_memory::hashing::{normalize, sha256_hex};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const ITEM_TYPES: &[&str] = &[
    "email",
    "document",
    "chat",
    "meeting_note",
    "ticket",
    "note",
    "survey",
];
const MIGRATION_REASON: &str = "migrated from legacy store";

/// Result of a submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub item: IngestItem,
    /// True when an item with the same key and payload already existed
    pub duplicate: bool,
}

/// What happened while opening the store.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub migrated: usize,
    pub corrupted: Vec<IngestError>,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Keyed by idempotency key
    items: HashMap<String, IngestItem>,
    /// item id -> idempotency key
    ids: HashMap<String, String>,
    next_sequence: u64,
}

impl StoreState {
    fn insert(&mut self, item: IngestItem) {
        self.next_sequence = self.next_sequence.max(item.sequence + 1);
        self.ids.insert(item.id.clone(), item.idempotency_key.clone());
        self.items.insert(item.idempotency_key.clone(), item);
    }

    fn by_id(&self, id: &str) -> Option<&IngestItem> {
        self.items.get(self.ids.get(id)?)
    }
}

pub struct FileIngestStore {
    root: PathBuf,
    state: Mutex<StoreState>,
    report: LoadReport,
}

/// `item_type` must be a known type or `other:<name>`.
pub fn validate_item_type(item_type: &str) -> bool {
    ITEM_TYPES.contains(&item_type)
        || item_type
            .strip_prefix("other:")
            .is_some_and(|rest| !rest.trim().is_empty())
}

/// Key derived when the caller supplies none.
pub fn derive_idempotency_key(
    item_type: &str,
    actor_id: &str,
    source: &str,
    source_id: Option<&str>,
    content: &str,
) -> String {
    sha256_hex(
        format!(
            "{item_type}|{actor_id}|{source}|{}|{}",
            source_id.unwrap_or_default(),
            normalize(content)
        )
        .as_bytes(),
    )
}

/// Empty metadata adds nothing, so hashes of metadata-free items are stable.
fn payload_hash(submission: &IngestSubmission) -> String {
    let mut payload = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        submission.item_type,
        submission.actor_id,
        submission.source,
        submission.source_id.as_deref().unwrap_or_default(),
        submission.timestamp.as_deref().unwrap_or_default(),
        submission.scope.key(),
        normalize(&submission.content)
    );
    if !submission.metadata.is_empty() {
        // Map keys are sorted, so the JSON is canonical.
        payload.push('|');
        payload.push_str(&Value::Object(submission.metadata.clone()).to_string());
    }
    sha256_hex(payload.as_bytes())
}

fn storage_error(context: &str, path: &Path, e: impl std::fmt::Display) -> IngestError {
    IngestError::Storage(format!("{context} {}: {e}", path.display()))
}

impl FileIngestStore {
    /// Open the store rooted at `root`, migrating legacy data and
    /// quarantining unreadable records.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let root = root.into();
        let items_dir = root.join("items");
        std::fs::create_dir_all(&items_dir)
            .map_err(|e| storage_error("Failed to create", &items_dir, e))?;

        let mut state = StoreState {
            next_sequence: 1,
            ..Default::default()
        };
        let mut report = LoadReport::default();

        Self::migrate_jobs_file(&root, &items_dir, &mut state, &mut report)?;
        Self::load_items(&items_dir, &mut state, &mut report)?;

        info!(
            root = %root.display(),
            loaded = report.loaded,
            migrated = report.migrated,
            corrupted = report.corrupted.len(),
            "Ingest store opened"
        );
        Ok(Self {
            root,
            state: Mutex::new(state),
            report,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.report
    }

    fn item_path(items_dir: &Path, key: &str) -> PathBuf {
        items_dir.join(format!("{}.json", sha256_hex(key.as_bytes())))
    }

    fn write_item(items_dir: &Path, item: &IngestItem) -> Result<(), IngestError> {
        let path = Self::item_path(items_dir, &item.idempotency_key);
        let json = serde_json::to_string_pretty(item)
            .map_err(|e| storage_error("Failed to serialize", &path, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| storage_error("Failed to write", &path, e))
    }

    fn persist(&self, item: &IngestItem) -> Result<(), IngestError> {
        Self::write_item(&self.root.join("items"), item)
    }

    fn rename_with_suffix(path: &Path, suffix: &str) -> Result<(), IngestError> {
        let mut target = path.as_os_str().to_owned();
        target.push(suffix);
        std::fs::rename(path, &target).map_err(|e| storage_error("Failed to rename", path, e))
    }

    fn quarantine(path: &Path, reason: String, report: &mut LoadReport) {
        warn!(path = %path.display(), reason = %reason, "Quarantining corrupted ingest record");
        if let Err(e) = Self::rename_with_suffix(path, ".corrupt") {
            warn!(error = %e, "Failed to quarantine ingest record");
        }
        report.corrupted.push(IngestError::StateCorruption {
            path: path.display().to_string(),
            reason,
        });
    }

    fn migrate_jobs_file(
        root: &Path,
        items_dir: &Path,
        state: &mut StoreState,
        report: &mut LoadReport,
    ) -> Result<(), IngestError> {
        let path = root.join("jobs.json");
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Ok(());
        };
        let value: Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                Self::quarantine(&path, format!("invalid JSON: {e}"), report);
                return Ok(());
            }
        };

        let jobs: Vec<(Option<String>, Value)> = match value {
            Value::Object(map) if map.contains_key("jobs") => match map.get("jobs") {
                Some(Value::Array(list)) => list.iter().cloned().map(|v| (None, v)).collect(),
                Some(Value::Object(inner)) => inner.iter().map(|(k, v)| (Some(k.clone()), v.clone())).collect(),
                _ => Vec::new(),
            },
            Value::Object(map) => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
            Value::Array(list) => list.into_iter().map(|v| (None, v)).collect(),
            _ => Vec::new(),
        };

        let now = Utc::now();
        for (job_id, job) in jobs {
            let sequence = state.next_sequence;
            match item_from_legacy(&job, job_id.as_deref(), sequence, now) {
                Ok(item) if state.items.contains_key(&item.idempotency_key) => {
                    debug!(key = %item.idempotency_key, "Legacy job already migrated");
                }
                Ok(item) => {
                    Self::write_item(items_dir, &item)?;
                    state.insert(item);
                    report.migrated += 1;
                }
                Err(reason) => report.corrupted.push(IngestError::StateCorruption {
                    path: format!("{}#{}", path.display(), job_id.unwrap_or_default()),
                    reason,
                }),
            }
        }
        Self::rename_with_suffix(&path, ".migrated")?;
        info!(migrated = report.migrated, "Legacy jobs.json migrated");
        Ok(())
    }

    fn load_items(items_dir: &Path, state: &mut StoreState, report: &mut LoadReport) -> Result<(), IngestError> {
        let read_dir = std::fs::read_dir(items_dir)
            .map_err(|e| storage_error("Failed to list", items_dir, e))?;
        let mut paths: Vec<PathBuf> = read_dir
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut current = Vec::new();
        let mut legacy = Vec::new();
        for path in paths {
            let value: Value = match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
            {
                Ok(v) => v,
                Err(reason) => {
                    Self::quarantine(&path, reason, report);
                    continue;
                }
            };
            if value.get("schema_version").is_some() {
                current.push((path, value));
            } else {
                legacy.push((path, value));
            }
        }

        for (path, value) in current {
            match serde_json::from_value::<IngestItem>(value) {
                Ok(item) if item.schema_version > INGEST_SCHEMA_VERSION => Self::quarantine(
                    &path,
                    format!("unsupported schema_version {}", item.schema_version),
                    report,
                ),
                Ok(item) if !item.history_is_valid() => {
                    Self::quarantine(&path, "state history is not a valid path".into(), report)
                }
                Ok(item) => {
                    state.insert(item);
                    report.loaded += 1;
                }
                Err(e) => Self::quarantine(&path, e.to_string(), report),
            }
        }

        // Per-item files from before schema versioning.
        let now = Utc::now();
        for (path, value) in legacy {
            match item_from_legacy(&value, None, state.next_sequence, now) {
                Ok(item) => {
                    Self::rename_with_suffix(&path, ".migrated")?;
                    if !state.items.contains_key(&item.idempotency_key) {
                        Self::write_item(items_dir, &item)?;
                        state.insert(item);
                        report.migrated += 1;
                    }
                }
                Err(reason) => Self::quarantine(&path, reason, report),
            }
        }
        Ok(())
    }

    /// Persist a new `received` item, or return the existing one for a repeated key.
    pub async fn submit(&self, submission: IngestSubmission) -> Result<SubmitOutcome, IngestError> {
        if submission.content.trim().is_empty() {
            return Err(IngestError::InvalidSubmission("content is empty".into()));
        }
        if submission.actor_id.trim().is_empty() {
            return Err(IngestError::InvalidSubmission("actor_id is empty".into()));
        }
        if submission.source.trim().is_empty() {
            return Err(IngestError::InvalidSubmission("source is empty".into()));
        }
        if !validate_item_type(&submission.item_type) {
            return Err(IngestError::InvalidSubmission(format!(
                "unknown item_type '{}'",
                submission.item_type
            )));
        }

        let key = match submission.idempotency_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => derive_idempotency_key(
                &submission.item_type,
                &submission.actor_id,
                &submission.source,
                submission.source_id.as_deref(),
                &submission.content,
            ),
        };
        let hash = payload_hash(&submission);

        let mut state = self.state.lock().await;
        if let Some(existing) = state.items.get(&key) {
            if existing.payload_hash != hash {
                return Err(IngestError::IdempotencyConflict {
                    key,
                    item_id: existing.id.clone(),
                });
            }
            debug!(item_id = %existing.id, key = %key, "Duplicate ingest submission");
            return Ok(SubmitOutcome {
                item: existing.clone(),
                duplicate: true,
            });
        }

        let id = submission
            .item_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if state.ids.contains_key(&id) {
            return Err(IngestError::InvalidSubmission(format!(
                "item_id '{id}' is already used by another idempotency key"
            )));
        }

        let now = Utc::now();
        let item = IngestItem {
            schema_version: INGEST_SCHEMA_VERSION,
            id,
            idempotency_key: key,
            item_type: submission.item_type,
            actor_id: submission.actor_id,
            source: submission.source,
            source_id: submission.source_id,
            timestamp: submission.timestamp,
            content: submission.content,
            metadata: submission.metadata,
            scope: submission.scope,
            state: IngestState::Received,
            sequence: state.next_sequence,
            payload_hash: hash,
            attempts: 0,
            last_error: None,
            extraction_method: None,
            outcome: None,
            reviews: Vec::new(),
            history: Vec::new(),
            submitted_at: now,
            updated_at: now,
        };
        self.persist(&item)?;
        state.insert(item.clone());
        info!(item_id = %item.id, sequence = item.sequence, "Ingest item received");
        Ok(SubmitOutcome {
            item,
            duplicate: false,
        })
    }

    pub async fn get(&self, id: &str) -> Option<IngestItem> {
        self.state.lock().await.by_id(id).cloned()
    }

    pub async fn get_by_key(&self, key: &str) -> Option<IngestItem> {
        self.state.lock().await.items.get(key).cloned()
    }

    /// Items in submission order, optionally filtered by state.
    pub async fn list(&self, filter: Option<IngestState>) -> Vec<IngestItem> {
        let state = self.state.lock().await;
        let mut items: Vec<IngestItem> = state
            .items
            .values()
            .filter(|item| filter.is_none_or(|s| item.state == s))
            .cloned()
            .collect();
        items.sort_by_key(|item| item.sequence);
        items
    }

    /// Item count per state (every state present, zero included).
    pub async fn counts(&self) -> BTreeMap<String, usize> {
        let state = self.state.lock().await;
        let mut counts: BTreeMap<String, usize> = IngestState::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for item in state.items.values() {
            *counts.entry(item.state.as_str().to_string()).or_default() += 1;
        }
        counts
    }

    /// Mutate one item and persist it. The change is discarded if `f` fails
    /// or the write fails.
    pub async fn update<T, F>(&self, id: &str, f: F) -> Result<T, IngestError>
    where
        F: FnOnce(&mut IngestItem) -> Result<T, IngestError>,
    {
        let mut state = self.state.lock().await;
        let mut item = state
            .by_id(id)
            .cloned()
            .ok_or_else(|| IngestError::ItemNotFound(id.to_string()))?;
        let value = f(&mut item)?;
        self.persist(&item)?;
        state.insert(item);
        Ok(value)
    }

    /// Move items stuck in `extracting` (a crash mid-pass) back to `received`.
    pub async fn recover_extracting(&self) -> Result<Vec<String>, IngestError> {
        let stuck: Vec<String> = self
            .list(Some(IngestState::Extracting))
            .await
            .into_iter()
            .map(|item| item.id)
            .collect();
        for id in &stuck {
            self.update(id, |item| {
                item.transition(
                    IngestState::Received,
                    Some("recovered after interrupted extraction".into()),
                    Utc::now(),
                )
            })
            .await?;
            warn!(item_id = %id, "Recovered ingest item left in extracting");
        }
        Ok(stuck)
    }

    /// The item owning a review candidate, with the candidate.
    pub async fn find_review(&self, review_id: &str) -> Option<(IngestItem, ReviewCandidate)> {
        let state = self.state.lock().await;
        state.items.values().find_map(|item| {
            item.reviews
                .iter()
                .find(|r| r.id == review_id)
                .map(|r| (item.clone(), r.clone()))
        })
    }

    /// Review candidates across all items, oldest first.
    pub async fn list_reviews(&self, status: Option<ReviewStatus>, limit: usize) -> Vec<ReviewCandidate> {
        let mut reviews: Vec<ReviewCandidate> = self
            .list(None)
            .await
            .into_iter()
            .flat_map(|item| item.reviews)
            .filter(|r| status.is_none_or(|s| r.status == s))
            .collect();
        reviews.sort_by_key(|r| r.created_at);
        reviews.truncate(limit);
        reviews
    }
}

fn legacy_state(status: &str) -> Option<IngestState> {
    Some(match status.trim().to_lowercase().as_str() {
        // Interrupted or awaiting review without recorded candidates: extract again.
        "pending" | "new" | "queued" | "received" | "processing" | "running" | "extracting"
        | "review" | "needs_review" | "queued_for_review" => IngestState::Received,
        "done" | "complete" | "completed" | "applied" | "auto_applied" => IngestState::AutoApplied,
        "failed" | "error" | "skipped" | "discarded" => IngestState::Discarded,
        "approved" => IngestState::Approved,
        "rejected" => IngestState::Rejected,
        _ => return None,
    })
}

/// A valid history ending in `target`, every step stamped `at`.
fn synthetic_history(target: IngestState, at: DateTime<Utc>) -> Vec<StateTransition> {
    use IngestState::*;
    let path: &[IngestState] = match target {
        Received => &[Received],
        Extracting => &[Received, Extracting],
        AutoApplied | Discarded | QueuedForReview => &[Received, Extracting, target],
        Approved | Rejected => &[Received, Extracting, QueuedForReview, target],
    };
    path.windows(2)
        .map(|step| StateTransition {
            from: step[0],
            to: step[1],
            at,
            reason: Some(MIGRATION_REASON.into()),
        })
        .collect()
}

/// Convert a pre-versioning job record (`job_id`/`status` naming).
fn item_from_legacy(
    job: &Value,
    fallback_id: Option<&str>,
    sequence: u64,
    now: DateTime<Utc>,
) -> Result<IngestItem, String> {
    let text = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|k| job.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty())
    };
    if !job.is_object() {
        return Err("legacy job is not an object".into());
    }

    let content = text(&["content", "text", "payload"])
        .or_else(|| job.get("payload").and_then(|p| p.get("content")).and_then(Value::as_str).map(str::to_string))
        .ok_or("legacy job has no content")?;
    let status = text(&["status", "state"]).unwrap_or_else(|| "pending".into());
    let state = legacy_state(&status).ok_or_else(|| format!("unknown legacy status '{status}'"))?;

    let item_type = text(&["item_type", "type"])
        .filter(|t| validate_item_type(t))
        .unwrap_or_else(|| "note".into());
    let actor_id = text(&["actor_id", "actor"]).unwrap_or_else(|| "unknown".into());
    let source = text(&["source"]).unwrap_or_else(|| "legacy".into());
    let source_id = text(&["source_id"]);
    let key = text(&["idempotency_key"]).unwrap_or_else(|| {
        derive_idempotency_key(&item_type, &actor_id, &source, source_id.as_deref(), &content)
    });
    let id = text(&["job_id", "id"])
        .or_else(|| fallback_id.map(str::to_string))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let scope = text(&["scope"])
        .and_then(|s| s.parse::<Scope>().ok())
        .unwrap_or(Scope::Global);
    let submitted_at = text(&["created_at", "submitted_at"])
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);

    let submission = IngestSubmission {
        item_type: item_type.clone(),
        actor_id: actor_id.clone(),
        source: source.clone(),
        content: content.clone(),
        source_id: source_id.clone(),
        timestamp: text(&["timestamp"]),
        idempotency_key: Some(key.clone()),
        item_id: Some(id.clone()),
        metadata: job
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        scope: scope.clone(),
    };

    Ok(IngestItem {
        schema_version: INGEST_SCHEMA_VERSION,
        payload_hash: payload_hash(&submission),
        id,
        idempotency_key: key,
        item_type,
        actor_id,
        source,
        source_id,
        timestamp: submission.timestamp,
        content,
        metadata: submission.metadata,
        scope,
        state,
        sequence: job.get("sequence").and_then(Value::as_u64).unwrap_or(sequence),
        attempts: job.get("attempts").and_then(Value::as_u64).unwrap_or(0) as u32,
        last_error: text(&["last_error", "error"]),
        extraction_method: text(&["extraction_method", "method"]),
        outcome: None,
        reviews: Vec::new(),
        history: synthetic_history(state, now),
        submitted_at,
        updated_at: now,
    })
}
