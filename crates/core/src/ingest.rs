//! Ingest items and review candidates.
//!
//! An [`IngestItem`] moves through a small state machine:
//!
//! ```text
//! received -> extracting -> auto_applied
//!                        -> queued_for_review -> approved | rejected
//!                        -> discarded
//!          <- (retry / crash recovery)
//! ```
//!
//! Every transition is recorded in the item's history so the observed
//! sequence can be checked against [`IngestState::can_transition_to`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::IngestError;
use crate::extraction::Candidate;
use crate::scope::Scope;

/// Current on-disk record format.
pub const INGEST_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Received,
    Extracting,
    AutoApplied,
    QueuedForReview,
    Discarded,
    Approved,
    Rejected,
}

impl IngestState {
    pub const ALL: [IngestState; 7] = [
        Self::Received,
        Self::Extracting,
        Self::AutoApplied,
        Self::QueuedForReview,
        Self::Discarded,
        Self::Approved,
        Self::Rejected,
    ];

    pub fn can_transition_to(self, next: IngestState) -> bool {
        use IngestState::*;
        matches!(
            (self, next),
            (Received, Extracting)
                | (Extracting, AutoApplied)
                | (Extracting, QueuedForReview)
                | (Extracting, Discarded)
                | (Extracting, Received)
                | (QueuedForReview, Approved)
                | (QueuedForReview, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::AutoApplied | Self::Discarded | Self::Approved | Self::Rejected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Extracting => "extracting",
            Self::AutoApplied => "auto_applied",
            Self::QueuedForReview => "queued_for_review",
            Self::Discarded => "discarded",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IngestState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s.trim())
            .ok_or_else(|| format!("unknown ingest state '{s}'"))
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: IngestState,
    pub to: IngestState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" | "approve" => Ok(Self::Approved),
            "rejected" | "reject" => Ok(Self::Rejected),
            other => Err(format!("unknown review status '{other}'")),
        }
    }
}

/// A reviewer's verdict on a pending candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub approve: bool,
    #[serde(default)]
    pub reviewer: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A medium-confidence candidate waiting for a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCandidate {
    pub id: String,
    pub item_id: String,
    pub candidate: Candidate,
    pub confidence: f32,
    pub scope: Scope,
    pub status: ReviewStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Last failed approval attempt, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl ReviewCandidate {
    pub fn new(item_id: &str, candidate: Candidate, scope: Scope, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            item_id: item_id.to_string(),
            confidence: candidate.confidence(),
            candidate,
            scope,
            status: ReviewStatus::Pending,
            reviewer: None,
            notes: None,
            error: None,
            created_at: now,
            decided_at: None,
        }
    }
}

/// Counts of what happened to an item's candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub entities_applied: usize,
    pub relations_applied: usize,
    pub queued: usize,
    pub dropped: usize,
}

/// What a caller submits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSubmission {
    pub item_type: String,
    pub actor_id: String,
    pub source: String,
    pub content: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Caller-chosen item id; a uuid is generated otherwise
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "default_submission_scope")]
    pub scope: Scope,
}

fn default_submission_scope() -> Scope {
    Scope::Global
}

impl IngestSubmission {
    pub fn new(
        item_type: impl Into<String>,
        actor_id: impl Into<String>,
        source: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            item_type: item_type.into(),
            actor_id: actor_id.into(),
            source: source.into(),
            content: content.into(),
            source_id: None,
            timestamp: None,
            idempotency_key: None,
            item_id: None,
            metadata: Map::new(),
            scope: Scope::Global,
        }
    }

    /// A survey response, filed under `project:survey` by default.
    pub fn survey(
        survey_id: impl Into<String>,
        respondent_id: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        let mut submission = Self::new("survey", respondent_id, "survey", response);
        submission.source_id = Some(survey_id.into());
        submission.scope = Scope::project("survey");
        submission
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

/// A persisted unit of ingest work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestItem {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    pub id: String,
    pub idempotency_key: String,
    pub item_type: String,
    pub actor_id: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub scope: Scope,
    pub state: IngestState,
    /// Monotonic submission order
    pub sequence: u64,
    /// Hash of the submitted payload, used to detect key reuse
    pub payload_hash: String,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<IngestOutcome>,
    #[serde(default)]
    pub reviews: Vec<ReviewCandidate>,
    #[serde(default)]
    pub history: Vec<StateTransition>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn current_schema_version() -> u32 {
    INGEST_SCHEMA_VERSION
}

impl IngestItem {
    /// Move to `next`, recording the transition. Rejects illegal moves.
    pub fn transition(
        &mut self,
        next: IngestState,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        if !self.state.can_transition_to(next) {
            return Err(IngestError::InvalidTransition {
                item_id: self.id.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.history.push(StateTransition {
            from: self.state,
            to: next,
            at: now,
            reason,
        });
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn pending_reviews(&self) -> impl Iterator<Item = &ReviewCandidate> {
        self.reviews
            .iter()
            .filter(|r| r.status == ReviewStatus::Pending)
    }

    /// Final state once every review is decided, or `None` while any is pending.
    pub fn review_resolution(&self) -> Option<IngestState> {
        if self.reviews.is_empty() || self.pending_reviews().next().is_some() {
            return None;
        }
        if self.reviews.iter().any(|r| r.status == ReviewStatus::Approved) {
            Some(IngestState::Approved)
        } else {
            Some(IngestState::Rejected)
        }
    }

    /// Whether the recorded history is a legal path from `received`.
    pub fn history_is_valid(&self) -> bool {
        let mut current = IngestState::Received;
        for step in &self.history {
            if step.from != current || !step.from.can_transition_to(step.to) {
                return false;
            }
            current = step.to;
        }
        current == self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> IngestItem {
        let now = Utc::now();
        IngestItem {
            schema_version: INGEST_SCHEMA_VERSION,
            id: "item-1".into(),
            idempotency_key: "k1".into(),
            item_type: "note".into(),
            actor_id: "alice".into(),
            source: "test".into(),
            source_id: None,
            timestamp: None,
            content: "Alice works with Bob".into(),
            metadata: Map::new(),
            scope: Scope::Global,
            state: IngestState::Received,
            sequence: 1,
            payload_hash: "h".into(),
            attempts: 0,
            last_error: None,
            extraction_method: None,
            outcome: None,
            reviews: Vec::new(),
            history: Vec::new(),
            submitted_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn legal_path_is_recorded() {
        let mut it = item();
        let now = Utc::now();
        it.transition(IngestState::Extracting, None, now).unwrap();
        it.transition(IngestState::Received, Some("timeout".into()), now).unwrap();
        it.transition(IngestState::Extracting, None, now).unwrap();
        it.transition(IngestState::QueuedForReview, None, now).unwrap();
        it.transition(IngestState::Approved, None, now).unwrap();
        assert_eq!(it.history.len(), 5);
        assert!(it.history_is_valid());
        assert!(it.state.is_terminal());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut it = item();
        let err = it
            .transition(IngestState::AutoApplied, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidTransition { .. }));
        assert_eq!(it.state, IngestState::Received);
        assert!(it.history.is_empty());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in IngestState::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in IngestState::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn state_parses_from_wire_name() {
        assert_eq!(
            "queued_for_review".parse::<IngestState>().unwrap(),
            IngestState::QueuedForReview
        );
        assert!("queued".parse::<IngestState>().is_err());
    }

    #[test]
    fn review_resolution_waits_for_all_decisions() {
        let mut it = item();
        let now = Utc::now();
        let cand = Candidate::Entity(crate::extraction::EntityCandidate {
            name: "Bob".into(),
            entity_type: "person".into(),
            confidence: 0.7,
        });
        it.reviews.push(ReviewCandidate::new(&it.id.clone(), cand.clone(), Scope::Global, now));
        it.reviews.push(ReviewCandidate::new(&it.id.clone(), cand, Scope::Global, now));
        assert_eq!(it.review_resolution(), None);

        it.reviews[0].status = ReviewStatus::Rejected;
        assert_eq!(it.review_resolution(), None);
        it.reviews[1].status = ReviewStatus::Rejected;
        assert_eq!(it.review_resolution(), Some(IngestState::Rejected));
        it.reviews[1].status = ReviewStatus::Approved;
        assert_eq!(it.review_resolution(), Some(IngestState::Approved));
    }

    #[test]
    fn survey_submission_defaults() {
        let s = IngestSubmission::survey("q3-pulse", "resp-9", "I use Rust daily");
        assert_eq!(s.item_type, "survey");
        assert_eq!(s.scope, Scope::project("survey"));
        assert_eq!(s.source_id.as_deref(), Some("q3-pulse"));
    }
}
