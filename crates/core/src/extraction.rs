//! Extraction trait — turns free text into entity/relation candidates.
//!
//! An [`Extractor`] is a pure function of its input from the pipeline's point
//! of view, so calls are safe to retry. Implementations: an LLM backend, a
//! regex heuristic backend, and a ranked fallback chain over both.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;

/// Entity types the extraction prompt allows. Anything else becomes `concept`.
pub const ENTITY_TYPES: &[&str] = &[
    "person",
    "organization",
    "technology",
    "project",
    "concept",
    "location",
];

/// Relation types the extraction prompt allows. Anything else becomes `related_to`.
pub const RELATION_TYPES: &[&str] = &[
    "works_with",
    "uses",
    "manages",
    "blocked_by",
    "interested_in",
    "mentors",
    "collaborates_with",
    "related_to",
    "reports_to",
    "depends_on",
    "owns",
    "created",
    "supports",
];

/// Input to an extraction call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub text: String,

    /// The submitting actor; always present as an entity in the result
    pub actor_id: String,

    /// Item type hint (email, note, ...)
    #[serde(default)]
    pub item_type: String,

    /// Upper bound on returned entities
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
}

fn default_max_entities() -> usize {
    25
}

impl ExtractionRequest {
    pub fn new(text: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actor_id: actor_id.into(),
            item_type: String::new(),
            max_entities: default_max_entities(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub name: String,
    pub entity_type: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationCandidate {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    pub confidence: f32,
}

/// A single extracted fact, as routed by the confidence policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Candidate {
    Entity(EntityCandidate),
    Relation(RelationCandidate),
}

impl Candidate {
    pub fn confidence(&self) -> f32 {
        match self {
            Self::Entity(e) => e.confidence,
            Self::Relation(r) => r.confidence,
        }
    }

    /// Human-readable one-liner, e.g. `works_with(Alice, Bob)`.
    pub fn describe(&self) -> String {
        match self {
            Self::Entity(e) => format!("{} [{}]", e.name, e.entity_type),
            Self::Relation(r) => format!("{}({}, {})", r.relation_type, r.source, r.target),
        }
    }
}

/// Token usage reported by LLM backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Output of an extraction call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entities: Vec<EntityCandidate>,
    pub relations: Vec<RelationCandidate>,

    /// Which backend produced the result (e.g. "anthropic", "heuristic")
    pub method: String,

    /// Errors from higher-ranked backends that were skipped over
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_errors: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ExtractionUsage>,
}

impl ExtractionResult {
    pub fn candidates(&self) -> impl Iterator<Item = Candidate> + '_ {
        self.entities
            .iter()
            .cloned()
            .map(Candidate::Entity)
            .chain(self.relations.iter().cloned().map(Candidate::Relation))
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// The extraction gateway seam.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Backend name, reported as the result's `method`.
    fn name(&self) -> &str;

    async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> std::result::Result<ExtractionResult, ExtractionError>;
}
