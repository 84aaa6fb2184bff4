//! Regex and keyword heuristic extractor.
//!
//! Needs no network or credentials, so it is the last rung of every chain.
//! Entities are proper-noun runs and acronyms; relations run from the actor
//! to every other entity with a type picked by keyword.

use async_trait::async_trait;
use regex_lite::Regex;
use temple_core::error::ExtractionError;
use temple_core::extraction::{
    EntityCandidate, ExtractionRequest, ExtractionResult, Extractor, RelationCandidate,
};

const PROPER_NOUN: &str = r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,2}\b";
const ACRONYM: &str = r"\b[A-Z]{2,}(?:[0-9]+)?\b";

const BLOCKED: &[&str] = &[
    "I", "We", "The", "This", "That", "And", "But", "For", "With", "You", "Your", "Our", "It",
    "MCP", "REST", "API",
];

const ENTITY_CONFIDENCE: f32 = 0.7;
const MAX_RELATIONS: usize = 50;

/// Keyword rules, first match wins.
const RELATION_RULES: &[(&[&str], &str, f32)] = &[
    (&["work with", "works with", "collaborat", "partner"], "collaborates_with", 0.86),
    (&["mentor", "coaching"], "mentors", 0.84),
    (&["blocked by", "blocker", "obstacle", "dependency"], "blocked_by", 0.81),
    (&["use ", "using ", "tool", "platform"], "uses", 0.82),
    (&["interested in", "want to learn", "goal"], "interested_in", 0.78),
];
const FALLBACK_RELATION: (&str, f32) = ("related_to", 0.62);

pub struct HeuristicExtractor {
    proper_noun: Regex,
    acronym: Regex,
}

impl HeuristicExtractor {
    pub fn new() -> Result<Self, ExtractionError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ExtractionError::Backend {
                backend: "heuristic".into(),
                message: format!("invalid pattern {pattern}: {e}"),
            })
        };
        Ok(Self {
            proper_noun: compile(PROPER_NOUN)?,
            acronym: compile(ACRONYM)?,
        })
    }

    /// Distinct normalized names in order of appearance (proper nouns first).
    pub fn entity_names(&self, text: &str, limit: usize) -> Vec<String> {
        let raw = self
            .proper_noun
            .find_iter(text)
            .chain(self.acronym.find_iter(text))
            .map(|m| m.as_str());

        let mut names: Vec<String> = Vec::new();
        for candidate in raw {
            let name = normalize_entity_name(candidate);
            if name.is_empty() || BLOCKED.contains(&name.as_str()) || names.contains(&name) {
                continue;
            }
            names.push(name);
        }
        names.truncate(limit);
        names
    }
}

/// Relation type and confidence implied by keywords in `text`.
pub fn classify_relation(text: &str) -> (&'static str, f32) {
    let lower = text.to_lowercase();
    RELATION_RULES
        .iter()
        .find(|(keywords, _, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, relation_type, confidence)| (*relation_type, *confidence))
        .unwrap_or(FALLBACK_RELATION)
}

/// Collapse whitespace; keep all-caps tokens, capitalize every word otherwise.
pub fn normalize_entity_name(value: &str) -> String {
    let compact = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.is_empty() || is_all_caps(&compact) {
        return compact;
    }
    compact
        .split(' ')
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Coarse type from the name's shape.
pub fn infer_entity_type(name: &str) -> &'static str {
    let starts_upper = name.chars().next().is_some_and(char::is_uppercase);
    if name.contains(' ') && starts_upper {
        "person"
    } else if is_all_caps(name) {
        "technology"
    } else {
        "concept"
    }
}

fn is_all_caps(s: &str) -> bool {
    s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl Extractor for HeuristicExtractor {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult, ExtractionError> {
        let actor = normalize_entity_name(&request.actor_id);
        let mut names = self.entity_names(&request.text, request.max_entities);
        if !actor.is_empty() && !names.contains(&actor) {
            names.insert(0, actor.clone());
        }

        let entities = names
            .iter()
            .map(|name| EntityCandidate {
                name: name.clone(),
                entity_type: infer_entity_type(name).to_string(),
                confidence: ENTITY_CONFIDENCE,
            })
            .collect();

        let (relation_type, confidence) = classify_relation(&request.text);
        let relations = if actor.is_empty() {
            Vec::new()
        } else {
            names
                .iter()
                .filter(|name| **name != actor)
                .take(MAX_RELATIONS)
                .map(|target| RelationCandidate {
                    source: actor.clone(),
                    target: target.clone(),
                    relation_type: relation_type.to_string(),
                    confidence,
                })
                .collect()
        };

        Ok(ExtractionResult {
            entities,
            relations,
            method: "heuristic".into(),
            fallback_errors: Vec::new(),
            usage: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> HeuristicExtractor {
        HeuristicExtractor::new().unwrap()
    }

    #[test]
    fn names_skip_blocked_words_and_duplicates() {
        let names = extractor().entity_names("The team met Alice Smith. Alice Smith uses the API and AWS.", 25);
        assert_eq!(names, vec!["Alice Smith", "AWS"]);
    }

    #[test]
    fn name_limit_applies() {
        let names = extractor().entity_names("Ann Bob Cat Dan", 1);
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_entity_name("  alice   smith "), "Alice Smith");
        assert_eq!(normalize_entity_name("AWS"), "AWS");
        assert_eq!(normalize_entity_name("mcDonald"), "Mcdonald");
        assert_eq!(normalize_entity_name("   "), "");
    }

    #[test]
    fn type_inference() {
        assert_eq!(infer_entity_type("Alice Smith"), "person");
        assert_eq!(infer_entity_type("GPU4"), "technology");
        assert_eq!(infer_entity_type("Alice"), "concept");
    }

    #[test]
    fn relation_keywords() {
        assert_eq!(classify_relation("I work with Bob"), ("collaborates_with", 0.86));
        assert_eq!(classify_relation("Carol is my mentor"), ("mentors", 0.84));
        assert_eq!(classify_relation("We are blocked by Legal"), ("blocked_by", 0.81));
        assert_eq!(classify_relation("Using Postgres daily"), ("uses", 0.82));
        assert_eq!(classify_relation("My goal is Rust"), ("interested_in", 0.78));
        assert_eq!(classify_relation("Met Dave"), ("related_to", 0.62));
    }

    #[tokio::test]
    async fn actor_is_prepended_and_linked() {
        let request = ExtractionRequest::new("I work with Bob Jones on Kubernetes.", "alice");
        let result = extractor().extract(&request).await.unwrap();

        assert_eq!(result.method, "heuristic");
        assert_eq!(result.entities[0].name, "Alice");
        assert!(result.entities.iter().all(|e| e.confidence == ENTITY_CONFIDENCE));
        assert_eq!(result.relations.len(), result.entities.len() - 1);
        assert!(result
            .relations
            .iter()
            .all(|r| r.source == "Alice" && r.relation_type == "collaborates_with"));
    }

    #[tokio::test]
    async fn actor_already_mentioned_is_not_duplicated() {
        let request = ExtractionRequest::new("Alice met Bob", "Alice");
        let result = extractor().extract(&request).await.unwrap();
        let alices = result.entities.iter().filter(|e| e.name == "Alice").count();
        assert_eq!(alices, 1);
        assert_eq!(result.relations.len(), 1);
        assert_eq!(result.relations[0].target, "Bob");
    }
}
