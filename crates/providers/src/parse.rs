//! Parsing and validation of LLM extraction output.
//!
//! Models are asked for bare JSON but sometimes wrap it in a markdown fence
//! or stray from the schema. Unknown types are coerced to the generic type and
//! relations whose endpoints are not in the entity list are dropped.

use serde_json::Value;
use temple_core::error::ExtractionError;
use temple_core::extraction::{EntityCandidate, RelationCandidate, ENTITY_TYPES, RELATION_TYPES};

const DEFAULT_CONFIDENCE: f32 = 0.7;

/// Parse a model reply as JSON, tolerating a surrounding code fence.
pub fn parse_llm_json(raw: &str) -> Result<Value, ExtractionError> {
    let mut text = raw.trim();
    if text.starts_with("```") {
        // Drop the opening fence line (```json or ```) and a closing fence.
        text = text.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
        text = text.trim_end();
        if let Some(stripped) = text.strip_suffix("```") {
            text = stripped;
        }
    }
    serde_json::from_str(text)
        .map_err(|e| ExtractionError::InvalidResponse(format!("model reply is not JSON: {e}")))
}

fn confidence(item: &Value) -> f32 {
    item.get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0) as f32)
        .unwrap_or(DEFAULT_CONFIDENCE)
}

fn text_field(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

/// Keep well-formed entities, first occurrence of each name.
pub fn validate_entities(raw: &Value) -> Vec<EntityCandidate> {
    let mut entities: Vec<EntityCandidate> = Vec::new();
    for item in raw.as_array().into_iter().flatten().filter(|v| v.is_object()) {
        let name = text_field(item, "name");
        if name.is_empty() || entities.iter().any(|e| e.name == name) {
            continue;
        }
        let entity_type = text_field(item, "type");
        let entity_type = if ENTITY_TYPES.contains(&entity_type.as_str()) {
            entity_type
        } else {
            "concept".to_string()
        };
        entities.push(EntityCandidate {
            name,
            entity_type,
            confidence: confidence(item),
        });
    }
    entities
}

/// Keep relations between two distinct known entities.
pub fn validate_relations(raw: &Value, entities: &[EntityCandidate]) -> Vec<RelationCandidate> {
    let known = |name: &str| entities.iter().any(|e| e.name == name);
    let mut relations = Vec::new();
    for item in raw.as_array().into_iter().flatten().filter(|v| v.is_object()) {
        let source = text_field(item, "source");
        let target = text_field(item, "target");
        if source.is_empty() || target.is_empty() || source == target {
            continue;
        }
        if !known(&source) || !known(&target) {
            continue;
        }
        let relation_type = text_field(item, "type");
        let relation_type = if RELATION_TYPES.contains(&relation_type.as_str()) {
            relation_type
        } else {
            "related_to".to_string()
        };
        relations.push(RelationCandidate {
            source,
            target,
            relation_type,
            confidence: confidence(item),
        });
    }
    relations
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"entities\": [], \"relations\": []}\n```";
        let value = parse_llm_json(raw).unwrap();
        assert!(value["entities"].is_array());

        let bare = parse_llm_json("  {\"entities\": []}  ").unwrap();
        assert!(bare["entities"].is_array());
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_llm_json("Sure! Here are the entities."),
            Err(ExtractionError::InvalidResponse(_))
        ));
    }

    #[test]
    fn entity_validation() {
        let raw = json!([
            {"name": "Alice", "type": "person", "confidence": 0.95},
            {"name": "Alice", "type": "person", "confidence": 0.1},
            {"name": "Rust", "type": "language", "confidence": 3},
            {"name": "  ", "type": "person"},
            {"name": "Bob", "confidence": "high"},
            "not an object"
        ]);
        let entities = validate_entities(&raw);
        assert_eq!(entities.len(), 3);
        assert_eq!(entities[0].confidence, 0.95);
        assert_eq!(entities[1].entity_type, "concept");
        assert_eq!(entities[1].confidence, 1.0);
        assert_eq!(entities[2].confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn relation_validation() {
        let entities = validate_entities(&json!([
            {"name": "Alice", "type": "person"},
            {"name": "Bob", "type": "person"}
        ]));
        let raw = json!([
            {"source": "Alice", "target": "Bob", "type": "works_with", "confidence": 0.9},
            {"source": "Alice", "target": "Alice", "type": "works_with"},
            {"source": "Alice", "target": "Carol", "type": "works_with"},
            {"source": "Bob", "target": "Alice", "type": "befriends", "confidence": -1}
        ]);
        let relations = validate_relations(&raw, &entities);
        assert_eq!(relations.len(), 2);
        assert_eq!(relations[0].relation_type, "works_with");
        assert_eq!(relations[1].relation_type, "related_to");
        assert_eq!(relations[1].confidence, 0.0);
    }
}
