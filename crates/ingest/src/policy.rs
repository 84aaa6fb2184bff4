//! Confidence policy — routes extracted candidates to auto-apply, review or drop.

use temple_config::IngestConfig;
use temple_core::extraction::{Candidate, EntityCandidate, ExtractionResult, RelationCandidate};
use temple_core::graph::{GraphBatch, NewEntity, NewRelation, Provenance};
use temple_core::ingest::IngestState;
use temple_core::scope::Scope;

/// Ordered so that `min` picks the weaker band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Band {
    Drop,
    Review,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidencePolicy {
    pub high: f32,
    pub review: f32,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            high: 0.80,
            review: 0.60,
        }
    }
}

impl From<&IngestConfig> for ConfidencePolicy {
    fn from(config: &IngestConfig) -> Self {
        Self {
            high: config.high_confidence,
            review: config.review_confidence,
        }
    }
}

/// How one extraction result splits up.
#[derive(Debug, Clone, Default)]
pub struct PolicyPlan {
    /// High-band candidates, written as one batch
    pub apply: GraphBatch,
    /// Review-band candidates
    pub review: Vec<Candidate>,
    pub dropped: usize,
}

impl PolicyPlan {
    /// The state the item moves to once the plan is carried out.
    pub fn next_state(&self) -> IngestState {
        if !self.review.is_empty() {
            IngestState::QueuedForReview
        } else if !self.apply.is_empty() {
            IngestState::AutoApplied
        } else {
            IngestState::Discarded
        }
    }
}

impl ConfidencePolicy {
    pub fn band(&self, confidence: f32) -> Band {
        if confidence >= self.high {
            Band::High
        } else if confidence >= self.review {
            Band::Review
        } else {
            Band::Drop
        }
    }

    /// A relation never lands in a stronger band than an endpoint that is
    /// itself a candidate of the same extraction.
    pub fn relation_band(&self, relation: &RelationCandidate, entities: &[EntityCandidate]) -> Band {
        [&relation.source, &relation.target]
            .into_iter()
            .filter_map(|name| entities.iter().find(|e| e.name == *name))
            .map(|endpoint| self.band(endpoint.confidence))
            .fold(self.band(relation.confidence), Band::min)
    }

    pub fn plan(&self, result: &ExtractionResult, scope: &Scope, item_id: &str) -> PolicyPlan {
        let mut plan = PolicyPlan::default();

        for entity in &result.entities {
            match self.band(entity.confidence) {
                Band::High => plan.apply.entities.push(NewEntity {
                    name: entity.name.clone(),
                    entity_type: entity.entity_type.clone(),
                    scope: scope.clone(),
                    observations: Vec::new(),
                    confidence: entity.confidence,
                    provenance: Provenance::ingest(item_id),
                }),
                Band::Review => plan.review.push(Candidate::Entity(entity.clone())),
                Band::Drop => plan.dropped += 1,
            }
        }

        for relation in &result.relations {
            match self.relation_band(relation, &result.entities) {
                Band::High => plan.apply.relations.push(NewRelation {
                    source: relation.source.clone(),
                    target: relation.target.clone(),
                    relation_type: relation.relation_type.clone(),
                    scope: scope.clone(),
                    confidence: relation.confidence,
                    provenance: Provenance::ingest(item_id),
                }),
                Band::Review => plan.review.push(Candidate::Relation(relation.clone())),
                Band::Drop => plan.dropped += 1,
            }
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, confidence: f32) -> EntityCandidate {
        EntityCandidate {
            name: name.into(),
            entity_type: "person".into(),
            confidence,
        }
    }

    fn relation(source: &str, target: &str, confidence: f32) -> RelationCandidate {
        RelationCandidate {
            source: source.into(),
            target: target.into(),
            relation_type: "works_with".into(),
            confidence,
        }
    }

    fn result(entities: Vec<EntityCandidate>, relations: Vec<RelationCandidate>) -> ExtractionResult {
        ExtractionResult {
            entities,
            relations,
            method: "stub".into(),
            ..Default::default()
        }
    }

    #[test]
    fn band_boundaries() {
        let policy = ConfidencePolicy::default();
        assert_eq!(policy.band(0.80), Band::High);
        assert_eq!(policy.band(0.79), Band::Review);
        assert_eq!(policy.band(0.60), Band::Review);
        assert_eq!(policy.band(0.59), Band::Drop);
    }

    #[test]
    fn mixed_result_queues_for_review() {
        let policy = ConfidencePolicy::default();
        let plan = policy.plan(
            &result(
                vec![entity("Alice", 0.9), entity("Bob", 0.9)],
                vec![relation("Alice", "Bob", 0.65)],
            ),
            &Scope::Global,
            "item-1",
        );
        assert_eq!(plan.apply.entities.len(), 2);
        assert!(plan.apply.relations.is_empty());
        assert_eq!(plan.review.len(), 1);
        assert_eq!(plan.next_state(), IngestState::QueuedForReview);
        assert_eq!(plan.apply.entities[0].provenance, Provenance::ingest("item-1"));
    }

    #[test]
    fn all_high_auto_applies() {
        let plan = ConfidencePolicy::default().plan(
            &result(
                vec![entity("Alice", 0.9), entity("Bob", 0.85)],
                vec![relation("Alice", "Bob", 0.95)],
            ),
            &Scope::project("x"),
            "item-2",
        );
        assert_eq!(plan.apply.relations.len(), 1);
        assert_eq!(plan.apply.relations[0].scope, Scope::project("x"));
        assert_eq!(plan.next_state(), IngestState::AutoApplied);
    }

    #[test]
    fn all_low_or_empty_discards() {
        let policy = ConfidencePolicy::default();
        let low = policy.plan(&result(vec![entity("Alice", 0.3)], vec![]), &Scope::Global, "i");
        assert_eq!(low.dropped, 1);
        assert_eq!(low.next_state(), IngestState::Discarded);

        let empty = policy.plan(&result(vec![], vec![]), &Scope::Global, "i");
        assert_eq!(empty.next_state(), IngestState::Discarded);
    }

    #[test]
    fn relation_demoted_by_weak_endpoint() {
        let policy = ConfidencePolicy::default();
        let entities = vec![entity("Alice", 0.9), entity("Bob", 0.7)];
        assert_eq!(policy.relation_band(&relation("Alice", "Bob", 0.95), &entities), Band::Review);

        let weaker = vec![entity("Alice", 0.9), entity("Bob", 0.2)];
        assert_eq!(policy.relation_band(&relation("Alice", "Bob", 0.95), &weaker), Band::Drop);

        // Endpoints that are not candidates (already in the graph) do not demote.
        assert_eq!(policy.relation_band(&relation("Alice", "Carol", 0.9), &entities), Band::High);
    }

    #[test]
    fn from_config() {
        let config = IngestConfig {
            high_confidence: 0.9,
            review_confidence: 0.5,
            ..Default::default()
        };
        let policy = ConfidencePolicy::from(&config);
        assert_eq!(policy.band(0.85), Band::Review);
    }
}
