//! Human review of medium-confidence candidates.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use temple_audit::{AuditAction, AuditLogger, AuditOutcome};
use temple_core::error::{Error, IngestError};
use temple_core::event::{DomainEvent, EventBus};
use temple_core::extraction::Candidate;
use temple_core::graph::{GraphBackend, NewEntity, NewRelation, Provenance};
use temple_core::ingest::{IngestItem, ReviewCandidate, ReviewDecision, ReviewStatus};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::store::FileIngestStore;

/// Applies review decisions. Shares the graph lock with the enrichment worker.
pub struct ReviewQueue {
    store: Arc<FileIngestStore>,
    graph: Arc<dyn GraphBackend>,
    graph_lock: Arc<Mutex<()>>,
    audit: Arc<AuditLogger>,
    events: Arc<EventBus>,
}

impl ReviewQueue {
    pub fn new(
        store: Arc<FileIngestStore>,
        graph: Arc<dyn GraphBackend>,
        graph_lock: Arc<Mutex<()>>,
        audit: Arc<AuditLogger>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            graph,
            graph_lock,
            audit,
            events,
        }
    }

    pub async fn list(&self, status: Option<ReviewStatus>, limit: usize) -> Vec<ReviewCandidate> {
        self.store.list_reviews(status, limit).await
    }

    /// Approve or reject one pending candidate.
    ///
    /// Approval writes the candidate with its original confidence and the
    /// item's ingest provenance. If the write fails (a relation endpoint is
    /// missing) the candidate stays pending with the error recorded. Once the
    /// last candidate of an item is decided, the item becomes `approved` if
    /// any candidate was approved, `rejected` otherwise.
    pub async fn decide(&self, review_id: &str, decision: ReviewDecision) -> Result<ReviewCandidate, Error> {
        let (item, review) = self
            .store
            .find_review(review_id)
            .await
            .ok_or_else(|| IngestError::ReviewNotFound(review_id.to_string()))?;
        if review.status != ReviewStatus::Pending {
            return Err(IngestError::AlreadyDecided(review_id.to_string()).into());
        }

        let _guard = self.graph_lock.lock().await;

        if decision.approve
            && let Err(e) = self.apply(&item, &review).await
        {
            warn!(review_id, error = %e, "Approved candidate could not be written");
            let message = e.to_string();
            self.store
                .update(&item.id, |stored| {
                    if let Some(r) = stored.reviews.iter_mut().find(|r| r.id == review_id) {
                        r.error = Some(message);
                    }
                    Ok(())
                })
                .await?;
            self.audit.log(
                AuditAction::ReviewDecision,
                &review.scope,
                AuditOutcome::Failure,
                json!({"review_id": review_id, "item_id": item.id, "error": e.to_string()}),
            );
            return Err(e.into());
        }

        let now = Utc::now();
        let (decided, resolved) = self
            .store
            .update(&item.id, |stored| {
                let from = stored.state;
                let review = stored
                    .reviews
                    .iter_mut()
                    .find(|r| r.id == review_id)
                    .ok_or_else(|| IngestError::ReviewNotFound(review_id.to_string()))?;
                if review.status != ReviewStatus::Pending {
                    return Err(IngestError::AlreadyDecided(review_id.to_string()));
                }
                review.status = if decision.approve {
                    ReviewStatus::Approved
                } else {
                    ReviewStatus::Rejected
                };
                review.reviewer = decision.reviewer.clone();
                review.notes = decision.notes.clone();
                review.error = None;
                review.decided_at = Some(now);
                let decided = review.clone();

                let resolved = match stored.review_resolution() {
                    Some(to) => {
                        stored.transition(to, Some("all review candidates decided".into()), now)?;
                        Some((from, to))
                    }
                    None => None,
                };
                Ok((decided, resolved))
            })
            .await?;

        self.audit.log(
            AuditAction::ReviewDecision,
            &decided.scope,
            AuditOutcome::Success,
            json!({
                "review_id": decided.id,
                "item_id": decided.item_id,
                "approved": decision.approve,
                "candidate": decided.candidate.describe(),
                "reviewer": decided.reviewer,
            }),
        );
        self.events.publish(DomainEvent::ReviewDecided {
            review_id: decided.id.clone(),
            item_id: decided.item_id.clone(),
            approved: decision.approve,
            timestamp: now,
        });
        if let Some((from, to)) = resolved {
            info!(item_id = %decided.item_id, state = %to, "Ingest item review complete");
            self.audit.log(
                AuditAction::IngestTransition,
                &decided.scope,
                AuditOutcome::Success,
                json!({"item_id": decided.item_id, "from": from, "to": to}),
            );
            self.events.publish(DomainEvent::IngestStateChanged {
                item_id: decided.item_id.clone(),
                from,
                to,
                timestamp: now,
            });
        }
        Ok(decided)
    }

    async fn apply(&self, item: &IngestItem, review: &ReviewCandidate) -> Result<(), temple_core::error::GraphError> {
        let provenance = Provenance::ingest(&item.id);
        match &review.candidate {
            Candidate::Entity(entity) => {
                self.graph
                    .create_entity(NewEntity {
                        name: entity.name.clone(),
                        entity_type: entity.entity_type.clone(),
                        scope: review.scope.clone(),
                        observations: Vec::new(),
                        confidence: entity.confidence,
                        provenance,
                    })
                    .await?;
            }
            Candidate::Relation(relation) => {
                self.graph
                    .create_relation(NewRelation {
                        source: relation.source.clone(),
                        target: relation.target.clone(),
                        relation_type: relation.relation_type.clone(),
                        scope: review.scope.clone(),
                        confidence: relation.confidence,
                        provenance,
                    })
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temple_core::error::GraphError;
    use temple_core::extraction::{EntityCandidate, RelationCandidate};
    use temple_core::ingest::{IngestState, IngestSubmission};
    use temple_core::scope::Scope;
    use temple_memory::InMemoryGraph;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<FileIngestStore>,
        graph: Arc<InMemoryGraph>,
        queue: ReviewQueue,
    }

    /// One item in `queued_for_review` holding the given candidates.
    async fn fixture(candidates: Vec<Candidate>) -> (Fixture, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileIngestStore::open(dir.path()).await.unwrap());
        let graph = Arc::new(InMemoryGraph::new());
        let item = store
            .submit(IngestSubmission::new("note", "alice", "test", "Alice works with Bob"))
            .await
            .unwrap()
            .item;
        store
            .update(&item.id, |it| {
                let now = Utc::now();
                it.transition(IngestState::Extracting, None, now)?;
                for c in candidates {
                    it.reviews.push(ReviewCandidate::new(&it.id.clone(), c, Scope::Global, now));
                }
                it.transition(IngestState::QueuedForReview, None, now)
            })
            .await
            .unwrap();
        let queue = ReviewQueue::new(
            store.clone(),
            graph.clone(),
            Arc::new(Mutex::new(())),
            Arc::new(AuditLogger::new()),
            Arc::new(EventBus::default()),
        );
        (
            Fixture {
                _dir: dir,
                store,
                graph,
                queue,
            },
            item.id,
        )
    }

    fn entity(name: &str) -> Candidate {
        Candidate::Entity(EntityCandidate {
            name: name.into(),
            entity_type: "person".into(),
            confidence: 0.7,
        })
    }

    fn relation(source: &str, target: &str) -> Candidate {
        Candidate::Relation(RelationCandidate {
            source: source.into(),
            target: target.into(),
            relation_type: "works_with".into(),
            confidence: 0.65,
        })
    }

    fn approve() -> ReviewDecision {
        ReviewDecision {
            approve: true,
            reviewer: Some("carol".into()),
            notes: None,
        }
    }

    fn reject() -> ReviewDecision {
        ReviewDecision {
            approve: false,
            reviewer: None,
            notes: Some("not relevant".into()),
        }
    }

    #[tokio::test]
    async fn approval_writes_with_ingest_provenance() {
        let (fx, item_id) = fixture(vec![entity("Bob")]).await;
        let review = fx.queue.list(Some(ReviewStatus::Pending), 10).await.remove(0);

        let decided = fx.queue.decide(&review.id, approve()).await.unwrap();
        assert_eq!(decided.status, ReviewStatus::Approved);
        assert_eq!(decided.reviewer.as_deref(), Some("carol"));

        let bob = fx.graph.get_entity("Bob", &Scope::Global).await.unwrap().unwrap();
        assert_eq!(bob.provenance, Provenance::ingest(&item_id));
        assert!((bob.confidence - 0.7).abs() < f32::EPSILON);

        let item = fx.store.get(&item_id).await.unwrap();
        assert_eq!(item.state, IngestState::Approved);
        assert!(item.history_is_valid());
    }

    #[tokio::test]
    async fn item_waits_for_every_decision() {
        let (fx, item_id) = fixture(vec![entity("Bob"), entity("Carol")]).await;
        let reviews = fx.queue.list(None, 10).await;

        fx.queue.decide(&reviews[0].id, reject()).await.unwrap();
        assert_eq!(fx.store.get(&item_id).await.unwrap().state, IngestState::QueuedForReview);

        fx.queue.decide(&reviews[1].id, reject()).await.unwrap();
        assert_eq!(fx.store.get(&item_id).await.unwrap().state, IngestState::Rejected);
        assert_eq!(fx.graph.entity_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn relation_with_missing_endpoint_stays_pending() {
        let (fx, item_id) = fixture(vec![relation("Alice", "Bob")]).await;
        let review = fx.queue.list(None, 10).await.remove(0);

        let err = fx.queue.decide(&review.id, approve()).await.unwrap_err();
        assert!(matches!(err, Error::Graph(GraphError::WriteConflict { .. })));

        let pending = fx.queue.list(Some(ReviewStatus::Pending), 10).await;
        assert_eq!(pending.len(), 1);
        assert!(pending[0].error.is_some());
        assert_eq!(fx.store.get(&item_id).await.unwrap().state, IngestState::QueuedForReview);

        // Once both endpoints exist the same approval succeeds.
        for name in ["Alice", "Bob"] {
            fx.graph
                .create_entity(NewEntity::direct(name, "person", Scope::Global))
                .await
                .unwrap();
        }
        fx.queue.decide(&review.id, approve()).await.unwrap();
        assert_eq!(fx.graph.relation_count(None).await.unwrap(), 1);
        assert_eq!(fx.store.get(&item_id).await.unwrap().state, IngestState::Approved);
    }

    #[tokio::test]
    async fn decisions_are_final() {
        let (fx, _) = fixture(vec![entity("Bob")]).await;
        let review = fx.queue.list(None, 10).await.remove(0);
        fx.queue.decide(&review.id, reject()).await.unwrap();

        let err = fx.queue.decide(&review.id, approve()).await.unwrap_err();
        assert!(matches!(err, Error::Ingest(IngestError::AlreadyDecided(_))));
        assert!(matches!(
            fx.queue.decide("nope", approve()).await,
            Err(Error::Ingest(IngestError::ReviewNotFound(_)))
        ));
    }
}
