//! Enrichment worker — drains `received` items through extraction, the
//! confidence policy and the graph.
//!
//! Items are processed strictly in submission order. Every state change is
//! persisted before the next step starts, so a crash leaves at worst an item
//! in `extracting`, which [`EnrichmentWorker::recover`] moves back.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use temple_audit::{AuditAction, AuditLogger, AuditOutcome};
use temple_config::IngestConfig;
use temple_core::error::IngestError;
use temple_core::event::{DomainEvent, EventBus};
use temple_core::extraction::{ExtractionRequest, Extractor};
use temple_core::graph::GraphBackend;
use temple_core::ingest::{IngestItem, IngestOutcome, IngestState, ReviewCandidate};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::policy::ConfidencePolicy;
use crate::store::FileIngestStore;

pub struct EnrichmentWorker {
    store: Arc<FileIngestStore>,
    graph: Arc<dyn GraphBackend>,
    extractor: Arc<dyn Extractor>,
    policy: ConfidencePolicy,
    max_attempts: u32,
    max_entities: usize,
    poll_interval: Duration,
    graph_lock: Arc<Mutex<()>>,
    audit: Arc<AuditLogger>,
    events: Arc<EventBus>,
}

impl EnrichmentWorker {
    pub fn new(
        store: Arc<FileIngestStore>,
        graph: Arc<dyn GraphBackend>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let defaults = IngestConfig::default();
        Self {
            store,
            graph,
            extractor,
            policy: ConfidencePolicy::from(&defaults),
            max_attempts: defaults.max_attempts,
            max_entities: 25,
            poll_interval: Duration::from_millis(defaults.poll_interval_ms),
            graph_lock: Arc::new(Mutex::new(())),
            audit: Arc::new(AuditLogger::disabled()),
            events: Arc::new(EventBus::default()),
        }
    }

    pub fn with_config(mut self, config: &IngestConfig) -> Self {
        self.policy = ConfidencePolicy::from(config);
        self.max_attempts = config.max_attempts.max(1);
        self.poll_interval = Duration::from_millis(config.poll_interval_ms.max(10));
        self
    }

    pub fn with_max_entities(mut self, max_entities: usize) -> Self {
        self.max_entities = max_entities.max(1);
        self
    }

    /// Share the lock that serializes every graph mutation.
    pub fn with_graph_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.graph_lock = lock;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn policy(&self) -> &ConfidencePolicy {
        &self.policy
    }

    /// Move items left in `extracting` back to `received`.
    pub async fn recover(&self) -> Result<usize, IngestError> {
        let recovered = self.store.recover_extracting().await?;
        for id in &recovered {
            if let Some(item) = self.store.get(id).await {
                self.record_transition(&item, IngestState::Extracting, IngestState::Received);
            }
        }
        Ok(recovered.len())
    }

    /// Process every `received` item once. Returns how many were processed.
    pub async fn run_once(&self) -> usize {
        self.drain(None).await
    }

    /// Recover, then poll until `shutdown` turns true or its sender is dropped.
    /// Shutdown is checked between items; an item in flight finishes first.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match self.recover().await {
                Ok(0) => {}
                Ok(n) => info!(recovered = n, "Recovered interrupted ingest items"),
                Err(e) => warn!(error = %e, "Ingest recovery failed"),
            }
            info!(poll_ms = self.poll_interval.as_millis() as u64, "Enrichment worker started");

            loop {
                if *shutdown.borrow() {
                    break;
                }
                let processed = self.drain(Some(&shutdown)).await;
                if processed > 0 {
                    debug!(processed, "Enrichment pass complete");
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("Enrichment worker stopped");
        })
    }

    async fn drain(&self, shutdown: Option<&watch::Receiver<bool>>) -> usize {
        let pending = self.store.list(Some(IngestState::Received)).await;
        let mut processed = 0;
        for item in pending {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                debug!("Shutdown requested, leaving remaining items queued");
                break;
            }
            match self.process(&item.id).await {
                Ok(state) => {
                    processed += 1;
                    debug!(item_id = %item.id, state = %state, "Ingest item processed");
                }
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "Ingest item processing failed");
                    self.events.publish(DomainEvent::ErrorOccurred {
                        context: format!("ingest:{}", item.id),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }
        processed
    }

    /// One pass over one item. Returns the state it ends in.
    async fn process(&self, id: &str) -> Result<IngestState, IngestError> {
        let item = self
            .store
            .update(id, |item| {
                item.transition(IngestState::Extracting, None, Utc::now())?;
                Ok(item.clone())
            })
            .await?;
        self.record_transition(&item, IngestState::Received, IngestState::Extracting);

        let mut request = ExtractionRequest::new(&item.content, &item.actor_id);
        request.item_type = item.item_type.clone();
        request.max_entities = self.max_entities;

        let result = match self.extractor.extract(&request).await {
            Ok(result) => result,
            Err(e) => return self.fail(&item, e.to_string()).await,
        };
        for skipped in &result.fallback_errors {
            debug!(item_id = %item.id, error = %skipped, "Extraction backend skipped");
        }

        let plan = self.policy.plan(&result, &item.scope, &item.id);
        let next = plan.next_state();
        let mut outcome = IngestOutcome {
            queued: plan.review.len(),
            dropped: plan.dropped,
            ..Default::default()
        };

        if !plan.apply.is_empty() {
            let report = {
                let _guard = self.graph_lock.lock().await;
                self.graph.apply_batch(plan.apply.clone()).await
            };
            match report {
                Ok(report) => {
                    outcome.entities_applied = report.entities_created;
                    outcome.relations_applied = report.relations_created;
                    self.audit.log(
                        AuditAction::IngestApply,
                        &item.scope,
                        AuditOutcome::Success,
                        json!({
                            "item_id": item.id,
                            "entities_created": report.entities_created,
                            "entities_existing": report.entities_existing,
                            "relations_created": report.relations_created,
                            "relations_existing": report.relations_existing,
                        }),
                    );
                }
                Err(e) => return self.fail(&item, e.to_string()).await,
            }
        }

        let method = result.method.clone();
        let item = self
            .store
            .update(id, move |stored| {
                let now = Utc::now();
                let (item_id, scope) = (stored.id.clone(), stored.scope.clone());
                stored.extraction_method = Some(method);
                stored.last_error = None;
                stored.outcome = Some(outcome);
                stored.reviews.extend(
                    plan.review
                        .into_iter()
                        .map(|c| ReviewCandidate::new(&item_id, c, scope.clone(), now)),
                );
                stored.transition(next, None, now)?;
                Ok(stored.clone())
            })
            .await?;
        self.record_transition(&item, IngestState::Extracting, next);
        info!(
            item_id = %item.id,
            state = %next,
            method = item.extraction_method.as_deref().unwrap_or_default(),
            "Ingest item enriched"
        );
        Ok(next)
    }

    /// Count the failed attempt; retry or give up at `max_attempts`.
    async fn fail(&self, item: &IngestItem, error: String) -> Result<IngestState, IngestError> {
        let max_attempts = self.max_attempts;
        let reason = error.clone();
        let updated = self
            .store
            .update(&item.id, move |stored| {
                stored.attempts += 1;
                stored.last_error = Some(reason.clone());
                let next = if stored.attempts >= max_attempts {
                    IngestState::Discarded
                } else {
                    IngestState::Received
                };
                stored.transition(next, Some(reason), Utc::now())?;
                Ok(stored.clone())
            })
            .await?;

        warn!(
            item_id = %updated.id,
            attempts = updated.attempts,
            max_attempts,
            error = %error,
            "Ingest extraction attempt failed"
        );
        self.audit.log(
            AuditAction::IngestTransition,
            &updated.scope,
            AuditOutcome::Failure,
            json!({"item_id": updated.id, "attempts": updated.attempts, "error": error}),
        );
        self.record_transition(&updated, IngestState::Extracting, updated.state);
        Ok(updated.state)
    }

    fn record_transition(&self, item: &IngestItem, from: IngestState, to: IngestState) {
        self.audit.log(
            AuditAction::IngestTransition,
            &item.scope,
            AuditOutcome::Success,
            json!({"item_id": item.id, "from": from, "to": to}),
        );
        self.events.publish(DomainEvent::IngestStateChanged {
            item_id: item.id.clone(),
            from,
            to,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use temple_core::error::ExtractionError;
    use temple_core::extraction::{EntityCandidate, ExtractionResult, RelationCandidate};
    use temple_core::ingest::IngestSubmission;
    use temple_core::scope::Scope;
    use temple_memory::InMemoryGraph;

    /// Returns a fixed result, or fails every call.
    struct FixedExtractor {
        result: Option<ExtractionResult>,
        calls: AtomicUsize,
    }

    impl FixedExtractor {
        fn returning(entities: Vec<(&str, f32)>, relations: Vec<(&str, &str, f32)>) -> Self {
            Self {
                result: Some(ExtractionResult {
                    entities: entities
                        .into_iter()
                        .map(|(name, confidence)| EntityCandidate {
                            name: name.into(),
                            entity_type: "person".into(),
                            confidence,
                        })
                        .collect(),
                    relations: relations
                        .into_iter()
                        .map(|(source, target, confidence)| RelationCandidate {
                            source: source.into(),
                            target: target.into(),
                            relation_type: "works_with".into(),
                            confidence,
                        })
                        .collect(),
                    method: "fixed".into(),
                    ..Default::default()
                }),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                result: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Extractor for FixedExtractor {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn extract(&self, _request: &ExtractionRequest) -> Result<ExtractionResult, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().ok_or_else(|| ExtractionError::Backend {
                backend: "fixed".into(),
                message: "unavailable".into(),
            })
        }
    }

    async fn setup(
        extractor: FixedExtractor,
    ) -> (tempfile::TempDir, Arc<FileIngestStore>, Arc<InMemoryGraph>, Arc<FixedExtractor>, EnrichmentWorker) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileIngestStore::open(dir.path()).await.unwrap());
        let graph = Arc::new(InMemoryGraph::new());
        let extractor = Arc::new(extractor);
        let worker = EnrichmentWorker::new(store.clone(), graph.clone(), extractor.clone());
        (dir, store, graph, extractor, worker)
    }

    fn note(content: &str) -> IngestSubmission {
        IngestSubmission::new("note", "alice", "test", content)
    }

    #[tokio::test]
    async fn mixed_confidence_queues_for_review() {
        let (_dir, store, graph, _, worker) = setup(FixedExtractor::returning(
            vec![("Alice", 0.9), ("Bob", 0.9)],
            vec![("Alice", "Bob", 0.65)],
        ))
        .await;
        let item = store.submit(note("Alice works with Bob").with_key("k1")).await.unwrap().item;

        assert_eq!(worker.run_once().await, 1);

        let item = store.get(&item.id).await.unwrap();
        assert_eq!(item.state, IngestState::QueuedForReview);
        assert_eq!(item.reviews.len(), 1);
        assert_eq!(item.extraction_method.as_deref(), Some("fixed"));
        assert_eq!(item.outcome.as_ref().unwrap().entities_applied, 2);
        assert!(item.history_is_valid());
        assert_eq!(graph.entity_count(Some(&Scope::Global)).await.unwrap(), 2);
        assert_eq!(graph.relation_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn all_high_auto_applies() {
        let (_dir, store, graph, _, worker) = setup(FixedExtractor::returning(
            vec![("Alice", 0.95), ("Bob", 0.9)],
            vec![("Alice", "Bob", 0.9)],
        ))
        .await;
        let item = store
            .submit(note("Alice works with Bob").with_scope(Scope::project("x")))
            .await
            .unwrap()
            .item;
        worker.run_once().await;

        assert_eq!(store.get(&item.id).await.unwrap().state, IngestState::AutoApplied);
        assert_eq!(graph.relation_count(Some(&Scope::project("x"))).await.unwrap(), 1);
        let alice = graph.get_entity("Alice", &Scope::project("x")).await.unwrap().unwrap();
        assert_eq!(alice.provenance, temple_core::graph::Provenance::ingest(&item.id));
    }

    #[tokio::test]
    async fn all_low_discards() {
        let (_dir, store, graph, _, worker) =
            setup(FixedExtractor::returning(vec![("Alice", 0.2)], vec![])).await;
        let item = store.submit(note("meh")).await.unwrap().item;
        worker.run_once().await;

        let item = store.get(&item.id).await.unwrap();
        assert_eq!(item.state, IngestState::Discarded);
        assert_eq!(item.outcome.unwrap().dropped, 1);
        assert_eq!(graph.entity_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failures_retry_then_discard() {
        let (_dir, store, _, extractor, worker) = setup(FixedExtractor::failing()).await;
        let item = store.submit(note("anything")).await.unwrap().item;

        worker.run_once().await;
        let after_one = store.get(&item.id).await.unwrap();
        assert_eq!(after_one.state, IngestState::Received);
        assert_eq!(after_one.attempts, 1);
        assert!(after_one.last_error.as_deref().unwrap().contains("unavailable"));

        worker.run_once().await;
        worker.run_once().await;
        let done = store.get(&item.id).await.unwrap();
        assert_eq!(done.state, IngestState::Discarded);
        assert_eq!(done.attempts, 3);
        assert!(done.history_is_valid());

        // Terminal items are never picked up again.
        assert_eq!(worker.run_once().await, 0);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn graph_conflict_rolls_back_and_retries() {
        // Carol is never extracted, so the relation has no target.
        let (_dir, store, graph, _, worker) = setup(FixedExtractor::returning(
            vec![("Alice", 0.9)],
            vec![("Alice", "Carol", 0.9)],
        ))
        .await;
        let item = store.submit(note("Alice works with Carol")).await.unwrap().item;

        let mut seen = Vec::new();
        for _ in 0..3 {
            worker.run_once().await;
            let current = store.get(&item.id).await.unwrap();
            seen.push((current.state, current.attempts));
            assert_eq!(graph.entity_count(None).await.unwrap(), 0);
        }
        assert_eq!(
            seen,
            vec![
                (IngestState::Received, 1),
                (IngestState::Received, 2),
                (IngestState::Discarded, 3),
            ]
        );
        let done = store.get(&item.id).await.unwrap();
        assert!(done.last_error.is_some());
        assert!(done.history_is_valid());
        assert_eq!(graph.relation_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn processes_in_submission_order() {
        let (_dir, store, _, _, worker) =
            setup(FixedExtractor::returning(vec![("Alice", 0.9)], vec![])).await;
        let events = Arc::new(EventBus::default());
        let worker = worker.with_events(events.clone());
        let mut rx = events.subscribe();

        let first = store.submit(note("first")).await.unwrap().item;
        let second = store.submit(note("second")).await.unwrap().item;
        worker.run_once().await;

        let mut extracting = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::IngestStateChanged { item_id, to: IngestState::Extracting, .. } = &*event {
                extracting.push(item_id.clone());
            }
        }
        assert_eq!(extracting, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn recover_then_process() {
        let (_dir, store, _, _, worker) =
            setup(FixedExtractor::returning(vec![("Alice", 0.9)], vec![])).await;
        let item = store.submit(note("stuck")).await.unwrap().item;
        store
            .update(&item.id, |it| it.transition(IngestState::Extracting, None, Utc::now()))
            .await
            .unwrap();

        assert_eq!(worker.run_once().await, 0);
        assert_eq!(worker.recover().await.unwrap(), 1);
        assert_eq!(worker.run_once().await, 1);
        let item = store.get(&item.id).await.unwrap();
        assert_eq!(item.state, IngestState::AutoApplied);
        assert!(item.history_is_valid());
    }

    #[tokio::test]
    async fn spawned_worker_stops_on_shutdown() {
        let (_dir, store, _, _, worker) =
            setup(FixedExtractor::returning(vec![("Alice", 0.9)], vec![])).await;
        let config = IngestConfig {
            poll_interval_ms: 20,
            ..Default::default()
        };
        let worker = Arc::new(worker.with_config(&config));
        let item = store.submit(note("background")).await.unwrap().item;

        let (tx, rx) = watch::channel(false);
        let handle = worker.spawn(rx);

        for _ in 0..100 {
            if store.get(&item.id).await.unwrap().state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.get(&item.id).await.unwrap().state, IngestState::AutoApplied);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
