//! The memory broker — the one entry point callers use.
//!
//! Owns the scope registry and wires the collaborators together: direct
//! memory writes and reads, direct graph operations, ingest submission and
//! review, export, stats and session cleanup. The enrichment worker runs over
//! the same store, graph and audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use temple_audit::{AuditAction, AuditLogger, AuditOutcome, AuditSink, JsonlAuditSink, TracingSink};
use temple_config::AppConfig;
use temple_core::error::{Error, IngestError, MemoryError, Result};
use temple_core::event::{DomainEvent, EventBus};
use temple_core::extraction::Extractor;
use temple_core::graph::{
    BatchReport, Direction, Entity, EntityQuery, EntityUpdate, GraphBackend, GraphBatch, GraphPath,
    NewEntity, NewRelation, Observation, Relation,
};
use temple_core::ingest::{IngestItem, IngestState, IngestSubmission, ReviewCandidate, ReviewDecision, ReviewStatus};
use temple_core::memory::{Embedder, MemoryEntry, VectorBackend};
use temple_core::scope::{ActiveContext, Scope};
use temple_ingest::{EnrichmentWorker, FileIngestStore, ReviewQueue, SubmitOutcome};
use temple_memory::{
    content_hash, FileVectorStore, HashingEmbedder, InMemoryGraph, InMemoryVectorStore, MigrationReport,
    SqliteGraphStore,
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::registry::{ContextUpdate, ExpiredSession, ScopeRegistry};
use crate::resolver::{merge_and_rank, resolve, store_destination, RankedHit};

// ── Requests and responses ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreRequest {
    pub content: String,
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Overwrite an existing entry with the same content
    #[serde(default)]
    pub force: bool,
}

impl StoreRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn in_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreOutcome {
    pub entry: MemoryEntry,
    /// The content already existed in the partition and nothing was written
    pub duplicate: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub expand_graph: bool,
}

/// Entities named in the hits, with their relations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphNeighbourhood {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieveResponse {
    pub scopes: Vec<Scope>,
    pub hits: Vec<RankedHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphNeighbourhood>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    /// Every tag must be present on a hit
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub k: Option<usize>,
}

/// An entity written through the direct API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityInput {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub scope: Option<Scope>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationInput {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    #[serde(default)]
    pub scope: Option<Scope>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportFilter {
    /// Export this scope only; every active scope otherwise
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub include_memories: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphExport {
    pub exported_at: DateTime<Utc>,
    pub scopes: Vec<Scope>,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memories: Option<Vec<MemoryEntry>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub tenant: String,
    pub context: ActiveContext,
    /// Record count per vector partition
    pub partitions: BTreeMap<String, usize>,
    pub entities: usize,
    pub relations: usize,
    /// Item count per ingest state
    pub ingest: BTreeMap<String, usize>,
    pub pending_reviews: usize,
    pub vector_backend: String,
    pub graph_backend: String,
    pub extraction_backend: String,
    pub embedder: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_result<E: std::fmt::Display>(name: &str, result: std::result::Result<(), E>) -> Self {
        Self {
            name: name.to_string(),
            healthy: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub components: Vec<ComponentHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweptSession {
    pub tenant: String,
    pub session_id: String,
    pub memories_dropped: bool,
    pub entities_removed: usize,
    pub relations_removed: usize,
}

// ── Construction ────────────────────────────────────────────────────────────

/// Assembles a [`MemoryBroker`]. Collaborators not supplied are built from
/// the configuration.
pub struct BrokerBuilder {
    config: AppConfig,
    vectors: Option<Arc<dyn VectorBackend>>,
    graph: Option<Arc<dyn GraphBackend>>,
    embedder: Option<Arc<dyn Embedder>>,
    extractor: Option<Arc<dyn Extractor>>,
    audit: Option<Arc<AuditLogger>>,
}

impl BrokerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            vectors: None,
            graph: None,
            embedder: None,
            extractor: None,
            audit: None,
        }
    }

    pub fn vectors(mut self, vectors: Arc<dyn VectorBackend>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn graph(mut self, graph: Arc<dyn GraphBackend>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub async fn build(self) -> Result<MemoryBroker> {
        let config = self.config;
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        let vectors: Arc<dyn VectorBackend> = match self.vectors {
            Some(vectors) => vectors,
            None => match config.memory.backend.as_str() {
                "file" => Arc::new(FileVectorStore::new(config.vectors_dir())),
                "memory" => Arc::new(InMemoryVectorStore::new()),
                other => {
                    return Err(Error::Config {
                        message: format!("unknown memory backend '{other}'"),
                    });
                }
            },
        };

        let mut sqlite = None;
        let graph: Arc<dyn GraphBackend> = match self.graph {
            Some(graph) => graph,
            None => match config.graph.backend.as_str() {
                "sqlite" => {
                    let store = Arc::new(SqliteGraphStore::open(&config.graph_path()).await?);
                    sqlite = Some(store.clone());
                    store as Arc<dyn GraphBackend>
                }
                "memory" => Arc::new(InMemoryGraph::new()),
                other => {
                    return Err(Error::Config {
                        message: format!("unknown graph backend '{other}'"),
                    });
                }
            },
        };

        let embedder: Arc<dyn Embedder> = match self.embedder {
            Some(embedder) => embedder,
            None => Arc::new(HashingEmbedder::new(config.memory.embedding_dimension)),
        };

        let extractor: Arc<dyn Extractor> = match self.extractor {
            Some(extractor) => extractor,
            None => Arc::new(temple_providers::build_from_config(&config.extraction)?),
        };

        let mut audit_log = None;
        let audit = match self.audit {
            Some(audit) => audit,
            None if config.audit.enabled => {
                let sink = Arc::new(JsonlAuditSink::new(config.audit_dir()));
                let sinks: Vec<Arc<dyn AuditSink>> = vec![sink.clone(), Arc::new(TracingSink)];
                audit_log = Some(sink);
                Arc::new(AuditLogger::with_sinks(sinks))
            }
            None => Arc::new(AuditLogger::disabled()),
        };

        let ingest = Arc::new(FileIngestStore::open(config.ingest_dir()).await?);
        for problem in &ingest.load_report().corrupted {
            warn!(error = %problem, "Ingest record skipped on load");
        }

        let events = Arc::new(EventBus::default());
        let graph_lock = Arc::new(Mutex::new(()));
        let worker = Arc::new(
            EnrichmentWorker::new(ingest.clone(), graph.clone(), extractor.clone())
                .with_config(&config.ingest)
                .with_max_entities(config.extraction.max_entities)
                .with_graph_lock(graph_lock.clone())
                .with_audit(audit.clone())
                .with_events(events.clone()),
        );
        let reviews = ReviewQueue::new(
            ingest.clone(),
            graph.clone(),
            graph_lock.clone(),
            audit.clone(),
            events.clone(),
        );

        info!(
            vectors = vectors.name(),
            graph = graph.name(),
            extractor = extractor.name(),
            embedder = embedder.name(),
            "Memory broker ready"
        );

        Ok(MemoryBroker {
            registry: ScopeRegistry::new(config.session_ttl_secs),
            config,
            vectors,
            graph,
            sqlite,
            embedder,
            extractor,
            graph_lock,
            ingest,
            reviews,
            worker,
            audit,
            audit_log,
            events,
        })
    }
}

pub struct MemoryBroker {
    config: AppConfig,
    registry: ScopeRegistry,
    vectors: Arc<dyn VectorBackend>,
    graph: Arc<dyn GraphBackend>,
    sqlite: Option<Arc<SqliteGraphStore>>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extractor>,
    /// Serializes every graph mutation, shared with the worker and review queue
    graph_lock: Arc<Mutex<()>>,
    ingest: Arc<FileIngestStore>,
    reviews: ReviewQueue,
    worker: Arc<EnrichmentWorker>,
    audit: Arc<AuditLogger>,
    audit_log: Option<Arc<JsonlAuditSink>>,
    events: Arc<EventBus>,
}

impl MemoryBroker {
    /// Build every collaborator from `config`.
    pub async fn open(config: AppConfig) -> Result<Self> {
        BrokerBuilder::new(config).build().await
    }

    pub fn builder(config: AppConfig) -> BrokerBuilder {
        BrokerBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn audit(&self) -> Arc<AuditLogger> {
        self.audit.clone()
    }

    /// The JSONL audit files, when file auditing is enabled.
    pub fn audit_log(&self) -> Option<Arc<JsonlAuditSink>> {
        self.audit_log.clone()
    }

    pub fn worker(&self) -> Arc<EnrichmentWorker> {
        self.worker.clone()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = self.embedder.clone();
        let text = text.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))??;
        Ok(vector)
    }

    // ── Context ─────────────────────────────────────────────────────────────

    pub async fn set_context(&self, tenant: &str, update: ContextUpdate) -> Result<ActiveContext> {
        let ctx = self.registry.set(tenant, update, Utc::now()).await?;
        self.audit.log(
            AuditAction::ContextChange,
            &Scope::Global,
            AuditOutcome::Success,
            json!({"tenant": tenant, "context": ctx}),
        );
        Ok(ctx)
    }

    pub async fn get_context(&self, tenant: &str) -> ActiveContext {
        self.registry.get(tenant, Utc::now()).await
    }

    pub async fn clear_context(&self, tenant: &str) -> bool {
        let cleared = self.registry.clear(tenant).await;
        if cleared {
            self.audit.log(
                AuditAction::ContextChange,
                &Scope::Global,
                AuditOutcome::Success,
                json!({"tenant": tenant, "cleared": true}),
            );
        }
        cleared
    }

    // ── Memory ──────────────────────────────────────────────────────────────

    /// Insert only when the hash is new to the partition.
    async fn write_if_new(&self, entry: &MemoryEntry, vector: Vec<f32>) -> std::result::Result<(), MemoryError> {
        let partition = entry.scope.partition();
        if self.vectors.get(&partition, &entry.content_hash).await?.is_some() {
            return Err(MemoryError::DuplicateContent {
                partition,
                hash: entry.content_hash.clone(),
            });
        }
        self.vectors.upsert(&partition, entry.to_record(vector)).await
    }

    pub async fn store(&self, tenant: &str, request: StoreRequest) -> Result<StoreOutcome> {
        if request.content.trim().is_empty() {
            return Err(MemoryError::EmptyContent.into());
        }
        let now = Utc::now();
        let ctx = self.registry.get(tenant, now).await;
        let scope = store_destination(&ctx, request.scope, now);
        let partition = scope.partition();
        let hash = content_hash(&request.content);

        let existing = self
            .vectors
            .get(&partition, &hash)
            .await?
            .map(|record| MemoryEntry::from_record(&record))
            .transpose()?;
        if let Some(existing) = &existing
            && !request.force
        {
            return Ok(self.duplicate(existing.clone()));
        }

        let vector = self.embed(&request.content).await?;
        let entry = MemoryEntry {
            id: hash.clone(),
            content: request.content,
            content_hash: hash,
            scope: scope.clone(),
            tags: request.tags,
            metadata: request.metadata,
            created_at: existing.as_ref().map_or(now, |e| e.created_at),
            updated_at: now,
            embedding: None,
        };

        if existing.is_some() {
            self.vectors.upsert(&partition, entry.to_record(vector)).await?;
        } else {
            match self.write_if_new(&entry, vector).await {
                Ok(()) => {}
                // Lost a race with an identical write.
                Err(MemoryError::DuplicateContent { .. }) => return Ok(self.duplicate(entry)),
                Err(e) => return Err(e.into()),
            }
        }

        info!(id = %entry.id, scope = %scope, overwritten = existing.is_some(), "Memory stored");
        self.audit.log(
            AuditAction::Store,
            &scope,
            AuditOutcome::Success,
            json!({"id": entry.id, "tenant": tenant, "overwritten": existing.is_some()}),
        );
        self.events.publish(DomainEvent::MemoryStored {
            scope: scope.key(),
            id: entry.id.clone(),
            duplicate: false,
            timestamp: now,
        });
        Ok(StoreOutcome {
            entry,
            duplicate: false,
        })
    }

    fn duplicate(&self, entry: MemoryEntry) -> StoreOutcome {
        let err = MemoryError::DuplicateContent {
            partition: entry.scope.partition(),
            hash: entry.content_hash.clone(),
        };
        debug!(error = %err, "Store skipped");
        self.audit.log(
            AuditAction::Store,
            &entry.scope,
            AuditOutcome::Skipped,
            json!({"id": entry.id, "reason": "duplicate_content"}),
        );
        self.events.publish(DomainEvent::MemoryStored {
            scope: entry.scope.key(),
            id: entry.id.clone(),
            duplicate: true,
            timestamp: Utc::now(),
        });
        StoreOutcome {
            entry,
            duplicate: true,
        }
    }

    pub async fn retrieve(&self, tenant: &str, request: RetrieveRequest) -> Result<RetrieveResponse> {
        let now = Utc::now();
        let ctx = self.registry.get(tenant, now).await;
        let scopes = resolve(&ctx, request.scope.as_ref(), now)?;
        let k = request.k.unwrap_or(self.config.memory.default_k).max(1);
        let vector = self.embed(&request.query).await?;

        let mut per_partition = Vec::with_capacity(scopes.len());
        for scope in &scopes {
            let hits = self.vectors.query(&scope.partition(), &vector, k).await?;
            let ranked = hits
                .iter()
                .map(|hit| MemoryEntry::from_record(&hit.record).map(|entry| RankedHit::new(entry, hit.score)))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            per_partition.push(ranked);
        }
        let mut hits = merge_and_rank(per_partition);
        hits.truncate(k);
        debug!(tenant, scopes = scopes.len(), hits = hits.len(), "Retrieve complete");

        let graph = if request.expand_graph {
            Some(self.neighbourhood(&hits, &scopes).await?)
        } else {
            None
        };
        Ok(RetrieveResponse { scopes, hits, graph })
    }

    /// Entities whose name occurs in a hit, plus their relations.
    async fn neighbourhood(&self, hits: &[RankedHit], scopes: &[Scope]) -> Result<GraphNeighbourhood> {
        let mut out = GraphNeighbourhood::default();
        if hits.is_empty() {
            return Ok(out);
        }
        let candidates = self
            .graph
            .search_entities(&EntityQuery {
                scopes: scopes.to_vec(),
                limit: usize::MAX,
                ..Default::default()
            })
            .await?;
        let texts: Vec<String> = hits.iter().map(|h| h.entry.content.to_lowercase()).collect();
        let mut seen = HashSet::new();
        for entity in candidates {
            let name = entity.name.to_lowercase();
            if !texts.iter().any(|t| t.contains(&name)) {
                continue;
            }
            for relation in self.graph.get_relations(&entity.name, Direction::Both, scopes).await? {
                if seen.insert(relation.id.clone()) {
                    out.relations.push(relation);
                }
            }
            out.entities.push(entity);
        }
        Ok(out)
    }

    /// Semantic search filtered by tags, or a tag-only scan by precedence then recency.
    pub async fn search(&self, tenant: &str, request: SearchRequest) -> Result<Vec<RankedHit>> {
        let now = Utc::now();
        let ctx = self.registry.get(tenant, now).await;
        let scopes = resolve(&ctx, request.scope.as_ref(), now)?;
        let k = request.k.unwrap_or(self.config.memory.default_k).max(1);

        let mut per_partition = Vec::with_capacity(scopes.len());
        match request.query.as_deref().filter(|q| !q.trim().is_empty()) {
            Some(query) => {
                let vector = self.embed(query).await?;
                let fetch = k.saturating_mul(self.config.memory.tag_overfetch.max(1));
                for scope in &scopes {
                    let mut ranked = Vec::new();
                    for hit in self.vectors.query(&scope.partition(), &vector, fetch).await? {
                        let entry = MemoryEntry::from_record(&hit.record)?;
                        if entry.has_all_tags(&request.tags) {
                            ranked.push(RankedHit::new(entry, hit.score));
                        }
                    }
                    per_partition.push(ranked);
                }
            }
            None => {
                for scope in &scopes {
                    let mut ranked = Vec::new();
                    for record in self.vectors.list(&scope.partition(), usize::MAX, 0).await? {
                        let entry = MemoryEntry::from_record(&record)?;
                        if entry.has_all_tags(&request.tags) {
                            ranked.push(RankedHit::new(entry, 0.0));
                        }
                    }
                    per_partition.push(ranked);
                }
            }
        }
        let mut hits = merge_and_rank(per_partition);
        hits.truncate(k);
        Ok(hits)
    }

    /// Delete by id from the first visible partition holding it.
    pub async fn delete(&self, tenant: &str, id: &str, scope: Option<Scope>) -> Result<Scope> {
        let now = Utc::now();
        let ctx = self.registry.get(tenant, now).await;
        let scopes = resolve(&ctx, scope.as_ref(), now)?;
        for scope in scopes {
            if self.vectors.delete(&scope.partition(), id).await? {
                info!(id, scope = %scope, "Memory deleted");
                self.audit.log(
                    AuditAction::Delete,
                    &scope,
                    AuditOutcome::Success,
                    json!({"id": id, "tenant": tenant}),
                );
                return Ok(scope);
            }
        }
        Err(MemoryError::NotFound(id.to_string()).into())
    }

    // ── Graph ───────────────────────────────────────────────────────────────

    async fn write_scope(&self, tenant: &str, explicit: Option<Scope>) -> Scope {
        let now = Utc::now();
        store_destination(&self.registry.get(tenant, now).await, explicit, now)
    }

    async fn read_scopes(&self, tenant: &str, explicit: Option<&Scope>) -> Result<Vec<Scope>> {
        let now = Utc::now();
        Ok(resolve(&self.registry.get(tenant, now).await, explicit, now)?)
    }

    pub async fn create_entities(&self, tenant: &str, entities: Vec<EntityInput>) -> Result<BatchReport> {
        let mut batch = GraphBatch::default();
        for input in entities {
            let scope = self.write_scope(tenant, input.scope).await;
            batch.entities.push(
                NewEntity::direct(input.name, input.entity_type, scope).with_observations(input.observations),
            );
        }
        let scopes: Vec<Scope> = batch.entities.iter().map(|e| e.scope.clone()).collect();
        let names: Vec<String> = batch.entities.iter().map(|e| e.name.clone()).collect();

        let report = {
            let _guard = self.graph_lock.lock().await;
            self.graph.apply_batch(batch).await?
        };
        if let Some(scope) = scopes.first() {
            self.audit.log(
                AuditAction::EntityCreate,
                scope,
                AuditOutcome::Success,
                json!({"names": names, "created": report.entities_created, "existing": report.entities_existing}),
            );
        }
        Ok(report)
    }

    pub async fn create_relations(&self, tenant: &str, relations: Vec<RelationInput>) -> Result<BatchReport> {
        let mut batch = GraphBatch::default();
        for input in relations {
            let scope = self.write_scope(tenant, input.scope).await;
            batch
                .relations
                .push(NewRelation::direct(input.source, input.target, input.relation_type, scope));
        }
        let first_scope = batch.relations.first().map(|r| r.scope.clone());
        let described: Vec<String> = batch
            .relations
            .iter()
            .map(|r| format!("{}({}, {})", r.relation_type, r.source, r.target))
            .collect();

        let result = {
            let _guard = self.graph_lock.lock().await;
            self.graph.apply_batch(batch).await
        };
        let Some(scope) = first_scope else {
            return Ok(result?);
        };
        match result {
            Ok(report) => {
                self.audit.log(
                    AuditAction::RelationCreate,
                    &scope,
                    AuditOutcome::Success,
                    json!({"relations": described, "created": report.relations_created}),
                );
                Ok(report)
            }
            Err(e) => {
                self.audit.log(
                    AuditAction::RelationCreate,
                    &scope,
                    AuditOutcome::Failure,
                    json!({"relations": described, "error": e.to_string()}),
                );
                Err(e.into())
            }
        }
    }

    /// The first match in precedence order.
    pub async fn get_entity(&self, tenant: &str, name: &str, scope: Option<Scope>) -> Result<Option<Entity>> {
        for scope in self.read_scopes(tenant, scope.as_ref()).await? {
            if let Some(entity) = self.graph.get_entity(name, &scope).await? {
                return Ok(Some(entity));
            }
        }
        Ok(None)
    }

    pub async fn update_entity(
        &self,
        tenant: &str,
        name: &str,
        update: EntityUpdate,
        scope: Option<Scope>,
    ) -> Result<bool> {
        let scope = self.write_scope(tenant, scope).await;
        let updated = {
            let _guard = self.graph_lock.lock().await;
            self.graph.update_entity(name, &scope, update).await?
        };
        if updated {
            self.audit.log(AuditAction::EntityUpdate, &scope, AuditOutcome::Success, json!({"name": name}));
        }
        Ok(updated)
    }

    /// Delete entities (and their relations). Returns how many existed.
    pub async fn delete_entities(&self, tenant: &str, names: &[String], scope: Option<Scope>) -> Result<usize> {
        let scope = self.write_scope(tenant, scope).await;
        let mut deleted = 0;
        {
            let _guard = self.graph_lock.lock().await;
            for name in names {
                if self.graph.delete_entity(name, &scope).await? {
                    deleted += 1;
                }
            }
        }
        self.audit.log(
            AuditAction::EntityDelete,
            &scope,
            AuditOutcome::Success,
            json!({"names": names, "deleted": deleted}),
        );
        Ok(deleted)
    }

    pub async fn delete_relation(&self, tenant: &str, relation: RelationInput) -> Result<bool> {
        let scope = self.write_scope(tenant, relation.scope).await;
        let deleted = {
            let _guard = self.graph_lock.lock().await;
            self.graph
                .delete_relation(&relation.source, &relation.target, &relation.relation_type, &scope)
                .await?
        };
        if deleted {
            self.audit.log(
                AuditAction::RelationDelete,
                &scope,
                AuditOutcome::Success,
                json!({"source": relation.source, "target": relation.target, "type": relation.relation_type}),
            );
        }
        Ok(deleted)
    }

    pub async fn add_observations(
        &self,
        tenant: &str,
        name: &str,
        observations: Vec<String>,
        scope: Option<Scope>,
    ) -> Result<usize> {
        let scope = self.write_scope(tenant, scope).await;
        let observations: Vec<Observation> = observations.into_iter().map(Observation::direct).collect();
        let added = {
            let _guard = self.graph_lock.lock().await;
            self.graph.add_observations(name, &scope, observations).await?
        };
        self.audit.log(
            AuditAction::ObservationAdd,
            &scope,
            AuditOutcome::Success,
            json!({"name": name, "added": added}),
        );
        Ok(added)
    }

    pub async fn remove_observations(
        &self,
        tenant: &str,
        name: &str,
        texts: &[String],
        scope: Option<Scope>,
    ) -> Result<usize> {
        let scope = self.write_scope(tenant, scope).await;
        let removed = {
            let _guard = self.graph_lock.lock().await;
            self.graph.remove_observations(name, &scope, texts).await?
        };
        self.audit.log(
            AuditAction::ObservationRemove,
            &scope,
            AuditOutcome::Success,
            json!({"name": name, "removed": removed}),
        );
        Ok(removed)
    }

    pub async fn get_relations(
        &self,
        tenant: &str,
        name: &str,
        direction: Direction,
        scope: Option<Scope>,
    ) -> Result<Vec<Relation>> {
        let scopes = self.read_scopes(tenant, scope.as_ref()).await?;
        Ok(self.graph.get_relations(name, direction, &scopes).await?)
    }

    pub async fn find_path(
        &self,
        tenant: &str,
        from: &str,
        to: &str,
        max_hops: Option<usize>,
        scope: Option<Scope>,
    ) -> Result<Option<GraphPath>> {
        let scopes = self.read_scopes(tenant, scope.as_ref()).await?;
        let max_hops = max_hops.unwrap_or(self.config.graph.max_hops);
        Ok(self.graph.find_path(from, to, max_hops, &scopes).await?)
    }

    /// Search within the visible scopes; a query naming scopes is narrowed to
    /// the visible ones.
    pub async fn search_entities(&self, tenant: &str, mut query: EntityQuery) -> Result<Vec<Entity>> {
        let visible = self.read_scopes(tenant, None).await?;
        query.scopes = if query.scopes.is_empty() {
            visible
        } else {
            query.scopes.into_iter().filter(|s| visible.contains(s)).collect()
        };
        if query.scopes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.graph.search_entities(&query).await?)
    }

    /// `legacy` or `v2`; `None` when the graph backend has no schema.
    pub async fn graph_schema_version(&self) -> Result<Option<&'static str>> {
        match &self.sqlite {
            Some(store) => Ok(Some(store.schema_version().await?)),
            None => Ok(None),
        }
    }

    pub async fn migrate_graph(&self) -> Result<MigrationReport> {
        let Some(store) = &self.sqlite else {
            return Err(Error::Config {
                message: format!("graph backend '{}' has no schema to migrate", self.graph.name()),
            });
        };
        let report = {
            let _guard = self.graph_lock.lock().await;
            store.migrate_legacy_schema().await
        };
        match report {
            Ok(report) => {
                self.audit.log(
                    AuditAction::GraphMigrate,
                    &Scope::Global,
                    if report.migrated { AuditOutcome::Success } else { AuditOutcome::Skipped },
                    json!(report),
                );
                Ok(report)
            }
            Err(e) => {
                self.audit.log(
                    AuditAction::GraphMigrate,
                    &Scope::Global,
                    AuditOutcome::Failure,
                    json!({"error": e.to_string()}),
                );
                Err(e.into())
            }
        }
    }

    // ── Ingest ──────────────────────────────────────────────────────────────

    /// Persist the item as `received` and return at once; the worker picks it up.
    pub async fn submit_ingest(&self, submission: IngestSubmission) -> Result<SubmitOutcome> {
        let scope = submission.scope.clone();
        let outcome = self.ingest.submit(submission).await.inspect_err(|e| {
            if let IngestError::IdempotencyConflict { key, item_id } = e {
                warn!(key, item_id, "Idempotency key reused with a different payload");
            }
        })?;
        self.audit.log(
            AuditAction::IngestSubmit,
            &scope,
            if outcome.duplicate { AuditOutcome::Skipped } else { AuditOutcome::Success },
            json!({
                "item_id": outcome.item.id,
                "idempotency_key": outcome.item.idempotency_key,
                "duplicate": outcome.duplicate,
            }),
        );
        Ok(outcome)
    }

    pub async fn ingest_item(&self, id: &str) -> Result<IngestItem> {
        self.ingest
            .get(id)
            .await
            .ok_or_else(|| IngestError::ItemNotFound(id.to_string()).into())
    }

    pub async fn list_ingest(&self, state: Option<IngestState>) -> Vec<IngestItem> {
        self.ingest.list(state).await
    }

    pub async fn list_reviews(&self, status: Option<ReviewStatus>, limit: usize) -> Vec<ReviewCandidate> {
        self.reviews.list(status, limit).await
    }

    pub async fn decide_review(&self, review_id: &str, decision: ReviewDecision) -> Result<ReviewCandidate> {
        self.reviews.decide(review_id, decision).await
    }

    /// Start the enrichment worker. It stops when `shutdown` turns true.
    pub fn spawn_worker(&self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        self.worker.clone().spawn(shutdown)
    }

    /// Run [`sweep_expired_sessions`](Self::sweep_expired_sessions) every `interval`.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                match self.sweep_expired_sessions().await {
                    Ok(swept) if !swept.is_empty() => info!(sessions = swept.len(), "Expired sessions swept"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Session sweep failed"),
                }
            }
            debug!("Session sweeper stopped");
        })
    }

    // ── Maintenance ─────────────────────────────────────────────────────────

    /// Drop the data of every expired session: its vector partition and its
    /// graph scope. Sessions some tenant has renewed or still holds are kept.
    pub async fn sweep_expired_sessions(&self) -> Result<Vec<SweptSession>> {
        let expired = self.registry.take_expired(Utc::now()).await;
        let mut swept = Vec::with_capacity(expired.len());
        let mut dropped = HashSet::new();
        for ExpiredSession { tenant, session_id } in expired {
            if dropped.contains(&session_id) {
                continue;
            }
            if self.registry.is_session_live(&session_id, Utc::now()).await {
                debug!(tenant, session = %session_id, "Session renewed before sweep, keeping its data");
                continue;
            }
            dropped.insert(session_id.clone());
            let scope = Scope::session(&session_id);
            let memories_dropped = self.vectors.drop_partition(&scope.partition()).await?;
            let (entities_removed, relations_removed) = {
                let _guard = self.graph_lock.lock().await;
                self.graph.delete_scope(&scope).await?
            };
            info!(tenant, session = %session_id, entities_removed, "Session expired and cleaned up");
            self.audit.log(
                AuditAction::ExpireSession,
                &scope,
                AuditOutcome::Success,
                json!({
                    "tenant": tenant,
                    "memories_dropped": memories_dropped,
                    "entities_removed": entities_removed,
                    "relations_removed": relations_removed,
                }),
            );
            self.events.publish(DomainEvent::SessionExpired {
                tenant: tenant.clone(),
                session_id: session_id.clone(),
                timestamp: Utc::now(),
            });
            swept.push(SweptSession {
                tenant,
                session_id,
                memories_dropped,
                entities_removed,
                relations_removed,
            });
        }
        Ok(swept)
    }

    /// Entities and their outgoing relations, optionally with memories.
    /// An explicit scope is exported even when it is not active.
    pub async fn export_graph(&self, tenant: &str, filter: ExportFilter) -> Result<GraphExport> {
        let scopes = match filter.scope {
            Some(scope) => vec![scope],
            None => self.read_scopes(tenant, None).await?,
        };
        let entities = self
            .graph
            .search_entities(&EntityQuery {
                scopes: scopes.clone(),
                limit: usize::MAX,
                ..Default::default()
            })
            .await?;

        let mut relations = Vec::new();
        let mut seen = HashSet::new();
        for entity in &entities {
            let outgoing = self
                .graph
                .get_relations(&entity.name, Direction::Outgoing, std::slice::from_ref(&entity.scope))
                .await?;
            for relation in outgoing {
                if seen.insert(relation.id.clone()) {
                    relations.push(relation);
                }
            }
        }

        let memories = if filter.include_memories {
            let mut memories = Vec::new();
            for scope in &scopes {
                for record in self.vectors.list(&scope.partition(), usize::MAX, 0).await? {
                    memories.push(MemoryEntry::from_record(&record)?);
                }
            }
            Some(memories)
        } else {
            None
        };

        Ok(GraphExport {
            exported_at: Utc::now(),
            scopes,
            entities,
            relations,
            memories,
        })
    }

    pub async fn stats(&self, tenant: &str) -> Result<BrokerStats> {
        let mut partitions = BTreeMap::new();
        for partition in self.vectors.partitions().await? {
            let count = self.vectors.count(&partition).await?;
            partitions.insert(partition, count);
        }
        Ok(BrokerStats {
            tenant: tenant.to_string(),
            context: self.get_context(tenant).await,
            partitions,
            entities: self.graph.entity_count(None).await?,
            relations: self.graph.relation_count(None).await?,
            ingest: self.ingest.counts().await,
            pending_reviews: self.reviews.list(Some(ReviewStatus::Pending), usize::MAX).await.len(),
            vector_backend: self.vectors.name().to_string(),
            graph_backend: self.graph.name().to_string(),
            extraction_backend: self.extractor.name().to_string(),
            embedder: self.embedder.name().to_string(),
        })
    }

    pub async fn health(&self) -> HealthReport {
        let probe = self.embed("health check").await.and_then(|v| {
            if v.len() == self.embedder.dimension() {
                Ok(())
            } else {
                Err(MemoryError::EmbeddingFailed(format!(
                    "expected {} dimensions, got {}",
                    self.embedder.dimension(),
                    v.len()
                ))
                .into())
            }
        });
        let ingest_dir = self.ingest.root().join("items");
        let components = vec![
            ComponentHealth::from_result(self.vectors.name(), self.vectors.health_check().await),
            ComponentHealth::from_result(self.graph.name(), self.graph.health_check().await),
            ComponentHealth::from_result(self.embedder.name(), probe),
            ComponentHealth::from_result(
                "ingest",
                if ingest_dir.is_dir() {
                    Ok(())
                } else {
                    Err(format!("{} is missing", ingest_dir.display()))
                },
            ),
        ];
        HealthReport {
            healthy: components.iter().all(|c| c.healthy),
            components,
        }
    }
}
