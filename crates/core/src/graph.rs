//! Knowledge graph model and the graph collaborator trait.
//!
//! Entities and relations are scoped exactly like memories. Every record
//! carries a confidence and a provenance; both are fixed at creation and a
//! create never overwrites an existing record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::GraphError;
use crate::scope::Scope;

/// Where a graph record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// Written through the direct API.
    Direct,
    /// Derived from an ingest item by extraction.
    Ingest { item_id: String },
}

impl Provenance {
    pub fn ingest(item_id: impl Into<String>) -> Self {
        Self::Ingest {
            item_id: item_id.into(),
        }
    }

    /// Compact label used in storage columns (`direct`, `ingest:<id>`).
    pub fn label(&self) -> String {
        match self {
            Self::Direct => "direct".to_string(),
            Self::Ingest { item_id } => format!("ingest:{item_id}"),
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label.strip_prefix("ingest:") {
            Some(item_id) => Self::ingest(item_id),
            None => Self::Direct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub text: String,
    pub confidence: f32,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    pub fn direct(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: 1.0,
            provenance: Provenance::Direct,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub scope: Scope,
    #[serde(default)]
    pub observations: Vec<Observation>,
    pub confidence: f32,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub source: String,
    pub target: String,
    pub relation_type: String,
    pub scope: Scope,
    pub confidence: f32,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    /// Identity of a relation: (source, target, type, scope).
    pub fn same_identity(&self, other: &NewRelation) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.relation_type == other.relation_type
            && self.scope == other.scope
    }
}

/// An entity to be created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntity {
    pub name: String,
    pub entity_type: String,
    pub scope: Scope,
    #[serde(default)]
    pub observations: Vec<String>,
    pub confidence: f32,
    pub provenance: Provenance,
}

impl NewEntity {
    /// A direct write: confidence 1.0, provenance `direct`.
    pub fn direct(name: impl Into<String>, entity_type: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            scope,
            observations: Vec::new(),
            confidence: 1.0,
            provenance: Provenance::Direct,
        }
    }

    pub fn with_observations(mut self, observations: Vec<String>) -> Self {
        self.observations = observations;
        self
    }

    /// Materialize with a fresh id and timestamps.
    pub fn into_entity(self, now: DateTime<Utc>) -> Entity {
        let observations = self
            .observations
            .into_iter()
            .map(|text| Observation {
                text,
                confidence: self.confidence,
                provenance: self.provenance.clone(),
                created_at: now,
            })
            .collect();
        Entity {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.name,
            entity_type: self.entity_type,
            scope: self.scope,
            observations,
            confidence: self.confidence,
            provenance: self.provenance,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A relation to be created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRelation {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    pub scope: Scope,
    pub confidence: f32,
    pub provenance: Provenance,
}

impl NewRelation {
    pub fn direct(
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
        scope: Scope,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation_type: relation_type.into(),
            scope,
            confidence: 1.0,
            provenance: Provenance::Direct,
        }
    }

    pub fn into_relation(self, now: DateTime<Utc>) -> Relation {
        Relation {
            id: uuid::Uuid::new_v4().to_string(),
            source: self.source,
            target: self.target,
            relation_type: self.relation_type,
            scope: self.scope,
            confidence: self.confidence,
            provenance: self.provenance,
            created_at: now,
        }
    }
}

/// A set of writes applied all-or-nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphBatch {
    pub entities: Vec<NewEntity>,
    pub relations: Vec<NewRelation>,
}

impl GraphBatch {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Outcome of an applied batch. "Existing" records were left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub entities_created: usize,
    pub entities_existing: usize,
    pub relations_created: usize,
    pub relations_existing: usize,
}

/// Partial update for an existing entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Replaces the observation list when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "out" | "outgoing" => Ok(Self::Outgoing),
            "in" | "incoming" => Ok(Self::Incoming),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// Entity search filter. Empty `scopes` means every scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityQuery {
    /// Case-insensitive substring of the entity name
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default = "default_entity_limit")]
    pub limit: usize,
}

fn default_entity_limit() -> usize {
    50
}

impl EntityQuery {
    pub fn matches(&self, entity: &Entity) -> bool {
        if !self.scopes.is_empty() && !self.scopes.contains(&entity.scope) {
            return false;
        }
        if let Some(t) = &self.entity_type
            && !entity.entity_type.eq_ignore_ascii_case(t)
        {
            return false;
        }
        match &self.text {
            Some(text) => entity.name.to_lowercase().contains(&text.to_lowercase()),
            None => true,
        }
    }
}

/// A directed path between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPath {
    pub entities: Vec<String>,
    pub relations: Vec<Relation>,
}

/// Shortest directed path by BFS over `relations`, at most `max_hops` edges.
pub fn shortest_path(relations: &[Relation], from: &str, to: &str, max_hops: usize) -> Option<GraphPath> {
    let max_hops = max_hops.max(1);
    let mut adjacency: HashMap<&str, Vec<&Relation>> = HashMap::new();
    for rel in relations {
        adjacency.entry(rel.source.as_str()).or_default().push(rel);
    }

    let mut visited: HashSet<&str> = HashSet::from([from]);
    let mut queue: VecDeque<(&str, Vec<&Relation>)> = VecDeque::from([(from, Vec::new())]);
    while let Some((node, path)) = queue.pop_front() {
        if path.len() >= max_hops {
            continue;
        }
        for rel in adjacency.get(node).into_iter().flatten() {
            let next = rel.target.as_str();
            let mut next_path = path.clone();
            next_path.push(*rel);
            if next == to {
                let mut entities = vec![from.to_string()];
                entities.extend(next_path.iter().map(|r| r.target.clone()));
                return Some(GraphPath {
                    entities,
                    relations: next_path.into_iter().cloned().collect(),
                });
            }
            if visited.insert(next) {
                queue.push_back((next, next_path));
            }
        }
    }
    None
}

/// The graph collaborator.
///
/// Implementations: in-memory (for testing), SQLite.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Apply every write in `batch` or none of them. Relations must reference
    /// entities that already exist in their scope or are created by the batch;
    /// otherwise the whole batch fails with [`GraphError::WriteConflict`].
    async fn apply_batch(&self, batch: GraphBatch) -> std::result::Result<BatchReport, GraphError>;

    /// Returns `false` when an entity with the same name already exists in the scope.
    async fn create_entity(&self, entity: NewEntity) -> std::result::Result<bool, GraphError> {
        let report = self
            .apply_batch(GraphBatch {
                entities: vec![entity],
                relations: Vec::new(),
            })
            .await?;
        Ok(report.entities_created == 1)
    }

    /// Returns `false` when the identical relation already exists.
    async fn create_relation(&self, relation: NewRelation) -> std::result::Result<bool, GraphError> {
        let report = self
            .apply_batch(GraphBatch {
                entities: Vec::new(),
                relations: vec![relation],
            })
            .await?;
        Ok(report.relations_created == 1)
    }

    async fn get_entity(&self, name: &str, scope: &Scope) -> std::result::Result<Option<Entity>, GraphError>;

    async fn update_entity(
        &self,
        name: &str,
        scope: &Scope,
        update: EntityUpdate,
    ) -> std::result::Result<bool, GraphError>;

    /// Delete an entity and every relation touching it.
    async fn delete_entity(&self, name: &str, scope: &Scope) -> std::result::Result<bool, GraphError>;

    async fn delete_relation(
        &self,
        source: &str,
        target: &str,
        relation_type: &str,
        scope: &Scope,
    ) -> std::result::Result<bool, GraphError>;

    /// Append observations, skipping texts already present. Returns how many were added.
    async fn add_observations(
        &self,
        name: &str,
        scope: &Scope,
        observations: Vec<Observation>,
    ) -> std::result::Result<usize, GraphError>;

    /// Returns how many were removed.
    async fn remove_observations(
        &self,
        name: &str,
        scope: &Scope,
        texts: &[String],
    ) -> std::result::Result<usize, GraphError>;

    async fn get_relations(
        &self,
        name: &str,
        direction: Direction,
        scopes: &[Scope],
    ) -> std::result::Result<Vec<Relation>, GraphError>;

    async fn find_path(
        &self,
        from: &str,
        to: &str,
        max_hops: usize,
        scopes: &[Scope],
    ) -> std::result::Result<Option<GraphPath>, GraphError>;

    async fn search_entities(&self, query: &EntityQuery) -> std::result::Result<Vec<Entity>, GraphError>;

    /// Drop every entity and relation in a scope. Returns (entities, relations) removed.
    async fn delete_scope(&self, scope: &Scope) -> std::result::Result<(usize, usize), GraphError>;

    async fn entity_count(&self, scope: Option<&Scope>) -> std::result::Result<usize, GraphError>;

    async fn relation_count(&self, scope: Option<&Scope>) -> std::result::Result<usize, GraphError>;

    async fn health_check(&self) -> std::result::Result<(), GraphError> {
        self.entity_count(None).await.map(|_| ())
    }
}
