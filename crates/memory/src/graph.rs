//! In-memory knowledge graph — the reference `GraphBackend` for tests and
//! ephemeral deployments.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use temple_core::error::GraphError;
use temple_core::graph::{
    shortest_path, BatchReport, Direction, Entity, EntityQuery, EntityUpdate, GraphBackend,
    GraphBatch, GraphPath, NewRelation, Observation, Relation,
};
use temple_core::scope::Scope;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct GraphState {
    entities: Vec<Entity>,
    relations: Vec<Relation>,
}

impl GraphState {
    fn entity(&self, name: &str, scope: &Scope) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.name == name && e.scope == *scope)
    }

    fn entity_mut(&mut self, name: &str, scope: &Scope) -> Option<&mut Entity> {
        self.entities
            .iter_mut()
            .find(|e| e.name == name && e.scope == *scope)
    }

    fn has_relation(&self, relation: &NewRelation) -> bool {
        self.relations.iter().any(|r| r.same_identity(relation))
    }
}

/// Check that every relation endpoint exists or is created by the batch.
pub(crate) fn check_endpoints<F>(batch: &GraphBatch, exists: F) -> Result<(), GraphError>
where
    F: Fn(&str, &Scope) -> bool,
{
    for relation in &batch.relations {
        for endpoint in [&relation.source, &relation.target] {
            let in_batch = batch
                .entities
                .iter()
                .any(|e| e.name == *endpoint && e.scope == relation.scope);
            if !in_batch && !exists(endpoint, &relation.scope) {
                return Err(GraphError::WriteConflict {
                    entity: endpoint.clone(),
                    scope: relation.scope.key(),
                });
            }
        }
    }
    Ok(())
}

pub(crate) fn direction_matches(relation: &Relation, name: &str, direction: Direction) -> bool {
    match direction {
        Direction::Outgoing => relation.source == name,
        Direction::Incoming => relation.target == name,
        Direction::Both => relation.source == name || relation.target == name,
    }
}

fn in_scopes(scope: &Scope, scopes: &[Scope]) -> bool {
    scopes.is_empty() || scopes.contains(scope)
}

pub struct InMemoryGraph {
    state: Arc<RwLock<GraphState>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(GraphState::default())),
        }
    }
}

impl Default for InMemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphBackend for InMemoryGraph {
    fn name(&self) -> &str {
        "memory"
    }

    async fn apply_batch(&self, batch: GraphBatch) -> Result<BatchReport, GraphError> {
        let mut state = self.state.write().await;
        check_endpoints(&batch, |name, scope| state.entity(name, scope).is_some())?;

        let now = Utc::now();
        let mut report = BatchReport::default();
        for entity in batch.entities {
            if state.entity(&entity.name, &entity.scope).is_some() {
                report.entities_existing += 1;
            } else {
                state.entities.push(entity.into_entity(now));
                report.entities_created += 1;
            }
        }
        for relation in batch.relations {
            if state.has_relation(&relation) {
                report.relations_existing += 1;
            } else {
                state.relations.push(relation.into_relation(now));
                report.relations_created += 1;
            }
        }
        Ok(report)
    }

    async fn get_entity(&self, name: &str, scope: &Scope) -> Result<Option<Entity>, GraphError> {
        Ok(self.state.read().await.entity(name, scope).cloned())
    }

    async fn update_entity(&self, name: &str, scope: &Scope, update: EntityUpdate) -> Result<bool, GraphError> {
        let mut state = self.state.write().await;
        let Some(entity) = state.entity_mut(name, scope) else {
            return Ok(false);
        };
        if let Some(entity_type) = update.entity_type {
            entity.entity_type = entity_type;
        }
        if let Some(observations) = update.observations {
            entity.observations = observations.into_iter().map(Observation::direct).collect();
        }
        entity.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete_entity(&self, name: &str, scope: &Scope) -> Result<bool, GraphError> {
        let mut state = self.state.write().await;
        let before = state.entities.len();
        state.entities.retain(|e| !(e.name == name && e.scope == *scope));
        if state.entities.len() == before {
            return Ok(false);
        }
        state
            .relations
            .retain(|r| !(r.scope == *scope && (r.source == name || r.target == name)));
        Ok(true)
    }

    async fn delete_relation(
        &self,
        source: &str,
        target: &str,
        relation_type: &str,
        scope: &Scope,
    ) -> Result<bool, GraphError> {
        let mut state = self.state.write().await;
        let before = state.relations.len();
        state.relations.retain(|r| {
            !(r.source == source
                && r.target == target
                && r.relation_type == relation_type
                && r.scope == *scope)
        });
        Ok(state.relations.len() < before)
    }

    async fn add_observations(
        &self,
        name: &str,
        scope: &Scope,
        observations: Vec<Observation>,
    ) -> Result<usize, GraphError> {
        let mut state = self.state.write().await;
        let entity = state
            .entity_mut(name, scope)
            .ok_or_else(|| GraphError::EntityNotFound(format!("{name} in {scope}")))?;
        let mut added = 0;
        for observation in observations {
            if entity.observations.iter().all(|o| o.text != observation.text) {
                entity.observations.push(observation);
                added += 1;
            }
        }
        if added > 0 {
            entity.updated_at = Utc::now();
        }
        Ok(added)
    }

    async fn remove_observations(&self, name: &str, scope: &Scope, texts: &[String]) -> Result<usize, GraphError> {
        let mut state = self.state.write().await;
        let entity = state
            .entity_mut(name, scope)
            .ok_or_else(|| GraphError::EntityNotFound(format!("{name} in {scope}")))?;
        let before = entity.observations.len();
        entity.observations.retain(|o| !texts.contains(&o.text));
        let removed = before - entity.observations.len();
        if removed > 0 {
            entity.updated_at = Utc::now();
        }
        Ok(removed)
    }

    async fn get_relations(&self, name: &str, direction: Direction, scopes: &[Scope]) -> Result<Vec<Relation>, GraphError> {
        let state = self.state.read().await;
        Ok(state
            .relations
            .iter()
            .filter(|r| in_scopes(&r.scope, scopes) && direction_matches(r, name, direction))
            .cloned()
            .collect())
    }

    async fn find_path(
        &self,
        from: &str,
        to: &str,
        max_hops: usize,
        scopes: &[Scope],
    ) -> Result<Option<GraphPath>, GraphError> {
        let state = self.state.read().await;
        let relations: Vec<Relation> = state
            .relations
            .iter()
            .filter(|r| in_scopes(&r.scope, scopes))
            .cloned()
            .collect();
        Ok(shortest_path(&relations, from, to, max_hops))
    }

    async fn search_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>, GraphError> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .iter()
            .filter(|e| query.matches(e))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn delete_scope(&self, scope: &Scope) -> Result<(usize, usize), GraphError> {
        let mut state = self.state.write().await;
        let (entities, relations) = (state.entities.len(), state.relations.len());
        state.entities.retain(|e| e.scope != *scope);
        state.relations.retain(|r| r.scope != *scope);
        Ok((
            entities - state.entities.len(),
            relations - state.relations.len(),
        ))
    }

    async fn entity_count(&self, scope: Option<&Scope>) -> Result<usize, GraphError> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .iter()
            .filter(|e| scope.is_none_or(|s| e.scope == *s))
            .count())
    }

    async fn relation_count(&self, scope: Option<&Scope>) -> Result<usize, GraphError> {
        let state = self.state.read().await;
        Ok(state
            .relations
            .iter()
            .filter(|r| scope.is_none_or(|s| r.scope == *s))
            .count())
    }
}
