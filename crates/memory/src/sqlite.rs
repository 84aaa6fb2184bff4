//! SQLite knowledge graph store.
//!
//! Two tables, one row per record:
//! - `graph_entities` — unique on (name, scope); observations as a JSON array
//! - `graph_relations` — unique on (source, target, relation_type, scope)
//!
//! Databases written by older releases keep entities in a single `entities`
//! table keyed by name alone (no scoped duplicates, no confidence). Those are
//! detected on open and moved over by [`SqliteGraphStore::migrate_legacy_schema`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use temple_core::error::GraphError;
use temple_core::graph::{
    shortest_path, BatchReport, Direction, Entity, EntityQuery, EntityUpdate, GraphBackend,
    GraphBatch, GraphPath, Observation, Provenance, Relation,
};
use temple_core::scope::Scope;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::graph::direction_matches;

/// Result of a legacy schema migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub migrated: bool,
    pub schema_version: String,
    pub entities: usize,
    pub relations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct SqliteGraphStore {
    pool: SqlitePool,
}

fn storage(context: &str) -> impl Fn(sqlx::Error) -> GraphError + '_ {
    move |e| GraphError::Storage(format!("{context}: {e}"))
}

impl SqliteGraphStore {
    /// Open (creating if missing) a graph database file.
    pub async fn open(path: &Path) -> Result<Self, GraphError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GraphError::Storage(format!("Failed to create graph directory: {e}")))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(storage("Failed to open SQLite"))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite graph store initialized at {}", path.display());
        Ok(store)
    }

    /// An ephemeral database (single connection so every query sees the same data).
    pub async fn in_memory() -> Result<Self, GraphError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(storage("Invalid SQLite URL"))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(storage("Failed to open SQLite"))?;
        Self::from_pool(pool).await
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, GraphError> {
        let store = Self { pool };
        store.run_migrations().await?;
        if store.is_legacy_schema().await? {
            warn!(
                "Graph database uses the legacy schema; run `temple graph migrate` to carry \
                 existing entities into scoped storage"
            );
        }
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), GraphError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS graph_entities (
                entity_id    TEXT PRIMARY KEY,
                name         TEXT NOT NULL,
                entity_type  TEXT NOT NULL,
                scope        TEXT NOT NULL,
                observations TEXT NOT NULL DEFAULT '[]',
                confidence   REAL NOT NULL,
                provenance   TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                UNIQUE(name, scope)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| GraphError::MigrationFailed(format!("entities table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS graph_relations (
                relation_id   TEXT PRIMARY KEY,
                source        TEXT NOT NULL,
                target        TEXT NOT NULL,
                relation_type TEXT NOT NULL,
                scope         TEXT NOT NULL,
                confidence    REAL NOT NULL,
                provenance    TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                UNIQUE(source, target, relation_type, scope)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| GraphError::MigrationFailed(format!("relations table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_graph_entities_scope ON graph_entities(scope)")
            .execute(&self.pool)
            .await
            .map_err(|e| GraphError::MigrationFailed(format!("scope index: {e}")))?;

        debug!("SQLite graph migrations complete");
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, GraphError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(storage("sqlite_master lookup"))?;
        Ok(row.try_get::<i64, _>("n").unwrap_or(0) > 0)
    }

    /// True while an unmigrated legacy `entities` table is present.
    pub async fn is_legacy_schema(&self) -> Result<bool, GraphError> {
        self.table_exists("entities").await
    }

    pub async fn schema_version(&self) -> Result<&'static str, GraphError> {
        Ok(if self.is_legacy_schema().await? { "legacy" } else { "v2" })
    }

    /// Copy legacy `entities`/`relations` rows into the scoped tables and
    /// rename the legacy tables to `*_legacy_backup`. Runs in one transaction.
    pub async fn migrate_legacy_schema(&self) -> Result<MigrationReport, GraphError> {
        if !self.is_legacy_schema().await? {
            return Ok(MigrationReport {
                migrated: false,
                schema_version: "v2".into(),
                entities: 0,
                relations: 0,
                reason: Some("already_v2".into()),
            });
        }
        let has_relations = self.table_exists("relations").await?;
        let mut tx = self.pool.begin().await.map_err(storage("begin migration"))?;

        let rows = sqlx::query("SELECT name, entity_type, observations, scope, created_at, updated_at FROM entities")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| GraphError::MigrationFailed(format!("read legacy entities: {e}")))?;

        let now = Utc::now().to_rfc3339();
        let mut entities = 0;
        for row in &rows {
            let name: String = row.try_get("name").unwrap_or_default();
            if name.trim().is_empty() {
                continue;
            }
            let raw_observations: Option<String> = row.try_get("observations").ok().flatten();
            let created_at: String = row
                .try_get::<Option<String>, _>("created_at")
                .ok()
                .flatten()
                .unwrap_or_else(|| now.clone());
            let observations: Vec<Observation> = raw_observations
                .unwrap_or_default()
                .split('|')
                .filter(|o| !o.trim().is_empty())
                .map(|text| Observation {
                    text: text.to_string(),
                    confidence: 1.0,
                    provenance: Provenance::Direct,
                    created_at: parse_time(&created_at),
                })
                .collect();
            let observations_json = serde_json::to_string(&observations)
                .map_err(|e| GraphError::MigrationFailed(e.to_string()))?;
            let result = sqlx::query(
                r#"
                INSERT INTO graph_entities
                    (entity_id, name, entity_type, scope, observations, confidence, provenance, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, 1.0, 'direct', ?6, ?7)
                ON CONFLICT(name, scope) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&name)
            .bind(
                row.try_get::<Option<String>, _>("entity_type")
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "concept".into()),
            )
            .bind(
                row.try_get::<Option<String>, _>("scope")
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "global".into()),
            )
            .bind(&observations_json)
            .bind(&created_at)
            .bind(
                row.try_get::<Option<String>, _>("updated_at")
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| created_at.clone()),
            )
            .execute(&mut *tx)
            .await
            .map_err(|e| GraphError::MigrationFailed(format!("copy entity {name}: {e}")))?;
            entities += result.rows_affected() as usize;
        }

        let mut relations = 0;
        if has_relations {
            let result = sqlx::query(
                r#"
                INSERT INTO graph_relations
                    (relation_id, source, target, relation_type, scope, confidence, provenance, created_at)
                SELECT lower(hex(randomblob(16))), source, target, relation_type,
                       COALESCE(scope, 'global'), 1.0, 'direct', COALESCE(created_at, ?1)
                FROM relations
                WHERE true
                ON CONFLICT(source, target, relation_type, scope) DO NOTHING
                "#,
            )
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| GraphError::MigrationFailed(format!("copy relations: {e}")))?;
            relations = result.rows_affected() as usize;

            sqlx::query("ALTER TABLE relations RENAME TO relations_legacy_backup")
                .execute(&mut *tx)
                .await
                .map_err(|e| GraphError::MigrationFailed(format!("rename relations: {e}")))?;
        }

        sqlx::query("ALTER TABLE entities RENAME TO entities_legacy_backup")
            .execute(&mut *tx)
            .await
            .map_err(|e| GraphError::MigrationFailed(format!("rename entities: {e}")))?;

        tx.commit().await.map_err(storage("commit migration"))?;
        info!(entities, relations, "Legacy graph schema migrated");
        Ok(MigrationReport {
            migrated: true,
            schema_version: "v2".into(),
            entities,
            relations,
            reason: None,
        })
    }

    fn row_to_entity(row: &sqlx::sqlite::SqliteRow) -> Result<Entity, GraphError> {
        let column = |name: &str| -> Result<String, GraphError> {
            row.try_get(name)
                .map_err(|e| GraphError::Storage(format!("{name} column: {e}")))
        };
        let observations: Vec<Observation> =
            serde_json::from_str(&column("observations")?).unwrap_or_default();
        Ok(Entity {
            id: column("entity_id")?,
            name: column("name")?,
            entity_type: column("entity_type")?,
            scope: parse_scope(&column("scope")?)?,
            observations,
            confidence: row.try_get::<f64, _>("confidence").unwrap_or(1.0) as f32,
            provenance: Provenance::from_label(&column("provenance")?),
            created_at: parse_time(&column("created_at")?),
            updated_at: parse_time(&column("updated_at")?),
        })
    }

    fn row_to_relation(row: &sqlx::sqlite::SqliteRow) -> Result<Relation, GraphError> {
        let column = |name: &str| -> Result<String, GraphError> {
            row.try_get(name)
                .map_err(|e| GraphError::Storage(format!("{name} column: {e}")))
        };
        Ok(Relation {
            id: column("relation_id")?,
            source: column("source")?,
            target: column("target")?,
            relation_type: column("relation_type")?,
            scope: parse_scope(&column("scope")?)?,
            confidence: row.try_get::<f64, _>("confidence").unwrap_or(1.0) as f32,
            provenance: Provenance::from_label(&column("provenance")?),
            created_at: parse_time(&column("created_at")?),
        })
    }

    async fn load_relations(&self, scopes: &[Scope]) -> Result<Vec<Relation>, GraphError> {
        let rows = sqlx::query("SELECT * FROM graph_relations ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(storage("load relations"))?;
        let mut relations = Vec::with_capacity(rows.len());
        for row in &rows {
            let relation = Self::row_to_relation(row)?;
            if scopes.is_empty() || scopes.contains(&relation.scope) {
                relations.push(relation);
            }
        }
        Ok(relations)
    }

    async fn write_observations(
        &self,
        entity: &Entity,
        observations: &[Observation],
    ) -> Result<(), GraphError> {
        let json = serde_json::to_string(observations)
            .map_err(|e| GraphError::Storage(format!("observations: {e}")))?;
        sqlx::query("UPDATE graph_entities SET observations = ?1, updated_at = ?2 WHERE entity_id = ?3")
            .bind(json)
            .bind(Utc::now().to_rfc3339())
            .bind(&entity.id)
            .execute(&self.pool)
            .await
            .map_err(storage("update observations"))?;
        Ok(())
    }
}

fn parse_scope(raw: &str) -> Result<Scope, GraphError> {
    raw.parse()
        .map_err(|e: temple_core::error::ScopeError| GraphError::Storage(e.to_string()))
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl GraphBackend for SqliteGraphStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn apply_batch(&self, batch: GraphBatch) -> Result<BatchReport, GraphError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin batch"))?;

        for relation in &batch.relations {
            for endpoint in [&relation.source, &relation.target] {
                let in_batch = batch
                    .entities
                    .iter()
                    .any(|e| e.name == *endpoint && e.scope == relation.scope);
                if in_batch {
                    continue;
                }
                let row = sqlx::query("SELECT COUNT(*) AS n FROM graph_entities WHERE name = ?1 AND scope = ?2")
                    .bind(endpoint)
                    .bind(relation.scope.key())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(storage("endpoint lookup"))?;
                if row.try_get::<i64, _>("n").unwrap_or(0) == 0 {
                    // Dropping `tx` rolls back.
                    return Err(GraphError::WriteConflict {
                        entity: endpoint.clone(),
                        scope: relation.scope.key(),
                    });
                }
            }
        }

        let now = Utc::now();
        let mut report = BatchReport::default();
        for new_entity in batch.entities {
            let entity = new_entity.into_entity(now);
            let observations = serde_json::to_string(&entity.observations)
                .map_err(|e| GraphError::Storage(format!("observations: {e}")))?;
            let result = sqlx::query(
                r#"
                INSERT INTO graph_entities
                    (entity_id, name, entity_type, scope, observations, confidence, provenance, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(name, scope) DO NOTHING
                "#,
            )
            .bind(&entity.id)
            .bind(&entity.name)
            .bind(&entity.entity_type)
            .bind(entity.scope.key())
            .bind(observations)
            .bind(entity.confidence as f64)
            .bind(entity.provenance.label())
            .bind(entity.created_at.to_rfc3339())
            .bind(entity.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(storage("insert entity"))?;
            if result.rows_affected() == 1 {
                report.entities_created += 1;
            } else {
                report.entities_existing += 1;
            }
        }

        for new_relation in batch.relations {
            let relation = new_relation.into_relation(now);
            let result = sqlx::query(
                r#"
                INSERT INTO graph_relations
                    (relation_id, source, target, relation_type, scope, confidence, provenance, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(source, target, relation_type, scope) DO NOTHING
                "#,
            )
            .bind(&relation.id)
            .bind(&relation.source)
            .bind(&relation.target)
            .bind(&relation.relation_type)
            .bind(relation.scope.key())
            .bind(relation.confidence as f64)
            .bind(relation.provenance.label())
            .bind(relation.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(storage("insert relation"))?;
            if result.rows_affected() == 1 {
                report.relations_created += 1;
            } else {
                report.relations_existing += 1;
            }
        }

        tx.commit().await.map_err(storage("commit batch"))?;
        debug!(?report, "Graph batch applied");
        Ok(report)
    }

    async fn get_entity(&self, name: &str, scope: &Scope) -> Result<Option<Entity>, GraphError> {
        let row = sqlx::query("SELECT * FROM graph_entities WHERE name = ?1 AND scope = ?2")
            .bind(name)
            .bind(scope.key())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("get entity"))?;
        row.as_ref().map(Self::row_to_entity).transpose()
    }

    async fn update_entity(&self, name: &str, scope: &Scope, update: EntityUpdate) -> Result<bool, GraphError> {
        let Some(entity) = self.get_entity(name, scope).await? else {
            return Ok(false);
        };
        let entity_type = update.entity_type.unwrap_or(entity.entity_type);
        let observations = match update.observations {
            Some(texts) => texts.into_iter().map(Observation::direct).collect(),
            None => entity.observations,
        };
        let json = serde_json::to_string(&observations)
            .map_err(|e| GraphError::Storage(format!("observations: {e}")))?;
        sqlx::query(
            "UPDATE graph_entities SET entity_type = ?1, observations = ?2, updated_at = ?3 WHERE entity_id = ?4",
        )
        .bind(entity_type)
        .bind(json)
        .bind(Utc::now().to_rfc3339())
        .bind(&entity.id)
        .execute(&self.pool)
        .await
        .map_err(storage("update entity"))?;
        Ok(true)
    }

    async fn delete_entity(&self, name: &str, scope: &Scope) -> Result<bool, GraphError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin delete"))?;
        let deleted = sqlx::query("DELETE FROM graph_entities WHERE name = ?1 AND scope = ?2")
            .bind(name)
            .bind(scope.key())
            .execute(&mut *tx)
            .await
            .map_err(storage("delete entity"))?
            .rows_affected();
        if deleted > 0 {
            sqlx::query("DELETE FROM graph_relations WHERE scope = ?1 AND (source = ?2 OR target = ?2)")
                .bind(scope.key())
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(storage("cascade relations"))?;
        }
        tx.commit().await.map_err(storage("commit delete"))?;
        Ok(deleted > 0)
    }

    async fn delete_relation(
        &self,
        source: &str,
        target: &str,
        relation_type: &str,
        scope: &Scope,
    ) -> Result<bool, GraphError> {
        let result = sqlx::query(
            "DELETE FROM graph_relations WHERE source = ?1 AND target = ?2 AND relation_type = ?3 AND scope = ?4",
        )
        .bind(source)
        .bind(target)
        .bind(relation_type)
        .bind(scope.key())
        .execute(&self.pool)
        .await
        .map_err(storage("delete relation"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_observations(
        &self,
        name: &str,
        scope: &Scope,
        observations: Vec<Observation>,
    ) -> Result<usize, GraphError> {
        let entity = self
            .get_entity(name, scope)
            .await?
            .ok_or_else(|| GraphError::EntityNotFound(format!("{name} in {scope}")))?;
        let mut merged = entity.observations.clone();
        let mut added = 0;
        for observation in observations {
            if merged.iter().all(|o| o.text != observation.text) {
                merged.push(observation);
                added += 1;
            }
        }
        if added > 0 {
            self.write_observations(&entity, &merged).await?;
        }
        Ok(added)
    }

    async fn remove_observations(&self, name: &str, scope: &Scope, texts: &[String]) -> Result<usize, GraphError> {
        let entity = self
            .get_entity(name, scope)
            .await?
            .ok_or_else(|| GraphError::EntityNotFound(format!("{name} in {scope}")))?;
        let kept: Vec<Observation> = entity
            .observations
            .iter()
            .filter(|o| !texts.contains(&o.text))
            .cloned()
            .collect();
        let removed = entity.observations.len() - kept.len();
        if removed > 0 {
            self.write_observations(&entity, &kept).await?;
        }
        Ok(removed)
    }

    async fn get_relations(&self, name: &str, direction: Direction, scopes: &[Scope]) -> Result<Vec<Relation>, GraphError> {
        Ok(self
            .load_relations(scopes)
            .await?
            .into_iter()
            .filter(|r| direction_matches(r, name, direction))
            .collect())
    }

    async fn find_path(
        &self,
        from: &str,
        to: &str,
        max_hops: usize,
        scopes: &[Scope],
    ) -> Result<Option<GraphPath>, GraphError> {
        let relations = self.load_relations(scopes).await?;
        Ok(shortest_path(&relations, from, to, max_hops))
    }

    async fn search_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>, GraphError> {
        let pattern = query.text.as_ref().map(|t| format!("%{}%", t.to_lowercase()));
        let rows = sqlx::query(
            r#"
            SELECT * FROM graph_entities
            WHERE (?1 IS NULL OR lower(name) LIKE ?1)
              AND (?2 IS NULL OR lower(entity_type) = lower(?2))
            ORDER BY created_at
            "#,
        )
        .bind(pattern)
        .bind(query.entity_type.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(storage("search entities"))?;

        let mut entities = Vec::new();
        for row in &rows {
            let entity = Self::row_to_entity(row)?;
            if query.matches(&entity) {
                entities.push(entity);
                if entities.len() >= query.limit {
                    break;
                }
            }
        }
        Ok(entities)
    }

    async fn delete_scope(&self, scope: &Scope) -> Result<(usize, usize), GraphError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin scope delete"))?;
        let relations = sqlx::query("DELETE FROM graph_relations WHERE scope = ?1")
            .bind(scope.key())
            .execute(&mut *tx)
            .await
            .map_err(storage("delete scope relations"))?
            .rows_affected();
        let entities = sqlx::query("DELETE FROM graph_entities WHERE scope = ?1")
            .bind(scope.key())
            .execute(&mut *tx)
            .await
            .map_err(storage("delete scope entities"))?
            .rows_affected();
        tx.commit().await.map_err(storage("commit scope delete"))?;
        Ok((entities as usize, relations as usize))
    }

    async fn entity_count(&self, scope: Option<&Scope>) -> Result<usize, GraphError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM graph_entities WHERE (?1 IS NULL OR scope = ?1)")
            .bind(scope.map(Scope::key))
            .fetch_one(&self.pool)
            .await
            .map_err(storage("count entities"))?;
        Ok(row.try_get::<i64, _>("n").unwrap_or(0) as usize)
    }

    async fn relation_count(&self, scope: Option<&Scope>) -> Result<usize, GraphError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM graph_relations WHERE (?1 IS NULL OR scope = ?1)")
            .bind(scope.map(Scope::key))
            .fetch_one(&self.pool)
            .await
            .map_err(storage("count relations"))?;
        Ok(row.try_get::<i64, _>("n").unwrap_or(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temple_core::graph::{NewEntity, NewRelation};

    async fn test_store() -> SqliteGraphStore {
        SqliteGraphStore::in_memory().await.unwrap()
    }

    fn person(name: &str) -> NewEntity {
        NewEntity::direct(name, "person", Scope::Global)
    }

    #[tokio::test]
    async fn create_and_get_entity() {
        let store = test_store().await;
        let entity = person("Alice").with_observations(vec!["likes Rust".into()]);
        assert!(store.create_entity(entity).await.unwrap());
        assert!(!store.create_entity(person("Alice")).await.unwrap());

        let fetched = store.get_entity("Alice", &Scope::Global).await.unwrap().unwrap();
        assert_eq!(fetched.entity_type, "person");
        assert_eq!(fetched.observations.len(), 1);
        assert_eq!(fetched.provenance, Provenance::Direct);
    }

    #[tokio::test]
    async fn batch_conflict_rolls_back() {
        let store = test_store().await;
        let batch = GraphBatch {
            entities: vec![person("Alice")],
            relations: vec![NewRelation::direct("Alice", "Ghost", "works_with", Scope::Global)],
        };
        assert!(matches!(
            store.apply_batch(batch).await,
            Err(GraphError::WriteConflict { .. })
        ));
        assert_eq!(store.entity_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ingest_provenance_is_kept() {
        let store = test_store().await;
        let mut alice = person("Alice");
        alice.confidence = 0.9;
        alice.provenance = Provenance::ingest("item-1");
        store.create_entity(alice).await.unwrap();

        let fetched = store.get_entity("Alice", &Scope::Global).await.unwrap().unwrap();
        assert!((fetched.confidence - 0.9).abs() < 1e-6);
        assert_eq!(fetched.provenance, Provenance::ingest("item-1"));
    }

    #[tokio::test]
    async fn relations_path_and_cascade() {
        let store = test_store().await;
        store
            .apply_batch(GraphBatch {
                entities: vec![person("A"), person("B"), person("C")],
                relations: vec![
                    NewRelation::direct("A", "B", "works_with", Scope::Global),
                    NewRelation::direct("B", "C", "mentors", Scope::Global),
                ],
            })
            .await
            .unwrap();

        let path = store.find_path("A", "C", 5, &[]).await.unwrap().unwrap();
        assert_eq!(path.entities, vec!["A", "B", "C"]);

        let both = store.get_relations("B", Direction::Both, &[]).await.unwrap();
        assert_eq!(both.len(), 2);

        assert!(store.delete_entity("B", &Scope::Global).await.unwrap());
        assert_eq!(store.relation_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn search_by_text_and_type() {
        let store = test_store().await;
        store.create_entity(person("Alice Smith")).await.unwrap();
        store
            .create_entity(NewEntity::direct("Rust", "technology", Scope::project("x")))
            .await
            .unwrap();

        let q = EntityQuery {
            text: Some("smith".into()),
            limit: 10,
            ..Default::default()
        };
        assert_eq!(store.search_entities(&q).await.unwrap().len(), 1);

        let q = EntityQuery {
            entity_type: Some("technology".into()),
            scopes: vec![Scope::Global],
            limit: 10,
            ..Default::default()
        };
        assert!(store.search_entities(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn legacy_schema_is_migrated() {
        let store = test_store().await;
        sqlx::query(
            "CREATE TABLE entities (name TEXT PRIMARY KEY, entity_type TEXT, observations TEXT, scope TEXT, created_at TEXT, updated_at TEXT)",
        )
        .execute(&store.pool)
        .await
        .unwrap();
        sqlx::query("CREATE TABLE relations (source TEXT, target TEXT, relation_type TEXT, scope TEXT, created_at TEXT)")
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO entities VALUES ('Alice', 'person', 'likes tea|writes Rust', 'global', NULL, NULL)")
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO entities VALUES ('Bob', 'person', '', 'global', NULL, NULL)")
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO relations VALUES ('Alice', 'Bob', 'works_with', 'global', NULL)")
            .execute(&store.pool)
            .await
            .unwrap();

        assert_eq!(store.schema_version().await.unwrap(), "legacy");
        let report = store.migrate_legacy_schema().await.unwrap();
        assert!(report.migrated);
        assert_eq!(report.entities, 2);
        assert_eq!(report.relations, 1);
        assert_eq!(store.schema_version().await.unwrap(), "v2");

        let alice = store.get_entity("Alice", &Scope::Global).await.unwrap().unwrap();
        assert_eq!(alice.observations.len(), 2);

        let again = store.migrate_legacy_schema().await.unwrap();
        assert!(!again.migrated);
        assert_eq!(again.reason.as_deref(), Some("already_v2"));
    }
}
