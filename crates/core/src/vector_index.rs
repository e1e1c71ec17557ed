//! The dense-vector index (§4.5): one logical table per entity kind
//! (`scene_embeddings`, `bible_chunk_embeddings`), keyed by
//! `(entity_id, model)` with `INSERT OR REPLACE` upsert semantics, plus a
//! brute-force similarity scan and a one-time migration out of the legacy
//! blob-backed `embeddings` table.
//!
//! The store's schema keeps one table per entity type rather than one
//! table per model — functionally equivalent to "per-model tables" (the
//! `model` column partitions rows the same way separate tables would) and
//! far simpler to migrate and query across models.

use tracing::warn;

use crate::embedding::codec;
use crate::model::EntityType;
use crate::store::{Params, Row, Store};
use crate::{Error, Result};

/// One hit from [`VectorIndex::search_similar`].
#[derive(Debug, Clone)]
pub struct SimilarityHit {
    pub entity_id: i64,
    pub score: f64,
}

/// Outcome of [`VectorIndex::migrate_from_blob_storage`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationReport {
    pub migrated: usize,
    pub failed: usize,
}

fn table_for(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Scene => "scene_embeddings",
        EntityType::BibleChunk => "bible_chunk_embeddings",
    }
}

fn parent_table_for(entity_type: EntityType) -> (&'static str, &'static str) {
    match entity_type {
        EntityType::Scene => ("scenes", "script_id"),
        EntityType::BibleChunk => ("bible_chunks", "bible_id"),
    }
}

/// Cosine similarity mapped into the `[0, 1]` range: `score = (1 + cos) / 2`
/// — identical vectors score `1.0`, antipodal vectors score `0.0`. Follows
/// directly from the design's `score = 1 - distance / 2` with
/// `distance = 1 - cos`.
fn cosine_score(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.5;
    }
    let cos = dot / (norm_a * norm_b);
    (1.0 + cos) / 2.0
}

/// The dense-vector index over scene and bible-chunk embeddings.
pub struct VectorIndex<'a> {
    store: &'a Store,
}

impl<'a> VectorIndex<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Idempotent upsert of one entity's embedding under `model`.
    pub fn store(
        &self,
        entity_type: EntityType,
        entity_id: i64,
        vector: &[f32],
        model: &str,
    ) -> Result<()> {
        let table = table_for(entity_type);
        let blob = codec::encode(vector);
        let mut params = Params::new();
        params.insert("entity_id".into(), entity_id.into());
        params.insert("model".into(), model.into());
        params.insert("vector".into(), crate::store::SqlValue::Blob(blob));
        self.store.execute(
            &format!(
                "INSERT INTO {table} (entity_id, model, vector) VALUES (:entity_id, :model, :vector) \
                 ON CONFLICT(entity_id, model) DO UPDATE SET vector = excluded.vector"
            ),
            &params,
        )?;
        Ok(())
    }

    /// Whether `entity_id` already has a stored vector under `model`.
    pub fn has(&self, entity_type: EntityType, entity_id: i64, model: &str) -> Result<bool> {
        let table = table_for(entity_type);
        let mut params = Params::new();
        params.insert("entity_id".into(), entity_id.into());
        params.insert("model".into(), model.into());
        let row = self.store.fetch_one(
            &format!("SELECT 1 FROM {table} WHERE entity_id = :entity_id AND model = :model"),
            &params,
        )?;
        Ok(row.is_some())
    }

    /// Remove every vector-index row for `entity_id`, across all models.
    /// Normally redundant with the schema's `ON DELETE CASCADE`, but
    /// exposed so callers outside a cascading delete can invoke it
    /// directly (e.g. a future standalone re-embed command).
    pub fn remove(&self, entity_type: EntityType, entity_id: i64) -> Result<()> {
        let table = table_for(entity_type);
        let mut params = Params::new();
        params.insert("entity_id".into(), entity_id.into());
        self.store.execute(
            &format!("DELETE FROM {table} WHERE entity_id = :entity_id"),
            &params,
        )?;
        Ok(())
    }

    /// Brute-force cosine-similarity search over every stored vector for
    /// `model`, optionally restricted to entities belonging to
    /// `script_id`. Returns the `top_k` highest-scoring hits, descending.
    pub fn search_similar(
        &self,
        entity_type: EntityType,
        query_vec: &[f32],
        model: &str,
        top_k: usize,
        script_id: Option<i64>,
    ) -> Result<Vec<SimilarityHit>> {
        let table = table_for(entity_type);
        let mut params = Params::new();
        params.insert("model".into(), model.into());

        let sql = if let Some(sid) = script_id {
            let (parent_table, fk_column) = parent_table_for(entity_type);
            params.insert("script_id".into(), sid.into());
            let scope_column = match entity_type {
                EntityType::Scene => fk_column.to_owned(),
                EntityType::BibleChunk => {
                    // bible_chunks are scoped by bible_id, which is scoped
                    // by script_id one level up.
                    format!(
                        "(SELECT script_id FROM script_bibles WHERE id = {parent_table}.{fk_column})"
                    )
                }
            };
            format!(
                "SELECT e.entity_id AS entity_id, e.vector AS vector FROM {table} e \
                 JOIN {parent_table} ON {parent_table}.id = e.entity_id \
                 WHERE e.model = :model AND {scope_column} = :script_id"
            )
        } else {
            format!("SELECT entity_id, vector FROM {table} WHERE model = :model")
        };

        let rows: Vec<Row> = self.store.fetch_all(&sql, &params)?;
        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let entity_id = row
                .get("entity_id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| Error::Database {
                    message: "vector index row missing entity_id".into(),
                    constraint: None,
                })?;
            let blob = match row.get("vector") {
                Some(crate::store::SqlValue::Blob(b)) => b,
                _ => {
                    warn!(entity_id, "vector index row missing blob, skipping");
                    continue;
                }
            };
            let vector = match codec::decode(blob) {
                Ok(v) => v,
                Err(e) => {
                    warn!(entity_id, error = %e, "corrupt vector index blob, skipping");
                    continue;
                }
            };
            let score = cosine_score(query_vec, &vector);
            scored.push(SimilarityHit { entity_id, score });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Read every row out of the legacy blob-backed `embeddings` table (if
    /// present — it only exists pre-migration), re-inserting each into its
    /// per-entity-type table. Rows whose blob fails to decode are counted
    /// as failed and logged at warn rather than aborting the migration.
    pub fn migrate_from_blob_storage(&self) -> Result<MigrationReport> {
        let legacy_rows = self.store.fetch_all(
            "SELECT entity_type, entity_id, model, vector FROM embeddings",
            &Params::new(),
        )?;

        let mut report = MigrationReport::default();
        for row in legacy_rows {
            let entity_type_str = row.get("entity_type").and_then(|v| v.as_str());
            let entity_id = row.get("entity_id").and_then(|v| v.as_i64());
            let model = row.get("model").and_then(|v| v.as_str());
            let blob = row.get("vector");

            let (Some(entity_type_str), Some(entity_id), Some(model), Some(crate::store::SqlValue::Blob(blob))) =
                (entity_type_str, entity_id, model, blob)
            else {
                report.failed += 1;
                warn!("legacy embedding row missing a required column, skipping");
                continue;
            };

            let Some(entity_type) = EntityType::parse(entity_type_str) else {
                report.failed += 1;
                warn!(entity_type = entity_type_str, "unknown legacy entity_type, skipping");
                continue;
            };

            match codec::decode(blob) {
                Ok(vector) => {
                    self.store(entity_type, entity_id, &vector, model)?;
                    report.migrated += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(entity_id, error = %e, "failed to decode legacy embedding blob");
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(
            dir.path().join("test.db"),
            &StoreConfig {
                update_gitignore: false,
                ..StoreConfig::default()
            },
        )
        .unwrap();
        (dir, store)
    }

    fn insert_script(store: &Store) -> i64 {
        let mut params = Params::new();
        params.insert("title".into(), "Pilot".into());
        params.insert("file_path".into(), "pilot.fountain".into());
        store
            .execute(
                "INSERT INTO scripts (title, file_path) VALUES (:title, :file_path)",
                &params,
            )
            .unwrap();
        store
            .fetch_one("SELECT id FROM scripts", &Params::new())
            .unwrap()
            .unwrap()
            .get("id")
            .unwrap()
            .as_i64()
            .unwrap()
    }

    fn insert_scene(store: &Store, script_id: i64, number: i64) -> i64 {
        let mut params = Params::new();
        params.insert("script_id".into(), script_id.into());
        params.insert("scene_number".into(), number.into());
        params.insert("heading".into(), "INT. OFFICE - DAY".into());
        params.insert("content".into(), "Alice enters.".into());
        params.insert("content_hash".into(), format!("hash{number}").into());
        store
            .execute(
                "INSERT INTO scenes (script_id, scene_number, heading, content, content_hash) \
                 VALUES (:script_id, :scene_number, :heading, :content, :content_hash)",
                &params,
            )
            .unwrap();
        store
            .fetch_one(
                "SELECT id FROM scenes WHERE scene_number = :n",
                &{
                    let mut p = Params::new();
                    p.insert("n".into(), number.into());
                    p
                },
            )
            .unwrap()
            .unwrap()
            .get("id")
            .unwrap()
            .as_i64()
            .unwrap()
    }

    #[test]
    fn store_then_search_finds_identical_vector_first() {
        let (_dir, store) = test_store();
        let script_id = insert_script(&store);
        let scene_a = insert_scene(&store, script_id, 1);
        let scene_b = insert_scene(&store, script_id, 2);

        let index = VectorIndex::new(&store);
        index
            .store(EntityType::Scene, scene_a, &[1.0, 0.0, 0.0], "m")
            .unwrap();
        index
            .store(EntityType::Scene, scene_b, &[0.0, 1.0, 0.0], "m")
            .unwrap();

        let hits = index
            .search_similar(EntityType::Scene, &[1.0, 0.0, 0.0], "m", 5, None)
            .unwrap();
        assert_eq!(hits[0].entity_id, scene_a);
        assert!(hits[0].score > hits[1].score);
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn upsert_replaces_existing_vector() {
        let (_dir, store) = test_store();
        let script_id = insert_script(&store);
        let scene_a = insert_scene(&store, script_id, 1);

        let index = VectorIndex::new(&store);
        index.store(EntityType::Scene, scene_a, &[1.0, 0.0], "m").unwrap();
        index.store(EntityType::Scene, scene_a, &[0.0, 1.0], "m").unwrap();

        let hits = index
            .search_similar(EntityType::Scene, &[0.0, 1.0], "m", 5, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn script_id_filter_excludes_other_scripts() {
        let (_dir, store) = test_store();
        let script_a = insert_script(&store);
        let mut params = Params::new();
        params.insert("title".into(), "Other".into());
        params.insert("file_path".into(), "other.fountain".into());
        store
            .execute(
                "INSERT INTO scripts (title, file_path) VALUES (:title, :file_path)",
                &params,
            )
            .unwrap();
        let script_b = store
            .fetch_one(
                "SELECT id FROM scripts WHERE title = 'Other'",
                &Params::new(),
            )
            .unwrap()
            .unwrap()
            .get("id")
            .unwrap()
            .as_i64()
            .unwrap();

        let scene_a = insert_scene(&store, script_a, 1);
        let scene_b = insert_scene(&store, script_b, 1);

        let index = VectorIndex::new(&store);
        index.store(EntityType::Scene, scene_a, &[1.0, 0.0], "m").unwrap();
        index.store(EntityType::Scene, scene_b, &[1.0, 0.0], "m").unwrap();

        let hits = index
            .search_similar(EntityType::Scene, &[1.0, 0.0], "m", 5, Some(script_a))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, scene_a);
    }

    #[test]
    fn remove_deletes_all_models_for_entity() {
        let (_dir, store) = test_store();
        let script_id = insert_script(&store);
        let scene_a = insert_scene(&store, script_id, 1);

        let index = VectorIndex::new(&store);
        index.store(EntityType::Scene, scene_a, &[1.0], "m1").unwrap();
        index.store(EntityType::Scene, scene_a, &[1.0], "m2").unwrap();
        index.remove(EntityType::Scene, scene_a).unwrap();

        assert!(!index.has(EntityType::Scene, scene_a, "m1").unwrap());
        assert!(!index.has(EntityType::Scene, scene_a, "m2").unwrap());
    }

    #[test]
    fn migrate_from_blob_storage_moves_legacy_rows() {
        let (_dir, store) = test_store();
        let script_id = insert_script(&store);
        let scene_a = insert_scene(&store, script_id, 1);

        let mut params = Params::new();
        params.insert("entity_type".into(), "scene".into());
        params.insert("entity_id".into(), scene_a.into());
        params.insert("model".into(), "legacy-model".into());
        params.insert(
            "vector".into(),
            crate::store::SqlValue::Blob(codec::encode(&[1.0, 2.0])),
        );
        store
            .execute(
                "INSERT INTO embeddings (entity_type, entity_id, model, vector) \
                 VALUES (:entity_type, :entity_id, :model, :vector)",
                &params,
            )
            .unwrap();

        let index = VectorIndex::new(&store);
        let report = index.migrate_from_blob_storage().unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed, 0);
        assert!(index.has(EntityType::Scene, scene_a, "legacy-model").unwrap());
    }

    #[test]
    fn migrate_counts_corrupt_blob_as_failed() {
        let (_dir, store) = test_store();
        let script_id = insert_script(&store);
        let scene_a = insert_scene(&store, script_id, 1);

        let mut params = Params::new();
        params.insert("entity_type".into(), "scene".into());
        params.insert("entity_id".into(), scene_a.into());
        params.insert("model".into(), "legacy-model".into());
        params.insert("vector".into(), crate::store::SqlValue::Blob(vec![1, 2]));
        store
            .execute(
                "INSERT INTO embeddings (entity_type, entity_id, model, vector) \
                 VALUES (:entity_type, :entity_id, :model, :vector)",
                &params,
            )
            .unwrap();

        let index = VectorIndex::new(&store);
        let report = index.migrate_from_blob_storage().unwrap();
        assert_eq!(report.migrated, 0);
        assert_eq!(report.failed, 1);
    }
}
