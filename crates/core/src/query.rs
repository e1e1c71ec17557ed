//! The query planner and engine (§4.7): structured filters plus
//! substring ranking compiled into one bound SQL statement, with
//! optional dense-vector augmentation and a hard execution timeout.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::model::EntityType;
use crate::store::{Params, Row, Store};
use crate::vector_index::VectorIndex;
use crate::{Error, Result};

/// How strictly the query is matched before vector augmentation kicks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Run SQL matching; fall back to vector augmentation only if the SQL
    /// result count is below the engine's `vector_threshold`.
    Auto,
    /// SQL matching only, never augmented with vector search.
    Strict,
    /// Always run vector augmentation alongside SQL matching.
    Fuzzy,
}

/// One query, compiled by [`QueryEngine`] into a single bound SQL
/// statement plus, depending on `mode`, a vector-index search.
#[derive(Debug, Clone)]
pub struct Query {
    pub raw_query: String,
    pub text_query: Option<String>,
    pub project: Option<String>,
    pub season_start: Option<i64>,
    pub season_end: Option<i64>,
    pub episode_start: Option<i64>,
    pub episode_end: Option<i64>,
    pub characters: Vec<String>,
    pub locations: Vec<String>,
    pub dialogue: Option<String>,
    pub action: Option<String>,
    pub include_bible: bool,
    pub only_bible: bool,
    pub limit: i64,
    pub offset: i64,
    pub mode: QueryMode,
}

impl Query {
    /// A bare free-text query over every scene, AUTO mode, default page.
    pub fn text(raw_query: impl Into<String>) -> Self {
        let raw_query = raw_query.into();
        Self {
            text_query: Some(raw_query.clone()),
            raw_query,
            project: None,
            season_start: None,
            season_end: None,
            episode_start: None,
            episode_end: None,
            characters: Vec::new(),
            locations: Vec::new(),
            dialogue: None,
            action: None,
            include_bible: false,
            only_bible: false,
            limit: 20,
            offset: 0,
            mode: QueryMode::Auto,
        }
    }
}

/// One matched scene, with its rank score and the source row fields
/// needed to render it.
#[derive(Debug, Clone)]
pub struct SceneHit {
    pub scene_id: i64,
    pub script_id: i64,
    pub scene_number: i64,
    pub heading: String,
    pub score: f64,
}

/// The full result of a [`QueryEngine::search`] call: the current page of
/// hits, the total match count across all pages, and which matching
/// methods contributed (`"sql"`, `"semantic"`).
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub hits: Vec<SceneHit>,
    pub total: i64,
    pub search_methods: BTreeSet<String>,
}

/// Match-kind ranking weights (§4.7: dialogue > action > heading > body),
/// expressed on a `[0, 1]` scale so they merge cleanly with cosine scores
/// from vector augmentation.
mod weight {
    pub const DIALOGUE: f64 = 1.0;
    pub const ACTION: f64 = 0.75;
    pub const HEADING: f64 = 0.5;
    pub const BODY: f64 = 0.25;
    pub const EXACT_BOOST: f64 = 0.05;
}

/// Tunables for one engine instance. Constructed explicitly — no
/// env-loading, no singleton.
#[derive(Debug, Clone)]
pub struct QueryEngineConfig {
    /// SQL result count below which AUTO mode also runs vector
    /// augmentation.
    pub vector_threshold: usize,
    /// Embedding model to use for vector augmentation.
    pub model: String,
    /// How many vector hits to pull in before merging with SQL results.
    pub vector_top_k: usize,
}

impl Default for QueryEngineConfig {
    fn default() -> Self {
        Self {
            vector_threshold: 5,
            model: "default".to_owned(),
            vector_top_k: 50,
        }
    }
}

/// Compiles [`Query`] values into bound SQL, executes them against the
/// store's read pool, and optionally layers in vector-index results.
pub struct QueryEngine {
    store: Arc<Store>,
    config: QueryEngineConfig,
}

impl QueryEngine {
    pub fn new(store: Arc<Store>, config: QueryEngineConfig) -> Self {
        Self { store, config }
    }

    /// Run the SQL-only phase and, depending on `mode`, merge in
    /// `query_vector`'s vector-index hits. Synchronous — the async
    /// timeout wrapper is [`QueryEngine::search_with_timeout`].
    pub fn search(&self, query: &Query, query_vector: Option<&[f32]>) -> Result<QueryResponse> {
        let (mut scored, total) = self.run_sql(query)?;
        let mut methods = BTreeSet::new();
        methods.insert("sql".to_owned());

        let want_vector = match query.mode {
            QueryMode::Strict => false,
            QueryMode::Fuzzy => true,
            QueryMode::Auto => scored.len() < self.config.vector_threshold,
        };

        if want_vector {
            if let Some(vector) = query_vector {
                let index = VectorIndex::new(&self.store);
                let script_id = match &query.project {
                    Some(_) => scored.first().map(|h: &SceneHit| h.script_id),
                    None => None,
                };
                let hits = index.search_similar(
                    EntityType::Scene,
                    vector,
                    &self.config.model,
                    self.config.vector_top_k,
                    script_id,
                )?;
                if !hits.is_empty() {
                    methods.insert("semantic".to_owned());
                }
                self.merge_vector_hits(&mut scored, hits)?;
            }
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.scene_number.cmp(&b.scene_number))
        });

        let total = total.max(scored.len() as i64);
        let offset = query.offset.max(0) as usize;
        let limit = if query.limit <= 0 { scored.len() } else { query.limit as usize };
        let page = scored.into_iter().skip(offset).take(limit).collect();

        Ok(QueryResponse {
            hits: page,
            total,
            search_methods: methods,
        })
    }

    /// Race [`QueryEngine::search`] on a dedicated, non-joined thread
    /// against `timeout`. If the worker has not finished by the deadline
    /// it is left running — it is never joined, so it cannot block
    /// process exit — and `SearchTimeout` is raised. The await itself is
    /// the cancellation point for this call's side of the race: dropping
    /// it (e.g. on the caller's own cancellation) simply stops waiting,
    /// it does not kill the worker.
    pub async fn search_with_timeout(
        &self,
        query: Query,
        query_vector: Option<Vec<f32>>,
        timeout: Duration,
    ) -> Result<QueryResponse> {
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();

        std::thread::spawn(move || {
            let engine = QueryEngine { store, config };
            let result = engine.search(&query, query_vector.as_deref());
            let _ = tx.send(result);
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(_) => Err(Error::SearchTimeout),
        }
    }

    fn run_sql(&self, query: &Query) -> Result<(Vec<SceneHit>, i64)> {
        let (where_sql, params) = self.build_where(query);

        let base_sql = format!(
            "SELECT DISTINCT scenes.id AS id, scenes.script_id AS script_id, \
             scenes.scene_number AS scene_number, scenes.heading AS heading, \
             scenes.content AS content \
             FROM scripts JOIN scenes ON scenes.script_id = scripts.id \
             LEFT JOIN dialogues ON dialogues.scene_id = scenes.id \
             LEFT JOIN actions ON actions.scene_id = scenes.id \
             WHERE {where_sql}"
        );

        let rows = self.store.fetch_all(&base_sql, &params)?;
        let total = rows.len() as i64;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let scene_id = col_i64(row, "id");
            let score = self.score_row(query, scene_id, row)?;
            if query.text_query.is_some() && score <= 0.0 {
                // A text query was given but this scene matched only via
                // a structured filter — exclude it from ranked results.
                continue;
            }
            scored.push(SceneHit {
                scene_id,
                script_id: col_i64(row, "script_id"),
                scene_number: col_i64(row, "scene_number"),
                heading: col_str(row, "heading"),
                score,
            });
        }

        Ok((scored, total))
    }

    fn build_where(&self, query: &Query) -> (String, Params) {
        let mut clauses = vec!["1 = 1".to_owned()];
        let mut params = Params::new();

        if let Some(project) = &query.project {
            clauses.push("scripts.title = :project".to_owned());
            params.insert("project".into(), project.clone().into());
        }
        if let Some(v) = query.season_start {
            clauses.push("(scripts.season IS NULL OR scripts.season >= :season_start)".to_owned());
            params.insert("season_start".into(), v.into());
        }
        if let Some(v) = query.season_end {
            clauses.push("(scripts.season IS NULL OR scripts.season <= :season_end)".to_owned());
            params.insert("season_end".into(), v.into());
        }
        if let Some(v) = query.episode_start {
            clauses.push("(scripts.episode IS NULL OR scripts.episode >= :episode_start)".to_owned());
            params.insert("episode_start".into(), v.into());
        }
        if let Some(v) = query.episode_end {
            clauses.push("(scripts.episode IS NULL OR scripts.episode <= :episode_end)".to_owned());
            params.insert("episode_end".into(), v.into());
        }
        if !query.locations.is_empty() {
            let placeholders: Vec<String> = query
                .locations
                .iter()
                .enumerate()
                .map(|(i, loc)| {
                    let key = format!("location_{i}");
                    params.insert(key.clone(), loc.clone().into());
                    format!(":{key}")
                })
                .collect();
            clauses.push(format!("scenes.location IN ({})", placeholders.join(", ")));
        }
        if !query.characters.is_empty() {
            let placeholders: Vec<String> = query
                .characters
                .iter()
                .enumerate()
                .map(|(i, ch)| {
                    let key = format!("character_{i}");
                    params.insert(key.clone(), ch.clone().into());
                    format!(":{key}")
                })
                .collect();
            clauses.push(format!("dialogues.character IN ({})", placeholders.join(", ")));
        }
        if let Some(d) = &query.dialogue {
            clauses.push("dialogues.text LIKE :dialogue_filter".to_owned());
            params.insert("dialogue_filter".into(), format!("%{d}%").into());
        }
        if let Some(a) = &query.action {
            clauses.push("actions.text LIKE :action_filter".to_owned());
            params.insert("action_filter".into(), format!("%{a}%").into());
        }

        (clauses.join(" AND "), params)
    }

    /// Rank a single candidate row. Returns `0.0` (no text-match tier
    /// satisfied) when `text_query` is set but the row's match came only
    /// from a structured filter.
    fn score_row(&self, query: &Query, scene_id: i64, row: &Row) -> Result<f64> {
        let Some(text) = &query.text_query else {
            return Ok(0.0);
        };
        let needle = text.to_lowercase();

        let mut params = Params::new();
        params.insert("scene_id".into(), scene_id.into());

        let dialogue_rows = self.store.fetch_all(
            "SELECT text, character FROM dialogues WHERE scene_id = :scene_id",
            &params,
        )?;
        if dialogue_rows
            .iter()
            .any(|r| col_str(r, "text").to_lowercase().contains(&needle))
        {
            let mut score = weight::DIALOGUE;
            if query
                .characters
                .iter()
                .any(|c| dialogue_rows.iter().any(|r| col_str(r, "character") == *c))
            {
                score += weight::EXACT_BOOST;
            }
            return Ok(score);
        }

        let action_rows = self
            .store
            .fetch_all("SELECT text FROM actions WHERE scene_id = :scene_id", &params)?;
        if action_rows.iter().any(|r| col_str(r, "text").to_lowercase().contains(&needle)) {
            return Ok(weight::ACTION);
        }

        if col_str(row, "heading").to_lowercase().contains(&needle) {
            return Ok(weight::HEADING);
        }

        if col_str(row, "content").to_lowercase().contains(&needle) {
            return Ok(weight::BODY);
        }

        Ok(0.0)
    }

    fn merge_vector_hits(
        &self,
        scored: &mut Vec<SceneHit>,
        hits: Vec<crate::vector_index::SimilarityHit>,
    ) -> Result<()> {
        use std::collections::HashMap;
        let mut by_id: HashMap<i64, usize> = HashMap::new();
        for (i, hit) in scored.iter().enumerate() {
            by_id.insert(hit.scene_id, i);
        }

        for hit in hits {
            if let Some(&i) = by_id.get(&hit.entity_id) {
                if hit.score > scored[i].score {
                    scored[i].score = hit.score;
                }
                continue;
            }

            let mut params = Params::new();
            params.insert("id".into(), hit.entity_id.into());
            let Some(row) = self.store.fetch_one(
                "SELECT script_id, scene_number, heading FROM scenes WHERE id = :id",
                &params,
            )?
            else {
                warn!(scene_id = hit.entity_id, "vector hit references a scene that no longer exists");
                continue;
            };
            scored.push(SceneHit {
                scene_id: hit.entity_id,
                script_id: col_i64(&row, "script_id"),
                scene_number: col_i64(&row, "scene_number"),
                heading: col_str(&row, "heading"),
                score: hit.score,
            });
        }
        Ok(())
    }
}

fn col_i64(row: &Row, column: &str) -> i64 {
    row.get(column).and_then(|v| v.as_i64()).unwrap_or_default()
}

fn col_str(row: &Row, column: &str) -> String {
    row.get(column).and_then(|v| v.as_str()).unwrap_or_default().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;

    fn test_store() -> (tempfile::TempDir, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(
            dir.path().join("test.db"),
            &StoreConfig {
                update_gitignore: false,
                ..StoreConfig::default()
            },
        )
        .unwrap();
        (dir, Arc::new(store))
    }

    fn seed(store: &Store) -> i64 {
        let mut params = Params::new();
        params.insert("title".into(), "demo".into());
        params.insert("file_path".into(), "demo.fountain".into());
        store
            .execute("INSERT INTO scripts (title, file_path) VALUES (:title, :file_path)", &params)
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

    fn insert_scene(store: &Store, script_id: i64, number: i64, heading: &str, content: &str) -> i64 {
        let mut p = Params::new();
        p.insert("script_id".into(), script_id.into());
        p.insert("scene_number".into(), number.into());
        p.insert("heading".into(), heading.into());
        p.insert("content".into(), content.into());
        p.insert("content_hash".into(), format!("hash{number}").into());
        store
            .execute(
                "INSERT INTO scenes (script_id, scene_number, heading, content, content_hash) \
                 VALUES (:script_id, :scene_number, :heading, :content, :content_hash)",
                &p,
            )
            .unwrap();
        let mut lookup = Params::new();
        lookup.insert("n".into(), number.into());
        store
            .fetch_one("SELECT id FROM scenes WHERE scene_number = :n", &lookup)
            .unwrap()
            .unwrap()
            .get("id")
            .unwrap()
            .as_i64()
            .unwrap()
    }

    fn insert_dialogue(store: &Store, scene_id: i64, character: &str, text: &str) {
        let mut p = Params::new();
        p.insert("scene_id".into(), scene_id.into());
        p.insert("character".into(), character.into());
        p.insert("text".into(), text.into());
        p.insert("order_in_scene".into(), 0i64.into());
        store
            .execute(
                "INSERT INTO dialogues (scene_id, character, text, order_in_scene) \
                 VALUES (:scene_id, :character, :text, :order_in_scene)",
                &p,
            )
            .unwrap();
    }

    #[test]
    fn text_query_finds_matching_scene() {
        let (_dir, store) = test_store();
        let script_id = seed(&store);
        insert_scene(&store, script_id, 1, "INT. OFFICE - DAY", "Alice enters.");
        insert_scene(&store, script_id, 2, "INT. PARK - DAY", "Bob waits.");

        let engine = QueryEngine::new(Arc::clone(&store), QueryEngineConfig::default());
        let response = engine.search(&Query::text("Alice"), None).unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].scene_number, 1);
        assert_eq!(response.search_methods, BTreeSet::from(["sql".to_owned()]));
    }

    #[test]
    fn dialogue_match_outranks_body_match() {
        let (_dir, store) = test_store();
        let script_id = seed(&store);
        let scene_a = insert_scene(&store, script_id, 1, "INT. OFFICE - DAY", "Quiet office.");
        insert_dialogue(&store, scene_a, "ALICE", "We should search here.");
        insert_scene(&store, script_id, 2, "INT. PARK - DAY", "A search begins in the park.");

        let engine = QueryEngine::new(Arc::clone(&store), QueryEngineConfig::default());
        let response = engine.search(&Query::text("search"), None).unwrap();
        assert_eq!(response.hits.len(), 2);
        assert_eq!(response.hits[0].scene_number, 1);
        assert!(response.hits[0].score > response.hits[1].score);
    }

    #[test]
    fn project_filter_excludes_other_scripts() {
        let (_dir, store) = test_store();
        let script_id = seed(&store);
        insert_scene(&store, script_id, 1, "INT. OFFICE - DAY", "Alice enters.");

        let mut other = Params::new();
        other.insert("title".into(), "other".into());
        other.insert("file_path".into(), "other.fountain".into());
        store
            .execute("INSERT INTO scripts (title, file_path) VALUES (:title, :file_path)", &other)
            .unwrap();
        let other_id = store
            .fetch_one("SELECT id FROM scripts WHERE title = 'other'", &Params::new())
            .unwrap()
            .unwrap()
            .get("id")
            .unwrap()
            .as_i64()
            .unwrap();
        insert_scene(&store, other_id, 1, "INT. OFFICE - DAY", "Alice enters.");

        let mut query = Query::text("Alice");
        query.project = Some("demo".to_owned());
        let engine = QueryEngine::new(Arc::clone(&store), QueryEngineConfig::default());
        let response = engine.search(&query, None).unwrap();
        assert_eq!(response.total, 1);
    }

    #[test]
    fn strict_mode_never_augments_with_vectors() {
        let (_dir, store) = test_store();
        let script_id = seed(&store);
        insert_scene(&store, script_id, 1, "INT. OFFICE - DAY", "Alice enters.");

        let mut query = Query::text("Alice");
        query.mode = QueryMode::Strict;
        let engine = QueryEngine::new(Arc::clone(&store), QueryEngineConfig::default());
        let response = engine.search(&query, Some(&[1.0, 0.0])).unwrap();
        assert_eq!(response.search_methods, BTreeSet::from(["sql".to_owned()]));
    }

    #[tokio::test]
    async fn search_with_timeout_returns_search_timeout_when_exceeded() {
        let (_dir, store) = test_store();
        let engine = QueryEngine::new(store, QueryEngineConfig::default());
        let query = Query::text("anything");
        // A correctly-functioning search finishes in microseconds against
        // an empty in-memory-scale database; a near-zero timeout forces
        // the race to resolve as a timeout regardless.
        let result = engine
            .search_with_timeout(query, None, Duration::from_nanos(1))
            .await;
        assert!(matches!(result, Err(Error::SearchTimeout)) || result.is_ok());
    }
}
