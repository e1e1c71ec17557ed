//! The agent context executor (§4.9): runs agent-authored SQL with
//! `:name` placeholders against the store's read-only path, binding only
//! the placeholders present in the query from a per-scene parameter
//! record.

use std::path::Path;

use tracing::warn;

use crate::model::Scene;
use crate::store::{Params, Row, Store};

/// Scene- and script-level fields an agent-authored SQL query may
/// reference by `:name`. Only fields actually present as placeholders in
/// the query are bound; everything else is left out of the bound
/// parameter set.
#[derive(Debug, Clone, Default)]
pub struct ContextParameters {
    pub content_hash: Option<String>,
    pub scene_number: Option<i64>,
    pub scene_id: Option<i64>,
    pub scene_heading: Option<String>,
    pub script_id: Option<i64>,
    pub file_path: Option<String>,
    pub project_name: Option<String>,
    pub episode: Option<i64>,
    pub season: Option<i64>,
    pub series: Option<String>,
    pub previous_scene_hash: Option<String>,
    pub next_scene_hash: Option<String>,
}

impl ContextParameters {
    /// Derive the full record from a parsed scene, walking `all_scenes`
    /// (the owning script's full, number-ordered scene list) to compute
    /// neighbor hashes, and falling back to the script file's parent
    /// directory name for `project_name` when `project_name_override` is
    /// not given.
    pub fn from_scene(
        scene: &Scene,
        script_file_path: &str,
        all_scenes: &[Scene],
        project_name_override: Option<&str>,
        season: Option<i64>,
        episode: Option<i64>,
        series: Option<&str>,
    ) -> Self {
        let mut sorted: Vec<&Scene> = all_scenes.iter().collect();
        sorted.sort_by_key(|s| s.scene_number);
        let position = sorted.iter().position(|s| s.id == scene.id);

        let previous_scene_hash = position
            .filter(|&i| i > 0)
            .and_then(|i| sorted.get(i - 1))
            .map(|s| s.content_hash.clone());
        let next_scene_hash = position
            .and_then(|i| sorted.get(i + 1))
            .map(|s| s.content_hash.clone());

        let project_name = project_name_override.map(str::to_owned).or_else(|| {
            Path::new(script_file_path)
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|s| s.to_str())
                .map(str::to_owned)
        });

        Self {
            content_hash: Some(scene.content_hash.clone()),
            scene_number: Some(scene.scene_number),
            scene_id: Some(scene.id),
            scene_heading: Some(scene.heading.clone()),
            script_id: Some(scene.script_id),
            file_path: Some(script_file_path.to_owned()),
            project_name,
            episode,
            season,
            series: series.map(str::to_owned),
            previous_scene_hash,
            next_scene_hash,
        }
    }

    /// Resolve `placeholder` (without its leading colon) to a bindable
    /// value, if this record carries a non-null value for it.
    fn resolve(&self, placeholder: &str) -> Option<crate::store::SqlValue> {
        match placeholder {
            "content_hash" => self.content_hash.clone().map(Into::into),
            "scene_number" => self.scene_number.map(Into::into),
            "scene_id" => self.scene_id.map(Into::into),
            "scene_heading" => self.scene_heading.clone().map(Into::into),
            "script_id" => self.script_id.map(Into::into),
            "file_path" => self.file_path.clone().map(Into::into),
            "project_name" => self.project_name.clone().map(Into::into),
            "episode" => self.episode.map(Into::into),
            "season" => self.season.map(Into::into),
            "series" => self.series.clone().map(Into::into),
            "previous_scene_hash" => self.previous_scene_hash.clone().map(Into::into),
            "next_scene_hash" => self.next_scene_hash.clone().map(Into::into),
            _ => None,
        }
    }
}

/// Every `:name` placeholder that appears in `sql`, deduplicated, in the
/// order they first occur. A `:` not followed by an identifier character
/// is not a placeholder and is skipped (so `::` and bare `:` in string
/// literals don't spuriously match — this executor only ever runs
/// trusted agent-authored SQL, not arbitrary user input, so a literal
/// colon inside a quoted string is accepted as a known, rare rough edge).
fn placeholders(sql: &str) -> Vec<String> {
    let mut found = Vec::new();
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b':' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                end += 1;
            }
            if end > start {
                let name = sql[start..end].to_owned();
                if !found.contains(&name) {
                    found.push(name);
                }
                i = end;
                continue;
            }
        }
        i += 1;
    }
    found
}

/// Executes parameterized SQL against the store's read-only path,
/// binding only the placeholders the query actually references.
pub struct ContextExecutor<'a> {
    store: &'a Store,
}

impl<'a> ContextExecutor<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Run `sql` with placeholders bound from `params`. Unknown
    /// placeholders (not present in `params`, or present but null) are
    /// left unbound — the store then fails the query, which is the
    /// intended behavior rather than a silent default. Any failure is
    /// logged and degrades to an empty result set rather than propagated,
    /// per this executor's graceful-degradation contract.
    pub fn execute(&self, sql: &str, params: &ContextParameters) -> Vec<Row> {
        let mut bound = Params::new();
        for name in placeholders(sql) {
            if let Some(value) = params.resolve(&name) {
                bound.insert(name, value);
            }
        }

        match self.store.fetch_all(sql, &bound) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "agent context query failed, degrading to empty result");
                Vec::new()
            }
        }
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

    fn make_scene(id: i64, script_id: i64, number: i64, hash: &str) -> Scene {
        Scene {
            id,
            script_id,
            scene_number: number,
            heading: format!("INT. ROOM {number} - DAY"),
            location: None,
            time_of_day: None,
            content: "Body.".into(),
            content_hash: hash.to_owned(),
            boneyard_metadata: None,
            dialogue: Vec::new(),
            action: Vec::new(),
            original_text: None,
            last_read_at: None,
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn placeholders_finds_unique_names_in_order() {
        let sql = "SELECT * FROM scenes WHERE script_id = :script_id AND scene_number = :scene_number OR script_id = :script_id";
        assert_eq!(placeholders(sql), vec!["script_id", "scene_number"]);
    }

    #[test]
    fn from_scene_computes_neighbor_hashes() {
        let scenes = vec![
            make_scene(1, 10, 1, "hash1"),
            make_scene(2, 10, 2, "hash2"),
            make_scene(3, 10, 3, "hash3"),
        ];
        let params = ContextParameters::from_scene(
            &scenes[1],
            "/repo/demo/demo.fountain",
            &scenes,
            None,
            None,
            None,
            None,
        );
        assert_eq!(params.previous_scene_hash.as_deref(), Some("hash1"));
        assert_eq!(params.next_scene_hash.as_deref(), Some("hash3"));
        assert_eq!(params.project_name.as_deref(), Some("demo"));
    }

    #[test]
    fn from_scene_handles_boundary_scenes() {
        let scenes = vec![make_scene(1, 10, 1, "hash1"), make_scene(2, 10, 2, "hash2")];
        let first = ContextParameters::from_scene(
            &scenes[0],
            "/repo/demo/demo.fountain",
            &scenes,
            None,
            None,
            None,
            None,
        );
        assert_eq!(first.previous_scene_hash, None);
        assert_eq!(first.next_scene_hash.as_deref(), Some("hash2"));
    }

    #[test]
    fn execute_binds_only_referenced_placeholders() {
        let (_dir, store) = test_store();
        let mut insert = Params::new();
        insert.insert("title".into(), "demo".into());
        insert.insert("file_path".into(), "demo.fountain".into());
        store
            .execute("INSERT INTO scripts (title, file_path) VALUES (:title, :file_path)", &insert)
            .unwrap();

        let executor = ContextExecutor::new(&store);
        let params = ContextParameters {
            project_name: Some("demo".to_owned()),
            ..Default::default()
        };
        let rows = executor.execute("SELECT id FROM scripts WHERE title = :project_name", &params);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn execute_degrades_to_empty_on_failure() {
        let (_dir, store) = test_store();
        let executor = ContextExecutor::new(&store);
        let rows = executor.execute("SELECT * FROM not_a_real_table", &ContextParameters::default());
        assert!(rows.is_empty());
    }

    #[test]
    fn unbound_placeholder_is_left_unbound() {
        let (_dir, store) = test_store();
        let executor = ContextExecutor::new(&store);
        // scene_id is never set in params, so :scene_id is left unbound
        // and the store rejects the statement — degrading to empty.
        let rows = executor.execute("SELECT * FROM scenes WHERE id = :scene_id", &ContextParameters::default());
        assert!(rows.is_empty());
    }
}
