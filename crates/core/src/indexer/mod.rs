//! The indexer pipeline (§4.6): parse → diff → upsert scripts, scenes,
//! dialogue, action, and bible chunks, then fill in any embeddings the
//! diff left missing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::bible::BibleParser;
use crate::embedding::EmbeddingCache;
use crate::format::format_for_embedding;
use crate::hash;
use crate::model::{ActionLine, Bible, DialogueLine, EntityType, Scene, Script};
use crate::provider::chain::ProviderChain;
use crate::screenplay::ScreenplayParser;
use crate::store::{Params, Store};
use crate::vector_index::VectorIndex;
use crate::{Error, Result};

/// Tunables for one indexer run. Constructed explicitly by the caller —
/// no env-var loading, no singleton.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Recurse into subdirectories when enumerating screenplay files.
    pub recursive: bool,
    /// Re-write every scene regardless of hash comparison.
    pub force: bool,
    /// Parse and diff but open no write transaction.
    pub dry_run: bool,
    /// Run the embedding phase after scenes and bibles are persisted.
    pub embed: bool,
    /// The embedding model to fill gaps under.
    pub model: String,
    /// Screenplay file extensions to enumerate (without the leading dot).
    pub extensions: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            force: false,
            dry_run: false,
            embed: true,
            model: "default".to_owned(),
            extensions: vec!["fountain".to_owned()],
        }
    }
}

/// Structured result of one indexer run (§4.6 step 8).
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub files_updated: usize,
    pub scenes_updated: usize,
    pub embeddings_created: usize,
    pub errors: Vec<String>,
}

/// Invoked with a human-readable progress line after each file/bible is
/// processed. Errors inside the callback are not possible by
/// construction — it returns `()`.
pub type ProgressCallback<'a> = dyn Fn(&str) + Send + Sync + 'a;

/// Parses a screenplay tree, diffs it against stored state, and persists
/// scenes, dialogue, action, bible chunks, and embeddings.
pub struct Indexer<'a> {
    store: &'a Store,
    parser: &'a dyn ScreenplayParser,
    bible_parser: &'a dyn BibleParser,
    embedding: Option<(&'a EmbeddingCache, &'a ProviderChain)>,
}

impl<'a> Indexer<'a> {
    pub fn new(
        store: &'a Store,
        parser: &'a dyn ScreenplayParser,
        bible_parser: &'a dyn BibleParser,
    ) -> Self {
        Self {
            store,
            parser,
            bible_parser,
            embedding: None,
        }
    }

    /// Wire in the embedding codec/cache and provider chain, enabling the
    /// embedding phase. Without this, `index_path` still parses, diffs,
    /// and persists scenes/bibles — it simply skips step 7.
    pub fn with_embedding(mut self, cache: &'a EmbeddingCache, providers: &'a ProviderChain) -> Self {
        self.embedding = Some((cache, providers));
        self
    }

    /// Enumerate, parse, and index every screenplay under `root`, then
    /// (unless `dry_run`) any bibles named in `bible_paths`, then
    /// (unless `dry_run` or embedding is disabled) fill in missing
    /// embeddings.
    pub async fn index_path(
        &self,
        root: &Path,
        config: &IndexerConfig,
        bible_paths: &[PathBuf],
        progress: Option<&ProgressCallback<'_>>,
    ) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        let mut touched_scenes: Vec<i64> = Vec::new();

        let files = enumerate_screenplay_files(root, config)?;
        for file in &files {
            match self.index_file(file, config, &mut report, &mut touched_scenes) {
                Ok(()) => {
                    if let Some(cb) = progress {
                        cb(&format!("indexed {}", file.display()));
                    }
                }
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "failed to index screenplay");
                    report.errors.push(format!("{}: {e}", file.display()));
                }
            }
        }

        for bible_path in bible_paths {
            if let Err(e) = self.index_bible(bible_path, config, &mut report) {
                warn!(file = %bible_path.display(), error = %e, "failed to index bible");
                report.errors.push(format!("{}: {e}", bible_path.display()));
            } else if let Some(cb) = progress {
                cb(&format!("indexed bible {}", bible_path.display()));
            }
        }

        if config.embed && !config.dry_run {
            if let Some((cache, providers)) = self.embedding {
                self.embed_scenes(&touched_scenes, cache, providers, config, &mut report)
                    .await;
            }
        }

        Ok(report)
    }

    fn index_file(
        &self,
        path: &Path,
        config: &IndexerConfig,
        report: &mut IndexReport,
        touched_scenes: &mut Vec<i64>,
    ) -> Result<()> {
        let mut script = self.parser.parse_screenplay(path)?;
        let (script_id, script_is_new) = self.upsert_script(&mut script, config)?;

        let existing = self.load_existing_scenes(script_id)?;
        let new_count = script.scenes.len() as i64;
        let mut any_change = script_is_new;

        for (idx, scene) in script.scenes.iter_mut().enumerate() {
            let number = idx as i64 + 1;
            scene.script_id = script_id;
            scene.scene_number = number;

            match existing.get(&number) {
                Some(old) if old.content_hash == scene.content_hash && !config.force => {
                    touched_scenes.push(old.id);
                    if self.refresh_boneyard_if_changed(old.id, scene, config)? {
                        debug!(scene_id = old.id, "refreshed boneyard metadata only");
                    }
                }
                Some(old) => {
                    if !config.dry_run {
                        self.delete_scene(old.id)?;
                        let id = self.insert_scene(scene, config)?;
                        touched_scenes.push(id);
                    }
                    any_change = true;
                    report.scenes_updated += 1;
                }
                None => {
                    if !config.dry_run {
                        let id = self.insert_scene(scene, config)?;
                        touched_scenes.push(id);
                    }
                    any_change = true;
                    report.scenes_updated += 1;
                }
            }
        }

        for (&number, old) in existing.range((new_count + 1)..) {
            debug!(number, "dropping scene beyond new scene count");
            if !config.dry_run {
                self.delete_scene(old.id)?;
            }
            any_change = true;
            report.scenes_updated += 1;
        }

        if any_change {
            report.files_updated += 1;
        }

        Ok(())
    }

    fn upsert_script(&self, script: &mut Script, config: &IndexerConfig) -> Result<(i64, bool)> {
        let mut lookup = Params::new();
        lookup.insert("file_path".into(), script.file_path.clone().into());
        let existing = self
            .store
            .fetch_one("SELECT id FROM scripts WHERE file_path = :file_path", &lookup)?;

        if let Some(row) = existing {
            let id = row.get("id").and_then(|v| v.as_i64()).ok_or_else(|| Error::Database {
                message: "script row missing id".into(),
                constraint: None,
            })?;
            script.id = id;
            if !config.dry_run {
                let mut params = Params::new();
                params.insert("id".into(), id.into());
                params.insert("title".into(), script.title.clone().into());
                params.insert("author".into(), script.author.clone().into());
                params.insert("season".into(), script.season.into());
                params.insert("episode".into(), script.episode.into());
                params.insert(
                    "metadata_json".into(),
                    serde_json::to_string(&script.metadata)?.into(),
                );
                self.store.execute(
                    "UPDATE scripts SET title = :title, author = :author, season = :season, \
                     episode = :episode, metadata_json = :metadata_json WHERE id = :id",
                    &params,
                )?;
            }
            return Ok((id, false));
        }

        if config.dry_run {
            return Ok((0, true));
        }

        let mut params = Params::new();
        params.insert("title".into(), script.title.clone().into());
        params.insert("author".into(), script.author.clone().into());
        params.insert("season".into(), script.season.into());
        params.insert("episode".into(), script.episode.into());
        params.insert("file_path".into(), script.file_path.clone().into());
        params.insert(
            "metadata_json".into(),
            serde_json::to_string(&script.metadata)?.into(),
        );
        self.store.execute(
            "INSERT INTO scripts (title, author, season, episode, file_path, metadata_json) \
             VALUES (:title, :author, :season, :episode, :file_path, :metadata_json)",
            &params,
        )?;

        let id = self
            .store
            .fetch_one("SELECT id FROM scripts WHERE file_path = :file_path", &lookup)?
            .and_then(|r| r.get("id").and_then(|v| v.as_i64()))
            .ok_or_else(|| Error::Database {
                message: "failed to read back inserted script id".into(),
                constraint: None,
            })?;
        script.id = id;
        Ok((id, true))
    }

    fn load_existing_scenes(&self, script_id: i64) -> Result<BTreeMap<i64, ExistingScene>> {
        let mut params = Params::new();
        params.insert("script_id".into(), script_id.into());
        let rows = self.store.fetch_all(
            "SELECT id, scene_number, content_hash FROM scenes WHERE script_id = :script_id",
            &params,
        )?;
        let mut map = BTreeMap::new();
        for row in rows {
            let number = row.get("scene_number").and_then(|v| v.as_i64()).unwrap_or_default();
            let id = row.get("id").and_then(|v| v.as_i64()).unwrap_or_default();
            let content_hash = row
                .get("content_hash")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned();
            map.insert(number, ExistingScene { id, content_hash });
        }
        Ok(map)
    }

    fn insert_scene(&self, scene: &Scene, config: &IndexerConfig) -> Result<i64> {
        if config.dry_run {
            return Ok(0);
        }
        let raw = scene.original_text.as_deref().unwrap_or(&scene.content);
        let clean_content = hash::strip_boneyard(raw);
        let boneyard = hash::extract_boneyard(raw);

        let mut params = Params::new();
        params.insert("script_id".into(), scene.script_id.into());
        params.insert("scene_number".into(), scene.scene_number.into());
        params.insert("heading".into(), scene.heading.clone().into());
        params.insert("location".into(), scene.location.clone().into());
        params.insert("time_of_day".into(), scene.time_of_day.clone().into());
        params.insert("content".into(), clean_content.into());
        params.insert("content_hash".into(), scene.content_hash.clone().into());
        params.insert(
            "boneyard_metadata_json".into(),
            boneyard.as_ref().map(|v| v.to_string()).into(),
        );
        self.store.execute(
            "INSERT INTO scenes (script_id, scene_number, heading, location, time_of_day, \
             content, content_hash, boneyard_metadata_json) \
             VALUES (:script_id, :scene_number, :heading, :location, :time_of_day, \
             :content, :content_hash, :boneyard_metadata_json)",
            &params,
        )?;

        let mut lookup = Params::new();
        lookup.insert("script_id".into(), scene.script_id.into());
        lookup.insert("scene_number".into(), scene.scene_number.into());
        let id = self
            .store
            .fetch_one(
                "SELECT id FROM scenes WHERE script_id = :script_id AND scene_number = :scene_number",
                &lookup,
            )?
            .and_then(|r| r.get("id").and_then(|v| v.as_i64()))
            .ok_or_else(|| Error::Database {
                message: "failed to read back inserted scene id".into(),
                constraint: None,
            })?;

        for line in &scene.dialogue {
            let mut p = Params::new();
            p.insert("scene_id".into(), id.into());
            p.insert("character".into(), line.character.clone().into());
            p.insert("text".into(), line.text.clone().into());
            p.insert("order_in_scene".into(), line.order_in_scene.into());
            self.store.execute(
                "INSERT INTO dialogues (scene_id, character, text, order_in_scene) \
                 VALUES (:scene_id, :character, :text, :order_in_scene)",
                &p,
            )?;
        }
        for line in &scene.action {
            let mut p = Params::new();
            p.insert("scene_id".into(), id.into());
            p.insert("text".into(), line.text.clone().into());
            p.insert("order_in_scene".into(), line.order_in_scene.into());
            self.store.execute(
                "INSERT INTO actions (scene_id, text, order_in_scene) VALUES (:scene_id, :text, :order_in_scene)",
                &p,
            )?;
        }

        Ok(id)
    }

    fn delete_scene(&self, scene_id: i64) -> Result<()> {
        let mut params = Params::new();
        params.insert("id".into(), scene_id.into());
        self.store.execute("DELETE FROM scenes WHERE id = :id", &params)?;
        Ok(())
    }

    /// When a scene's hash is unchanged but its raw boneyard annotation
    /// differs from what's stored, refresh just the metadata column —
    /// re-annotating a scene must not touch its content hash or trigger
    /// an embedding regeneration (§3, boneyard metadata).
    fn refresh_boneyard_if_changed(
        &self,
        scene_id: i64,
        scene: &Scene,
        config: &IndexerConfig,
    ) -> Result<bool> {
        let raw = scene.original_text.as_deref().unwrap_or(&scene.content);
        let boneyard = hash::extract_boneyard(raw);
        let new_json = boneyard.as_ref().map(|v| v.to_string());

        let mut lookup = Params::new();
        lookup.insert("id".into(), scene_id.into());
        let current = self
            .store
            .fetch_one(
                "SELECT boneyard_metadata_json FROM scenes WHERE id = :id",
                &lookup,
            )?
            .and_then(|r| r.get("boneyard_metadata_json").and_then(|v| v.as_str().map(str::to_owned)));

        if current == new_json {
            return Ok(false);
        }
        if config.dry_run {
            return Ok(true);
        }

        let mut params = Params::new();
        params.insert("id".into(), scene_id.into());
        params.insert("boneyard_metadata_json".into(), new_json.into());
        self.store.execute(
            "UPDATE scenes SET boneyard_metadata_json = :boneyard_metadata_json WHERE id = :id",
            &params,
        )?;
        Ok(true)
    }

    fn index_bible(&self, path: &Path, config: &IndexerConfig, report: &mut IndexReport) -> Result<()> {
        let mut bible = self.bible_parser.parse_bible(path)?;

        let mut lookup = Params::new();
        lookup.insert("file_path".into(), bible.file_path.clone().into());
        let existing_bible = self
            .store
            .fetch_one("SELECT id, file_hash FROM script_bibles WHERE file_path = :file_path", &lookup)?;

        let unchanged = existing_bible
            .as_ref()
            .and_then(|r| r.get("file_hash").and_then(|v| v.as_str()))
            .map(|h| h == bible.file_hash)
            .unwrap_or(false);
        if unchanged && !config.force {
            return Ok(());
        }

        let bible_id = if let Some(row) = existing_bible {
            let id = row.get("id").and_then(|v| v.as_i64()).unwrap_or_default();
            if !config.dry_run {
                // Re-indexing a changed bible: drop its chunks (cascades
                // their embeddings) and rebuild from scratch.
                let mut p = Params::new();
                p.insert("id".into(), id.into());
                self.store.execute("DELETE FROM bible_chunks WHERE bible_id = :id", &p)?;
                let mut up = Params::new();
                up.insert("id".into(), id.into());
                up.insert("title".into(), bible.title.clone().into());
                up.insert("file_hash".into(), bible.file_hash.clone().into());
                self.store.execute(
                    "UPDATE script_bibles SET title = :title, file_hash = :file_hash WHERE id = :id",
                    &up,
                )?;
            }
            id
        } else {
            if config.dry_run {
                report.files_updated += 1;
                return Ok(());
            }
            let mut p = Params::new();
            p.insert("script_id".into(), bible.script_id.into());
            p.insert("file_path".into(), bible.file_path.clone().into());
            p.insert("title".into(), bible.title.clone().into());
            p.insert("file_hash".into(), bible.file_hash.clone().into());
            self.store.execute(
                "INSERT INTO script_bibles (script_id, file_path, title, file_hash) \
                 VALUES (:script_id, :file_path, :title, :file_hash)",
                &p,
            )?;
            self.store
                .fetch_one("SELECT id FROM script_bibles WHERE file_path = :file_path", &lookup)?
                .and_then(|r| r.get("id").and_then(|v| v.as_i64()))
                .ok_or_else(|| Error::Database {
                    message: "failed to read back inserted bible id".into(),
                    constraint: None,
                })?
        };

        if !config.dry_run {
            self.insert_bible_chunks(bible_id, &mut bible)?;
        }
        report.files_updated += 1;
        Ok(())
    }

    fn insert_bible_chunks(&self, bible_id: i64, bible: &mut Bible) -> Result<()> {
        // Parent references are by chunk_number within this parse; map
        // them to real row ids as each chunk is inserted, in order, so a
        // child's parent (always an earlier chunk_number) is already
        // known.
        let mut number_to_id: BTreeMap<i64, i64> = BTreeMap::new();
        for chunk in &bible.chunks {
            let parent_id = chunk.parent_chunk_id.and_then(|n| number_to_id.get(&n).copied());

            let mut params = Params::new();
            params.insert("bible_id".into(), bible_id.into());
            params.insert("chunk_number".into(), chunk.chunk_number.into());
            params.insert("heading".into(), chunk.heading.clone().into());
            params.insert("level".into(), chunk.level.into());
            params.insert("content".into(), chunk.content.clone().into());
            params.insert("content_hash".into(), chunk.content_hash.clone().into());
            params.insert("parent_chunk_id".into(), parent_id.into());
            self.store.execute(
                "INSERT INTO bible_chunks (bible_id, chunk_number, heading, level, content, \
                 content_hash, parent_chunk_id) VALUES (:bible_id, :chunk_number, :heading, \
                 :level, :content, :content_hash, :parent_chunk_id)",
                &params,
            )?;

            let mut lookup = Params::new();
            lookup.insert("bible_id".into(), bible_id.into());
            lookup.insert("chunk_number".into(), chunk.chunk_number.into());
            let id = self
                .store
                .fetch_one(
                    "SELECT id FROM bible_chunks WHERE bible_id = :bible_id AND chunk_number = :chunk_number",
                    &lookup,
                )?
                .and_then(|r| r.get("id").and_then(|v| v.as_i64()))
                .ok_or_else(|| Error::Database {
                    message: "failed to read back inserted bible chunk id".into(),
                    constraint: None,
                })?;
            number_to_id.insert(chunk.chunk_number, id);
        }
        Ok(())
    }

    /// Step 7: for every touched scene lacking an embedding under the
    /// active model, ask the cache first, then the provider chain.
    /// Provider failures are recorded in `report.errors` rather than
    /// aborting the run — the scene simply keeps no embedding.
    async fn embed_scenes(
        &self,
        scene_ids: &[i64],
        cache: &EmbeddingCache,
        providers: &ProviderChain,
        config: &IndexerConfig,
        report: &mut IndexReport,
    ) {
        let index = VectorIndex::new(self.store);
        for &scene_id in scene_ids {
            match index.has(EntityType::Scene, scene_id, &config.model) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    report.errors.push(format!("scene {scene_id}: {e}"));
                    continue;
                }
            }

            let scene = match self.load_scene(scene_id) {
                Ok(Some(s)) => s,
                Ok(None) => continue,
                Err(e) => {
                    report.errors.push(format!("scene {scene_id}: {e}"));
                    continue;
                }
            };
            let text = format_for_embedding(&scene);

            let vector = if let Some(cached) = cache.get(&config.model, &text) {
                cached
            } else {
                match providers.embed(&text, &config.model).await {
                    Ok(v) => {
                        cache.put(&config.model, &text, &v);
                        v
                    }
                    Err(e) => {
                        warn!(scene_id, error = %e, "embedding provider failed for scene");
                        report.errors.push(format!("scene {scene_id}: {e}"));
                        continue;
                    }
                }
            };

            if let Err(e) = index.store(EntityType::Scene, scene_id, &vector, &config.model) {
                report.errors.push(format!("scene {scene_id}: {e}"));
                continue;
            }
            report.embeddings_created += 1;
        }
    }

    fn load_scene(&self, scene_id: i64) -> Result<Option<Scene>> {
        let mut lookup = Params::new();
        lookup.insert("id".into(), scene_id.into());
        let Some(row) = self.store.fetch_one(
            "SELECT id, script_id, scene_number, heading, location, time_of_day, content, \
             content_hash, boneyard_metadata_json, last_read_at, updated_at \
             FROM scenes WHERE id = :id",
            &lookup,
        )?
        else {
            return Ok(None);
        };

        let dialogue_rows = self.store.fetch_all(
            "SELECT character, text, order_in_scene FROM dialogues WHERE scene_id = :id ORDER BY order_in_scene",
            &lookup,
        )?;
        let action_rows = self.store.fetch_all(
            "SELECT text, order_in_scene FROM actions WHERE scene_id = :id ORDER BY order_in_scene",
            &lookup,
        )?;

        let dialogue = dialogue_rows
            .into_iter()
            .map(|r| DialogueLine {
                character: r.get("character").and_then(|v| v.as_str()).unwrap_or_default().to_owned(),
                text: r.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_owned(),
                order_in_scene: r.get("order_in_scene").and_then(|v| v.as_i64()).unwrap_or_default(),
            })
            .collect();
        let action = action_rows
            .into_iter()
            .map(|r| ActionLine {
                text: r.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_owned(),
                order_in_scene: r.get("order_in_scene").and_then(|v| v.as_i64()).unwrap_or_default(),
            })
            .collect();

        Ok(Some(Scene {
            id: row.get("id").and_then(|v| v.as_i64()).unwrap_or_default(),
            script_id: row.get("script_id").and_then(|v| v.as_i64()).unwrap_or_default(),
            scene_number: row.get("scene_number").and_then(|v| v.as_i64()).unwrap_or_default(),
            heading: row.get("heading").and_then(|v| v.as_str()).unwrap_or_default().to_owned(),
            location: row.get("location").and_then(|v| v.as_str().map(str::to_owned)),
            time_of_day: row.get("time_of_day").and_then(|v| v.as_str().map(str::to_owned)),
            content: row.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_owned(),
            content_hash: row.get("content_hash").and_then(|v| v.as_str()).unwrap_or_default().to_owned(),
            boneyard_metadata: row
                .get("boneyard_metadata_json")
                .and_then(|v| v.as_str())
                .and_then(|s| serde_json::from_str(s).ok()),
            dialogue,
            action,
            original_text: None,
            last_read_at: None,
            updated_at: chrono::Utc::now(),
        }))
    }
}

struct ExistingScene {
    id: i64,
    content_hash: String,
}

fn enumerate_screenplay_files(root: &Path, config: &IndexerConfig) -> Result<Vec<PathBuf>> {
    let mut builder = ignore::WalkBuilder::new(root);
    builder.hidden(true).git_ignore(false).max_depth(if config.recursive { None } else { Some(1) });

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = entry.map_err(|e| Error::FilesystemUnavailable(e.to_string()))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| config.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)));
        if matches_ext {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}
