//! The screenplay data model: scripts, scenes, dialogue/action lines,
//! bibles, bible chunks, and embeddings. Mirrors §3 of the design.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A logical screenplay, identified by its source file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub file_path: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub scenes: Vec<Scene>,
}

impl Script {
    pub fn new(title: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            id: 0,
            title: title.into(),
            author: None,
            season: None,
            episode: None,
            file_path: file_path.into(),
            metadata: BTreeMap::new(),
            scenes: Vec::new(),
        }
    }
}

/// One screenplay scene.
///
/// `content_hash` is the stable identity of the scene (see
/// [`crate::hash::compute_scene_hash`]); `boneyard_metadata` is optional
/// structured analyzer output embedded in — and stripped from — the
/// hashed/embedded text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: i64,
    pub script_id: i64,
    pub scene_number: i64,
    pub heading: String,
    pub location: Option<String>,
    pub time_of_day: Option<String>,
    pub content: String,
    pub content_hash: String,
    #[serde(default)]
    pub boneyard_metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
    #[serde(default)]
    pub action: Vec<ActionLine>,
    /// Present only when the scene came straight off a parser run, before
    /// boneyard has been stripped/re-attached by the store.
    #[serde(default)]
    pub original_text: Option<String>,
    pub last_read_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Scene {
    /// Build a scene from raw parser output, computing heading-derived
    /// fields and the content hash. Does not assign `id`/`script_id`/
    /// `scene_number` — the indexer or editor fills those in.
    pub fn from_parsed(heading: &str, content: &str, original_text: Option<String>) -> Self {
        let (_, location, time_of_day) = crate::heading::parse_scene_heading(heading);
        let hash_input = original_text.as_deref().unwrap_or(content);
        let content_hash = crate::hash::compute_scene_hash(hash_input, true);
        let now = chrono::Utc::now();
        Self {
            id: 0,
            script_id: 0,
            scene_number: 0,
            heading: heading.to_owned(),
            location,
            time_of_day,
            content: content.to_owned(),
            content_hash,
            boneyard_metadata: None,
            dialogue: Vec::new(),
            action: Vec::new(),
            original_text,
            last_read_at: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueLine {
    pub character: String,
    pub text: String,
    pub order_in_scene: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLine {
    pub text: String,
    pub order_in_scene: i64,
}

/// A long-form reference document attached to a [`Script`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bible {
    pub id: i64,
    pub script_id: i64,
    pub file_path: String,
    pub title: String,
    pub file_hash: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub chunks: Vec<BibleChunk>,
}

/// One node of a bible's heading tree.
///
/// `parent_chunk_id` only ever points at a chunk with a smaller
/// `chunk_number` in the same bible, which keeps the tree acyclic by
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BibleChunk {
    pub id: i64,
    pub bible_id: i64,
    pub chunk_number: i64,
    pub heading: String,
    pub level: i64,
    pub content: String,
    pub content_hash: String,
    pub parent_chunk_id: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Which kind of entity an embedding or vector-index row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Scene,
    BibleChunk,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Scene => "scene",
            EntityType::BibleChunk => "bible_chunk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scene" => Some(EntityType::Scene),
            "bible_chunk" => Some(EntityType::BibleChunk),
            _ => None,
        }
    }
}

/// A dense vector of 32-bit floats, tagged with the model and entity that
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub model: String,
    pub dimensions: usize,
    pub vector: Vec<f32>,
}

/// Identifies a scene for the editor/agent-tool surface: a project
/// (script title or logical name) optionally qualified by season/episode,
/// plus the 1-indexed scene number within it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneIdentifier {
    pub project: String,
    pub scene_number: i64,
    pub season: Option<i64>,
    pub episode: Option<i64>,
}
