//! Triggers the indexer pipeline (§4.6) against a path the caller
//! supplies. A thin wrapper — all the actual parse/diff/persist/embed
//! logic lives in [`scriptrag_core::Indexer`]; this route just builds one
//! from the shared [`AppState`] and reports back its [`IndexReport`].

use std::path::PathBuf;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use scriptrag_core::{Indexer, IndexerConfig};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/index", post(index))
}

#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    pub root: PathBuf,
    #[serde(default)]
    pub bible_paths: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub embed: bool,
    pub model: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub success: bool,
    pub files_updated: usize,
    pub scenes_updated: usize,
    pub embeddings_created: usize,
    pub errors: Vec<String>,
}

async fn index(
    State(state): State<AppState>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, ApiError> {
    let config = IndexerConfig {
        recursive: req.recursive,
        force: req.force,
        dry_run: req.dry_run,
        embed: req.embed,
        model: req.model.unwrap_or_else(|| state.config.default_embedding_model.clone()),
        ..IndexerConfig::default()
    };

    let indexer = Indexer::new(
        state.store.as_ref(),
        state.screenplay_parser.as_ref(),
        state.bible_parser.as_ref(),
    )
    .with_embedding(&state.embedding_cache, &state.providers);

    let report = indexer
        .index_path(&req.root, &config, &req.bible_paths, None)
        .await?;

    Ok(Json(IndexResponse {
        success: true,
        files_updated: report.files_updated,
        scenes_updated: report.scenes_updated,
        embeddings_created: report.embeddings_created,
        errors: report.errors,
    }))
}
