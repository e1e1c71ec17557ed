//! The hybrid search endpoint (§4.7): wraps [`scriptrag_core::QueryEngine`]
//! behind a JSON request/response shape, racing the SQL+vector search
//! against a hard timeout so one slow query can't hang a request forever.

use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use scriptrag_core::{Query, QueryMode};

use crate::error::ApiError;
use crate::state::AppState;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

pub fn router() -> Router<AppState> {
    Router::new().route("/search", post(search))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub project: Option<String>,
    pub season_start: Option<i64>,
    pub season_end: Option<i64>,
    pub episode_start: Option<i64>,
    pub episode_end: Option<i64>,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    pub dialogue: Option<String>,
    pub action: Option<String>,
    #[serde(default)]
    pub include_bible: bool,
    #[serde(default)]
    pub only_bible: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub mode: SearchMode,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Auto,
    Strict,
    Fuzzy,
}

impl From<SearchMode> for QueryMode {
    fn from(mode: SearchMode) -> Self {
        match mode {
            SearchMode::Auto => QueryMode::Auto,
            SearchMode::Strict => QueryMode::Strict,
            SearchMode::Fuzzy => QueryMode::Fuzzy,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SceneHitDto {
    pub scene_id: i64,
    pub script_id: i64,
    pub scene_number: i64,
    pub heading: String,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub hits: Vec<SceneHitDto>,
    pub total: i64,
    pub search_methods: Vec<String>,
}

async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = Query {
        text_query: Some(req.query.clone()),
        raw_query: req.query,
        project: req.project,
        season_start: req.season_start,
        season_end: req.season_end,
        episode_start: req.episode_start,
        episode_end: req.episode_end,
        characters: req.characters,
        locations: req.locations,
        dialogue: req.dialogue,
        action: req.action,
        include_bible: req.include_bible,
        only_bible: req.only_bible,
        limit: req.limit,
        offset: req.offset,
        mode: req.mode.into(),
    };

    let response = state
        .query_engine
        .search_with_timeout(query, None, SEARCH_TIMEOUT)
        .await?;

    Ok(Json(SearchResponse {
        success: true,
        hits: response
            .hits
            .into_iter()
            .map(|h| SceneHitDto {
                scene_id: h.scene_id,
                script_id: h.script_id,
                scene_number: h.scene_number,
                heading: h.heading,
                score: h.score,
            })
            .collect(),
        total: response.total,
        search_methods: response.search_methods.into_iter().collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_auto() {
        assert!(matches!(SearchMode::default(), SearchMode::Auto));
    }

    #[test]
    fn search_mode_maps_to_query_mode() {
        assert_eq!(QueryMode::from(SearchMode::Auto), QueryMode::Auto);
        assert_eq!(QueryMode::from(SearchMode::Strict), QueryMode::Strict);
        assert_eq!(QueryMode::from(SearchMode::Fuzzy), QueryMode::Fuzzy);
    }

    #[test]
    fn request_json_deserializes_with_defaults() {
        let req: SearchRequest = serde_json::from_str(r#"{"query":"INT. HOUSE"}"#).unwrap();
        assert_eq!(req.limit, 20);
        assert_eq!(req.offset, 0);
        assert!(matches!(req.mode, SearchMode::Auto));
        assert!(req.characters.is_empty());
    }
}
