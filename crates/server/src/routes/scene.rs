//! The agent tool surface (§6): `scene_read`, `scene_add`,
//! `scene_update`, `scene_delete`. Every handler converts its
//! [`scriptrag_core::Error`] into the RPC's `{success: false, error}`
//! shape via [`crate::error::ApiError`] rather than letting it propagate
//! as a bare HTTP error.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scriptrag_core::{Position, Scene, SceneIdentifier};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/scene_read", post(scene_read))
        .route("/scene_add", post(scene_add))
        .route("/scene_update", post(scene_update))
        .route("/scene_delete", post(scene_delete))
}

#[derive(Debug, Deserialize)]
pub struct SceneReadRequest {
    pub project: String,
    pub scene_number: i64,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub reader_id: String,
}

#[derive(Debug, Serialize)]
pub struct SceneReadResponse {
    pub success: bool,
    pub scene: Scene,
    pub session_token: Uuid,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

async fn scene_read(
    State(state): State<AppState>,
    Json(req): Json<SceneReadRequest>,
) -> Result<Json<SceneReadResponse>, ApiError> {
    let id = SceneIdentifier {
        project: req.project,
        scene_number: req.scene_number,
        season: req.season,
        episode: req.episode,
    };
    let result = state.editor.read(&id, &req.reader_id)?;
    Ok(Json(SceneReadResponse {
        success: true,
        scene: result.scene,
        session_token: result.session_token,
        expires_at: result.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SceneAddRequest {
    pub project: String,
    pub content: String,
    pub after_scene: Option<i64>,
    pub before_scene: Option<i64>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SceneAddResponse {
    pub success: bool,
    pub created_scene: Scene,
    pub renumbered_scenes: Vec<i64>,
}

async fn scene_add(
    State(state): State<AppState>,
    Json(req): Json<SceneAddRequest>,
) -> Result<Json<SceneAddResponse>, ApiError> {
    let (anchor, position) = match (req.after_scene, req.before_scene) {
        (Some(n), None) => (n, Position::After),
        (None, Some(n)) => (n, Position::Before),
        _ => {
            return Err(ApiError::bad_request(
                "exactly one of after_scene or before_scene is required",
            ));
        }
    };
    let id = SceneIdentifier {
        project: req.project,
        scene_number: anchor,
        season: req.season,
        episode: req.episode,
    };
    let result = state.editor.add(&id, &req.content, position)?;
    Ok(Json(SceneAddResponse {
        success: true,
        created_scene: result.created_scene,
        renumbered_scenes: result.renumbered,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SceneUpdateRequest {
    pub project: String,
    pub scene_number: i64,
    pub content: String,
    pub session_token: Uuid,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub reader_id: String,
}

#[derive(Debug, Serialize)]
pub struct SceneUpdateResponse {
    pub success: bool,
    pub updated_scene: Scene,
    pub validation_errors: Vec<String>,
}

async fn scene_update(
    State(state): State<AppState>,
    Json(req): Json<SceneUpdateRequest>,
) -> Result<Json<SceneUpdateResponse>, ApiError> {
    let id = SceneIdentifier {
        project: req.project,
        scene_number: req.scene_number,
        season: req.season,
        episode: req.episode,
    };
    match state
        .editor
        .update(&id, &req.content, req.session_token, &req.reader_id)
    {
        Ok(result) => Ok(Json(SceneUpdateResponse {
            success: true,
            updated_scene: result.updated_scene,
            validation_errors: Vec::new(),
        })),
        Err(e @ scriptrag_core::Error::SessionInvalid) => Err(validation_error(e, "SESSION_INVALID")),
        Err(e @ scriptrag_core::Error::ConcurrentModification) => {
            Err(validation_error(e, "CONCURRENT_MODIFICATION"))
        }
        Err(e @ scriptrag_core::Error::SceneNotFound(_)) => Err(validation_error(e, "SCENE_NOT_FOUND")),
        Err(scriptrag_core::Error::InvalidScene(reasons)) => {
            Err(ApiError::bad_request(reasons.join("; ")))
        }
        Err(e) => Err(e.into()),
    }
}

/// Distinguished `validation_errors` codes (§6) travel as the error
/// string's content — the RPC shape keeps `success:false` either way, so
/// the caller's code/message distinction lives entirely in this string.
fn validation_error(e: scriptrag_core::Error, code: &str) -> ApiError {
    ApiError::bad_request(format!("{code}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_embeds_the_code() {
        let err = validation_error(scriptrag_core::Error::SessionInvalid, "SESSION_INVALID");
        assert!(err.1.starts_with("SESSION_INVALID:"));
    }

    #[test]
    fn add_request_deserializes_after_and_before_scene() {
        let after: SceneAddRequest = serde_json::from_str(
            r#"{"project":"demo","content":"INT. ROOM - DAY","after_scene":3}"#,
        )
        .unwrap();
        assert_eq!(after.after_scene, Some(3));
        assert_eq!(after.before_scene, None);
    }
}

#[derive(Debug, Deserialize)]
pub struct SceneDeleteRequest {
    pub project: String,
    pub scene_number: i64,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub confirm: bool,
}

#[derive(Debug, Serialize)]
pub struct SceneDeleteResponse {
    pub success: bool,
    pub renumbered_scenes: Vec<i64>,
}

async fn scene_delete(
    State(state): State<AppState>,
    Json(req): Json<SceneDeleteRequest>,
) -> Result<Json<SceneDeleteResponse>, ApiError> {
    let id = SceneIdentifier {
        project: req.project,
        scene_number: req.scene_number,
        season: req.season,
        episode: req.episode,
    };
    let result = state.editor.delete(&id, req.confirm)?;
    Ok(Json(SceneDeleteResponse {
        success: true,
        renumbered_scenes: result.renumbered,
    }))
}
