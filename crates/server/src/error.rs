use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified API error type. Every RPC handler converts its
/// [`scriptrag_core::Error`] into one of these before it crosses the HTTP
/// boundary — the body is always `{success: false, error: string}` (§7),
/// the status code is chosen from the error's category.
pub struct ApiError(pub StatusCode, pub String);

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, msg.into())
    }
}

impl From<scriptrag_core::Error> for ApiError {
    fn from(e: scriptrag_core::Error) -> Self {
        use scriptrag_core::Error::*;
        let status = match &e {
            InvalidScene(_) | UnknownQuery(_) | SessionInvalid | ConcurrentModification
            | SceneNotFound(_) | ScriptNotFound(_) => StatusCode::BAD_REQUEST,
            DatabaseNotFound(_) | PoolExhausted { .. } | GitNotARepo(_)
            | FilesystemUnavailable(_) | PathTraversal { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RateLimited { .. } | ProviderUnavailable(_) | AllProvidersFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            EmbeddingFormatError(_) | SchemaMismatch { .. } | MalformedMetadata { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Database { .. } | Serialization(_) | Io(_) | ScreenplayParseError(_)
            | SearchTimeout | SessionNotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(json!({ "success": false, "error": self.1 }));
        (self.0, body).into_response()
    }
}
