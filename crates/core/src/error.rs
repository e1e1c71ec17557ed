use uuid::Uuid;

/// Errors produced by scriptrag-core operations.
///
/// Grouped along the categories from the design's error-handling policy:
/// user-input, environmental, provider, format, and internal/storage. RPC
/// entry points convert this enum into `{success: false, error: string}`;
/// everything else propagates to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ── User-input errors ──────────────────────────────────────────
    #[error("scene content is invalid: {0:?}")]
    InvalidScene(Vec<String>),

    #[error("unknown query: {0}")]
    UnknownQuery(String),

    #[error("session token is unknown or expired")]
    SessionInvalid,

    #[error("scene was modified by another writer since it was read")]
    ConcurrentModification,

    #[error("scene not found: {0}")]
    SceneNotFound(String),

    #[error("script not found: {0}")]
    ScriptNotFound(String),

    // ── Environmental errors ───────────────────────────────────────
    #[error("database not found at {0}")]
    DatabaseNotFound(String),

    #[error("connection pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("not a git repository: {0}")]
    GitNotARepo(String),

    #[error("filesystem unavailable: {0}")]
    FilesystemUnavailable(String),

    #[error("resolved database path {resolved} escapes configured parent {parent}")]
    PathTraversal { resolved: String, parent: String },

    // ── Provider errors ────────────────────────────────────────────
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider {0} unavailable")]
    ProviderUnavailable(String),

    #[error("all providers failed: {0:?}")]
    AllProvidersFailed(Vec<(crate::provider::ProviderTag, String)>),

    // ── Format errors ──────────────────────────────────────────────
    #[error("embedding format error: {0}")]
    EmbeddingFormatError(String),

    #[error("schema version mismatch: database is at {found}, binary expects {expected}")]
    SchemaMismatch { found: i64, expected: i64 },

    #[error("malformed metadata for {entity}: {reason}")]
    MalformedMetadata { entity: String, reason: String },

    // ── Internal / storage ─────────────────────────────────────────
    #[error("database error ({constraint:?}): {message}")]
    Database {
        message: String,
        constraint: Option<String>,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("screenplay parse error: {0}")]
    ScreenplayParseError(String),

    #[error("search timed out")]
    SearchTimeout,

    #[error("session {0} not found for scene lookup")]
    SessionNotFound(Uuid),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        let constraint = match &e {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => Some(msg.clone()),
            _ => None,
        };
        Error::Database {
            message: e.to_string(),
            constraint,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
