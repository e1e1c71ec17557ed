//! Shared application state (§6): one store, editor, and query engine per
//! process, wired explicitly in [`crate::main`] — no env-var loading, no
//! global singleton.

use std::path::PathBuf;
use std::sync::Arc;

use scriptrag_core::{
    BibleParser, EmbeddingCache, EmbeddingProvider, ProviderChain, QueryEngine, QueryEngineConfig,
    SceneEditor, ScreenplayParser, Store, StoreConfig, StubBibleParser, StubScreenplayParser,
};

/// Tunables read once at startup and handed to [`AppState::new`]. A real
/// deployment would source these from a config file or CLI flags; this
/// struct only carries the values, it does not load them.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_path: PathBuf,
    pub embedding_cache_dir: PathBuf,
    pub embedding_cache_capacity: usize,
    pub default_embedding_model: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("scriptrag.db"),
            embedding_cache_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".scriptrag")
                .join("embeddings_cache"),
            embedding_cache_capacity: 256,
            default_embedding_model: "default".to_owned(),
        }
    }
}

/// Everything an RPC handler needs, wired once at process start and
/// cloned cheaply (every field is an `Arc`) into each request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub editor: Arc<SceneEditor>,
    pub query_engine: Arc<QueryEngine>,
    pub embedding_cache: Arc<EmbeddingCache>,
    pub providers: Arc<ProviderChain>,
    pub screenplay_parser: Arc<dyn ScreenplayParser>,
    pub bible_parser: Arc<dyn BibleParser>,
    pub config: ServerConfig,
}

impl AppState {
    /// Open the store at `config.database_path`, build the in-memory +
    /// on-disk embedding cache, and wire the (possibly empty) provider
    /// chain passed in by the caller — `main` is responsible for
    /// constructing concrete providers from environment/CLI input.
    pub fn new(
        config: ServerConfig,
        providers: Vec<Arc<dyn EmbeddingProvider>>,
    ) -> std::io::Result<Self> {
        let store = Arc::new(
            Store::open(&config.database_path, &StoreConfig::default())
                .map_err(|e| std::io::Error::other(e.to_string()))?,
        );
        let embedding_cache = Arc::new(EmbeddingCache::new(
            &config.embedding_cache_dir,
            config.embedding_cache_capacity,
        )?);
        let provider_chain = Arc::new(ProviderChain::new(providers));
        let editor = Arc::new(SceneEditor::new(Arc::clone(&store)));
        let query_engine = Arc::new(QueryEngine::new(
            Arc::clone(&store),
            QueryEngineConfig {
                model: config.default_embedding_model.clone(),
                ..QueryEngineConfig::default()
            },
        ));

        Ok(Self {
            store,
            editor,
            query_engine,
            embedding_cache,
            providers: provider_chain,
            screenplay_parser: Arc::new(StubScreenplayParser),
            bible_parser: Arc::new(StubBibleParser),
            config,
        })
    }
}
