pub mod bible;
pub mod context;
pub mod editor;
pub mod embedding;
pub mod error;
pub mod format;
pub mod hash;
pub mod heading;
pub mod indexer;
pub mod model;
pub mod provider;
pub mod query;
pub mod screenplay;
pub mod store;
pub mod vector_index;

pub use bible::{BibleParser, StubBibleParser};
pub use context::{ContextExecutor, ContextParameters};
pub use editor::{Position, SceneEditor};
pub use error::{Error, Result};
pub use indexer::{Indexer, IndexerConfig, IndexReport};
pub use model::{
    ActionLine, Bible, BibleChunk, DialogueLine, Embedding, EntityType, Scene, SceneIdentifier,
    Script,
};
pub use provider::{EmbeddingProvider, ProviderTag};
pub use query::{Query, QueryEngine, QueryEngineConfig, QueryMode};
pub use screenplay::{ScreenplayParser, StubScreenplayParser};
pub use store::{Store, StoreConfig};
pub use vector_index::VectorIndex;
