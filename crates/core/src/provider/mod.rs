//! The embedding-provider boundary (§4.4): a trait concrete HTTP clients
//! implement, plus the provider-agnostic retry/backoff, rate-limit
//! parsing, availability caching, and ordered fallback chain built on top
//! of it.

pub mod chain;
pub mod rate_limit;
pub mod retry;

use async_trait::async_trait;

use crate::Result;

/// A stable tag identifying a provider, used as the dispatch key instead
/// of a type name or class so the chain's error map and availability
/// cache stay meaningful across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderTag {
    Ollama,
    OpenAiCompatible,
    GitHubModels,
}

impl ProviderTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderTag::Ollama => "ollama",
            ProviderTag::OpenAiCompatible => "openai_compatible",
            ProviderTag::GitHubModels => "github_models",
        }
    }
}

impl std::fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An embedding backend. Implementations live in `scriptrag-server`
/// (concrete HTTP clients); this crate only depends on the trait.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// This provider's stable dispatch tag.
    fn tag(&self) -> ProviderTag;

    /// Cheap reachability/availability probe. Implementations should not
    /// retry internally — the chain decides what to do with a `false`.
    async fn is_available(&self) -> bool;

    /// Embed `text` with `model`. An empty or `"auto"` model string may be
    /// resolved by the provider to whatever it currently has loaded.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>>;
}
