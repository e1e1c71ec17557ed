//! Concrete [`EmbeddingProvider`](scriptrag_core::EmbeddingProvider)
//! implementations (§4.4, §6): three thin HTTP clients behind the trait
//! core defines — a `reqwest::Client`, a base URL, and a
//! `tracing::warn` on transport failure — speaking the embed-vector
//! contract.

mod github_models;
mod ollama;
mod openai_compatible;

pub use github_models::GitHubModelsProvider;
pub use ollama::OllamaProvider;
pub use openai_compatible::OpenAiCompatibleProvider;
