//! Embedding codec, cache, and Git LFS registration (§4.3).

pub mod cache;
pub mod codec;
pub mod lfs;

pub use cache::EmbeddingCache;
