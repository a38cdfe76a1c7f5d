//! Ingestion collaborator: turns source pages into an immutable vector index.
//!
//! Pipeline: [`loader::WebLoader`] fetches pages, [`splitter::RecursiveCharacterSplitter`]
//! chunks them, an [`EmbeddingProvider`](ragloop_core::traits::EmbeddingProvider)
//! embeds the chunks, and [`store::VectorIndex`] answers similarity queries.

pub mod embeddings;
pub mod ingest;
pub mod loader;
pub mod splitter;
pub mod store;

pub use embeddings::{cosine_similarity, HttpEmbeddingProvider};
pub use ingest::{build_index, ingest_sources};
pub use loader::{Document, WebLoader};
pub use splitter::RecursiveCharacterSplitter;
pub use store::{ScoredChunk, VectorIndex};
