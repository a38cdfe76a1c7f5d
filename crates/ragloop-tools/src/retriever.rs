use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use ragloop_core::config::RetrieverConfig;
use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::{EmbeddingProvider, RetrievalTool};
use ragloop_core::types::PassageResult;
use ragloop_index::VectorIndex;

/// Exposes a vector index as a named retrieval tool the model can call.
///
/// The query is embedded with the same provider that built the index, then
/// the `top_k` nearest chunks come back as passages.
pub struct RetrieverTool {
    name: String,
    description: String,
    top_k: usize,
    timeout_secs: u64,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RetrieverTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            top_k: 4,
            timeout_secs: 30,
            index,
            embedder,
        }
    }

    pub fn from_config(
        config: &RetrieverConfig,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self::new(&config.name, &config.description, index, embedder)
            .with_top_k(config.top_k)
            .with_timeout_secs(config.timeout_secs)
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn err(&self, message: impl Into<String>) -> RagError {
        RagError::Retrieval {
            tool: self.name.clone(),
            message: message.into(),
        }
    }
}

impl RetrievalTool for RetrieverTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn invoke(&self, query: &str) -> BoxFuture<'_, Result<Vec<PassageResult>>> {
        let query = query.to_string();
        Box::pin(async move {
            let mut vectors = self
                .embedder
                .embed(std::slice::from_ref(&query))
                .await
                .map_err(|e| self.err(format!("embedding query failed: {}", e)))?;

            let vector = vectors.pop().ok_or_else(|| self.err("no query embedding"))?;
            if vector.is_empty() {
                return Err(self.err("empty query embedding"));
            }

            let hits = self.index.search(&vector, self.top_k);
            debug!(tool = %self.name, hits = hits.len(), "Retrieved passages");

            Ok(hits
                .into_iter()
                .map(|h| PassageResult::new(h.text, h.source_id))
                .collect())
        })
    }
}
