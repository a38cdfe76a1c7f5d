use tracing::info;

use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::EmbeddingProvider;

use crate::embeddings::cosine_similarity;
use crate::loader::Document;

#[derive(Debug, Clone)]
struct IndexedChunk {
    source_id: String,
    text: String,
    vector: Vec<f32>,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub source_id: String,
    pub text: String,
    pub score: f32,
}

/// Immutable in-memory vector index.
///
/// Built once before any run and shared read-only (`Arc<VectorIndex>`)
/// across concurrent runs, so it needs no locking.
#[derive(Debug, Default)]
pub struct VectorIndex {
    chunks: Vec<IndexedChunk>,
    dimensions: usize,
}

impl VectorIndex {
    /// Embed every chunk in batches of `batch_size` and build the index.
    pub async fn build(
        chunks: Vec<Document>,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let mut indexed = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
            let vectors = provider.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            indexed.extend(batch.iter().zip(vectors).map(|(doc, vector)| IndexedChunk {
                source_id: doc.source_id.clone(),
                text: doc.text.clone(),
                vector,
            }));
        }

        let index = Self::from_vectors(
            indexed
                .into_iter()
                .map(|c| (Document::new(c.source_id, c.text), c.vector))
                .collect(),
        )?;
        info!(chunks = index.len(), dimensions = index.dimensions, "Built vector index");
        Ok(index)
    }

    /// Build from pre-computed vectors. All vectors must share one dimension.
    pub fn from_vectors(entries: Vec<(Document, Vec<f32>)>) -> Result<Self> {
        let dimensions = entries.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut chunks = Vec::with_capacity(entries.len());
        for (doc, vector) in entries {
            if vector.len() != dimensions {
                return Err(RagError::Embedding(format!(
                    "dimension mismatch for {}: expected {}, got {}",
                    doc.source_id,
                    dimensions,
                    vector.len()
                )));
            }
            chunks.push(IndexedChunk {
                source_id: doc.source_id,
                text: doc.text,
                vector,
            });
        }
        Ok(Self { chunks, dimensions })
    }

    /// Top `k` chunks by cosine similarity. Ties keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(query, &c.vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| {
                let chunk = &self.chunks[i];
                ScoredChunk {
                    source_id: chunk.source_id.clone(),
                    text: chunk.text.clone(),
                    score,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}
