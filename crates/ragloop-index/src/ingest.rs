use std::collections::BTreeMap;

use tracing::info;

use ragloop_core::error::Result;
use ragloop_core::traits::EmbeddingProvider;

use crate::loader::Document;
use crate::splitter::RecursiveCharacterSplitter;
use crate::store::VectorIndex;

/// Split documents into chunks and embed them into a fresh index.
pub async fn build_index(
    docs: &[Document],
    splitter: &RecursiveCharacterSplitter,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<VectorIndex> {
    let chunks = splitter.split_documents(docs);
    info!(documents = docs.len(), chunks = chunks.len(), "Split documents");
    VectorIndex::build(chunks, provider, batch_size).await
}

/// Build an index from text the caller already has, keyed by source id.
pub async fn ingest_sources(
    sources: BTreeMap<String, String>,
    splitter: &RecursiveCharacterSplitter,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<VectorIndex> {
    let docs = Document::from_mapping(sources);
    build_index(&docs, splitter, provider, batch_size).await
}
