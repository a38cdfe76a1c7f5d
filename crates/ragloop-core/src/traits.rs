use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Streaming chat with an optional tool schema.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        turns: Vec<Turn>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// A named similarity search the model may call.
///
/// `invoke` must be idempotent and must not touch conversation state.
/// Implementations are shared across concurrent runs.
pub trait RetrievalTool: Send + Sync + 'static {
    /// Stable name used to match tool calls.
    fn name(&self) -> &str;

    /// Capability summary shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the tool arguments.
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Query to look up in the document index"
                }
            },
            "required": ["query"]
        })
    }

    /// Run a search for `query`.
    fn invoke(&self, query: &str) -> BoxFuture<'_, Result<Vec<PassageResult>>>;

    /// Timeout in seconds for one invocation.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Turns text into vectors.
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Embed a batch of texts into vectors, in input order.
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;

    /// Number of dimensions in the embedding vectors.
    fn dimensions(&self) -> usize;
}
