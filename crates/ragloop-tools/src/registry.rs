use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::RetrievalTool;
use ragloop_core::types::{PassageResult, ToolDefinition};

/// Closed set of retrieval tools, resolved by stable name.
///
/// Built before a run and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn RetrievalTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: impl RetrievalTool) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn RetrievalTool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn RetrievalTool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions for sending to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Invoke a tool by name with a timeout.
    pub async fn invoke(&self, name: &str, query: &str) -> Result<Vec<PassageResult>> {
        let tool = self
            .get(name)
            .ok_or_else(|| RagError::UnknownTool(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());
        debug!(tool = name, query, "Invoking retrieval tool");

        match tokio::time::timeout(timeout, tool.invoke(query)).await {
            Ok(Ok(passages)) => Ok(passages),
            Ok(Err(RagError::Retrieval { tool, message })) => {
                Err(RagError::Retrieval { tool, message })
            }
            Ok(Err(other)) => Err(RagError::Retrieval {
                tool: name.to_string(),
                message: other.to_string(),
            }),
            Err(_) => Err(RagError::Retrieval {
                tool: name.to_string(),
                message: format!("timed out after {}s", tool.timeout_secs()),
            }),
        }
    }
}

/// Serialize passages into tool-turn content: texts joined by a blank line.
pub fn format_passages(passages: &[PassageResult]) -> String {
    passages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
