use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    // Model errors
    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    // Tool errors
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Retrieval failed: {tool}: {message}")]
    Retrieval { tool: String, message: String },

    // Graph errors
    #[error("Graph configuration error: {0}")]
    GraphConfiguration(String),

    #[error("Run exceeded max rewrite iterations ({0})")]
    MaxIterationsExceeded(usize),

    #[error("Run exceeded max duration ({0}s)")]
    MaxDurationExceeded(u64),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<RagError>,
    },

    // Ingestion errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Ingest failed: {source_id}: {message}")]
    Ingest { source_id: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// Wrap an error with the graph state at which it occurred.
    pub fn at_node(node: impl Into<String>, source: RagError) -> Self {
        Self::NodeFailed {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, unwrapping any `NodeFailed` layers.
    pub fn root(&self) -> &RagError {
        match self {
            Self::NodeFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// The graph state name attached to this error, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::NodeFailed { node, .. } => Some(node),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
