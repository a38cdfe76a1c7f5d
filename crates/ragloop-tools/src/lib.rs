pub mod registry;
pub mod retriever;

pub use registry::{format_passages, ToolRegistry};
pub use retriever::RetrieverTool;
