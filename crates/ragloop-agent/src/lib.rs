pub mod context;
pub mod graph;
pub mod invoke;
pub mod nodes;
pub mod prompts;

pub use context::RunContext;
pub use graph::{
    route_grade, should_retrieve, Edge, EdgeCondition, ExecutionResult, GraphExecutor, Node,
    NodeId, NodeOutput, NodeResult,
};
