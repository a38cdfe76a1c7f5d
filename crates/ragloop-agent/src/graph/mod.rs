//! The RAG state machine: nodes joined by an ordered edge table.
//!
//! Each node receives the full [`ConversationState`](ragloop_core::ConversationState)
//! and returns turns to append. Conditional edges route on the merged state
//! (router) or on the grader's verdict (grade). The [`GraphExecutor`] owns
//! the state, merges deltas, and walks edges until `End`.

pub mod edge;
pub mod executor;
pub mod node;

pub use edge::{route_grade, should_retrieve, Edge, EdgeCondition};
pub use executor::{ExecutionResult, GraphExecutor, NodeResult};
pub use node::{Node, NodeId, NodeOutput};
