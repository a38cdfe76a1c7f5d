use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use ragloop_core::error::Result;
use ragloop_core::state::ConversationState;
use ragloop_core::types::{GradeDecision, Turn};

use crate::context::RunContext;

/// States of the RAG state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Start,
    Router,
    Retrieve,
    Grade,
    Rewrite,
    Generate,
    End,
}

impl NodeId {
    /// Name used in logs and run events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Router => "generate_query_or_respond",
            Self::Retrieve => "retrieve",
            Self::Grade => "grade_documents",
            Self::Rewrite => "rewrite",
            Self::Generate => "generate",
            Self::End => "end",
        }
    }

    /// `Start` and `End` are pseudo-states with no node behind them.
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Self::Start | Self::End)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a node hands back to the executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    /// Turns to append, in order.
    pub turns: Vec<Turn>,
    /// Grader verdict. Routed on, never appended to history.
    pub grade: Option<GradeDecision>,
}

impl NodeOutput {
    pub fn turns(turns: Vec<Turn>) -> Self {
        Self { turns, grade: None }
    }

    pub fn turn(turn: Turn) -> Self {
        Self::turns(vec![turn])
    }

    pub fn grade(decision: GradeDecision) -> Self {
        Self {
            turns: vec![],
            grade: Some(decision),
        }
    }
}

/// A step of the graph.
///
/// Nodes read the state and return a delta; they never mutate history.
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    fn run<'a>(
        &'a self,
        state: &'a ConversationState,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>>;
}
