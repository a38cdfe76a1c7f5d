use serde::{Deserialize, Serialize};

use ragloop_core::state::ConversationState;
use ragloop_core::types::GradeDecision;

use super::node::NodeId;

/// A transition between two states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default)]
    pub condition: EdgeCondition,
}

/// Condition for traversing an edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    #[default]
    Always,
    /// The latest turn is an assistant turn requesting tools.
    ToolCallsPresent,
    /// Negation of `ToolCallsPresent`.
    NoToolCalls,
    /// The grader judged the retrieved content relevant.
    Relevant,
    /// The grader judged the retrieved content irrelevant.
    Irrelevant,
}

impl Edge {
    pub fn new(from: NodeId, to: NodeId, condition: EdgeCondition) -> Self {
        Self {
            from,
            to,
            condition,
        }
    }

    /// Create an unconditional edge.
    pub fn always(from: NodeId, to: NodeId) -> Self {
        Self::new(from, to, EdgeCondition::Always)
    }

    /// Create a conditional edge.
    pub fn when(from: NodeId, to: NodeId, condition: EdgeCondition) -> Self {
        Self::new(from, to, condition)
    }
}

impl EdgeCondition {
    /// Evaluate against the merged state and the source node's grade.
    pub fn matches(&self, state: &ConversationState, grade: Option<GradeDecision>) -> bool {
        match self {
            Self::Always => true,
            Self::ToolCallsPresent => should_retrieve(state) == NodeId::Retrieve,
            Self::NoToolCalls => should_retrieve(state) == NodeId::End,
            Self::Relevant => grade.map(route_grade) == Some(NodeId::Generate),
            Self::Irrelevant => grade.map(route_grade) == Some(NodeId::Rewrite),
        }
    }
}

/// Route after the router: retrieve if the latest turn asks for tools.
///
/// Only the most recent turn is inspected.
pub fn should_retrieve(state: &ConversationState) -> NodeId {
    match state.latest() {
        Some(turn) if turn.requests_tools() => NodeId::Retrieve,
        _ => NodeId::End,
    }
}

/// Route after grading.
pub fn route_grade(decision: GradeDecision) -> NodeId {
    match decision {
        GradeDecision::Relevant => NodeId::Generate,
        GradeDecision::Irrelevant => NodeId::Rewrite,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragloop_core::types::{ToolCall, Turn};
    use serde_json::json;

    fn retrieval_call() -> Turn {
        Turn::assistant_tool_calls(vec![ToolCall::new(
            "1",
            "retrieve_blog_posts",
            json!({"query": "reward hacking"}),
        )])
    }

    #[test]
    fn test_should_retrieve_on_tool_calls() {
        let mut state = ConversationState::new("q");
        state.append([retrieval_call()]);
        assert_eq!(should_retrieve(&state), NodeId::Retrieve);
    }

    #[test]
    fn test_direct_answer_ends() {
        let mut state = ConversationState::new("q");
        state.append([Turn::assistant_text("Hello!")]);
        assert_eq!(should_retrieve(&state), NodeId::End);
    }

    #[test]
    fn test_only_latest_turn_counts() {
        let mut state = ConversationState::new("q");
        for _ in 0..5 {
            state.append([retrieval_call(), Turn::tool_result("1", "ctx")]);
        }
        state.append([Turn::assistant_text("done")]);
        assert_eq!(should_retrieve(&state), NodeId::End);
    }

    #[test]
    fn test_tool_turn_is_not_a_request() {
        let mut state = ConversationState::new("q");
        state.append([Turn::tool_result("1", "ctx")]);
        assert_eq!(should_retrieve(&state), NodeId::End);
    }

    #[test]
    fn test_route_grade() {
        assert_eq!(route_grade(GradeDecision::Relevant), NodeId::Generate);
        assert_eq!(route_grade(GradeDecision::Irrelevant), NodeId::Rewrite);
    }

    #[test]
    fn test_conditions() {
        let mut state = ConversationState::new("q");
        state.append([retrieval_call()]);

        assert!(EdgeCondition::Always.matches(&state, None));
        assert!(EdgeCondition::ToolCallsPresent.matches(&state, None));
        assert!(!EdgeCondition::NoToolCalls.matches(&state, None));
        assert!(EdgeCondition::Relevant.matches(&state, Some(GradeDecision::Relevant)));
        assert!(!EdgeCondition::Relevant.matches(&state, Some(GradeDecision::Irrelevant)));
        assert!(!EdgeCondition::Irrelevant.matches(&state, None));
    }

    #[test]
    fn test_edge_serialization() {
        let edge = Edge::when(NodeId::Grade, NodeId::Rewrite, EdgeCondition::Irrelevant);
        let json = serde_json::to_string(&edge).unwrap();
        assert!(json.contains("\"from\":\"grade\""));
        let parsed: Edge = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, edge);

        let parsed: Edge = serde_json::from_str(r#"{"from":"start","to":"router"}"#).unwrap();
        assert_eq!(parsed.condition, EdgeCondition::Always);
    }
}
