use serde::{Deserialize, Serialize};

use crate::types::{Role, Turn};

/// Append-only conversation history threaded through the graph.
///
/// Nodes receive a shared reference and return turns to append; only the
/// executor calls [`ConversationState::append`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    /// Start a run from the user's question.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::user(question)],
        }
    }

    /// Build a state from existing turns.
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    /// Append turns in order. Prior turns are never touched.
    pub fn append(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The most recent turn.
    pub fn latest(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Content of the first user turn: the original question.
    pub fn question(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    /// The final assistant answer, if the run ended on one.
    pub fn answer(&self) -> Option<&str> {
        self.latest()
            .filter(|t| t.role == Role::Assistant && t.tool_calls.is_empty())
            .map(|t| t.content.as_str())
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}
