mod generate;
mod grade;
mod retrieve;
mod rewrite;
mod router;

pub use generate::GenerateNode;
pub use grade::GradeNode;
pub use retrieve::RetrieveNode;
pub use rewrite::RewriteNode;
pub use router::RouterNode;

use ragloop_core::error::{RagError, Result};
use ragloop_core::state::ConversationState;

/// The original question: content of the first user turn.
pub(crate) fn question(state: &ConversationState) -> Result<&str> {
    state
        .question()
        .ok_or_else(|| RagError::GraphConfiguration("conversation has no user question".into()))
}

/// Content of the most recent turn, expected to be retrieval output.
pub(crate) fn latest_context(state: &ConversationState) -> &str {
    state.latest().map(|t| t.content.as_str()).unwrap_or_default()
}
