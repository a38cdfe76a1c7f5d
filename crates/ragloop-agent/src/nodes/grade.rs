use futures::future::BoxFuture;
use tracing::info;

use ragloop_core::error::Result;
use ragloop_core::state::ConversationState;
use ragloop_core::types::GradeDecision;

use super::{latest_context, question};
use crate::context::RunContext;
use crate::graph::{Node, NodeId, NodeOutput};
use crate::{invoke, prompts};

/// Judges the latest retrieved content against the original question.
///
/// Any reply containing "yes" (any case) is relevant; everything else,
/// including ambiguous replies, is irrelevant.
pub struct GradeNode;

impl Node for GradeNode {
    fn id(&self) -> NodeId {
        NodeId::Grade
    }

    fn run<'a>(
        &'a self,
        state: &'a ConversationState,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let prompt = prompts::grade(question(state)?, latest_context(state));
            let raw = invoke::complete_text(ctx, prompt).await?;
            let decision = GradeDecision::parse(&raw);
            info!(decision = ?decision, "Graded retrieved content");
            Ok(NodeOutput::grade(decision))
        })
    }
}
