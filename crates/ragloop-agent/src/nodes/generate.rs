use futures::future::BoxFuture;

use ragloop_core::error::{RagError, Result};
use ragloop_core::state::ConversationState;
use ragloop_core::types::Turn;

use super::{latest_context, question};
use crate::context::RunContext;
use crate::graph::{Node, NodeId, NodeOutput};
use crate::{invoke, prompts};

/// Writes the final answer from the question and the latest retrieved content.
pub struct GenerateNode;

impl Node for GenerateNode {
    fn id(&self) -> NodeId {
        NodeId::Generate
    }

    fn run<'a>(
        &'a self,
        state: &'a ConversationState,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let prompt = prompts::generate(question(state)?, latest_context(state));
            let answer = invoke::complete_text(ctx, prompt).await?;
            let answer = answer.trim();
            if answer.is_empty() {
                return Err(RagError::ModelInvocation("empty answer".into()));
            }
            Ok(NodeOutput::turn(Turn::assistant_text(answer)))
        })
    }
}
