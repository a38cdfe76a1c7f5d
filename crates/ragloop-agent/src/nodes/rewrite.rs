use futures::future::BoxFuture;
use tracing::info;

use ragloop_core::error::{RagError, Result};
use ragloop_core::state::ConversationState;
use ragloop_core::types::Turn;

use super::question;
use crate::context::RunContext;
use crate::graph::{Node, NodeId, NodeOutput};
use crate::{invoke, prompts};

/// Reformulates the original question.
///
/// The result is appended as a user turn so the router treats it as the
/// question to act on next.
pub struct RewriteNode;

impl Node for RewriteNode {
    fn id(&self) -> NodeId {
        NodeId::Rewrite
    }

    fn run<'a>(
        &'a self,
        state: &'a ConversationState,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let original = question(state)?;
            let rewritten = invoke::complete_text(ctx, prompts::rewrite(original)).await?;
            let rewritten = rewritten.trim();
            if rewritten.is_empty() {
                return Err(RagError::ModelInvocation("empty rewritten question".into()));
            }
            info!(rewritten, "Rewrote question");
            Ok(NodeOutput::turn(Turn::user(rewritten)))
        })
    }
}
