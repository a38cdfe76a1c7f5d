use futures::future::BoxFuture;
use tracing::debug;

use ragloop_core::error::{RagError, Result};
use ragloop_core::state::ConversationState;

use crate::context::RunContext;
use crate::graph::{Node, NodeId, NodeOutput};
use crate::invoke;

/// Lets the model answer directly or ask for retrieval.
///
/// The whole history goes to the model together with the registered tool
/// schemas. The reply becomes exactly one assistant turn: either text with
/// no tool calls, or tool calls with empty text.
pub struct RouterNode;

impl Node for RouterNode {
    fn id(&self) -> NodeId {
        NodeId::Router
    }

    fn run<'a>(
        &'a self,
        state: &'a ConversationState,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let tools = ctx.tools.definitions();
            let completion = invoke::complete(ctx, state.turns().to_vec(), &tools).await?;

            if completion.tool_calls.is_empty() {
                if completion.text.trim().is_empty() {
                    return Err(RagError::ModelInvocation(
                        "model returned neither text nor tool calls".into(),
                    ));
                }
            } else if !completion.text.is_empty() {
                debug!(
                    chars = completion.text.len(),
                    "Dropping text that accompanied tool calls"
                );
            }

            Ok(NodeOutput::turn(completion.into_turn()))
        })
    }
}
