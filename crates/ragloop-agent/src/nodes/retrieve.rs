use futures::future::BoxFuture;
use tracing::info;

use ragloop_core::error::{RagError, Result};
use ragloop_core::state::ConversationState;
use ragloop_core::types::Turn;
use ragloop_tools::format_passages;

use crate::context::RunContext;
use crate::graph::{Node, NodeId, NodeOutput};

/// Executes the latest assistant turn's tool calls, one tool turn per call,
/// in call order.
pub struct RetrieveNode;

impl Node for RetrieveNode {
    fn id(&self) -> NodeId {
        NodeId::Retrieve
    }

    fn run<'a>(
        &'a self,
        state: &'a ConversationState,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let request = state
                .latest()
                .filter(|t| t.requests_tools())
                .ok_or_else(|| {
                    RagError::GraphConfiguration(
                        "retrieve reached without a pending tool request".into(),
                    )
                })?;

            let mut turns = Vec::with_capacity(request.tool_calls.len());
            for call in &request.tool_calls {
                if ctx.tools.get(&call.name).is_none() {
                    return Err(RagError::UnknownTool(call.name.clone()));
                }
                let query = call.query().ok_or_else(|| RagError::Retrieval {
                    tool: call.name.clone(),
                    message: "missing string 'query' argument".into(),
                })?;

                let passages = ctx.tools.invoke(&call.name, query).await?;
                info!(tool = %call.name, query, passages = passages.len(), "Retrieved");
                turns.push(Turn::tool_result(&call.id, format_passages(&passages)));
            }

            Ok(NodeOutput::turns(turns))
        })
    }
}
