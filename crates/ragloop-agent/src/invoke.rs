use futures::StreamExt;
use tracing::debug;

use ragloop_core::error::{RagError, Result};
use ragloop_core::types::{StopReason, StreamDelta, ToolCall, ToolDefinition, Turn};

use crate::context::RunContext;

#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    input_json: String,
}

/// A model reply assembled from its stream.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<StopReason>,
}

impl Completion {
    /// The reply as a single assistant turn. Tool calls win over text.
    pub fn into_turn(self) -> Turn {
        if self.tool_calls.is_empty() {
            Turn::assistant_text(self.text)
        } else {
            Turn::assistant_tool_calls(self.tool_calls)
        }
    }
}

/// One model call bounded by the per-call timeout and the run's cancel token.
pub async fn complete(
    ctx: &RunContext,
    turns: Vec<Turn>,
    tools: &[ToolDefinition],
) -> Result<Completion> {
    match tokio::time::timeout(ctx.agent.model_timeout(), collect(ctx, turns, tools)).await {
        Ok(result) => result,
        Err(_) => Err(RagError::ModelInvocation(format!(
            "model call timed out after {}s",
            ctx.agent.model_timeout_secs
        ))),
    }
}

/// Single-prompt completion returning only the text.
pub async fn complete_text(ctx: &RunContext, prompt: String) -> Result<String> {
    let completion = complete(ctx, vec![Turn::user(prompt)], &[]).await?;
    Ok(completion.text)
}

async fn collect(
    ctx: &RunContext,
    turns: Vec<Turn>,
    tools: &[ToolDefinition],
) -> Result<Completion> {
    let mut stream = tokio::select! {
        result = ctx.llm.chat_stream(&ctx.model, turns, tools) => result.map_err(model_error)?,
        _ = ctx.cancel.cancelled() => return Err(RagError::Cancelled),
    };

    let mut text = String::new();
    let mut accumulators: Vec<ToolCallAccumulator> = Vec::new();
    let mut stop_reason = None;

    loop {
        let delta = tokio::select! {
            next = stream.next() => match next {
                Some(delta) => delta.map_err(model_error)?,
                None => break,
            },
            _ = ctx.cancel.cancelled() => return Err(RagError::Cancelled),
        };

        match delta {
            StreamDelta::TextDelta(chunk) => text.push_str(&chunk),
            StreamDelta::ToolUseStart { index, id, name } => {
                // Calls arrive densely numbered; a gap means a broken stream.
                if index > accumulators.len() {
                    return Err(RagError::ModelInvocation(format!(
                        "tool call index {} out of order (expected at most {})",
                        index,
                        accumulators.len()
                    )));
                }
                if index == accumulators.len() {
                    accumulators.push(ToolCallAccumulator::default());
                }
                accumulators[index].id = id;
                accumulators[index].name = name;
            }
            StreamDelta::ToolInputDelta { index, delta } => {
                if let Some(acc) = accumulators.get_mut(index) {
                    acc.input_json.push_str(&delta);
                }
            }
            StreamDelta::Stop(reason) => stop_reason = Some(reason),
            StreamDelta::Usage {
                input_tokens,
                output_tokens,
            } => debug!(input_tokens, output_tokens, "Model usage"),
        }
    }

    let mut tool_calls = Vec::with_capacity(accumulators.len());
    for (index, acc) in accumulators.into_iter().enumerate() {
        if acc.name.is_empty() {
            return Err(RagError::ModelInvocation(format!(
                "tool call {} has no name",
                index
            )));
        }
        let args = if acc.input_json.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&acc.input_json).map_err(|e| {
                RagError::ModelInvocation(format!(
                    "unparseable arguments for tool call '{}': {}",
                    acc.name, e
                ))
            })?
        };
        let id = if acc.id.is_empty() {
            format!("call_{}", index)
        } else {
            acc.id
        };
        tool_calls.push(ToolCall::new(id, acc.name, args));
    }

    Ok(Completion {
        text,
        tool_calls,
        stop_reason,
    })
}

fn model_error(e: RagError) -> RagError {
    match e {
        RagError::ModelInvocation(_) | RagError::Cancelled => e,
        other => RagError::ModelInvocation(other.to_string()),
    }
}
