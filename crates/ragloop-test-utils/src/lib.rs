//! Deterministic stand-ins for the model, retrieval and embedding collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::json;

use ragloop_core::config::ModelConfig;
use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::{EmbeddingProvider, LlmClient, RetrievalTool};
use ragloop_core::types::*;

pub const QUESTION: &str = "What does Lilian Weng say about types of reward hacking?";
pub const RETRIEVER_NAME: &str = "retrieve_blog_posts";

/// One scripted model reply.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Plain text, streamed in small pieces.
    Text(String),
    /// Tool calls with their JSON arguments.
    ToolCalls(Vec<ToolCall>),
    /// The request fails before a stream opens.
    Fail(String),
    /// Text and tool calls in the same response.
    Mixed(String, Vec<ToolCall>),
    /// Raw deltas, for malformed-response cases.
    Raw(Vec<StreamDelta>),
    /// Sleep before replying with the inner reply.
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// A single `retrieve_blog_posts` call.
    pub fn retrieve(id: &str, query: &str) -> Self {
        Self::ToolCalls(vec![ToolCall::new(id, RETRIEVER_NAME, json!({ "query": query }))])
    }
}

/// What the model was asked.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub turns: Vec<Turn>,
    pub tools: Vec<String>,
}

/// An `LlmClient` that replays a fixed script, one reply per call.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

fn deltas_for(reply: Reply) -> Vec<Result<StreamDelta>> {
    let mut deltas = Vec::new();
    let (text, calls) = match reply {
        Reply::Text(t) => (t, vec![]),
        Reply::ToolCalls(c) => (String::new(), c),
        Reply::Mixed(t, c) => (t, c),
        Reply::Raw(raw) => return raw.into_iter().map(Ok).collect(),
        Reply::Fail(_) | Reply::Delayed(..) => unreachable!("handled by caller"),
    };

    // Split text to exercise accumulation.
    let chars: Vec<char> = text.chars().collect();
    for piece in chars.chunks(7) {
        deltas.push(Ok(StreamDelta::TextDelta(piece.iter().collect())));
    }
    let has_calls = !calls.is_empty();
    for (index, call) in calls.into_iter().enumerate() {
        deltas.push(Ok(StreamDelta::ToolUseStart {
            index,
            id: call.id,
            name: call.name,
        }));
        deltas.push(Ok(StreamDelta::ToolInputDelta {
            index,
            delta: call.args.to_string(),
        }));
    }
    deltas.push(Ok(StreamDelta::Stop(if has_calls {
        StopReason::ToolUse
    } else {
        StopReason::EndTurn
    })));
    deltas
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        turns: Vec<Turn>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        self.calls.lock().unwrap().push(RecordedCall {
            turns,
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        let reply = self.replies.lock().unwrap().pop_front();

        Box::pin(async move {
            let mut reply =
                reply.ok_or_else(|| RagError::ModelInvocation("script exhausted".into()))?;
            let reply = loop {
                match reply {
                    Reply::Delayed(delay, inner) => {
                        tokio::time::sleep(delay).await;
                        reply = *inner;
                    }
                    other => break other,
                }
            };
            if let Reply::Fail(msg) = reply {
                return Err(RagError::ModelInvocation(msg));
            }
            Ok(Box::pin(futures::stream::iter(deltas_for(reply)))
                as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

/// A retrieval tool returning fixed passages and recording queries.
#[derive(Clone)]
pub struct StaticRetriever {
    name: String,
    passages: Vec<PassageResult>,
    fail_with: Option<String>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl StaticRetriever {
    pub fn new(passages: Vec<PassageResult>) -> Self {
        Self {
            name: RETRIEVER_NAME.to_string(),
            passages,
            fail_with: None,
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::new(vec![])
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl RetrievalTool for StaticRetriever {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Search fixture passages."
    }

    fn invoke(&self, query: &str) -> BoxFuture<'_, Result<Vec<PassageResult>>> {
        self.queries.lock().unwrap().push(query.to_string());
        Box::pin(async move {
            match &self.fail_with {
                Some(msg) => Err(RagError::Retrieval {
                    tool: self.name.clone(),
                    message: msg.clone(),
                }),
                None => Ok(self.passages.clone()),
            }
        })
    }
}

/// Embeds text as keyword occurrence counts. Deterministic and offline.
pub struct KeywordEmbedder {
    keywords: Vec<String>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for KeywordEmbedder {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let vectors: Vec<Vec<f32>> = texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                self.keywords
                    .iter()
                    .map(|k| lower.matches(k.as_str()).count() as f32)
                    .collect()
            })
            .collect();
        Box::pin(async move { Ok(vectors) })
    }

    fn dimensions(&self) -> usize {
        self.keywords.len()
    }
}

/// Passages about reward hacking, as retrieved in the happy path.
pub fn reward_hacking_passages() -> Vec<PassageResult> {
    vec![
        PassageResult::new(
            "Reward hacking can be categorized into two types: environment or goal \
             misspecification, and reward tampering.",
            "https://lilianweng.github.io/posts/2024-11-28-reward-hacking/",
        ),
        PassageResult::new(
            "Reward tampering is when the agent interferes with the reward mechanism itself.",
            "https://lilianweng.github.io/posts/2024-11-28-reward-hacking/",
        ),
    ]
}
