use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ragloop_core::config::ModelConfig;
use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::LlmClient;
use ragloop_core::types::*;

use super::presets::{build_extra_headers, get_preset, resolve_endpoint};
use crate::streaming::{SseEvent, SseStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize, Debug)]
pub(crate) struct OaiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<OaiFunction>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDeltaContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

pub(crate) fn convert_turns(turns: Vec<Turn>) -> Vec<OaiMessage> {
    turns
        .into_iter()
        .map(|turn| match turn.role {
            Role::User => OaiMessage {
                role: "user".to_string(),
                content: Some(turn.content),
                tool_calls: None,
                tool_call_id: None,
            },
            Role::Assistant if turn.tool_calls.is_empty() => OaiMessage {
                role: "assistant".to_string(),
                content: Some(turn.content),
                tool_calls: None,
                tool_call_id: None,
            },
            Role::Assistant => {
                let calls = turn
                    .tool_calls
                    .iter()
                    .map(|call| OaiToolCall {
                        index: None,
                        id: Some(call.id.clone()),
                        r#type: Some("function".to_string()),
                        function: Some(OaiFunction {
                            name: Some(call.name.clone()),
                            arguments: Some(call.args.to_string()),
                        }),
                    })
                    .collect();
                OaiMessage {
                    role: "assistant".to_string(),
                    content: if turn.content.is_empty() {
                        None
                    } else {
                        Some(turn.content)
                    },
                    tool_calls: Some(calls),
                    tool_call_id: None,
                }
            }
            Role::Tool => OaiMessage {
                role: "tool".to_string(),
                content: Some(turn.content),
                tool_calls: None,
                tool_call_id: turn.tool_call_id,
            },
        })
        .collect()
}

pub(crate) fn parse_chunk(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return vec![];
    }

    let chunk: StreamChunk = match serde_json::from_str(&event.data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse SSE chunk");
            return vec![Err(RagError::ModelInvocation(format!(
                "malformed stream chunk: {}",
                e
            )))];
        }
    };

    let mut deltas = Vec::new();

    if let Some(usage) = chunk.usage {
        deltas.push(Ok(StreamDelta::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return deltas;
    };

    if let Some(delta) = choice.delta {
        if let Some(text) = delta.content {
            if !text.is_empty() {
                deltas.push(Ok(StreamDelta::TextDelta(text)));
            }
        }

        // Some providers (Ollama, Groq) send name + arguments in the same chunk,
        // and older Ollama omits `index`; position in the chunk stands in for it.
        if let Some(tool_calls) = delta.tool_calls {
            for (position, tc) in tool_calls.into_iter().enumerate() {
                let index = tc.index.unwrap_or(position);
                if let Some(func) = tc.function {
                    if let Some(name) = func.name {
                        deltas.push(Ok(StreamDelta::ToolUseStart {
                            index,
                            id: tc.id.unwrap_or_default(),
                            name,
                        }));
                    }
                    if let Some(args) = func.arguments {
                        if !args.is_empty() {
                            deltas.push(Ok(StreamDelta::ToolInputDelta {
                                index,
                                delta: args,
                            }));
                        }
                    }
                }
            }
        }
    }

    // Finish reason comes last; a chunk may carry content and a finish reason together.
    if let Some(reason) = choice.finish_reason {
        let stop = match reason.as_str() {
            "tool_calls" => StopReason::ToolUse,
            "length" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };
        deltas.push(Ok(StreamDelta::Stop(stop)));
    }

    deltas
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        turns: Vec<Turn>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let url = resolve_endpoint(&config, OPENAI_API_URL);
            let preset = get_preset(&config.provider);

            let body = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_turns(turns),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                stream: true,
                tools: convert_tools(&tools),
            };

            debug!(url = %url, model = %config.model_id, tools = tools.len(), "Sending chat request");

            let mut req = self.http.post(&url).json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.bearer_auth(api_key);
            } else if preset.as_ref().is_some_and(|p| p.needs_api_key) {
                warn!(provider = %config.provider, "Provider expects an API key but none is configured");
            }

            for (k, v) in build_extra_headers(preset.as_ref(), &config.extra_headers) {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .send()
                .await
                .map_err(|e| RagError::ModelInvocation(format!("request: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(RagError::ModelInvocation(format!("HTTP {}: {}", status, body)));
            }

            let sse_stream = SseStream::new(response.bytes_stream());

            let delta_stream = sse_stream
                .map(|event| match event {
                    Ok(event) => futures::stream::iter(parse_chunk(event)),
                    Err(e) => futures::stream::iter(vec![Err(RagError::ModelInvocation(
                        format!("stream: {}", e),
                    ))]),
                })
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_convert_turns_pairs_tool_calls() {
        let turns = vec![
            Turn::user("What is reward hacking?"),
            Turn::assistant_tool_calls(vec![ToolCall::new(
                "call_1",
                "retrieve_blog_posts",
                json!({"query": "reward hacking"}),
            )]),
            Turn::tool_result("call_1", "reward tampering ..."),
        ];

        let msgs = convert_turns(turns);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1].role, "assistant");
        assert!(msgs[1].content.is_none());
        let calls = msgs[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(msgs[2].role, "tool");
        assert_eq!(msgs[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_parse_text_chunk() {
        let deltas = parse_chunk(event(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#));
        assert_eq!(deltas.len(), 1);
        assert!(matches!(&deltas[0], Ok(StreamDelta::TextDelta(t)) if t == "Hel"));
    }

    #[test]
    fn test_parse_tool_call_chunk_with_args() {
        let deltas = parse_chunk(event(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"retrieve_blog_posts","arguments":"{\"query\":\"x\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        ));
        assert_eq!(deltas.len(), 3);
        assert!(matches!(&deltas[0], Ok(StreamDelta::ToolUseStart { id, name, .. }) if id == "call_1" && name == "retrieve_blog_posts"));
        assert!(matches!(&deltas[1], Ok(StreamDelta::ToolInputDelta { delta, .. }) if delta == r#"{"query":"x"}"#));
        assert!(matches!(&deltas[2], Ok(StreamDelta::Stop(StopReason::ToolUse))));
    }

    #[test]
    fn test_parse_tool_calls_without_index() {
        let deltas = parse_chunk(event(
            r#"{"choices":[{"delta":{"tool_calls":[{"id":"call_a","function":{"name":"retrieve_blog_posts","arguments":"{\"query\":\"a\"}"}},{"id":"call_b","function":{"name":"retrieve_blog_posts","arguments":"{\"query\":\"b\"}"}}]}}]}"#,
        ));
        assert_eq!(deltas.len(), 4);
        assert!(matches!(&deltas[0], Ok(StreamDelta::ToolUseStart { index: 0, id, .. }) if id == "call_a"));
        assert!(matches!(&deltas[1], Ok(StreamDelta::ToolInputDelta { index: 0, delta }) if delta == r#"{"query":"a"}"#));
        assert!(matches!(&deltas[2], Ok(StreamDelta::ToolUseStart { index: 1, id, .. }) if id == "call_b"));
        assert!(matches!(&deltas[3], Ok(StreamDelta::ToolInputDelta { index: 1, delta }) if delta == r#"{"query":"b"}"#));
    }

    #[test]
    fn test_explicit_index_wins_over_position() {
        let deltas = parse_chunk(event(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"\"}"}}]}}]}"#,
        ));
        assert!(matches!(&deltas[0], Ok(StreamDelta::ToolInputDelta { index: 1, .. })));
    }

    #[test]
    fn test_parse_done_and_malformed() {
        assert!(parse_chunk(event("[DONE]")).is_empty());
        let deltas = parse_chunk(event("{not json"));
        assert!(matches!(&deltas[0], Err(RagError::ModelInvocation(_))));
    }

    #[tokio::test]
    async fn test_chat_stream_against_mock_server() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"yes\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"model": "mistral", "stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let config = ModelConfig {
            base_url: Some(format!("{}/v1", server.uri())),
            ..ModelConfig::default()
        };
        let client = OpenAiClient::new();
        let mut stream = client
            .chat_stream(&config, vec![Turn::user("grade this")], &[])
            .await
            .unwrap();

        let mut text = String::new();
        let mut stopped = false;
        while let Some(delta) = stream.next().await {
            match delta.unwrap() {
                StreamDelta::TextDelta(t) => text.push_str(&t),
                StreamDelta::Stop(StopReason::EndTurn) => stopped = true,
                _ => {}
            }
        }
        assert_eq!(text, "yes");
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_http_error_is_model_invocation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let config = ModelConfig {
            base_url: Some(server.uri()),
            ..ModelConfig::default()
        };
        let client = OpenAiClient::new();
        let result = client
            .chat_stream(&config, vec![Turn::user("q")], &[])
            .await;
        match result {
            Err(RagError::ModelInvocation(msg)) => assert!(msg.contains("503")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an error"),
        }
    }
}
