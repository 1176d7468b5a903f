//! OpenAI Chat Completions API provider.
//!
//! Streams completions via `/v1/chat/completions`. Message history is
//! rendered in the flat-string convention; tool-result turns become role
//! `tool` entries tagged with `tool_call_id`. Tool-call deltas are forwarded
//! as raw fragments — the agent loop accumulates them.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use ansari_core::message::{ContentBlock, Message, MessageContent, Role};

use crate::sse::parse_sse_stream;
use crate::{ChatRequest, Credentials, EventStream, LlmProvider, ModelApi, StreamEvent, ToolDefinition};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    pub base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn api(&self) -> ModelApi {
        ModelApi::OpenAiCompletions
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }

    fn format_messages(&self, history: &[Message]) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();

        for message in history {
            match message.role {
                // The system turn travels separately (see `stream`).
                Role::System => {}
                Role::User => {
                    messages.push(json!({
                        "role": "user",
                        "content": message.content.text(),
                    }));
                }
                Role::Assistant => match &message.content {
                    MessageContent::Text(text) => {
                        messages.push(json!({ "role": "assistant", "content": text }));
                    }
                    MessageContent::Blocks(blocks) => {
                        let mut text_parts = Vec::new();
                        let mut tool_calls = Vec::new();
                        for block in blocks {
                            match block {
                                ContentBlock::Text { text } if !text.is_empty() => {
                                    text_parts.push(text.clone());
                                }
                                ContentBlock::ToolUse { id, name, input } => {
                                    tool_calls.push(json!({
                                        "id": id,
                                        "type": "function",
                                        "function": {
                                            "name": name,
                                            "arguments": input.to_string(),
                                        }
                                    }));
                                }
                                _ => {}
                            }
                        }
                        let mut msg = json!({ "role": "assistant" });
                        if !text_parts.is_empty() {
                            msg["content"] = json!(text_parts.join("\n"));
                        }
                        if !tool_calls.is_empty() {
                            msg["tool_calls"] = json!(tool_calls);
                        }
                        if msg.get("content").is_some() || msg.get("tool_calls").is_some() {
                            messages.push(msg);
                        }
                    }
                },
                Role::Tool => {
                    // Reference documents ride along inside the result text;
                    // the Completions API has no separate document block.
                    match first_tool_result(&message.content) {
                        Some((tool_use_id, content)) => {
                            messages.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_use_id,
                                "content": content,
                            }));
                        }
                        None => {
                            // Degenerate reconstructed turn without a result
                            // block; degrade to a plain user note.
                            messages.push(json!({
                                "role": "user",
                                "content": message.content.text(),
                            }));
                        }
                    }
                }
            }
        }

        messages
    }

    fn is_tool_use_stop(&self, stop_reason: &str) -> bool {
        stop_reason == "tool_calls"
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<EventStream> {
        let Credentials::ApiKey { api_key } = credentials;

        let mut messages = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(request.messages.iter().cloned());

        let body = WireRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
            tools: request.tools.clone(),
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        debug!(model = %body.model, base_url = %self.base_url, "Streaming OpenAI Chat Completions API");

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("authorization", format!("Bearer {api_key}"))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error {status}: {body}");
        }

        let sse_stream = parse_sse_stream(response);

        let event_stream = futures::stream::unfold(
            ChunkState {
                sse: Box::pin(sse_stream),
                pending: std::collections::VecDeque::new(),
                started_calls: Vec::new(),
            },
            |mut state| async move {
                loop {
                    if let Some(event) = state.pending.pop_front() {
                        return Some((Ok(event), state));
                    }

                    let sse_event = match state.sse.next().await {
                        Some(Ok(e)) => e,
                        Some(Err(e)) => return Some((Err(e), state)),
                        None => return None,
                    };

                    let data = sse_event.data.trim();
                    if data == "[DONE]" {
                        return None;
                    }

                    let chunk: WireChunk = match serde_json::from_str(data) {
                        Ok(c) => c,
                        Err(e) => {
                            trace!(%e, data, "Failed to parse OpenAI chunk, skipping");
                            continue;
                        }
                    };

                    if let Some(usage) = chunk.usage {
                        state.pending.push_back(StreamEvent::Usage {
                            input_tokens: Some(usage.prompt_tokens),
                            output_tokens: Some(usage.completion_tokens),
                        });
                    }

                    if let Some(choice) = chunk.choices.first() {
                        if let Some(ref tool_call_deltas) = choice.delta.tool_calls {
                            for tc in tool_call_deltas {
                                // The first delta for an index carries id and
                                // name; later deltas only append arguments.
                                if !state.started_calls.contains(&tc.index) {
                                    state.started_calls.push(tc.index);
                                    state.pending.push_back(StreamEvent::ToolUseStart {
                                        index: tc.index,
                                        id: tc.id.clone().unwrap_or_default(),
                                        name: tc
                                            .function
                                            .as_ref()
                                            .and_then(|f| f.name.clone())
                                            .unwrap_or_default(),
                                    });
                                }
                                if let Some(args) = tc
                                    .function
                                    .as_ref()
                                    .and_then(|f| f.arguments.as_ref())
                                    .filter(|a| !a.is_empty())
                                {
                                    state.pending.push_back(StreamEvent::ToolInputDelta {
                                        index: tc.index,
                                        partial_json: args.clone(),
                                    });
                                }
                            }
                        }

                        if let Some(ref content) = choice.delta.content {
                            if !content.is_empty() {
                                state.pending.push_back(StreamEvent::TextDelta {
                                    text: content.clone(),
                                });
                            }
                        }

                        if let Some(ref reason) = choice.finish_reason {
                            state.pending.push_back(StreamEvent::Done {
                                stop_reason: reason.clone(),
                            });
                        }
                    }
                }
            },
        );

        Ok(Box::pin(event_stream))
    }
}

fn first_tool_result(content: &MessageContent) -> Option<(&str, &str)> {
    match content {
        MessageContent::Blocks(blocks) => blocks.iter().find_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, content } => {
                Some((tool_use_id.as_str(), content.as_str()))
            }
            _ => None,
        }),
        MessageContent::Text(_) => None,
    }
}

struct ChunkState {
    sse: Pin<Box<dyn Stream<Item = anyhow::Result<crate::sse::SseEvent>> + Send>>,
    pending: std::collections::VecDeque<StreamEvent>,
    started_calls: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_identity() {
        let provider = OpenAiProvider::new(None);
        assert_eq!(provider.id(), "openai");
        assert_eq!(provider.api(), ModelApi::OpenAiCompletions);
        assert_eq!(provider.base_url, OPENAI_BASE_URL);
    }

    #[test]
    fn test_custom_base_url_trimmed() {
        let provider = OpenAiProvider::new(Some("https://proxy.example.com/"));
        assert_eq!(provider.base_url, "https://proxy.example.com");
    }

    #[test]
    fn test_format_tools_function_wrapper() {
        let provider = OpenAiProvider::new(None);
        let tools = vec![ToolDefinition {
            name: "search_hadith".into(),
            description: "Search hadith collections".into(),
            parameters_schema: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
            }),
        }];
        let formatted = provider.format_tools(&tools);
        assert_eq!(formatted[0]["type"], "function");
        assert_eq!(formatted[0]["function"]["name"], "search_hadith");
        // OpenAI uses "parameters", NOT "input_schema"
        assert!(formatted[0].get("input_schema").is_none());
    }

    #[test]
    fn test_is_tool_use_stop() {
        let provider = OpenAiProvider::new(None);
        assert!(provider.is_tool_use_stop("tool_calls"));
        assert!(!provider.is_tool_use_stop("tool_use")); // that's Anthropic
        assert!(!provider.is_tool_use_stop("stop"));
    }

    #[test]
    fn test_format_messages_tool_round_trip() {
        let provider = OpenAiProvider::new(None);
        let history = vec![
            Message::user("Are corals mentioned in the Quran?"),
            Message::assistant_tool_use("", "call_1", "search_quran", json!({"query": "coral"})),
            Message::tool_result("call_1", "search_quran", "1 result", vec![]),
        ];

        let messages = provider.format_messages(&history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["tool_calls"][0]["id"], "call_1");
        assert!(messages[1].get("content").is_none());
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_chunk_deserialization_text() {
        let json = r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let chunk: WireChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_chunk_deserialization_tool_call_delta() {
        let json = r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"search_quran","arguments":""}}]},"finish_reason":null}]}"#;
        let chunk: WireChunk = serde_json::from_str(json).unwrap();
        let tc = &chunk.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.index, 0);
        assert_eq!(tc.id.as_deref(), Some("call_1"));
        assert_eq!(
            tc.function.as_ref().unwrap().name.as_deref(),
            Some("search_quran")
        );
    }

    #[test]
    fn test_chunk_deserialization_finish_reason() {
        let json =
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#;
        let chunk: WireChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }
}
