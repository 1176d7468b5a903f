//! Anthropic Messages API provider.
//!
//! Streams chat completions via `/v1/messages` with SSE, decoding
//! `content_block_start` / `content_block_delta` / `message_delta` events
//! into the shared [`StreamEvent`] fragment model. Message history is
//! rendered in the block-list convention; tool-result turns become role
//! `user` with a `tool_result` block, followed by `document` blocks for
//! the attached references.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use ansari_core::message::{ContentBlock, Message, MessageContent, Role, SourceDoc};

use crate::sse::{SseEvent, parse_sse_stream};
use crate::{ChatRequest, Credentials, EventStream, LlmProvider, ModelApi, StreamEvent, ToolDefinition};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    pub base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(ANTHROPIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

// --- SSE event types ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart { message: WireMessageStart },
    ContentBlockStart { index: usize, content_block: WireBlockStart },
    ContentBlockDelta { index: usize, delta: WireBlockDelta },
    ContentBlockStop {},
    MessageDelta {
        delta: WireMessageDelta,
        #[serde(default)]
        usage: Option<WireDeltaUsage>,
    },
    MessageStop,
    Ping,
    Error { error: serde_json::Value },
}

#[derive(Debug, Deserialize)]
struct WireMessageStart {
    #[serde(default)]
    usage: Option<WireStartUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStartUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlockStart {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse { id: String, name: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct WireMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDeltaUsage {
    #[serde(default)]
    output_tokens: Option<u64>,
}

fn render_block(block: &ContentBlock) -> Option<serde_json::Value> {
    match block {
        ContentBlock::Text { text } => Some(json!({
            "type": "text",
            "text": text,
        })),
        ContentBlock::ToolUse { id, name, input } => Some(json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        })),
        ContentBlock::ToolResult { tool_use_id, content } => Some(json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
        })),
        ContentBlock::Document { doc } => Some(render_document(doc)),
    }
}

fn render_document(doc: &SourceDoc) -> serde_json::Value {
    json!({
        "type": "document",
        "source": {
            "type": "text",
            "media_type": "text/plain",
            "data": doc.body,
        },
        "title": doc.title,
        "context": doc.origin,
        "citations": { "enabled": doc.citable },
    })
}

fn render_blocks(blocks: &[ContentBlock]) -> Vec<serde_json::Value> {
    // Empty text blocks are rejected upstream; drop them unless the turn
    // would otherwise have no content at all.
    let rendered: Vec<serde_json::Value> = blocks
        .iter()
        .filter(|b| !matches!(b, ContentBlock::Text { text } if text.is_empty()))
        .filter_map(render_block)
        .collect();
    if rendered.is_empty() {
        vec![json!({"type": "text", "text": " "})]
    } else {
        rendered
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn api(&self) -> ModelApi {
        ModelApi::AnthropicMessages
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters_schema,
                })
            })
            .collect()
    }

    fn format_messages(&self, history: &[Message]) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();

        for message in history {
            match message.role {
                // The system turn travels in the request's `system` field.
                Role::System => {}
                Role::User | Role::Assistant => {
                    let role = if message.role == Role::User { "user" } else { "assistant" };
                    let content = match &message.content {
                        MessageContent::Text(text) => json!([{"type": "text", "text": text}]),
                        MessageContent::Blocks(blocks) => json!(render_blocks(blocks)),
                    };
                    messages.push(json!({ "role": role, "content": content }));
                }
                // Tool results are user turns in the Messages API.
                Role::Tool => {
                    let content = match &message.content {
                        MessageContent::Text(text) => json!([{"type": "text", "text": text}]),
                        MessageContent::Blocks(blocks) => json!(render_blocks(blocks)),
                    };
                    messages.push(json!({ "role": "user", "content": content }));
                }
            }
        }

        messages
    }

    fn is_tool_use_stop(&self, stop_reason: &str) -> bool {
        stop_reason == "tool_use"
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<EventStream> {
        let Credentials::ApiKey { api_key } = credentials;

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": request.messages,
            "stream": true,
        });
        if let Some(ref system) = request.system {
            body["system"] = json!(system);
        }
        if let Some(ref tools) = request.tools {
            if !tools.is_empty() {
                body["tools"] = json!(tools);
            }
        }

        debug!(model = %request.model, base_url = %self.base_url, "Streaming Anthropic Messages API");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error {status}: {body}");
        }

        let sse_stream = parse_sse_stream(response);

        let event_stream = futures::stream::unfold(
            ChunkState {
                sse: Box::pin(sse_stream),
                pending: VecDeque::new(),
                done: false,
            },
            |mut state| async move {
                loop {
                    if let Some(event) = state.pending.pop_front() {
                        return Some((Ok(event), state));
                    }
                    if state.done {
                        return None;
                    }

                    let sse_event = match state.sse.next().await {
                        Some(Ok(e)) => e,
                        Some(Err(e)) => return Some((Err(e), state)),
                        None => return None,
                    };

                    match decode(&sse_event, &mut state.pending) {
                        Ok(finished) => {
                            if finished {
                                state.done = true;
                            }
                        }
                        Err(e) => return Some((Err(e), state)),
                    }
                }
            },
        );

        Ok(Box::pin(event_stream))
    }
}

/// Decode one SSE event, pushing resulting fragments onto `pending`.
/// Returns `true` when the message is complete.
fn decode(sse_event: &SseEvent, pending: &mut VecDeque<StreamEvent>) -> anyhow::Result<bool> {
    let event: WireEvent = match serde_json::from_str(&sse_event.data) {
        Ok(e) => e,
        Err(e) => {
            trace!(%e, data = %sse_event.data, "Unrecognized Anthropic event, skipping");
            return Ok(false);
        }
    };

    match event {
        WireEvent::MessageStart { message } => {
            if let Some(usage) = message.usage {
                pending.push_back(StreamEvent::Usage {
                    input_tokens: usage.input_tokens,
                    output_tokens: None,
                });
            }
        }
        WireEvent::ContentBlockStart { index, content_block } => match content_block {
            WireBlockStart::Text { text } => {
                if !text.is_empty() {
                    pending.push_back(StreamEvent::TextDelta { text });
                }
            }
            WireBlockStart::ToolUse { id, name } => {
                pending.push_back(StreamEvent::ToolUseStart { index, id, name });
            }
        },
        WireEvent::ContentBlockDelta { index, delta } => match delta {
            WireBlockDelta::TextDelta { text } => {
                pending.push_back(StreamEvent::TextDelta { text });
            }
            WireBlockDelta::InputJsonDelta { partial_json } => {
                pending.push_back(StreamEvent::ToolInputDelta { index, partial_json });
            }
        },
        WireEvent::ContentBlockStop {} | WireEvent::Ping => {}
        WireEvent::MessageDelta { delta, usage } => {
            if let Some(usage) = usage {
                pending.push_back(StreamEvent::Usage {
                    input_tokens: None,
                    output_tokens: usage.output_tokens,
                });
            }
            if let Some(stop_reason) = delta.stop_reason {
                pending.push_back(StreamEvent::Done { stop_reason });
            }
        }
        WireEvent::MessageStop => return Ok(true),
        WireEvent::Error { error } => {
            anyhow::bail!("Anthropic stream error: {error}");
        }
    }

    Ok(false)
}

struct ChunkState {
    sse: Pin<Box<dyn Stream<Item = anyhow::Result<SseEvent>> + Send>>,
    pending: VecDeque<StreamEvent>,
    done: bool,
}
