//! LLM provider abstraction.
//!
//! Each provider implements the [`LlmProvider`] trait to stream chat
//! completions from a different API family. Providers translate the shared
//! [`Message`] history into their own wire shape and decode their streaming
//! responses into a common fragment model ([`StreamEvent`]) that the agent
//! loop consumes; tool-argument accumulation happens in the agent, not here.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use ansari_core::message::Message;

pub mod anthropic;
pub mod openai;
pub mod sse;

/// Supported LLM API protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelApi {
    AnthropicMessages,
    OpenAiCompletions,
}

/// Credentials for authenticating with an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credentials {
    #[serde(rename = "api_key")]
    ApiKey { api_key: String },
}

/// Declaration of a callable tool, in provider-neutral form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// A request to the LLM. `messages` and `tools` are already in the
/// provider's wire shape (see [`LlmProvider::format_messages`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub tools: Option<Vec<serde_json::Value>>,
    pub system: Option<String>,
}

/// One streamed fragment of a response.
///
/// A response is a sequence of these: prose deltas in words mode, or a
/// tool-use start followed by argument-string fragments in tool mode,
/// terminated by [`StreamEvent::Done`] carrying the stop reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    /// First fragment of a tool call: carries the invocation id and name.
    ToolUseStart {
        index: usize,
        id: String,
        name: String,
    },
    /// Partial tool-argument JSON, concatenated in arrival order.
    ToolInputDelta {
        index: usize,
        partial_json: String,
    },
    Usage {
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
    },
    /// End of the turn, with the provider's stop reason.
    Done {
        stop_reason: String,
    },
}

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// The core LLM provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "anthropic", "openai").
    fn id(&self) -> &str;

    /// API protocol used by this provider.
    fn api(&self) -> ModelApi;

    /// Render the shared message history into this provider's wire shape.
    fn format_messages(&self, history: &[Message]) -> Vec<serde_json::Value>;

    /// Render tool definitions into this provider's wire shape.
    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value>;

    /// Whether a stop reason means the model is requesting tool execution.
    fn is_tool_use_stop(&self, stop_reason: &str) -> bool;

    /// Open a streaming chat completion.
    async fn stream(
        &self,
        request: &ChatRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<EventStream>;
}
