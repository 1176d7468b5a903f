//! Agent runtime — drives one user query to a complete answer.
//!
//! The [`Agent`](runtime::Agent) owns the conversation history and runs the
//! round loop: stream the provider's response, classify it as prose or tool
//! calling, dispatch retrieval tools, reinsert results, and repeat until a
//! plain assistant turn closes. Prose fragments are yielded to the caller
//! as they arrive.

use std::time::Duration;

use thiserror::Error;

use ansari_core::config::Config;

pub mod round;
pub mod runtime;

pub use round::{RoundMode, RoundOutcome, RoundState};
pub use runtime::Agent;

/// Fatal errors surfaced by the agent to its caller.
///
/// Everything else — transient provider failures, malformed tool arguments,
/// unknown tool names, reconciliation anomalies — is absorbed or retried
/// inside the loop and only observable via logs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentError {
    /// The whole-turn failure budget was exhausted by provider or tool
    /// failures.
    #[error("too many failures")]
    ProviderExhausted,

    /// The provider's stream opened with a fragment that is neither prose
    /// nor a tool-invocation start.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A tool adapter failed and the failure budget had already run out.
    #[error("tool '{tool}' failed: {message}")]
    ToolRuntime { tool: String, message: String },
}

/// Per-conversation settings, resolved from [`Config`] at construction.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub max_tokens: u32,
    /// Whole-turn failure budget across provider retries and tool failures.
    pub max_failures: u32,
    /// Tool-calling rounds allowed before words-only mode is forced.
    pub max_tool_rounds: u32,
    /// Fixed backoff between provider retries.
    pub retry_backoff: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.default_model(),
            max_tokens: config.max_tokens(),
            max_failures: config.max_failures(),
            max_tool_rounds: config.max_tool_rounds(),
            retry_backoff: Duration::from_secs(config.retry_backoff_secs()),
        }
    }
}
