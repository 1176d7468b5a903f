//! Per-round stream reducer.
//!
//! One round is one streamed provider response. [`RoundState`] is a pure
//! reducer over the response's fragments: the first content-bearing
//! fragment fixes the round's mode, prose is buffered and yielded in words
//! mode, and tool-call arguments are accumulated per index in tool mode.
//! Feeding it a canned fragment list is all a unit test needs.

use ansari_providers::StreamEvent;

use crate::AgentError;

/// Response mode, fixed by the first content fragment of the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMode {
    Words,
    Tool,
}

/// A tool call being assembled from streamed fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialToolCall {
    pub index: usize,
    pub id: String,
    pub name: String,
    /// Argument-string fragments concatenated in arrival order.
    pub arguments: String,
}

/// What a finished round produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub mode: RoundMode,
    pub text: String,
    pub calls: Vec<PartialToolCall>,
    pub stop_reason: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Default)]
pub struct RoundState {
    mode: Option<RoundMode>,
    buffer: String,
    calls: Vec<PartialToolCall>,
    stop_reason: Option<String>,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl RoundState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Option<RoundMode> {
        self.mode
    }

    /// Consume one fragment. Returns prose to yield to the caller — only in
    /// words mode; tool-mode fragments accumulate silently.
    pub fn step(&mut self, event: StreamEvent) -> Result<Option<String>, AgentError> {
        match event {
            StreamEvent::TextDelta { text } => {
                let mode = *self.mode.get_or_insert(RoundMode::Words);
                self.buffer.push_str(&text);
                match mode {
                    RoundMode::Words => Ok(Some(text)),
                    RoundMode::Tool => Ok(None),
                }
            }
            StreamEvent::ToolUseStart { index, id, name } => {
                self.mode.get_or_insert(RoundMode::Tool);
                self.calls.push(PartialToolCall {
                    index,
                    id,
                    name,
                    arguments: String::new(),
                });
                Ok(None)
            }
            StreamEvent::ToolInputDelta { index, partial_json } => {
                if self.mode.is_none() {
                    return Err(AgentError::ProtocolViolation(
                        "tool arguments before any prose or tool-call start".into(),
                    ));
                }
                match self.calls.iter_mut().rev().find(|c| c.index == index) {
                    Some(call) => {
                        call.arguments.push_str(&partial_json);
                        Ok(None)
                    }
                    None => Err(AgentError::ProtocolViolation(format!(
                        "tool arguments for unknown call index {index}"
                    ))),
                }
            }
            StreamEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                if input_tokens.is_some() {
                    self.input_tokens = input_tokens;
                }
                if output_tokens.is_some() {
                    self.output_tokens = output_tokens;
                }
                Ok(None)
            }
            StreamEvent::Done { stop_reason } => {
                self.stop_reason = Some(stop_reason);
                Ok(None)
            }
        }
    }

    /// Close the round. A round that produced no content at all counts as
    /// words mode with an empty buffer — the degenerate but valid shape.
    pub fn finish(self) -> RoundOutcome {
        RoundOutcome {
            mode: self.mode.unwrap_or(RoundMode::Words),
            text: self.buffer,
            calls: self.calls,
            stop_reason: self.stop_reason,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}
