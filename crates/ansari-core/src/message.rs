//! Conversation message model.
//!
//! A [`Message`] is one role-tagged turn in a conversation. Content comes in
//! two wire conventions: a flat string (OpenAI-style) or an ordered list of
//! typed blocks (Anthropic-style). Both are carried by [`MessageContent`] so
//! providers and the history reconciler can pattern-match on the variant
//! instead of sniffing shapes at runtime.

use serde::{Deserialize, Serialize};

/// Placeholder content for a turn whose blocks were all dropped during
/// reconstruction. A message must never hold an empty block list.
pub const EMPTY_CONTENT_PLACEHOLDER: &str = "(no content)";

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A search-result citation attached to a tool-result turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDoc {
    pub title: String,
    pub body: String,
    /// Free-text provenance note, e.g. "Quran 2:255" or a hadith collection.
    pub origin: String,
    #[serde(default = "default_true")]
    pub citable: bool,
}

fn default_true() -> bool {
    true
}

/// One typed fragment of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
    #[serde(rename = "document")]
    Document { doc: SourceDoc },
}

/// Message content in either wire convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Concatenated prose text, ignoring non-text blocks.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether this content holds no blocks at all (the shape invariants
    /// forbid for closed turns).
    pub fn is_empty_blocks(&self) -> bool {
        matches!(self, MessageContent::Blocks(blocks) if blocks.is_empty())
    }
}

/// One turn in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// Set on assistant tool-invocation turns and tool-result turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            tool_name: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            tool_name: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            tool_name: None,
        }
    }

    /// Assistant turn carrying a tool invocation. The text part may be empty
    /// but the block list never is.
    pub fn assistant_tool_use(
        text: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        let name = name.into();
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::Text { text: text.into() },
                ContentBlock::ToolUse {
                    id: id.into(),
                    name: name.clone(),
                    input,
                },
            ]),
            tool_name: Some(name),
        }
    }

    /// Tool-result turn answering an earlier invocation, with its reference
    /// documents appended after the result block.
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        references: Vec<SourceDoc>,
    ) -> Self {
        let mut blocks = vec![ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
        }];
        blocks.extend(
            references
                .into_iter()
                .map(|doc| ContentBlock::Document { doc }),
        );
        Self {
            role: Role::Tool,
            content: MessageContent::Blocks(blocks),
            tool_name: Some(tool_name.into()),
        }
    }

    /// Tool-invocation ids present in this turn, in block order.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect(),
            MessageContent::Text(_) => Vec::new(),
        }
    }

    /// Reference documents attached to this turn, in block order.
    pub fn references(&self) -> Vec<&SourceDoc> {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Document { doc } => Some(doc),
                    _ => None,
                })
                .collect(),
            MessageContent::Text(_) => Vec::new(),
        }
    }
}

/// Render citable reference documents as a numbered citation list for
/// presenter output. Non-citable documents are skipped.
pub fn render_citations(docs: &[&SourceDoc]) -> String {
    let mut out = String::new();
    let mut n = 0;
    for doc in docs {
        if !doc.citable {
            continue;
        }
        n += 1;
        out.push_str(&format!("[{n}] {} — {}\n", doc.title, doc.origin));
    }
    out
}
