//! Message-history reconciliation.
//!
//! Converts between the in-memory [`Message`] shape the agent and LLM
//! providers work with and the flattened [`MessageRow`] shape the thread
//! store persists. Reconstruction is deliberately forgiving: malformed
//! stored JSON degrades to opaque text, and tool-result blocks whose
//! invocation id has no earlier match are dropped instead of failing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::message::{
    ContentBlock, EMPTY_CONTENT_PLACEHOLDER, Message, MessageContent, Role, SourceDoc,
};

/// Flattened, persistable form of one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub role: Role,
    /// Plain text, or a JSON-encoded block list when the message content is
    /// not representable as a flat string.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool-call metadata: `{id, name, input}` on assistant invocation rows,
    /// `{id}` on tool-result rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_details: Option<serde_json::Value>,
    /// Reference documents extracted from a tool-result turn, stored in
    /// their own field so they can be rendered without parsing `content`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Flatten a message for storage.
pub fn to_row(message: &Message) -> MessageRow {
    let created_at = Utc::now();

    if let Some(tool_name) = &message.tool_name {
        if let MessageContent::Blocks(blocks) = &message.content {
            // Assistant invocation turn: pull the call into tool_details.
            if let Some(ContentBlock::ToolUse { id, name, input }) = blocks
                .iter()
                .find(|b| matches!(b, ContentBlock::ToolUse { .. }))
            {
                return MessageRow {
                    role: message.role,
                    content: message.content.text(),
                    tool_name: Some(tool_name.clone()),
                    tool_details: Some(json!({
                        "id": id,
                        "name": name,
                        "input": input,
                    })),
                    references: None,
                    created_at,
                };
            }

            // Tool-result turn: result text in content, references aside.
            if let Some(ContentBlock::ToolResult {
                tool_use_id,
                content,
            }) = blocks
                .iter()
                .find(|b| matches!(b, ContentBlock::ToolResult { .. }))
            {
                let refs: Vec<&SourceDoc> = message.references();
                return MessageRow {
                    role: message.role,
                    content: content.clone(),
                    tool_name: Some(tool_name.clone()),
                    tool_details: Some(json!({ "id": tool_use_id })),
                    references: if refs.is_empty() {
                        None
                    } else {
                        serde_json::to_value(&refs).ok()
                    },
                    created_at,
                };
            }
        }
    }

    // Plain turn. Block-list content without tool blocks is JSON-encoded.
    let content = match &message.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => {
            serde_json::to_string(blocks).unwrap_or_else(|_| message.content.text())
        }
    };
    MessageRow {
        role: message.role,
        content,
        tool_name: None,
        tool_details: None,
        references: None,
        created_at,
    }
}

/// Rebuild provider-ready messages from stored rows.
///
/// Enforces id referential integrity: a tool-result block whose invocation
/// id was not reconstructed earlier in the same history is dropped, and a
/// message left without blocks collapses to a fixed placeholder.
pub fn from_rows(rows: &[MessageRow]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(rows.len());
    let mut seen_ids: Vec<String> = Vec::new();

    for row in rows {
        match (&row.tool_name, row.role) {
            (Some(tool_name), Role::Assistant) => {
                match parse_invocation_details(row) {
                    Some((id, name, input)) => {
                        seen_ids.push(id.clone());
                        messages.push(Message {
                            role: Role::Assistant,
                            content: MessageContent::Blocks(vec![
                                ContentBlock::Text {
                                    text: row.content.clone(),
                                },
                                ContentBlock::ToolUse { id, name, input },
                            ]),
                            tool_name: Some(tool_name.clone()),
                        });
                    }
                    None => {
                        warn!(tool = %tool_name, "Invocation row missing tool details, degrading to text");
                        messages.push(plain_message(row));
                    }
                }
            }
            (Some(tool_name), Role::User | Role::Tool) => {
                let id = row
                    .tool_details
                    .as_ref()
                    .and_then(|d| d.get("id"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);

                match id {
                    Some(id) if seen_ids.contains(&id) => {
                        let mut blocks = vec![ContentBlock::ToolResult {
                            tool_use_id: id,
                            content: row.content.clone(),
                        }];
                        blocks.extend(parse_references(row));
                        messages.push(Message {
                            role: Role::Tool,
                            content: MessageContent::Blocks(blocks),
                            tool_name: Some(tool_name.clone()),
                        });
                    }
                    _ => {
                        // Dangling result: keep the turn slot but never send
                        // the orphaned block upstream.
                        warn!(tool = %tool_name, "Dropping tool result with unmatched invocation id");
                        let mut blocks: Vec<ContentBlock> =
                            parse_references(row).collect();
                        if blocks.is_empty() {
                            blocks.push(ContentBlock::Text {
                                text: EMPTY_CONTENT_PLACEHOLDER.into(),
                            });
                        }
                        messages.push(Message {
                            role: Role::Tool,
                            content: MessageContent::Blocks(blocks),
                            tool_name: Some(tool_name.clone()),
                        });
                    }
                }
            }
            _ => messages.push(plain_message(row)),
        }
    }

    messages
}

fn plain_message(row: &MessageRow) -> Message {
    // Content may be a JSON-encoded block list; anything unparseable is
    // treated as opaque text.
    let content = match serde_json::from_str::<Vec<ContentBlock>>(&row.content) {
        Ok(blocks) if !blocks.is_empty() => MessageContent::Blocks(blocks),
        _ => MessageContent::Text(row.content.clone()),
    };
    Message {
        role: row.role,
        content,
        tool_name: None,
    }
}

fn parse_invocation_details(row: &MessageRow) -> Option<(String, String, serde_json::Value)> {
    let details = row.tool_details.as_ref()?;
    let id = details.get("id")?.as_str()?.to_string();
    let name = details
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(row.tool_name.as_deref().unwrap_or_default())
        .to_string();
    let input = details.get("input").cloned().unwrap_or(json!({}));
    Some((id, name, input))
}

fn parse_references(row: &MessageRow) -> impl Iterator<Item = ContentBlock> {
    row.references
        .as_ref()
        .and_then(|v| serde_json::from_value::<Vec<SourceDoc>>(v.clone()).ok())
        .unwrap_or_default()
        .into_iter()
        .map(|doc| ContentBlock::Document { doc })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> SourceDoc {
        SourceDoc {
            title: "Ayah".into(),
            body: "وَمِنْ آيَاتِهِ".into(),
            origin: "Quran 55:22".into(),
            citable: true,
        }
    }

    #[test]
    fn test_round_trip_plain_text() {
        let msg = Message::user("Are corals mentioned in the Quran?");
        let row = to_row(&msg);
        assert_eq!(row.content, "Are corals mentioned in the Quran?");
        assert!(row.tool_name.is_none());

        let back = from_rows(&[row]);
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].role, Role::User);
        assert_eq!(back[0].content.text(), msg.content.text());
    }

    #[test]
    fn test_round_trip_invocation() {
        let msg = Message::assistant_tool_use(
            "",
            "toolu_1",
            "search_quran",
            json!({"query": "coral"}),
        );
        let row = to_row(&msg);
        assert_eq!(row.tool_name.as_deref(), Some("search_quran"));
        assert_eq!(row.tool_details.as_ref().unwrap()["id"], "toolu_1");

        let back = from_rows(&[row]);
        assert_eq!(back[0].role, Role::Assistant);
        assert_eq!(back[0].tool_use_ids(), vec!["toolu_1"]);
        match &back[0].content {
            MessageContent::Blocks(blocks) => {
                assert!(matches!(&blocks[0], ContentBlock::Text { .. }));
                assert!(matches!(&blocks[1], ContentBlock::ToolUse { input, .. }
                    if input["query"] == "coral"));
            }
            _ => panic!("expected blocks"),
        }
    }

    #[test]
    fn test_round_trip_tool_result_with_references() {
        let invocation = Message::assistant_tool_use(
            "",
            "toolu_1",
            "search_quran",
            json!({"query": "coral"}),
        );
        let result =
            Message::tool_result("toolu_1", "search_quran", "1 result", vec![sample_doc()]);

        let rows = vec![to_row(&invocation), to_row(&result)];
        assert!(rows[1].references.is_some());

        let back = from_rows(&rows);
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].role, Role::Tool);
        let refs = back[1].references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].origin, "Quran 55:22");
    }

    #[test]
    fn test_orphaned_tool_result_dropped_not_raised() {
        let result = Message::tool_result("toolu_missing", "search_quran", "text", vec![]);
        let back = from_rows(&[to_row(&result)]);
        assert_eq!(back.len(), 1);
        // The orphaned block is gone; the slot collapses to the placeholder.
        assert!(back[0].tool_use_ids().is_empty());
        assert_eq!(back[0].content.text(), EMPTY_CONTENT_PLACEHOLDER);
    }

    #[test]
    fn test_malformed_content_degrades_to_text() {
        let row = MessageRow {
            role: Role::Assistant,
            content: "{not valid json".into(),
            tool_name: None,
            tool_details: None,
            references: None,
            created_at: Utc::now(),
        };
        let back = from_rows(&[row]);
        assert_eq!(back[0].content.text(), "{not valid json");
    }

    #[test]
    fn test_invocation_row_without_details_degrades() {
        let row = MessageRow {
            role: Role::Assistant,
            content: "thinking...".into(),
            tool_name: Some("search_quran".into()),
            tool_details: None,
            references: None,
            created_at: Utc::now(),
        };
        let back = from_rows(&[row]);
        assert!(back[0].tool_name.is_none());
        assert_eq!(back[0].content.text(), "thinking...");
    }

    #[test]
    fn test_block_list_content_json_encoded() {
        let msg = Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::Text {
                text: "hello".into(),
            }]),
            tool_name: None,
        };
        let row = to_row(&msg);
        // JSON-encoded, not the bare text.
        assert!(row.content.starts_with('['));
        let back = from_rows(&[row]);
        assert_eq!(back[0].content, msg.content);
    }
}
