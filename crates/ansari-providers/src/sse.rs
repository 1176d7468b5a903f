//! Server-Sent Events parsing for streaming provider responses.
//!
//! Converts a `reqwest::Response` body into a `Stream<Item = SseEvent>`,
//! tolerating events and lines split across transport chunks.

use futures::Stream;
use tokio_stream::StreamExt;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Accumulates field lines until a blank line closes the event.
#[derive(Debug, Default)]
struct EventBuilder {
    event: Option<String>,
    data: Vec<String>,
}

impl EventBuilder {
    /// Feed one line. Returns a finished event on the blank separator line.
    fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            return Some(SseEvent {
                event: self.event.take(),
                data: std::mem::take(&mut self.data).join("\n"),
            });
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("event:") {
            self.event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.trim_start().to_string());
        }
        // Unknown fields (id, retry, ...) are ignored.
        None
    }

    /// Flush a trailing event when the transport closes without a separator.
    fn finish(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

struct SseState {
    byte_stream:
        std::pin::Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    buffer: String,
    builder: EventBuilder,
    done: bool,
}

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = anyhow::Result<SseEvent>> {
    futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            builder: EventBuilder::default(),
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }
            loop {
                // Drain complete lines already buffered.
                if let Some(newline_pos) = state.buffer.find('\n') {
                    let line = state.buffer[..newline_pos]
                        .trim_end_matches('\r')
                        .to_string();
                    state.buffer.drain(..=newline_pos);
                    if let Some(event) = state.builder.push_line(&line) {
                        return Some((Ok(event), state));
                    }
                    continue;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(anyhow::anyhow!("SSE stream error: {e}")), state));
                    }
                    None => {
                        state.done = true;
                        return state.builder.finish().map(|event| (Ok(event), state));
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(builder: &mut EventBuilder, lines: &[&str]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for line in lines {
            if let Some(e) = builder.push_line(line) {
                events.push(e);
            }
        }
        events
    }

    #[test]
    fn test_single_event() {
        let mut b = EventBuilder::default();
        let events = feed(
            &mut b,
            &["event: message_start", r#"data: {"type":"message_start"}"#, ""],
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, r#"{"type":"message_start"}"#);
    }

    #[test]
    fn test_multi_line_data_joined() {
        let mut b = EventBuilder::default();
        let events = feed(&mut b, &["data: line1", "data: line2", ""]);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_comments_and_unknown_fields_ignored() {
        let mut b = EventBuilder::default();
        let events = feed(&mut b, &[": keepalive", "id: 7", "data: x", ""]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn test_trailing_event_flushed() {
        let mut b = EventBuilder::default();
        assert!(feed(&mut b, &["data: tail"]).is_empty());
        let tail = b.finish().unwrap();
        assert_eq!(tail.data, "tail");
        assert!(b.finish().is_none());
    }

    #[test]
    fn test_blank_line_without_data_is_noop() {
        let mut b = EventBuilder::default();
        assert!(feed(&mut b, &["", "", ""]).is_empty());
    }
}
