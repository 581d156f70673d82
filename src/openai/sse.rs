//! Server-Sent Events parsing for Chat Completions streaming
//! responses.
//!
//! Network reads can split a line anywhere, including in the middle
//! of a multi-byte character, so raw bytes are buffered and only
//! complete lines are decoded and handed to [`parse_line`].

use serde::Deserialize;
use serde_json::Value;

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// What a single SSE line means to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Incremental assistant text from `choices[0].delta.content`.
    Delta(String),
    /// The `data: [DONE]` end marker.
    Done,
    /// The provider reported an error inside the stream.
    Error(String),
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

// data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

impl CompletionChunk {
    fn into_content(self) -> Option<String> {
        self.choices.into_iter().next()?.delta?.content
    }
}

/// Accumulates raw bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Appends a chunk and drains every line terminated by `\n`.
    /// Whatever follows the last newline is kept for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(String::from_utf8_lossy(&self.buffer[start..end]).into_owned());
            start = end + 1;
        }
        self.buffer.drain(..start);

        lines
    }

    /// Returns the trailing unterminated line once the stream has
    /// ended, if there is one.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(line)
    }

    pub fn remaining(&self) -> &[u8] {
        &self.buffer
    }
}

/// Interprets one complete SSE line. Blank lines, comments, other
/// fields and undecodable payloads all yield `None`.
pub fn parse_line(line: &str) -> Option<SseFrame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let data = line.strip_prefix(DATA_PREFIX)?.trim();
    if data == DONE_MARKER {
        return Some(SseFrame::Done);
    }
    if data.is_empty() {
        return None;
    }

    let chunk = match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            // Malformed frames are skipped, never fatal
            tracing::warn!("Skipping malformed completion chunk: {} ({})", data, e);
            return None;
        }
    };

    if let Some(error) = &chunk.error {
        return Some(SseFrame::Error(error_message(error)));
    }

    chunk
        .into_content()
        .filter(|content| !content.is_empty())
        .map(SseFrame::Delta)
}

fn error_message(error: &Value) -> String {
    if let Some(msg) = error.get("message").and_then(Value::as_str) {
        return msg.to_string();
    }
    if let Some(msg) = error.as_str() {
        return msg.to_string();
    }
    "Unknown error".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(lines: &[&str]) -> Vec<SseFrame> {
        lines.iter().filter_map(|l| parse_line(l)).collect()
    }

    #[test]
    fn test_parse_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_line(line), Some(SseFrame::Delta("Hi".to_string())));
    }

    #[test]
    fn test_parse_done() {
        assert_eq!(parse_line("data: [DONE]"), Some(SseFrame::Done));
        assert_eq!(parse_line("  data: [DONE]\r"), Some(SseFrame::Done));
    }

    #[test]
    fn test_hi_there_sequence() {
        let result = frames(&[
            r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":" there"}}]}"#,
            "data: [DONE]",
        ]);
        assert_eq!(
            result,
            vec![
                SseFrame::Delta("Hi".to_string()),
                SseFrame::Delta(" there".to_string()),
                SseFrame::Done,
            ]
        );
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let result = frames(&[
            r#"data: {"choices":[{"delta":{"content":"a"}}]}"#,
            "data: {not valid json",
            r#"data: {"choices":[{"delta":{"content":"b"}}]}"#,
        ]);
        assert_eq!(
            result,
            vec![
                SseFrame::Delta("a".to_string()),
                SseFrame::Delta("b".to_string())
            ]
        );
    }

    #[test]
    fn test_null_and_missing_content_are_ignored() {
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"content":null}}]}"#),
            None
        );
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            None
        );
        assert_eq!(parse_line(r#"data: {"choices":[]}"#), None);
    }

    #[test]
    fn test_empty_content_is_skipped() {
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            None
        );
    }

    #[test]
    fn test_other_lines_are_ignored() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line(": keep-alive"), None);
        assert_eq!(parse_line("event: message"), None);
        assert_eq!(parse_line("id: 42"), None);
        assert_eq!(parse_line("data:"), None);
    }

    #[test]
    fn test_error_frame() {
        let line = r#"data: {"error":{"message":"context length exceeded","type":"invalid_request_error"}}"#;
        assert_eq!(
            parse_line(line),
            Some(SseFrame::Error("context length exceeded".to_string()))
        );
        assert_eq!(
            parse_line(r#"data: {"error":"overloaded"}"#),
            Some(SseFrame::Error("overloaded".to_string()))
        );
    }

    #[test]
    fn test_escaped_characters_in_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Line1\nLine2\t\"quoted\""}}]}"#;
        assert_eq!(
            parse_line(line),
            Some(SseFrame::Delta("Line1\nLine2\t\"quoted\"".to_string()))
        );
    }

    #[test]
    fn test_buffer_splits_lines() {
        let mut buffer = SseLineBuffer::new();
        let lines = buffer.push(b"data: one\n\ndata: two\n");
        assert_eq!(lines, vec!["data: one", "", "data: two"]);
        assert!(buffer.remaining().is_empty());
    }

    #[test]
    fn test_buffer_carries_partial_line() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: {\"choices\":[{\"delta\"").is_empty());
        assert!(!buffer.remaining().is_empty());

        let lines = buffer.push(b":{\"content\":\"Hello\"}}]}\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(
            parse_line(&lines[0]),
            Some(SseFrame::Delta("Hello".to_string()))
        );
    }

    #[test]
    fn test_buffer_reassembles_split_utf8() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"Hello 世界 🌍\"}}]}\n";
        let bytes = line.as_bytes();

        let mut buffer = SseLineBuffer::new();
        let mut lines = Vec::new();
        // Three byte chunks cut straight through the multi-byte characters
        for chunk in bytes.chunks(3) {
            lines.extend(buffer.push(chunk));
        }

        assert_eq!(lines.len(), 1);
        assert_eq!(
            parse_line(&lines[0]),
            Some(SseFrame::Delta("Hello 世界 🌍".to_string()))
        );
    }

    #[test]
    fn test_buffer_handles_crlf() {
        let mut buffer = SseLineBuffer::new();
        let lines = buffer.push(b"data: [DONE]\r\n\r\n");
        assert_eq!(parse_line(&lines[0]), Some(SseFrame::Done));
        assert_eq!(parse_line(&lines[1]), None);
    }

    #[test]
    fn test_buffer_finish_returns_trailing_line() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: [DONE]").is_empty());
        assert_eq!(buffer.finish(), Some("data: [DONE]".to_string()));
        assert_eq!(buffer.finish(), None);
    }
}
