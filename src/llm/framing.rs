//! Line framing for streamed chat responses.
//!
//! A response body is a sequence of newline-terminated lines. [`LineBuffer`]
//! cuts the incoming byte chunks into complete lines, carrying any partial
//! line over to the next chunk. A [`FrameParser`] then interprets one line
//! according to the backend's convention:
//!
//! | Backend | Line                                              | End of stream     |
//! |---------|---------------------------------------------------|-------------------|
//! | OpenAI  | `data: {"choices":[{"delta":{"content":"…"}}]}`   | `data: [DONE]`    |
//! | Ollama  | `{"message":{"content":"…"}}`                     | transport closes  |

use serde::Deserialize;
use tracing::trace;

use super::Provider;

/// Prefix every OpenAI event-stream data line starts with.
pub const DATA_PREFIX: &str = "data: ";

/// Payload of the OpenAI end-of-stream line.
pub const DONE_SENTINEL: &str = "[DONE]";

/// The interpretation of one complete line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A non-empty piece of reply text.
    Fragment(String),
    /// The end-of-stream marker; stop reading lines from the current chunk.
    Done,
    /// Not a content line (malformed, foreign, or without content).
    Skip,
}

/// A backend's line convention.
///
/// Selected once per send from [`Provider::frame_parser`] and handed to the
/// assembler.
pub trait FrameParser: Send + Sync {
    fn provider(&self) -> Provider;

    /// Interprets one complete, non-blank line.
    fn parse_line(&self, line: &str) -> Frame;
}

#[derive(Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    delta: Option<ContentField>,
}

#[derive(Deserialize)]
struct OllamaChunk {
    message: Option<ContentField>,
}

#[derive(Deserialize)]
struct ContentField {
    content: Option<String>,
}

fn non_empty(content: Option<String>) -> Frame {
    match content {
        Some(text) if !text.is_empty() => Frame::Fragment(text),
        _ => Frame::Skip,
    }
}

/// `data: `-prefixed JSON deltas terminated by `data: [DONE]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiFraming;

impl FrameParser for OpenAiFraming {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn parse_line(&self, line: &str) -> Frame {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return Frame::Skip;
        };
        if payload == DONE_SENTINEL {
            return Frame::Done;
        }
        match serde_json::from_str::<OpenAiChunk>(payload) {
            Ok(chunk) => non_empty(
                chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta)
                    .and_then(|delta| delta.content),
            ),
            Err(e) => {
                trace!(error = %e, "skipping malformed event-stream line");
                Frame::Skip
            }
        }
    }
}

/// One JSON object per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaFraming;

impl FrameParser for OllamaFraming {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn parse_line(&self, line: &str) -> Frame {
        match serde_json::from_str::<OllamaChunk>(line) {
            Ok(chunk) => non_empty(chunk.message.and_then(|message| message.content)),
            Err(e) => {
                trace!(error = %e, "skipping malformed json line");
                Frame::Skip
            }
        }
    }
}

/// Carry-over buffer that splits a byte stream into lines.
///
/// Bytes are kept until a `\n` arrives, so a line (or a multi-byte UTF-8
/// character) split across chunks is decoded only once it is whole. A
/// trailing `\r` is removed from each line.
///
/// # Examples
///
/// ```
/// use relaychat::llm::LineBuffer;
///
/// let mut lines = LineBuffer::default();
/// assert!(lines.push(b"data: {\"a\"").is_empty());
/// assert_eq!(lines.push(b":1}\r\nnext"), vec!["data: {\"a\":1}".to_string()]);
/// assert_eq!(lines.take_rest(), Some("next".to_string()));
/// ```
#[derive(Debug, Default)]
pub struct LineBuffer {
    tail: Vec<u8>,
}

impl LineBuffer {
    /// Appends `chunk` and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.tail.extend_from_slice(chunk);
        let Some(last_newline) = self.tail.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let complete: Vec<u8> = self.tail.drain(..=last_newline).collect();
        complete[..complete.len() - 1]
            .split(|&b| b == b'\n')
            .map(decode_line)
            .collect()
    }

    /// Returns the unterminated remainder, leaving the buffer empty.
    pub fn take_rest(&mut self) -> Option<String> {
        if self.tail.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.tail);
        Some(decode_line(&rest))
    }

    /// Number of buffered bytes not yet part of a complete line.
    pub fn pending(&self) -> usize {
        self.tail.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_content_line() {
        let frame = OpenAiFraming.parse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#);
        assert_eq!(frame, Frame::Fragment("Hel".into()));
    }

    #[test]
    fn openai_done_sentinel() {
        assert_eq!(OpenAiFraming.parse_line("data: [DONE]"), Frame::Done);
    }

    #[test]
    fn openai_requires_prefix() {
        let line = r#"{"choices":[{"delta":{"content":"x"}}]}"#;
        assert_eq!(OpenAiFraming.parse_line(line), Frame::Skip);
        assert_eq!(OpenAiFraming.parse_line("event: ping"), Frame::Skip);
    }

    #[test]
    fn openai_skips_missing_or_empty_content() {
        for line in [
            r#"data: {"choices":[]}"#,
            r#"data: {"choices":[{"delta":{}}]}"#,
            r#"data: {"choices":[{"delta":{"content":""}}]}"#,
            r#"data: {"choices":[{"delta":{"content":null}}]}"#,
            r#"data: {"usage":{"total_tokens":3}}"#,
            r#"data: {"choices":[{"delta":{"content":5}}]}"#,
            "data: not json",
        ] {
            assert_eq!(OpenAiFraming.parse_line(line), Frame::Skip, "{line}");
        }
    }

    #[test]
    fn openai_ignores_extra_fields() {
        let line = r#"data: {"id":"c1","choices":[{"index":0,"delta":{"role":"assistant","content":"ok"},"finish_reason":null}]}"#;
        assert_eq!(OpenAiFraming.parse_line(line), Frame::Fragment("ok".into()));
    }

    #[test]
    fn ollama_content_line() {
        let line = r#"{"model":"llama3","message":{"role":"assistant","content":" there"},"done":false}"#;
        assert_eq!(OllamaFraming.parse_line(line), Frame::Fragment(" there".into()));
    }

    #[test]
    fn ollama_final_and_error_lines_are_skipped() {
        let done = r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true}"#;
        assert_eq!(OllamaFraming.parse_line(done), Frame::Skip);
        assert_eq!(OllamaFraming.parse_line(r#"{"error":"model not found"}"#), Frame::Skip);
        assert_eq!(OllamaFraming.parse_line("{truncated"), Frame::Skip);
    }

    #[test]
    fn ollama_has_no_sentinel() {
        assert_eq!(OllamaFraming.parse_line("data: [DONE]"), Frame::Skip);
    }

    #[test]
    fn line_buffer_carries_partial_line() {
        let mut lines = LineBuffer::default();
        assert!(lines.push(b"one\ntw").len() == 1);
        assert_eq!(lines.pending(), 2);
        assert_eq!(lines.push(b"o\n\nthree\n"), vec!["two", "", "three"]);
        assert_eq!(lines.pending(), 0);
        assert_eq!(lines.take_rest(), None);
    }

    #[test]
    fn line_buffer_joins_split_utf8() {
        let text = "héllo\n".as_bytes();
        // split inside the two-byte 'é'
        let mut lines = LineBuffer::default();
        assert!(lines.push(&text[..2]).is_empty());
        assert_eq!(lines.push(&text[2..]), vec!["héllo"]);
    }

    #[test]
    fn line_buffer_strips_carriage_return() {
        let mut lines = LineBuffer::default();
        assert_eq!(lines.push(b"data: [DONE]\r\n"), vec!["data: [DONE]"]);
    }
}
