//! Chat with language-model backends.
//!
//! The client side of the crate lives here:
//!
//! - [`framing`]: per-backend line parsers and the carry-over [`LineBuffer`].
//! - [`assembler`]: turns a response byte stream into a growing reply text.
//! - [`conversation`]: the history and the placeholder reply state machine.
//! - [`dispatcher`]: sends a user turn to the relay and drives the assembler.
//!
//! and the proxy side used by the server:
//!
//! - [`upstream`]: forwards chat requests to OpenAI or Ollama.
//!
//! [`format`] holds the text helpers applied to user input and to replies
//! before display.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod assembler;
pub mod conversation;
pub mod dispatcher;
pub mod format;
pub mod framing;
pub mod upstream;

pub use assembler::{NO_RESPONSE_FALLBACK, StreamAssembler};
pub use conversation::{Conversation, ConversationMessage, PendingReply, ReplyState, Sender};
pub use dispatcher::{ChatDispatcher, ReplyOutcome};
pub use framing::{Frame, FrameParser, LineBuffer, OllamaFraming, OpenAiFraming};
pub use upstream::{ProxyRequest, UpstreamClient, UpstreamError};

/// The backend a chat request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    /// The hosted OpenAI chat-completions API.
    #[serde(rename = "openai")]
    OpenAi,
    /// A locally hosted Ollama server.
    #[serde(rename = "ollama")]
    Ollama,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    /// The line parser for the framing this backend streams in.
    pub fn frame_parser(self) -> Box<dyn FrameParser> {
        match self {
            Self::OpenAi => Box::new(OpenAiFraming),
            Self::Ollama => Box::new(OllamaFraming),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a provider name is neither `openai` nor `ollama`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(UnknownProvider(other.to_owned())),
        }
    }
}

/// Speaker of a transmitted chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// The body posted to the relay's chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub provider: Provider,
}

/// Client-side transport failures. Each is fatal to the send it occurred in.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    /// A non-success status; `reason` is the body's `error` field when present.
    #[error("{reason}")]
    Status { status: u16, reason: String },

    #[error("{0}")]
    Decode(#[from] serde_json::Error),
}

impl ChatError {
    /// Builds a [`ChatError::Status`] from a failed response body.
    ///
    /// Accepts both `{"error": "text"}` and `{"error": {"message": "text"}}`;
    /// anything else falls back to `HTTP error! status: <code>`.
    pub fn from_status(status: u16, body: &str) -> Self {
        let reason = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                let error = value.get("error")?;
                error
                    .as_str()
                    .or_else(|| error.get("message").and_then(|m| m.as_str()))
                    .map(str::to_owned)
            })
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| format!("HTTP error! status: {status}"));
        Self::Status { status, reason }
    }

    /// The message shown in the conversation: this error followed by each
    /// underlying cause, so a dropped connection is not reported as a bare
    /// "error decoding response body".
    pub fn reason(&self) -> String {
        let mut reason = self.to_string();
        let mut last = reason.clone();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !text.is_empty() && text != last && !last.ends_with(&text) {
                reason.push_str(": ");
                reason.push_str(&text);
            }
            last = text;
            source = cause.source();
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reason_is_the_body_error() {
        let err = ChatError::from_status(503, r#"{"error":"unavailable"}"#);
        assert_eq!(err.reason(), "unavailable");
        assert_eq!(
            ChatError::from_status(502, "").reason(),
            "HTTP error! status: 502"
        );
    }

    #[tokio::test]
    async fn http_reason_includes_underlying_cause() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err: ChatError = reqwest::get(format!("http://{addr}/api/chat"))
            .await
            .unwrap_err()
            .into();
        let top = err.to_string();
        let reason = err.reason();
        assert!(reason.starts_with(&top));
        assert!(reason.len() > top.len(), "no cause in {reason:?}");
    }

    #[test]
    fn provider_round_trips_names() {
        assert_eq!("openai".parse::<Provider>(), Ok(Provider::OpenAi));
        assert_eq!("ollama".parse::<Provider>(), Ok(Provider::Ollama));
        assert_eq!(
            "anthropic".parse::<Provider>(),
            Err(UnknownProvider("anthropic".into()))
        );
        assert_eq!(serde_json::to_string(&Provider::OpenAi).unwrap(), "\"openai\"");
    }

    #[test]
    fn frame_parser_matches_provider() {
        assert_eq!(Provider::OpenAi.frame_parser().provider(), Provider::OpenAi);
        assert_eq!(Provider::Ollama.frame_parser().provider(), Provider::Ollama);
    }

    #[test]
    fn request_wire_shape() {
        let request = ChatRequest {
            model: "llama3".into(),
            messages: vec![
                ChatMessage::new(Role::System, "be brief"),
                ChatMessage::new(Role::User, "hi"),
            ],
            stream: true,
            provider: Provider::Ollama,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "model": "llama3",
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "hi" }
                ],
                "stream": true,
                "provider": "ollama"
            })
        );
    }

    #[test]
    fn status_error_reads_error_field() {
        let err = ChatError::from_status(503, r#"{"error":"unavailable"}"#);
        assert_eq!(err.to_string(), "unavailable");

        let err = ChatError::from_status(401, r#"{"error":{"message":"bad key"}}"#);
        assert_eq!(err.to_string(), "bad key");
    }

    #[test]
    fn status_error_falls_back_to_code() {
        let err = ChatError::from_status(502, "<html>gateway</html>");
        assert_eq!(err.to_string(), "HTTP error! status: 502");
        assert!(matches!(err, ChatError::Status { status: 502, .. }));
    }
}
