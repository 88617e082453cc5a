//! The proxy side of `/api/chat`: validates the relayed body and forwards
//! it to OpenAI or Ollama.
//!
//! OpenAI's event stream is parsed and re-emitted in a reduced form carrying
//! only content deltas; Ollama's JSON lines are passed through byte for byte.

use std::io;

use async_stream::try_stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::assembler::StreamAssembler;
use super::framing::{DATA_PREFIX, DONE_SENTINEL, Frame, FrameParser, LineBuffer, OpenAiFraming};
use super::Provider;
use crate::config::ServerConfig;
use crate::http::{BodyStream, Response, StatusCode};

/// Upstream and validation failures of a proxied chat request.
///
/// Every variant maps to a status code and renders as the `error` field of
/// the JSON body.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{0}")]
    InvalidBody(String),

    #[error("Invalid provider: {0}")]
    InvalidProvider(String),

    #[error("Missing OpenAI API key")]
    MissingOpenAiKey,

    #[error("Missing Ollama host configuration")]
    MissingOllamaHost,

    #[error("Invalid OpenAI API key")]
    InvalidApiKey,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Any other OpenAI failure, carrying the upstream message.
    #[error("{0}")]
    OpenAi(String),

    #[error("Ollama error: {status} {reason}")]
    OllamaStatus { status: u16, reason: String },

    #[error("Ollama service unavailable: {0}")]
    OllamaUnavailable(String),
}

impl UpstreamError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) | Self::InvalidProvider(_) => StatusCode::BadRequest,
            Self::InvalidApiKey => StatusCode::Unauthorized,
            Self::ModelNotFound(_) => StatusCode::NotFound,
            Self::OllamaStatus { .. } | Self::OllamaUnavailable(_) => StatusCode::ServiceUnavailable,
            Self::MissingOpenAiKey | Self::MissingOllamaHost | Self::OpenAi(_) => {
                StatusCode::InternalServerError
            }
        }
    }

    pub fn into_response(self) -> Response {
        Response::error(self.status(), self.to_string())
    }
}

const REQUIRED_FIELDS: &str = "Invalid request body: model, messages, and provider are required";

/// A validated `/api/chat` body.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRequest {
    pub model: String,
    /// Forwarded untouched.
    pub messages: Vec<Value>,
    /// Defaults to `true` when the field is absent.
    pub stream: bool,
    pub provider: Provider,
}

impl ProxyRequest {
    /// Validates a decoded request body.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::InvalidBody`] when `model`, `messages` or `provider`
    /// is missing or empty, [`UpstreamError::InvalidProvider`] when the
    /// provider is not one the relay knows.
    pub fn from_value(body: Value) -> Result<Self, UpstreamError> {
        let missing = || UpstreamError::InvalidBody(REQUIRED_FIELDS.to_owned());

        let model = body
            .get("model")
            .and_then(Value::as_str)
            .filter(|model| !model.is_empty())
            .ok_or_else(missing)?
            .to_owned();
        let messages = body
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(missing)?
            .clone();
        let provider = match body.get("provider") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => return Err(missing()),
            Some(Value::String(name)) if name.is_empty() => return Err(missing()),
            Some(Value::String(name)) => name
                .parse::<Provider>()
                .map_err(|e| UpstreamError::InvalidProvider(e.0))?,
            Some(other) => return Err(UpstreamError::InvalidProvider(other.to_string())),
        };
        let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(true);

        Ok(Self {
            model,
            messages,
            stream,
            provider,
        })
    }
}

/// Outbound client for the two chat backends.
///
/// A backend without configuration is reported per request rather than at
/// startup, so a relay with only Ollama configured still serves Ollama.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    openai_api_key: Option<String>,
    openai_base_url: String,
    ollama_host: Option<String>,
}

impl UpstreamClient {
    pub fn new(
        openai_api_key: Option<String>,
        openai_base_url: impl Into<String>,
        ollama_host: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            openai_api_key,
            openai_base_url: openai_base_url.into(),
            ollama_host,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.ollama_host.clone(),
        )
    }

    /// Forwards `request` to its backend and returns the response to relay.
    pub async fn forward(&self, request: ProxyRequest) -> Result<Response, UpstreamError> {
        info!(
            provider = %request.provider,
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "forwarding chat request"
        );
        match request.provider {
            Provider::OpenAi => self.openai(request).await,
            Provider::Ollama => self.ollama(request).await,
        }
    }

    async fn openai(&self, request: ProxyRequest) -> Result<Response, UpstreamError> {
        let api_key = self
            .openai_api_key
            .as_deref()
            .ok_or(UpstreamError::MissingOpenAiKey)?;
        let url = format!("{}/chat/completions", self.openai_base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&json!({
                "model": request.model,
                "messages": request.messages,
                "stream": true,
            }))
            .send()
            .await
            .map_err(|e| UpstreamError::OpenAi(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = openai_error(status.as_u16(), &request.model, &body);
            warn!(status = status.as_u16(), error = %err, "openai request rejected");
            return Err(err);
        }

        if request.stream {
            return Ok(event_stream(Box::pin(reframe_openai(response.bytes_stream()))));
        }

        let mut assembler = StreamAssembler::for_provider(Provider::OpenAi);
        assembler
            .drain(response.bytes_stream(), |_| {})
            .await
            .map_err(|e| UpstreamError::OpenAi(e.to_string()))?;
        Ok(message_response(assembler.text()))
    }

    async fn ollama(&self, request: ProxyRequest) -> Result<Response, UpstreamError> {
        let host = self
            .ollama_host
            .as_deref()
            .ok_or(UpstreamError::MissingOllamaHost)?;
        let url = format!("{}/api/chat", host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "model": request.model,
                "messages": request.messages,
                "stream": request.stream,
            }))
            .send()
            .await
            .map_err(|e| UpstreamError::OllamaUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let err = UpstreamError::OllamaStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_owned(),
            };
            warn!(error = %err, "ollama request rejected");
            return Err(err);
        }

        if request.stream {
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(io::Error::other));
            return Ok(event_stream(Box::pin(body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::OllamaUnavailable(e.to_string()))?;
        let content = body
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(message_response(content))
    }
}

/// Maps a failed OpenAI response to the error relayed to the client.
fn openai_error(status: u16, model: &str, body: &str) -> UpstreamError {
    let error = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("error").cloned());
    let code = error.as_ref().and_then(|e| e.get("code")).and_then(Value::as_str);

    match (code, status) {
        (Some("invalid_api_key"), _) | (_, 401) => UpstreamError::InvalidApiKey,
        (Some("model_not_found"), _) | (_, 404) => UpstreamError::ModelNotFound(model.to_owned()),
        _ => {
            let message = error
                .as_ref()
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .filter(|message| !message.is_empty())
                .map(str::to_owned)
                .unwrap_or_else(|| format!("OpenAI request failed with status {status}"));
            UpstreamError::OpenAi(message)
        }
    }
}

fn event_stream(body: BodyStream) -> Response {
    Response::new(StatusCode::Ok)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .stream(body)
}

fn message_response(content: &str) -> Response {
    Response::json(
        StatusCode::Ok,
        json!({ "message": { "role": "assistant", "content": content } }),
    )
}

fn delta_event(content: &str) -> Bytes {
    let payload = json!({ "choices": [{ "delta": { "content": content } }] });
    Bytes::from(format!("{DATA_PREFIX}{payload}\n\n"))
}

/// Re-frames an OpenAI event stream as one `data:` event per content
/// fragment, always terminated by `data: [DONE]`.
///
/// Upstream lines without content are dropped. An upstream read error ends
/// the stream with that error and no sentinel.
pub fn reframe_openai<S, B, E>(upstream: S) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
{
    try_stream! {
        let framing = OpenAiFraming;
        let mut lines = LineBuffer::default();
        let mut upstream = Box::pin(upstream);
        let mut done = false;
        let mut fragments = 0usize;

        while !done {
            let Some(chunk) = upstream.next().await else {
                break;
            };
            let chunk = chunk.map_err(io::Error::other)?;
            for line in lines.push(chunk.as_ref()) {
                match framing.parse_line(&line) {
                    Frame::Fragment(content) => {
                        fragments += 1;
                        yield delta_event(&content);
                    }
                    Frame::Done => {
                        done = true;
                        break;
                    }
                    Frame::Skip => {}
                }
            }
        }

        if !done {
            if let Some(Frame::Fragment(content)) = lines.take_rest().map(|rest| framing.parse_line(&rest)) {
                fragments += 1;
                yield delta_event(&content);
            }
        }

        debug!(fragments, "openai stream relayed");
        yield Bytes::from(format!("{DATA_PREFIX}{DONE_SENTINEL}\n\n"));
    }
}
