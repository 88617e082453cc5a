//! Sends one user turn to the relay and fills in the assistant reply.

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, warn};

use super::assembler::StreamAssembler;
use super::conversation::{Conversation, PendingReply, ReplyState};
use super::format::format_input;
use super::{ChatError, ChatRequest, Provider};
use crate::config::ClientConfig;

/// System instruction used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer clearly and concisely, \
     and format code with fenced markdown blocks that name the language.";

/// Prefix of the text a failed reply is rewritten to.
pub const ERROR_PREFIX: &str = "Error: ";

const EVENT_STREAM: &str = "text/event-stream";

/// How a send ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    /// `Completed` or `Errored`.
    pub state: ReplyState,
    /// The frozen assistant text.
    pub text: String,
}

/// Drives request/response cycles against the relay's chat endpoint.
///
/// `send` borrows the conversation mutably for the whole cycle, so a
/// conversation has at most one send in flight.
///
/// # Examples
///
/// ```rust,no_run
/// use relaychat::llm::{ChatDispatcher, Conversation, Provider};
///
/// # async fn demo() {
/// let dispatcher = ChatDispatcher::new("http://127.0.0.1:3000/api/chat", "Be brief.");
/// let mut conversation = Conversation::new();
/// let outcome = dispatcher
///     .send(&mut conversation, "hello", Provider::Ollama, "llama3", |c| {
///         println!("{}", c.last().map(|m| m.text()).unwrap_or_default());
///     })
///     .await;
/// # let _ = outcome;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChatDispatcher {
    client: reqwest::Client,
    endpoint: String,
    system_prompt: String,
}

impl ChatDispatcher {
    pub fn new(endpoint: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, system_prompt)
    }

    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            system_prompt: system_prompt.into(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.endpoint.clone(), config.system_prompt.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The streaming request body for the current history.
    pub fn build_request(
        &self,
        conversation: &Conversation,
        provider: Provider,
        model: &str,
    ) -> ChatRequest {
        ChatRequest {
            model: model.to_owned(),
            messages: conversation.chat_messages(&self.system_prompt),
            stream: true,
            provider,
        }
    }

    /// Appends `input` and a placeholder reply to `conversation`, posts the
    /// history, and writes the reply into the placeholder as it arrives.
    ///
    /// `publish` sees the conversation after the user message is appended,
    /// after the placeholder is appended, after every streamed fragment, and
    /// once more when the reply is final.
    ///
    /// Whitespace-only input is ignored and `None` returned without touching
    /// the history. Failures never escape: they end the reply as
    /// `Error: <reason>`.
    pub async fn send<F>(
        &self,
        conversation: &mut Conversation,
        input: &str,
        provider: Provider,
        model: &str,
        mut publish: F,
    ) -> Option<ReplyOutcome>
    where
        F: FnMut(&Conversation),
    {
        if input.trim().is_empty() {
            return None;
        }

        conversation.push_user(format_input(input));
        publish(conversation);

        let request = self.build_request(conversation, provider, model);
        let mut reply = conversation.begin_reply(provider, model);
        publish(conversation);

        debug!(
            endpoint = %self.endpoint,
            %provider,
            model,
            messages = request.messages.len(),
            "sending chat request"
        );

        if let Err(e) = self
            .exchange(conversation, &mut reply, &request, &mut publish)
            .await
        {
            warn!(%provider, model, error = %e, "chat request failed");
            conversation.fail_reply(&mut reply, &e.reason());
        }
        publish(conversation);

        let text = conversation
            .get(reply.index())
            .map(|message| message.text().to_owned())
            .unwrap_or_default();
        Some(ReplyOutcome {
            state: reply.state(),
            text,
        })
    }

    async fn exchange(
        &self,
        conversation: &mut Conversation,
        reply: &mut PendingReply,
        request: &ChatRequest,
        publish: &mut dyn FnMut(&Conversation),
    ) -> Result<(), ChatError> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::from_status(status.as_u16(), &body));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        if content_type.is_some_and(|ct| !ct.contains(EVENT_STREAM)) {
            let body: Value = serde_json::from_slice(&response.bytes().await?)?;
            match body
                .pointer("/message/content")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
            {
                Some(text) => {
                    conversation.update_reply(reply, text);
                }
                None => debug!("non-streaming reply carried no message content"),
            }
            conversation.finish_reply(reply);
            return Ok(());
        }

        conversation.mark_streaming(reply);
        let mut assembler = StreamAssembler::for_provider(request.provider);
        let pending: &PendingReply = reply;
        let text = assembler
            .drain(response.bytes_stream(), |text| {
                conversation.update_reply(pending, text);
                publish(conversation);
            })
            .await?;

        conversation.update_reply(reply, &text);
        conversation.finish_reply(reply);
        Ok(())
    }
}
