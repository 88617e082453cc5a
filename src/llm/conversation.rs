//! Conversation history and the per-send reply lifecycle.

use serde::Serialize;

use super::{ChatMessage, Provider, Role};

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    fn role(self) -> Role {
        match self {
            Self::User => Role::User,
            Self::Assistant => Role::Assistant,
        }
    }
}

/// One utterance in the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationMessage {
    sender: Sender,
    text: String,
    source_provider: Option<Provider>,
    source_model: Option<String>,
}

impl ConversationMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
            source_provider: None,
            source_model: None,
        }
    }

    pub fn assistant(text: impl Into<String>, provider: Provider, model: impl Into<String>) -> Self {
        Self {
            sender: Sender::Assistant,
            text: text.into(),
            source_provider: Some(provider),
            source_model: Some(model.into()),
        }
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The backend that produced an assistant message; `None` for user input.
    pub fn source_provider(&self) -> Option<Provider> {
        self.source_provider
    }

    pub fn source_model(&self) -> Option<&str> {
        self.source_model.as_deref()
    }
}

/// Lifecycle of the assistant reply for one send.
///
/// ```text
/// idle → sending → streaming → completed
///           │          │
///           ├──────────┴─────→ errored
///           └────────────────→ completed   (non-streaming body)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Errored,
}

impl ReplyState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    /// `Streaming → Streaming` is allowed; every fragment re-enters it.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ReplyState::*;
        matches!(
            (self, next),
            (Idle, Sending)
                | (Sending, Streaming | Completed | Errored)
                | (Streaming, Streaming | Completed | Errored)
        )
    }
}

/// Handle to the placeholder assistant message of an in-flight send.
///
/// Only the holder of this handle can change that message, and only until
/// the reply reaches a terminal state.
#[derive(Debug)]
pub struct PendingReply {
    index: usize,
    state: ReplyState,
}

impl PendingReply {
    /// Position of the placeholder in the history.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> ReplyState {
        self.state
    }

    fn advance(&mut self, next: ReplyState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// Ordered, append-only chat history.
///
/// Messages are never removed or reordered. The one exception to
/// immutability is the placeholder reply of the send in progress, which is
/// mutated through its [`PendingReply`].
///
/// # Examples
///
/// ```
/// use relaychat::llm::{Conversation, Provider, ReplyState};
///
/// let mut conversation = Conversation::new();
/// conversation.push_user("hello");
/// let mut reply = conversation.begin_reply(Provider::Ollama, "llama3");
/// conversation.mark_streaming(&mut reply);
/// conversation.update_reply(&reply, "Hi");
/// conversation.finish_reply(&mut reply);
///
/// assert_eq!(reply.state(), ReplyState::Completed);
/// assert_eq!(conversation.last().unwrap().text(), "Hi");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ConversationMessage> {
        self.messages.get(index)
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    /// Appends a user message and returns its index.
    pub fn push_user(&mut self, text: impl Into<String>) -> usize {
        self.messages.push(ConversationMessage::user(text));
        self.messages.len() - 1
    }

    /// Appends an empty assistant placeholder and returns its handle in the
    /// `Sending` state.
    pub fn begin_reply(&mut self, provider: Provider, model: impl Into<String>) -> PendingReply {
        self.messages
            .push(ConversationMessage::assistant(String::new(), provider, model));
        PendingReply {
            index: self.messages.len() - 1,
            state: ReplyState::Sending,
        }
    }

    /// Response headers announced an event stream.
    pub fn mark_streaming(&mut self, reply: &mut PendingReply) -> bool {
        reply.advance(ReplyState::Streaming)
    }

    /// Replaces the placeholder text. Ignored (returns `false`) once the
    /// reply has reached a terminal state.
    pub fn update_reply(&mut self, reply: &PendingReply, text: &str) -> bool {
        if reply.state.is_terminal() {
            return false;
        }
        match self.messages.get_mut(reply.index) {
            Some(message) => {
                message.text.clear();
                message.text.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Freezes the placeholder with its current text.
    pub fn finish_reply(&mut self, reply: &mut PendingReply) -> bool {
        reply.advance(ReplyState::Completed)
    }

    /// Rewrites the placeholder to `Error: <reason>` and freezes it.
    pub fn fail_reply(&mut self, reply: &mut PendingReply, reason: &str) -> bool {
        if reply.state.is_terminal() {
            return false;
        }
        self.update_reply(reply, &format!("Error: {reason}"));
        reply.advance(ReplyState::Errored)
    }

    /// The wire message list: `system_prompt` first, then the whole history.
    ///
    /// Assistant messages with no text yet (an in-flight placeholder) are
    /// left out.
    pub fn chat_messages(&self, system_prompt: &str) -> Vec<ChatMessage> {
        std::iter::once(ChatMessage::new(Role::System, system_prompt))
            .chain(
                self.messages
                    .iter()
                    .filter(|m| !(m.sender == Sender::Assistant && m.text.is_empty()))
                    .map(|m| ChatMessage::new(m.sender.role(), m.text.clone())),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_edges() {
        use ReplyState::*;
        assert!(Idle.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Streaming));
        assert!(Sending.can_transition_to(Completed));
        assert!(Sending.can_transition_to(Errored));
        assert!(Streaming.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Completed));

        assert!(!Idle.can_transition_to(Streaming));
        assert!(!Streaming.can_transition_to(Sending));
        for terminal in [Completed, Errored] {
            assert!(terminal.is_terminal());
            for next in [Idle, Sending, Streaming, Completed, Errored] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn placeholder_is_appended_after_user_message() {
        let mut conversation = Conversation::new();
        assert_eq!(conversation.push_user("hi"), 0);
        let reply = conversation.begin_reply(Provider::OpenAi, "gpt-4o");

        assert_eq!(reply.index(), 1);
        assert_eq!(reply.state(), ReplyState::Sending);
        let placeholder = conversation.get(1).unwrap();
        assert_eq!(placeholder.sender(), Sender::Assistant);
        assert_eq!(placeholder.text(), "");
        assert_eq!(placeholder.source_provider(), Some(Provider::OpenAi));
        assert_eq!(placeholder.source_model(), Some("gpt-4o"));
        assert_eq!(conversation.get(0).unwrap().source_provider(), None);
    }

    #[test]
    fn finished_reply_is_frozen() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        let mut reply = conversation.begin_reply(Provider::Ollama, "llama3");
        assert!(conversation.mark_streaming(&mut reply));
        assert!(conversation.update_reply(&reply, "Hel"));
        assert!(conversation.update_reply(&reply, "Hello"));
        assert!(conversation.finish_reply(&mut reply));

        assert!(!conversation.update_reply(&reply, "changed"));
        assert!(!conversation.fail_reply(&mut reply, "late"));
        assert!(!conversation.mark_streaming(&mut reply));
        assert_eq!(conversation.last().unwrap().text(), "Hello");
        assert_eq!(reply.state(), ReplyState::Completed);
    }

    #[test]
    fn failure_rewrites_text() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        let mut reply = conversation.begin_reply(Provider::Ollama, "llama3");
        conversation.mark_streaming(&mut reply);
        conversation.update_reply(&reply, "partial");
        assert!(conversation.fail_reply(&mut reply, "connection reset"));

        assert_eq!(reply.state(), ReplyState::Errored);
        assert_eq!(conversation.last().unwrap().text(), "Error: connection reset");
        assert!(!conversation.update_reply(&reply, "more"));
    }

    #[test]
    fn earlier_messages_are_untouched() {
        let mut conversation = Conversation::new();
        conversation.push_user("one");
        let mut first = conversation.begin_reply(Provider::Ollama, "llama3");
        conversation.update_reply(&first, "reply one");
        conversation.finish_reply(&mut first);

        conversation.push_user("two");
        let mut second = conversation.begin_reply(Provider::Ollama, "llama3");
        conversation.update_reply(&second, "reply two");
        conversation.fail_reply(&mut second, "boom");

        let texts: Vec<_> = conversation.messages().iter().map(|m| m.text()).collect();
        assert_eq!(texts, ["one", "reply one", "two", "Error: boom"]);
    }

    #[test]
    fn chat_messages_prepend_system_and_skip_placeholder() {
        let mut conversation = Conversation::new();
        conversation.push_user("first");
        let mut reply = conversation.begin_reply(Provider::Ollama, "llama3");
        conversation.update_reply(&reply, "answer");
        conversation.finish_reply(&mut reply);
        conversation.push_user("second");
        conversation.begin_reply(Provider::Ollama, "llama3");

        let messages = conversation.chat_messages("be brief");
        assert_eq!(
            messages,
            vec![
                ChatMessage::new(Role::System, "be brief"),
                ChatMessage::new(Role::User, "first"),
                ChatMessage::new(Role::Assistant, "answer"),
                ChatMessage::new(Role::User, "second"),
            ]
        );
    }
}
