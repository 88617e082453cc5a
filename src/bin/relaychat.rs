use std::io::Write;

use clap::Parser;
use relaychat::config::{ClientConfig, parse_provider};
use relaychat::feedback::{
    FeedbackClient, FeedbackPrompt, FeedbackSubmission, FeedbackTracker, Rating, RatingSubmission,
};
use relaychat::llm::format::preprocess_markdown;
use relaychat::llm::{ChatDispatcher, Conversation, Provider, ReplyState, Sender};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Terminal chat through a relaychat server.
///
/// Settings default to the RELAYCHAT_ENDPOINT, CHATBOT_MODEL_NAME,
/// RELAYCHAT_PROVIDER and RELAYCHAT_SYSTEM_PROMPT environment variables.
#[derive(Parser)]
#[command(name = "relaychat", version)]
struct Cli {
    /// Chat endpoint of the relay
    #[arg(long)]
    endpoint: Option<String>,

    /// Model name sent with each request
    #[arg(short, long)]
    model: Option<String>,

    /// Backend to route to: openai or ollama
    #[arg(short, long)]
    provider: Option<String>,

    /// System instruction prepended to every request
    #[arg(long)]
    system_prompt: Option<String>,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

const HELP: &str = "\
commands:
  /provider openai|ollama   switch backend
  /model <name>             switch model
  /up <n>, /down <n>        rate message n (again to clear)
  /feedback <n> <text>      send feedback on a rated message
  /history                  show the conversation
  /quit                     exit";

/// Prints the growing reply, writing only what was appended since the last
/// publish. Once stdout fails the printer goes quiet and the failure is
/// logged once.
#[derive(Default)]
struct StreamPrinter {
    index: Option<usize>,
    shown: String,
    broken: bool,
}

impl StreamPrinter {
    fn publish(&mut self, conversation: &Conversation) {
        self.publish_to(&mut std::io::stdout().lock(), conversation);
    }

    fn publish_to(&mut self, out: &mut impl Write, conversation: &Conversation) {
        if self.broken {
            return;
        }
        if let Err(e) = self.write(out, conversation) {
            warn!(error = %e, "stdout closed, reply output stopped");
            self.broken = true;
        }
    }

    fn write(&mut self, out: &mut impl Write, conversation: &Conversation) -> std::io::Result<()> {
        let Some(message) = conversation.last() else {
            return Ok(());
        };
        if message.sender() != Sender::Assistant {
            return Ok(());
        }
        let index = conversation.len() - 1;

        if self.index != Some(index) {
            self.index = Some(index);
            self.shown.clear();
            write!(out, "assistant> ")?;
        }
        let text = message.text();
        match text.strip_prefix(self.shown.as_str()) {
            Some(suffix) => write!(out, "{suffix}")?,
            None => write!(out, "\n{text}")?,
        }
        out.flush()?;
        self.shown.clear();
        self.shown.push_str(text);
        Ok(())
    }
}

struct Session {
    dispatcher: ChatDispatcher,
    feedback: FeedbackClient,
    tracker: FeedbackTracker,
    conversation: Conversation,
    provider: Provider,
    model: String,
}

impl Session {
    fn new(config: ClientConfig) -> Self {
        Self {
            dispatcher: ChatDispatcher::from_config(&config),
            feedback: FeedbackClient::new(&config.endpoint),
            tracker: FeedbackTracker::new(),
            conversation: Conversation::new(),
            provider: config.provider,
            model: config.model,
        }
    }

    async fn chat(&mut self, input: &str) {
        let mut printer = StreamPrinter::default();
        let outcome = self
            .dispatcher
            .send(&mut self.conversation, input, self.provider, &self.model, |c| {
                printer.publish(c)
            })
            .await;
        if let Some(outcome) = outcome {
            println!();
            if outcome.state == ReplyState::Errored {
                tracing::debug!(text = %outcome.text, "reply failed");
            }
        }
    }

    fn history(&self) {
        for (index, message) in self.conversation.messages().iter().enumerate() {
            match message.sender() {
                Sender::User => println!("[{index}] you: {}", message.text()),
                Sender::Assistant => {
                    let source = match (message.source_provider(), message.source_model()) {
                        (Some(provider), Some(model)) => format!(" ({provider}/{model})"),
                        _ => String::new(),
                    };
                    let rating = self
                        .tracker
                        .selected(index)
                        .map(|r| format!(" [{r}]"))
                        .unwrap_or_default();
                    println!(
                        "[{index}] assistant{source}{rating}: {}",
                        preprocess_markdown(&message.text().replace("\\n", "\n"))
                    );
                }
            }
        }
    }

    fn assistant_index(&self, arg: &str) -> Option<usize> {
        let index = arg.parse::<usize>().ok()?;
        let message = self.conversation.get(index)?;
        (message.sender() == Sender::Assistant).then_some(index)
    }

    async fn rate(&mut self, arg: &str, rating: Rating) {
        let Some(index) = self.assistant_index(arg) else {
            println!("no assistant message at {arg:?}");
            return;
        };
        if self.tracker.is_submitted(index) {
            println!("feedback for message {index} was already sent");
            return;
        }
        let Some(selected) = self.tracker.select(index, rating) else {
            println!("rating cleared for message {index}");
            return;
        };

        let provider = self
            .conversation
            .get(index)
            .and_then(|m| m.source_provider())
            .unwrap_or(self.provider);
        let submission = RatingSubmission {
            message_index: index as i64,
            rating: selected,
            provider,
        };
        match self.feedback.rate(&submission).await {
            Ok(_) => println!("rated message {index} {selected}"),
            Err(e) => println!("Error: {}", e.reason()),
        }
    }

    async fn send_feedback(&mut self, args: &str) {
        let (arg, text) = args.split_once(' ').unwrap_or((args, ""));
        let Some(index) = self.assistant_index(arg) else {
            println!("no assistant message at {arg:?}");
            return;
        };

        let rating = match self.tracker.prompt(index) {
            FeedbackPrompt::AlreadySent(rating) => {
                println!("{}", rating.unwrap_or(Rating::ThumbsUp).already_sent());
                return;
            }
            FeedbackPrompt::NoRatingSelected => {
                println!("rate the message with /up {index} or /down {index} first");
                return;
            }
            FeedbackPrompt::Ready(rating) => rating,
        };

        let message = self
            .conversation
            .get(index)
            .map(|m| m.text().to_owned())
            .unwrap_or_default();
        let question = index
            .checked_sub(1)
            .and_then(|i| self.conversation.get(i))
            .filter(|m| m.sender() == Sender::User)
            .map(|m| m.text().to_owned());
        let text = text.trim();
        let submission = FeedbackSubmission {
            message,
            question,
            rating,
            feedback_text: (!text.is_empty()).then(|| text.to_owned()),
            operating_system: Some(std::env::consts::OS.to_owned()),
        };

        match self.feedback.send_feedback(&submission).await {
            Ok(_) => {
                self.tracker.mark_submitted(index);
                println!("{}", rating.confirmation());
            }
            Err(e) => println!("Error: {}", e.reason()),
        }
    }

    /// Handles one input line; returns `false` when the session should end.
    async fn handle_line(&mut self, line: &str) -> bool {
        let Some(command) = line.trim_start().strip_prefix('/') else {
            self.chat(line).await;
            return true;
        };
        let (name, args) = command.split_once(' ').unwrap_or((command, ""));
        let args = args.trim();

        match name {
            "quit" | "exit" => return false,
            "help" => println!("{HELP}"),
            "history" => self.history(),
            "provider" => match parse_provider("/provider", args) {
                Ok(provider) => {
                    self.provider = provider;
                    println!("provider: {provider}");
                }
                Err(e) => println!("{e}"),
            },
            "model" if !args.is_empty() => {
                self.model = args.to_owned();
                println!("model: {}", self.model);
            }
            "model" => println!("model: {}", self.model),
            "up" => self.rate(args, Rating::ThumbsUp).await,
            "down" => self.rate(args, Rating::ThumbsDown).await,
            "feedback" => self.send_feedback(args).await,
            _ => println!("unknown command /{name}\n{HELP}"),
        }
        true
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut config = ClientConfig::from_env()?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(provider) = cli.provider {
        config.provider = parse_provider("--provider", &provider)?;
    }
    if let Some(prompt) = cli.system_prompt {
        config.system_prompt = prompt;
    }
    let config = config.validated()?;

    println!(
        "relaychat → {} ({}/{}). /help for commands.",
        config.endpoint, config.provider, config.model
    );

    let mut session = Session::new(config);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if !session.handle_line(&line).await {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedPipe {
        attempts: usize,
    }

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            self.attempts += 1;
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn streaming(text: &str) -> Conversation {
        let mut conversation = Conversation::new();
        conversation.push_user("hi".to_owned());
        let reply = conversation.begin_reply(Provider::Ollama, "llama3");
        conversation.update_reply(&reply, text);
        conversation
    }

    #[test]
    fn prints_only_appended_text() {
        let mut printer = StreamPrinter::default();
        let mut out = Vec::new();
        printer.publish_to(&mut out, &streaming("Hel"));
        printer.publish_to(&mut out, &streaming("Hello"));
        assert_eq!(String::from_utf8(out).unwrap(), "assistant> Hello");
    }

    #[test]
    fn stops_writing_after_stdout_fails() {
        let mut printer = StreamPrinter::default();
        let mut out = ClosedPipe { attempts: 0 };
        printer.publish_to(&mut out, &streaming("Hel"));
        assert!(printer.broken);
        let attempts = out.attempts;
        printer.publish_to(&mut out, &streaming("Hello"));
        assert_eq!(out.attempts, attempts);
    }
}
