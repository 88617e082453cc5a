//! # relaychat
//!
//! A streaming chat client and relay for OpenAI and Ollama backends.
//!
//! The relay (`relaychat-server`) is an async HTTP/1.1 server that forwards
//! `/api/chat` to the selected backend and records message ratings and
//! feedback. The client side sends a conversation through the relay and
//! assembles the streamed reply fragment by fragment.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relaychat::llm::{ChatDispatcher, Conversation, Provider};
//!
//! #[tokio::main]
//! async fn main() {
//!     let dispatcher = ChatDispatcher::new("http://127.0.0.1:3000/api/chat", "Be brief.");
//!     let mut conversation = Conversation::new();
//!     let outcome = dispatcher
//!         .send(&mut conversation, "Why is the sky blue?", Provider::Ollama, "llama3", |_| {})
//!         .await;
//!     if let Some(outcome) = outcome {
//!         println!("{}", outcome.text);
//!     }
//! }
//! ```

// ── HTTP core ─────────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

// ── Chat, proxy and feedback ──────────────────────────────────────────────────
pub mod api;
pub mod config;
pub mod feedback;
pub mod llm;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
