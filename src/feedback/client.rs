//! Posts ratings and feedback to the relay.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{FeedbackRecord, FeedbackSubmission, RatingRecord, RatingSubmission};
use crate::llm::ChatError;

/// Client for `/api/rate` and `/api/feedback`.
///
/// Both URLs are derived from the chat endpoint by replacing its last path
/// segment, so `http://host/api/chat` yields `http://host/api/rate`.
#[derive(Debug, Clone)]
pub struct FeedbackClient {
    client: reqwest::Client,
    rate_url: String,
    feedback_url: String,
}

impl FeedbackClient {
    pub fn new(chat_endpoint: &str) -> Self {
        Self::with_client(reqwest::Client::new(), chat_endpoint)
    }

    pub fn with_client(client: reqwest::Client, chat_endpoint: &str) -> Self {
        Self {
            client,
            rate_url: sibling(chat_endpoint, "rate"),
            feedback_url: sibling(chat_endpoint, "feedback"),
        }
    }

    pub fn rate_url(&self) -> &str {
        &self.rate_url
    }

    pub fn feedback_url(&self) -> &str {
        &self.feedback_url
    }

    /// Sends a rating and returns the record the relay stored.
    pub async fn rate(&self, submission: &RatingSubmission) -> Result<RatingRecord, ChatError> {
        self.post(&self.rate_url, submission, "rating").await
    }

    /// Sends feedback and returns the record the relay stored.
    pub async fn send_feedback(
        &self,
        submission: &FeedbackSubmission,
    ) -> Result<FeedbackRecord, ChatError> {
        self.post(&self.feedback_url, submission, "feedback").await
    }

    async fn post<B, T>(&self, url: &str, body: &B, field: &str) -> Result<T, ChatError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(url, "posting feedback");
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::from_status(status.as_u16(), &text));
        }

        let mut value: Value = serde_json::from_str(&text)?;
        let record = value.get_mut(field).map(Value::take).unwrap_or(Value::Null);
        Ok(serde_json::from_value(record)?)
    }
}

fn sibling(endpoint: &str, name: &str) -> String {
    match endpoint.trim_end_matches('/').rsplit_once('/') {
        Some((base, _)) if base.contains("://") && !base.ends_with('/') => format!("{base}/{name}"),
        _ => format!("{}/{name}", endpoint.trim_end_matches('/')),
    }
}
