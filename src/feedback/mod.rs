//! Message ratings and free-text feedback.
//!
//! The server validates submissions into [`RatingRecord`] and
//! [`FeedbackRecord`] and keeps them in a [`RecordStore`]; the client side
//! tracks per-message selections with [`FeedbackTracker`] and posts them with
//! [`FeedbackClient`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::llm::Provider;

pub mod client;
pub mod store;
pub mod tracker;

pub use client::FeedbackClient;
pub use store::{JsonLinesStore, MemoryStore, RecordStore, StoreError};
pub use tracker::{FeedbackPrompt, FeedbackTracker};

/// A thumbs rating on one assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rating {
    #[serde(rename = "thumbs-up")]
    ThumbsUp,
    #[serde(rename = "thumbs-down")]
    ThumbsDown,
}

impl Rating {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ThumbsUp => "thumbs-up",
            Self::ThumbsDown => "thumbs-down",
        }
    }

    /// What a sent feedback form is acknowledged with.
    pub fn confirmation(self) -> &'static str {
        match self {
            Self::ThumbsUp => "Feedback Sent!",
            Self::ThumbsDown => "Report Sent!",
        }
    }

    /// Shown when feedback for the message was already sent.
    pub fn already_sent(self) -> &'static str {
        match self {
            Self::ThumbsUp => "Feedback already sent, Thanks",
            Self::ThumbsDown => "Issue report already sent, Thanks",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rating {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thumbs-up" => Ok(Self::ThumbsUp),
            "thumbs-down" => Ok(Self::ThumbsDown),
            _ => Err(ValidationError::Rating),
        }
    }
}

/// A rejected submission. The message is the response body's `error` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid rating data")]
    Rating,
    #[error("Invalid feedback data")]
    Feedback,
}

/// Body of `POST /api/rate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RatingSubmission {
    pub message_index: i64,
    pub rating: Rating,
    pub provider: Provider,
}

/// Body of `POST /api/feedback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSubmission {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub rating: Rating,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<String>,
}

/// A stored rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub message_index: i64,
    pub rating: Rating,
    pub provider: Provider,
    #[serde(rename = "ipAddress")]
    pub ip_address: String,
    pub timestamp: DateTime<Utc>,
}

impl RatingRecord {
    /// Validates a decoded `POST /api/rate` body.
    ///
    /// `message_index` must be an integer (a float with no fractional part
    /// counts), and `rating` and `provider` must be known names.
    pub fn from_submission(
        body: &Value,
        ip_address: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let message_index = body
            .get("message_index")
            .and_then(integer)
            .ok_or(ValidationError::Rating)?;
        let rating = body
            .get("rating")
            .and_then(Value::as_str)
            .ok_or(ValidationError::Rating)?
            .parse::<Rating>()?;
        let provider = body
            .get("provider")
            .and_then(Value::as_str)
            .and_then(|name| name.parse::<Provider>().ok())
            .ok_or(ValidationError::Rating)?;

        Ok(Self {
            message_index,
            rating,
            provider,
            ip_address: ip_address.into(),
            timestamp,
        })
    }
}

/// Stored free-text feedback. Empty optional fields are kept as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub message: String,
    pub question: Option<String>,
    pub rating: Rating,
    pub feedback_text: Option<String>,
    pub operating_system: Option<String>,
    pub ip_address: String,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackRecord {
    /// Validates a decoded `POST /api/feedback` body.
    pub fn from_submission(
        body: &Value,
        ip_address: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let message = non_empty(body.get("message")).ok_or(ValidationError::Feedback)?;
        let rating = body
            .get("rating")
            .and_then(Value::as_str)
            .and_then(|rating| rating.parse::<Rating>().ok())
            .ok_or(ValidationError::Feedback)?;

        Ok(Self {
            message,
            question: non_empty(body.get("question")),
            rating,
            feedback_text: non_empty(body.get("feedbackText")),
            operating_system: non_empty(body.get("operatingSystem")),
            ip_address: ip_address.into(),
            timestamp,
        })
    }
}

fn integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}
