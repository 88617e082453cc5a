//! The relay's HTTP API: route table and shared handler state.
//!
//! | Method | Path            | Handler                           |
//! |--------|-----------------|-----------------------------------|
//! | POST   | `/api/chat`     | [`handlers::chat`]                |
//! | POST   | `/api/rate`     | [`handlers::submit_rating`]       |
//! | GET    | `/api/rate`     | [`handlers::list_ratings`]        |
//! | POST   | `/api/feedback` | [`handlers::submit_feedback`]     |
//! | GET    | `/api/feedback` | [`handlers::list_feedback`]       |

use std::sync::Arc;

use tracing::info;

use crate::config::ServerConfig;
use crate::context::Context;
use crate::feedback::{FeedbackRecord, JsonLinesStore, MemoryStore, RatingRecord, RecordStore, StoreError};
use crate::llm::UpstreamClient;
use crate::middleware::{LoggerMiddleware, Pipeline};
use crate::router::Router;

pub mod handlers;

pub const CHAT_PATH: &str = "/api/chat";
pub const RATE_PATH: &str = "/api/rate";
pub const FEEDBACK_PATH: &str = "/api/feedback";

const RATINGS_FILE: &str = "ratings.jsonl";
const FEEDBACK_FILE: &str = "feedback.jsonl";

/// State shared by every handler.
pub struct AppState {
    pub upstream: UpstreamClient,
    pub ratings: Arc<dyn RecordStore<RatingRecord>>,
    pub feedback: Arc<dyn RecordStore<FeedbackRecord>>,
}

impl AppState {
    pub fn new(
        upstream: UpstreamClient,
        ratings: Arc<dyn RecordStore<RatingRecord>>,
        feedback: Arc<dyn RecordStore<FeedbackRecord>>,
    ) -> Self {
        Self {
            upstream,
            ratings,
            feedback,
        }
    }

    /// Records live only as long as the process.
    pub fn in_memory(upstream: UpstreamClient) -> Self {
        Self::new(
            upstream,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
        )
    }

    /// Uses JSON-lines files under the configured data directory, or memory
    /// when none is set.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, StoreError> {
        let upstream = UpstreamClient::from_config(config);
        let Some(dir) = &config.data_dir else {
            info!("no data directory configured; ratings and feedback are kept in memory");
            return Ok(Self::in_memory(upstream));
        };

        let ratings = JsonLinesStore::open(dir.join(RATINGS_FILE)).await?;
        let feedback = JsonLinesStore::open(dir.join(FEEDBACK_FILE)).await?;
        info!(dir = %dir.display(), "storing ratings and feedback as json lines");
        Ok(Self::new(upstream, Arc::new(ratings), Arc::new(feedback)))
    }
}

/// Builds the route table.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new();

    let s = Arc::clone(&state);
    router.post(CHAT_PATH, move |ctx: Context| handlers::chat(Arc::clone(&s), ctx));

    let s = Arc::clone(&state);
    router.post(RATE_PATH, move |ctx: Context| handlers::submit_rating(Arc::clone(&s), ctx));
    let s = Arc::clone(&state);
    router.get(RATE_PATH, move |_ctx: Context| handlers::list_ratings(Arc::clone(&s)));

    let s = Arc::clone(&state);
    router.post(FEEDBACK_PATH, move |ctx: Context| handlers::submit_feedback(Arc::clone(&s), ctx));
    router.get(FEEDBACK_PATH, move |_ctx: Context| handlers::list_feedback(Arc::clone(&state)));

    router
}

/// The route table behind request logging; what `relaychat-server` serves.
pub fn pipeline(state: Arc<AppState>) -> Pipeline {
    Pipeline::new(router(state)).with(LoggerMiddleware)
}
