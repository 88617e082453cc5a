use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::AppState;
use crate::context::Context;
use crate::feedback::{FeedbackRecord, RatingRecord};
use crate::llm::{ProxyRequest, UpstreamError};
use crate::{Response, StatusCode};

/// `POST /api/chat`: validate and forward to the selected backend.
pub async fn chat(state: Arc<AppState>, ctx: Context) -> Response {
    let body: Value = match ctx.json() {
        Ok(body) => body,
        Err(e) => return UpstreamError::InvalidBody(e.to_string()).into_response(),
    };
    let request = match ProxyRequest::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "rejected chat request");
            return e.into_response();
        }
    };

    match state.upstream.forward(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(status = e.status().as_u16(), error = %e, "chat request failed upstream");
            e.into_response()
        }
    }
}

/// `POST /api/rate`
pub async fn submit_rating(state: Arc<AppState>, ctx: Context) -> Response {
    let body: Value = match ctx.json() {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "unreadable rating body");
            return Response::error(StatusCode::InternalServerError, e.to_string());
        }
    };
    let record = match RatingRecord::from_submission(&body, ctx.client_ip(), Utc::now()) {
        Ok(record) => record,
        Err(e) => return Response::error(StatusCode::BadRequest, e.to_string()),
    };

    if let Err(e) = state.ratings.append(record.clone()).await {
        error!(error = %e, "failed to store rating");
        return Response::error(StatusCode::InternalServerError, e.to_string());
    }

    info!(
        message_index = record.message_index,
        rating = %record.rating,
        provider = %record.provider,
        ip = %record.ip_address,
        "rating received"
    );
    Response::json(
        StatusCode::Ok,
        json!({ "message": "Rating received successfully", "rating": record }),
    )
}

/// `GET /api/rate`
pub async fn list_ratings(state: Arc<AppState>) -> Response {
    match state.ratings.list_all().await {
        Ok(ratings) => {
            let total = ratings.len();
            Response::json(StatusCode::Ok, json!({ "ratings": ratings, "total": total }))
        }
        Err(e) => {
            error!(error = %e, "failed to list ratings");
            Response::error(StatusCode::InternalServerError, e.to_string())
        }
    }
}

/// `POST /api/feedback`
pub async fn submit_feedback(state: Arc<AppState>, ctx: Context) -> Response {
    let body: Value = match ctx.json() {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "unreadable feedback body");
            return Response::error(StatusCode::InternalServerError, e.to_string());
        }
    };
    let record = match FeedbackRecord::from_submission(&body, ctx.client_ip(), Utc::now()) {
        Ok(record) => record,
        Err(e) => return Response::error(StatusCode::BadRequest, e.to_string()),
    };

    if let Err(e) = state.feedback.append(record.clone()).await {
        error!(error = %e, "failed to store feedback");
        return Response::error(StatusCode::InternalServerError, e.to_string());
    }

    info!(
        rating = %record.rating,
        ip = %record.ip_address,
        has_text = record.feedback_text.is_some(),
        "feedback received"
    );
    Response::json(
        StatusCode::Ok,
        json!({ "message": "Feedback received successfully", "feedback": record }),
    )
}

/// `GET /api/feedback`
pub async fn list_feedback(state: Arc<AppState>) -> Response {
    match state.feedback.list_all().await {
        Ok(feedbacks) => {
            let total = feedbacks.len();
            Response::json(StatusCode::Ok, json!({ "feedbacks": feedbacks, "total": total }))
        }
        Err(e) => {
            error!(error = %e, "failed to list feedback");
            Response::error(StatusCode::InternalServerError, e.to_string())
        }
    }
}
