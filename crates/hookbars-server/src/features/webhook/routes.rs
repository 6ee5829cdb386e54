//! Webhook receiver
//!
//! Appends each authenticated delivery to the raw event log. Nothing is
//! parsed beyond JSON here; bars are produced later by the materializer.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::{presented_token, token_matches};
use crate::api::response::ApiResponse;
use crate::config::ReceiverConfig;
use crate::db;
use crate::error::{ApiResult, AppError};

#[derive(Clone)]
pub struct WebhookState {
    pub db: sqlx::PgPool,
    pub receiver: Arc<ReceiverConfig>,
}

#[derive(Debug, Deserialize)]
pub struct TokenParams {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub id: i64,
    pub route: String,
    pub received_at: DateTime<Utc>,
}

/// Create webhook routes
pub fn webhook_routes(state: WebhookState) -> Router {
    let limit = state.receiver.max_body_bytes;
    Router::new()
        .route("/:route", post(receive))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// Accept one delivery
///
/// POST /webhook/:route?token=...
async fn receive(
    State(state): State<WebhookState>,
    Path(route): Path<String>,
    Query(params): Query<TokenParams>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Response> {
    let Some(secret) = state.receiver.secret.as_deref() else {
        return Err(AppError::Unavailable("Webhook secret is not configured".to_string()));
    };
    let authorized = presented_token(&headers, params.token.as_deref())
        .is_some_and(|token| token_matches(secret, token));
    if !authorized {
        tracing::warn!(%route, "Rejected webhook with missing or invalid token");
        return Err(AppError::Unauthorized("Invalid webhook token".to_string()));
    }

    // Only authenticated callers learn which routes exist
    if !state.receiver.routes.iter().any(|r| *r == route) {
        return Err(AppError::NotFound(format!("Unknown webhook route: {}", route)));
    }

    let body = body.map_err(|rejection| match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge {
            limit: state.receiver.max_body_bytes,
        },
        _ => AppError::BadRequest(rejection.body_text()),
    })?;

    let payload = parse_payload(&body)?;
    let event = db::raw_events::append(&state.db, &route, &payload).await?;

    tracing::info!(id = event.id, %route, bytes = body.len(), "Webhook accepted");

    Ok(ApiResponse::success(Accepted {
        id: event.id,
        route: event.route,
        received_at: event.received_at,
    })
    .with_status(StatusCode::ACCEPTED)
    .into_response())
}

/// JSON bodies are stored as-is, anything else as `{"raw": "<text>"}`
pub fn parse_payload(body: &[u8]) -> ApiResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::BadRequest("Empty request body".to_string()));
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(value) => Ok(value),
        Err(_) => Ok(json!({ "raw": String::from_utf8_lossy(body) })),
    }
}
