//! Bar routes
//!
//! Read-only export of materialized bars.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;

use super::queries::{list_bars::handle as handle_list_bars, ListBarsQuery};
use crate::api::response::ErrorResponse;

/// Create bar routes
pub fn bars_routes() -> Router<PgPool> {
    Router::new().route("/", get(list_bars))
}

/// List bars
///
/// GET /bars?symbol=BTCUSD&tf_sec=60&limit=100&before=1234&before_index=3
async fn list_bars(
    State(db): State<PgPool>,
    Query(query): Query<ListBarsQuery>,
) -> Result<Response, StatusCode> {
    if let Err(message) = query.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("VALIDATION_ERROR", message)),
        )
            .into_response());
    }

    match handle_list_bars(db, query).await {
        Ok(response) => Ok((StatusCode::OK, Json(json!(response))).into_response()),
        Err(e) => {
            tracing::error!("Failed to list bars: {:?}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_invalid_timeframe_is_rejected_before_query() {
        let db = PgPool::connect_lazy("postgres://hookbars@localhost/hookbars").expect("lazy pool");
        let app = bars_routes().with_state(db);

        let response = app
            .oneshot(Request::builder().uri("/?tf_sec=0").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
