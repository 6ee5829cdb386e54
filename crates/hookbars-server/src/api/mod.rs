pub mod response;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;

use crate::config::CorsConfig;
use crate::db;
use crate::features::{self, FeatureState};
use crate::middleware;

/// Build the application router with all routes and middleware
pub fn create_router(state: FeatureState, cors: &CorsConfig) -> Router {
    let db = state.db.clone();
    let webhook = features::webhook_router(&state);

    let mut app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .with_state(db)
        .nest("/api/v1", features::router(state));

    if let Some(webhook) = webhook {
        app = app.nest("/webhook", webhook);
    }

    app.layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(cors))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "hookbars",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Health check handler
async fn health(State(db): State<PgPool>) -> Result<Response, StatusCode> {
    match db::health_check(&db).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReceiverConfig;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state(receiver_enabled: bool) -> FeatureState {
        FeatureState {
            db: PgPool::connect_lazy("postgres://hookbars@localhost/hookbars").expect("lazy pool"),
            receiver: Arc::new(ReceiverConfig {
                enabled: receiver_enabled,
                secret: Some("0123456789abcdef".to_string()),
                max_body_bytes: 1024,
                routes: vec!["tradingview".to_string()],
            }),
            materializer_route: "tradingview".to_string(),
            materializer_state: None,
        }
    }

    fn cors() -> CorsConfig {
        CorsConfig { allowed_origins: vec!["http://localhost:3000".to_string()] }
    }

    #[tokio::test]
    async fn test_root() {
        let app = create_router(state(true), &cors());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_webhook_mounted_only_when_enabled() {
        let request = || {
            Request::builder()
                .method("POST")
                .uri("/webhook/tradingview")
                .body(Body::from("{}"))
                .unwrap()
        };

        let enabled = create_router(state(true), &cors()).oneshot(request()).await.unwrap();
        assert_eq!(enabled.status(), StatusCode::UNAUTHORIZED);

        let disabled = create_router(state(false), &cors()).oneshot(request()).await.unwrap();
        assert_eq!(disabled.status(), StatusCode::NOT_FOUND);
    }
}
