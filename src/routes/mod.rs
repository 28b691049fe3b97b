//! HTTP routes

pub mod auth;
pub mod health;
pub mod upload;

use axum::{extract::DefaultBodyLimit, http::HeaderValue, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let server = &state.config().server;
    let body_limit = usize::try_from(server.max_upload_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health::health_check))
        .merge(upload::router())
        .merge(auth::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(server.cors_origin.as_deref()))
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(_)) => {
            tracing::warn!("Invalid CORS_ALLOWED_ORIGIN, allowing any origin");
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPublisher;
    use crate::state::test_support::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let temp_dir = TempDir::new().unwrap();
        let state = test_state(Arc::new(MockPublisher::succeeding("id")), temp_dir.path(), None);

        let response = app(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
    }
}
