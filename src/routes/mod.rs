use axum::{
    extract::State,
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    middleware::{make_span_with_request_id, request_id_middleware, request_id::REQUEST_ID_HEADER},
    services::{governor::ScopePolicy, pipeline::RecommendationPipeline},
};

pub mod admin;
pub mod movies;
pub mod recommendations;
pub mod status;

/// Shared application state
pub struct AppState {
    pub pipeline: RecommendationPipeline,
    pub scope_policy: ScopePolicy,
    /// Read the caller address from `X-Forwarded-For` instead of the socket
    pub trust_forwarded_for: bool,
    /// Unset disables the admin endpoint
    pub admin_token: Option<String>,
    pub cors_origins: Vec<String>,
}

/// Creates the application router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(cors)
        .layer(middleware::from_fn(request_id_middleware))
}

/// API routes under /api
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/recommend/mood", post(recommendations::recommend_mood))
        .route("/recommend/search", post(recommendations::recommend_search))
        .route("/movie/:id", get(movies::movie_details))
        .route("/movies/popular", get(movies::popular_movies))
        .route("/status", get(status::status))
        .route("/admin/emergency-stop", post(admin::emergency_stop))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static(admin::ADMIN_TOKEN_HEADER),
        ])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
}

/// Health check endpoint
///
/// 200 when every collaborator answers, 503 with the failing ones marked otherwise.
async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let health = state.pipeline.health().await;
    let label = |healthy: bool| if healthy { "healthy" } else { "unhealthy" };

    let (code, status) = if health.all_healthy() {
        (StatusCode::OK, "healthy")
    } else {
        tracing::warn!(?health, "Health check degraded");
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(json!({
            "status": status,
            "services": {
                "catalog": label(health.catalog),
                "analyzer": label(health.analyzer),
                "store": label(health.store),
            },
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": Utc::now(),
        })),
    )
}
