use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::json;

use crate::app_state::AppState;

pub mod accounts;
pub mod extract;
pub mod health;
pub mod metrics;
pub mod transcriptions;
pub mod version;

/// API routes without the process-level layers added by the binary.
pub fn router(state: AppState) -> Router {
    let versioned = Router::new()
        .route("/api/v1/register", post(accounts::register))
        .route("/api/v1/login", post(accounts::login))
        .route("/api/v1/user", get(accounts::profile))
        .route("/api/v1/transcriptions", post(transcriptions::upload))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            version::require_client_version,
        ));

    Router::new()
        .route("/", get(|| async { Json(json!({ "status": 200 })) }))
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/transcriptions/{job_id}",
            get(transcriptions::status),
        )
        .merge(versioned)
        .layer(DefaultBodyLimit::max(state.config.max_request_bytes()))
        .with_state(state)
}
