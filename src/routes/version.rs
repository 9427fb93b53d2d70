use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::app_state::AppState;
use crate::error::ApiError;

pub const APP_VERSION_HEADER: &str = "app-version";

/// Reject clients older than `MIN_CLIENT_VERSION` with 426.
/// A missing header counts as version 0.0.0.
pub async fn require_client_version(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .headers()
        .get(APP_VERSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("0.0.0");

    if parse_version(client) < parse_version(&state.config.min_client_version) {
        tracing::debug!(client_version = client, "Rejecting outdated client");
        return ApiError::UpgradeRequired.into_response();
    }

    next.run(request).await
}

/// `major.minor.patch`, missing or unparseable parts count as zero.
fn parse_version(version: &str) -> (u64, u64, u64) {
    let mut parts = version
        .trim()
        .split('.')
        .map(|part| part.parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}
