//! Shared-secret header check for every non-public route.

use super::error::ApiError;
use super::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

pub const AUTH_HEADER: &str = "x-auth-token";

pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok());

    if token_matches(&state.auth_token, presented) {
        Ok(next.run(request).await)
    } else {
        warn!(path = %request.uri().path(), "rejected request with bad or missing token");
        Err(ApiError::Unauthorized)
    }
}

/// An empty configured token rejects everything.
fn token_matches(expected: &str, presented: Option<&str>) -> bool {
    let Some(presented) = presented else {
        return false;
    };
    if expected.is_empty() || presented.len() != expected.len() {
        return false;
    }
    presented
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
