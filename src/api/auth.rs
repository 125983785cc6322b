use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use super::error::ApiError;
use super::router::AppState;

/// Bearer-token authentication. Disabled when no master key is configured;
/// `/health` and `/metrics` stay open so probes and scrapers work without
/// credentials.
pub async fn authorization(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(master_key) = &state.config.master_key else {
        return next.run(request).await;
    };

    let path = request.uri().path();
    if path == "/health" || path == "/metrics" {
        return next.run(request).await;
    }

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match header {
        None => {
            warn!(path = %path, "missing authorization header");
            ApiError::unauthorized("missing authorization header").into_response()
        }
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(token) if token == master_key => next.run(request).await,
            Some(_) => {
                warn!(path = %path, "invalid authorization token");
                ApiError::unauthorized("invalid authorization token").into_response()
            }
            None => {
                warn!(path = %path, "invalid authorization format");
                ApiError::unauthorized("invalid authorization format, expected 'Bearer <token>'")
                    .into_response()
            }
        },
    }
}
