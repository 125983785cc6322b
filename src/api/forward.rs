use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use super::error::ApiError;
use super::router::AppState;
use crate::rpc::ForwardedRequest;

/// Mutations a follower relays to the leader. Searches and ingress
/// management are served locally; cluster endpoints answer for themselves.
fn is_forwardable(method: &Method, path: &str) -> bool {
    if !matches!(*method, Method::POST | Method::PATCH | Method::DELETE) {
        return false;
    }
    if !path.starts_with("/indexes") {
        return false;
    }
    if path.ends_with("/searches") || path.contains("/ingresses") {
        return false;
    }
    true
}

/// Transparent leader forwarding: when a mutation lands on a follower, the
/// whole request is replayed against the leader's HTTP address and the
/// leader's response is returned verbatim.
pub async fn leader_forward(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(node) = &state.node else {
        return next.run(request).await;
    };

    if !is_forwardable(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    if node.is_leader().await {
        return next.run(request).await;
    }

    let Some(leader_raft_addr) = node.leader_addr().await else {
        return ApiError::cluster_unavailable("no leader elected").into_response();
    };
    let leader_http_addr = state.config.http_addr_for(&leader_raft_addr);

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ApiError::bad_request(
                super::error::ErrorCode::InvalidRequestBody,
                format!("failed to read request body: {}", e),
            )
            .into_response();
        }
    };

    let mut headers = HashMap::new();
    for name in [header::AUTHORIZATION, header::CONTENT_TYPE] {
        if let Some(value) = parts.headers.get(&name).and_then(|v| v.to_str().ok()) {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let forwarded = ForwardedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers,
        body: body.to_vec(),
    };

    match state.rpc.forward_request(&leader_http_addr, &forwarded).await {
        Ok(response) => {
            let status =
                StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut builder = Response::builder().status(status);
            if let Some(content_type) = response.headers.get("content-type") {
                builder = builder.header(header::CONTENT_TYPE, content_type);
            }
            builder
                .body(Body::from(response.body))
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(e) => {
            warn!(leader = %leader_http_addr, error = %e, "forwarding to leader failed");
            ApiError::cluster_unavailable(format!("failed to forward request to leader: {}", e))
                .with_leader(Some(leader_raft_addr))
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutations_on_indexes_are_forwardable() {
        assert!(is_forwardable(&Method::POST, "/indexes"));
        assert!(is_forwardable(&Method::PATCH, "/indexes/books"));
        assert!(is_forwardable(&Method::DELETE, "/indexes/books/documents/9"));
        assert!(is_forwardable(&Method::POST, "/indexes/books/documents"));
    }

    #[test]
    fn test_reads_and_local_endpoints_are_not() {
        assert!(!is_forwardable(&Method::GET, "/indexes"));
        assert!(!is_forwardable(&Method::POST, "/indexes/books/searches"));
        assert!(!is_forwardable(&Method::POST, "/indexes/books/ingresses"));
        assert!(!is_forwardable(&Method::POST, "/cluster/join"));
        assert!(!is_forwardable(&Method::GET, "/health"));
    }
}
