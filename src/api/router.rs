use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{auth, forward, handlers, ingresses};
use crate::config::Config;
use crate::consensus::BrightNode;
use crate::ingress::IngressManager;
use crate::metrics::BrightMetrics;
use crate::rpc::RpcClient;
use crate::store::IndexStore;

/// Application state shared across all handlers
pub struct AppState {
    pub store: Arc<IndexStore>,
    pub node: Option<Arc<BrightNode>>,
    pub config: Arc<Config>,
    pub rpc: Arc<RpcClient>,
    pub ingresses: Arc<IngressManager>,
    pub metrics: Arc<BrightMetrics>,
    pub started_at: Instant,
}

async fn track_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let response = next.run(request).await;
    state
        .metrics
        .http_requests
        .with_label_values(&[method.as_str(), response.status().as_str()])
        .inc();
    response
}

/// Create the HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Index management
        .route(
            "/indexes",
            get(handlers::list_indexes).post(handlers::create_index),
        )
        .route(
            "/indexes/:id",
            get(handlers::get_index)
                .patch(handlers::update_index)
                .delete(handlers::delete_index),
        )
        // Document management
        .route(
            "/indexes/:id/documents",
            post(handlers::add_documents).delete(handlers::delete_documents),
        )
        .route(
            "/indexes/:id/documents/:documentid",
            axum::routing::patch(handlers::update_document).delete(handlers::delete_document),
        )
        // Search
        .route("/indexes/:id/searches", post(handlers::search))
        // Ingress management
        .route(
            "/indexes/:id/ingresses",
            get(ingresses::list_ingresses).post(ingresses::create_ingress),
        )
        .route(
            "/indexes/:id/ingresses/:ingressId",
            get(ingresses::get_ingress)
                .patch(ingresses::update_ingress)
                .delete(ingresses::delete_ingress),
        )
        // Cluster management
        .route("/cluster/status", get(handlers::cluster_status))
        .route("/cluster/join", post(handlers::join_cluster))
        // Health and metrics
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            forward::leader_forward,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::authorization,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
