use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use super::error::{ApiError, ErrorCode};
use super::router::AppState;
use super::types::{CreateIngressBody, UpdateIngressBody};
use crate::ingress::IngressInfo;

/// GET /indexes/:id/ingresses
pub async fn list_ingresses(
    State(state): State<Arc<AppState>>,
    Path(index_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.get_index(&index_id)?;

    let ingresses: Vec<IngressInfo> = state
        .ingresses
        .list(&index_id)
        .iter()
        .map(|ingress| IngressInfo::from_ingress(ingress.as_ref()))
        .collect();

    Ok(Json(json!({ "ingresses": ingresses })))
}

/// POST /indexes/:id/ingresses: create, persist and auto-start
pub async fn create_ingress(
    State(state): State<Arc<AppState>>,
    Path(index_id): Path<String>,
    Json(body): Json<CreateIngressBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.id.is_empty() {
        return Err(ApiError::bad_request(
            ErrorCode::MissingParameter,
            "id is required",
        ));
    }
    if body.kind.is_empty() {
        return Err(ApiError::bad_request(
            ErrorCode::MissingParameter,
            "type is required",
        ));
    }

    let ingress = state
        .ingresses
        .create(&index_id, &body.kind, &body.id, body.config)?;

    if let Err(e) = Arc::clone(&ingress).start().await {
        return Err(
            ApiError::internal(ErrorCode::InternalError, "ingress created but failed to start")
                .with_details(e.to_string()),
        );
    }

    Ok((
        StatusCode::CREATED,
        Json(IngressInfo::from_ingress(ingress.as_ref())),
    ))
}

/// GET /indexes/:id/ingresses/:ingressId
pub async fn get_ingress(
    State(state): State<Arc<AppState>>,
    Path((_index_id, ingress_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let ingress = state.ingresses.get(&ingress_id)?;
    Ok(Json(IngressInfo::from_ingress(ingress.as_ref())))
}

/// PATCH /indexes/:id/ingresses/:ingressId: state transitions
pub async fn update_ingress(
    State(state): State<Arc<AppState>>,
    Path((_index_id, ingress_id)): Path<(String, String)>,
    Json(body): Json<UpdateIngressBody>,
) -> Result<impl IntoResponse, ApiError> {
    let ingress = state.ingresses.get(&ingress_id)?;

    match body.state.as_str() {
        "resyncing" => ingress.resync().await?,
        "paused" => ingress.pause()?,
        "running" => ingress.resume()?,
        other => {
            return Err(ApiError::bad_request(
                ErrorCode::InvalidParameter,
                format!(
                    "invalid state {:?}, must be one of: resyncing, paused, running",
                    other
                ),
            ));
        }
    }

    Ok(Json(IngressInfo::from_ingress(ingress.as_ref())))
}

/// DELETE /indexes/:id/ingresses/:ingressId
pub async fn delete_ingress(
    State(state): State<Arc<AppState>>,
    Path((_index_id, ingress_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.ingresses.delete(&ingress_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
