use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use super::error::{ApiError, ErrorCode};
use super::router::AppState;
use super::types::*;
use crate::error::BrightError;
use crate::formats;
use crate::models::{Command, Document, IndexConfig, SearchRequest, SearchResponse};
use crate::store::detect_primary_key;

/// Apply deadline for edge-originated mutations
const APPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// A clustered node without a leader still reports healthy this long after
/// process start, covering election on a fresh boot
const HEALTH_GRACE: Duration = Duration::from_secs(60);

const DEFAULT_LIMIT: usize = 20;

fn validate_index_id(id: &str) -> Result<(), ApiError> {
    let url_safe = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if url_safe {
        Ok(())
    } else {
        Err(ApiError::bad_request(
            ErrorCode::InvalidParameter,
            "index id must be non-empty and URL-safe",
        ))
    }
}

/// Assign UUIDv7 ids to documents missing their primary key. Runs on the
/// leader's edge only; the FSM never invents ids.
fn assign_missing_ids(documents: &mut [Document], primary_key: &str) -> Result<(), ApiError> {
    for document in documents.iter_mut() {
        let missing = match document.get(primary_key) {
            None | Some(serde_json::Value::Null) => true,
            Some(_) => false,
        };
        if missing {
            document.insert(
                primary_key.to_string(),
                serde_json::Value::String(uuid::Uuid::now_v7().to_string()),
            );
        }
    }
    Ok(())
}

// ---- index handlers ------------------------------------------------------

pub async fn list_indexes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let mut offset = params.offset.unwrap_or(0);
    if let Some(page) = params.page {
        if page > 0 {
            offset = (page - 1) * limit;
        }
    }

    let items = state.store.list_indexes(limit, offset);
    Json(json!({ "items": items }))
}

pub async fn get_index(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.get_index(&id)?))
}

pub async fn create_index(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CreateIndexParams>,
    body: Option<Json<CreateIndexBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let id = params.id.ok_or_else(|| {
        ApiError::bad_request(ErrorCode::MissingParameter, "id parameter is required")
    })?;
    validate_index_id(&id)?;

    let config = IndexConfig {
        id: id.clone(),
        primary_key: params.primary_key.unwrap_or_default(),
        exclude_attributes: body.map(|Json(b)| b.exclude_attributes).unwrap_or_default(),
    };

    match &state.node {
        Some(node) => {
            node.apply(
                Command::CreateIndex {
                    id: config.id.clone(),
                    primary_key: config.primary_key.clone(),
                    exclude_attributes: config.exclude_attributes.clone(),
                },
                APPLY_TIMEOUT,
            )
            .await?;
        }
        None => state.store.create_index(config.clone())?,
    }

    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn update_index(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateIndexBody>,
) -> Result<impl IntoResponse, ApiError> {
    let config = IndexConfig {
        id: id.clone(),
        primary_key: body.primary_key,
        exclude_attributes: body.exclude_attributes,
    };

    match &state.node {
        Some(node) => {
            node.apply(
                Command::UpdateIndex {
                    id: config.id.clone(),
                    primary_key: config.primary_key.clone(),
                    exclude_attributes: config.exclude_attributes.clone(),
                },
                APPLY_TIMEOUT,
            )
            .await?;
        }
        None => {
            state.store.update_index(&id, config.clone())?;
        }
    }

    Ok(Json(config))
}

pub async fn delete_index(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match &state.node {
        Some(node) => {
            node.apply(Command::DeleteIndex { id }, APPLY_TIMEOUT).await?;
        }
        None => state.store.delete_index(&id)?,
    }

    Ok(StatusCode::NO_CONTENT)
}

// ---- document handlers ---------------------------------------------------

pub async fn add_documents(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<AddDocumentsParams>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let format = params.format.as_deref().unwrap_or("jsoneachrow");
    let parser = formats::parser_for(format)?;
    let mut documents = parser.parse(&body)?;

    match state.store.get_index(&id) {
        Ok(config) => {
            let primary_key = params
                .primary_key
                .clone()
                .unwrap_or_else(|| config.primary_key.clone());
            assign_missing_ids(&mut documents, &primary_key)?;

            let indexed = documents.len();
            match &state.node {
                Some(node) => {
                    node.apply(
                        Command::AddDocuments {
                            index_id: id,
                            documents,
                        },
                        APPLY_TIMEOUT,
                    )
                    .await?;
                }
                None => {
                    state.store.add_documents(&id, &documents)?;
                }
            }

            state.metrics.documents_indexed.inc_by(indexed as f64);
            Ok((
                StatusCode::CREATED,
                Json(IndexedResponse {
                    indexed,
                    auto_created: None,
                    primary_key: None,
                }),
            ))
        }

        Err(BrightError::IndexNotFound(_)) => {
            if !state.config.auto_create_index {
                return Err(ApiError::not_found(
                    ErrorCode::IndexNotFound,
                    format!("index {} not found", id),
                ));
            }
            validate_index_id(&id)?;

            let primary_key = match params.primary_key.clone() {
                Some(pk) => pk,
                None => detect_primary_key(&documents).map_err(|e| {
                    ApiError::bad_request(ErrorCode::InvalidParameter, "cannot auto-create index")
                        .with_details(e.to_string())
                })?,
            };
            assign_missing_ids(&mut documents, &primary_key)?;

            let indexed = documents.len();
            match &state.node {
                Some(node) => {
                    node.apply(
                        Command::AutoCreateAndAddDocuments {
                            index_id: id,
                            primary_key: primary_key.clone(),
                            documents,
                        },
                        APPLY_TIMEOUT,
                    )
                    .await?;
                }
                None => {
                    state
                        .store
                        .create_index(IndexConfig::new(id.clone(), primary_key.clone()))?;
                    state.store.add_documents(&id, &documents)?;
                }
            }

            state.metrics.documents_indexed.inc_by(indexed as f64);
            Ok((
                StatusCode::CREATED,
                Json(IndexedResponse {
                    indexed,
                    auto_created: Some(true),
                    primary_key: Some(primary_key),
                }),
            ))
        }

        Err(e) => Err(e.into()),
    }
}

pub async fn delete_documents(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse, ApiError> {
    let ids: Vec<String> = params
        .iter()
        .filter(|(key, _)| key == "ids[]" || key == "ids")
        .map(|(_, value)| value.clone())
        .collect();
    let filter = params
        .iter()
        .find(|(key, _)| key == "filter")
        .map(|(_, value)| value.clone())
        .unwrap_or_default();

    if !ids.is_empty() && !filter.is_empty() {
        return Err(ApiError::bad_request(
            ErrorCode::ConflictingParameters,
            "provide either ids[] or filter, not both",
        ));
    }
    if ids.is_empty() && filter.is_empty() {
        return Err(ApiError::bad_request(
            ErrorCode::MissingParameter,
            "must provide ids[] or filter parameter to delete documents",
        ));
    }

    let explicit_deletes = ids.len();
    match &state.node {
        Some(node) => {
            node.apply(
                Command::DeleteDocuments {
                    index_id: id,
                    filter,
                    ids,
                },
                APPLY_TIMEOUT,
            )
            .await?;
        }
        None => {
            state.store.delete_documents(&id, &filter, &ids)?;
        }
    }

    if explicit_deletes > 0 {
        state.metrics.documents_deleted.inc_by(explicit_deletes as f64);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path((id, document_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    match &state.node {
        Some(node) => {
            node.apply(
                Command::DeleteDocument {
                    index_id: id,
                    document_id,
                },
                APPLY_TIMEOUT,
            )
            .await?;
        }
        None => state.store.delete_document(&id, &document_id)?,
    }

    state.metrics.documents_deleted.inc();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_document(
    State(state): State<Arc<AppState>>,
    Path((id, document_id)): Path<(String, String)>,
    Json(updates): Json<Document>,
) -> Result<impl IntoResponse, ApiError> {
    let merged = match &state.node {
        Some(node) => {
            node.apply(
                Command::UpdateDocument {
                    index_id: id.clone(),
                    document_id: document_id.clone(),
                    updates,
                },
                APPLY_TIMEOUT,
            )
            .await?;

            // The leader's FSM has applied the merge; read it back
            state.store.get_document(&id, &document_id)?.ok_or_else(|| {
                ApiError::not_found(
                    ErrorCode::DocumentNotFound,
                    format!("document {} not found", document_id),
                )
            })?
        }
        None => state.store.update_document(&id, &document_id, &updates)?,
    };

    Ok(Json(merged))
}

// ---- search --------------------------------------------------------------

pub async fn search(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<SearchRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    if !request.attributes_to_retrieve.is_empty() && !request.attributes_to_exclude.is_empty() {
        return Err(ApiError::bad_request(
            ErrorCode::ConflictingParameters,
            "cannot use both attributesToRetrieve and attributesToExclude at the same time",
        ));
    }

    let limit = request.limit.unwrap_or(DEFAULT_LIMIT);
    let mut offset = request.offset;
    if let Some(page) = request.page {
        if page > 1 {
            offset = (page - 1) * limit;
        }
    }

    let started = std::time::Instant::now();
    let results = state
        .store
        .search(&id, &request.q, limit, offset, &request.sort)?;
    state.metrics.searches_total.inc();
    state
        .metrics
        .search_latency
        .observe(started.elapsed().as_secs_f64());

    let hits: Vec<Document> = results
        .hits
        .into_iter()
        .map(|hit| {
            let mut doc = hit.document;
            if !request.attributes_to_retrieve.is_empty() {
                doc.retain(|key, _| request.attributes_to_retrieve.iter().any(|a| a == key));
            } else if !request.attributes_to_exclude.is_empty() {
                for attr in &request.attributes_to_exclude {
                    doc.remove(attr);
                }
            }
            doc
        })
        .collect();

    let total_pages = if limit == 0 {
        0
    } else {
        (results.total as usize).div_ceil(limit)
    };

    Ok(Json(SearchResponse {
        hits,
        total_hits: results.total,
        total_pages,
    }))
}

// ---- cluster -------------------------------------------------------------

pub async fn cluster_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.node {
        None => Json(json!({ "mode": "standalone", "healthy": true })),
        Some(node) => {
            let is_leader = node.is_leader().await;
            state
                .metrics
                .cluster_leader
                .set(if is_leader { 1.0 } else { 0.0 });

            Json(json!({
                "mode": "clustered",
                "node_id": node.node_id,
                "is_leader": is_leader,
                "leader": node.leader_addr().await.unwrap_or_default(),
            }))
        }
    }
}

pub async fn join_cluster(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ClusterJoinBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.addr.is_empty() {
        return Err(ApiError::bad_request(
            ErrorCode::MissingParameter,
            "node_id and addr are required",
        ));
    }

    let Some(node) = &state.node else {
        return Err(ApiError::bad_request(
            ErrorCode::InvalidParameter,
            "clustering is disabled on this node",
        ));
    };

    if !node.is_leader().await {
        return Err(ApiError::leader_only(
            "only leader can add nodes",
            node.leader_addr().await,
        ));
    }

    node.add_voter(body.node_id, body.addr).await?;

    Ok(Json(json!({ "status": "joined", "node_id": body.node_id })))
}

// ---- health & metrics ----------------------------------------------------

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(node) = &state.node else {
        return (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response();
    };

    let leader = node.leader_addr().await;
    let healthy = leader.is_some() || state.started_at.elapsed() < HEALTH_GRACE;
    let body = json!({
        "status": if healthy { "ok" } else { "degraded" },
        "raft": {
            "enabled": true,
            "is_leader": node.is_leader().await,
            "has_leader": leader.is_some(),
        },
    });

    if healthy {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let families = state.metrics.registry().gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        return ApiError::internal(ErrorCode::InternalError, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}
