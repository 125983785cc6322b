use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{BrightError, CommandErrorKind};

/// Typed error codes surfaced to client libraries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation (400)
    MissingParameter,
    InvalidParameter,
    InvalidRequestBody,
    ConflictingParameters,
    InvalidFormat,
    ParseError,

    // Not found (404)
    IndexNotFound,
    DocumentNotFound,
    IngressNotFound,

    // Cluster (307/503)
    NotLeader,
    ClusterUnavailable,

    // Authorization (401/403)
    Unauthorized,
    LeaderOnlyOperation,

    // Conflict (409)
    ResourceAlreadyExists,

    // Internal (500)
    UuidGenerationFailed,
    SerializationFailed,
    RaftApplyFailed,
    IndexOperationFailed,
    DocumentOperationFailed,
    BatchOperationFailed,
    SearchFailed,
    InternalError,
}

/// Structured error response: code + message, optionally details and the
/// current leader address for cluster errors
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
                details: None,
                leader: None,
            },
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.body.details = Some(details.into());
        self
    }

    pub fn with_leader(mut self, leader: Option<String>) -> Self {
        self.body.leader = leader;
        self
    }

    pub fn bad_request(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            ErrorCode::ResourceAlreadyExists,
            message,
        )
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, ErrorCode::Unauthorized, message)
    }

    pub fn leader_only(message: impl Into<String>, leader: Option<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, ErrorCode::LeaderOnlyOperation, message)
            .with_leader(leader)
    }

    pub fn cluster_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ClusterUnavailable,
            message,
        )
    }

    pub fn internal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<BrightError> for ApiError {
    fn from(e: BrightError) -> Self {
        match e {
            BrightError::IndexNotFound(_) => {
                ApiError::not_found(ErrorCode::IndexNotFound, e.to_string())
            }
            BrightError::DocumentNotFound(_) => {
                ApiError::not_found(ErrorCode::DocumentNotFound, e.to_string())
            }
            BrightError::IngressNotFound(_) => {
                ApiError::not_found(ErrorCode::IngressNotFound, e.to_string())
            }
            BrightError::IndexAlreadyExists(_) | BrightError::IngressAlreadyExists(_) => {
                ApiError::conflict(e.to_string())
            }
            BrightError::MissingPrimaryKey(_)
            | BrightError::NullPrimaryKey
            | BrightError::NoPrimaryKeyCandidate
            | BrightError::MultiplePrimaryKeyCandidates(_)
            | BrightError::InvalidArgument(_)
            | BrightError::UnknownIngressType(_)
            | BrightError::Ingress(_) => {
                ApiError::bad_request(ErrorCode::InvalidParameter, e.to_string())
            }
            BrightError::UnsupportedFormat(_) => {
                ApiError::bad_request(ErrorCode::InvalidFormat, e.to_string())
            }
            BrightError::ParseLine { .. } | BrightError::ParseMsgpack(_) => {
                ApiError::bad_request(ErrorCode::ParseError, e.to_string())
            }
            BrightError::QueryParse(_) => {
                ApiError::bad_request(ErrorCode::SearchFailed, e.to_string())
            }
            BrightError::NotLeader { leader } => ApiError::new(
                StatusCode::TEMPORARY_REDIRECT,
                ErrorCode::NotLeader,
                "not leader",
            )
            .with_leader(leader),
            BrightError::RaftTimeout | BrightError::ReplicationLost | BrightError::Consensus(_) => {
                ApiError::internal(ErrorCode::RaftApplyFailed, e.to_string())
            }
            BrightError::Command { kind, ref message } => match kind {
                CommandErrorKind::NotFound => {
                    let code = if message.starts_with("index") {
                        ErrorCode::IndexNotFound
                    } else {
                        ErrorCode::DocumentNotFound
                    };
                    ApiError::not_found(code, message.clone())
                }
                CommandErrorKind::AlreadyExists => ApiError::conflict(message.clone()),
                CommandErrorKind::InvalidArgument => {
                    ApiError::bad_request(ErrorCode::InvalidParameter, message.clone())
                }
                CommandErrorKind::Internal => {
                    ApiError::internal(ErrorCode::InternalError, message.clone())
                }
            },
            BrightError::Engine(_) => {
                ApiError::internal(ErrorCode::IndexOperationFailed, e.to_string())
            }
            _ => ApiError::internal(ErrorCode::InternalError, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_format() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::ResourceAlreadyExists).unwrap(),
            "\"RESOURCE_ALREADY_EXISTS\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::ConflictingParameters).unwrap(),
            "\"CONFLICTING_PARAMETERS\""
        );
    }

    #[test]
    fn test_store_errors_map_to_statuses() {
        let e: ApiError = BrightError::IndexNotFound("books".into()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.body.code, ErrorCode::IndexNotFound);

        let e: ApiError = BrightError::IndexAlreadyExists("books".into()).into();
        assert_eq!(e.status, StatusCode::CONFLICT);

        let e: ApiError = BrightError::RaftTimeout.into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.body.code, ErrorCode::RaftApplyFailed);
    }

    #[test]
    fn test_replicated_not_found_distinguishes_index_and_document() {
        let e: ApiError = BrightError::Command {
            kind: CommandErrorKind::NotFound,
            message: "index books not found".into(),
        }
        .into();
        assert_eq!(e.body.code, ErrorCode::IndexNotFound);

        let e: ApiError = BrightError::Command {
            kind: CommandErrorKind::NotFound,
            message: "document 9 not found".into(),
        }
        .into();
        assert_eq!(e.body.code, ErrorCode::DocumentNotFound);
    }
}
