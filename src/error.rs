use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Bright operations
#[derive(Error, Debug)]
pub enum BrightError {
    #[error("index {0} not found")]
    IndexNotFound(String),

    #[error("index {0} already exists")]
    IndexAlreadyExists(String),

    #[error("document {0} not found")]
    DocumentNotFound(String),

    #[error("document missing primary key {0}")]
    MissingPrimaryKey(String),

    #[error("primary key value must not be null")]
    NullPrimaryKey,

    #[error("no primary key candidate found (no attribute ending with 'id')")]
    NoPrimaryKeyCandidate,

    #[error("multiple primary key candidates found: {0:?}")]
    MultiplePrimaryKeyCandidates(Vec<String>),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid JSON on line {line}: {message}")]
    ParseLine { line: usize, message: String },

    #[error("invalid MessagePack data: {0}")]
    ParseMsgpack(String),

    #[error("engine error: {0}")]
    Engine(#[from] tantivy::TantivyError),

    #[error("query parse error: {0}")]
    QueryParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not leader - cannot process write request")]
    NotLeader { leader: Option<String> },

    #[error("raft apply timed out")]
    RaftTimeout,

    #[error("leadership lost before the entry committed")]
    ReplicationLost,

    #[error("consensus error: {0}")]
    Consensus(String),

    #[error("command failed: {message}")]
    Command {
        kind: CommandErrorKind,
        message: String,
    },

    #[error("ingress {0} not found")]
    IngressNotFound(String),

    #[error("ingress {0} already exists")]
    IngressAlreadyExists(String),

    #[error("unknown ingress type: {0}")]
    UnknownIngressType(String),

    #[error("ingress error: {0}")]
    Ingress(String),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for Bright operations
pub type Result<T> = std::result::Result<T, BrightError>;

/// Classification of a logical command failure, replicated alongside the
/// command result so every node maps the same failure to the same response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Internal,
}

impl BrightError {
    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BrightError::NotLeader { .. }
                | BrightError::RaftTimeout
                | BrightError::ReplicationLost
                | BrightError::Consensus(_)
        )
    }

    /// Map a store-level error onto the replicated command error taxonomy.
    pub fn command_kind(&self) -> CommandErrorKind {
        match self {
            BrightError::IndexNotFound(_) | BrightError::DocumentNotFound(_) => {
                CommandErrorKind::NotFound
            }
            BrightError::IndexAlreadyExists(_) => CommandErrorKind::AlreadyExists,
            BrightError::MissingPrimaryKey(_)
            | BrightError::NullPrimaryKey
            | BrightError::NoPrimaryKeyCandidate
            | BrightError::MultiplePrimaryKeyCandidates(_)
            | BrightError::InvalidArgument(_)
            | BrightError::QueryParse(_) => CommandErrorKind::InvalidArgument,
            _ => CommandErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrightError::IndexNotFound("books".to_string());
        assert_eq!(err.to_string(), "index books not found");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(BrightError::NotLeader { leader: None }.is_retriable());
        assert!(BrightError::RaftTimeout.is_retriable());
        assert!(!BrightError::IndexNotFound("x".to_string()).is_retriable());
    }

    #[test]
    fn test_command_kind_mapping() {
        assert_eq!(
            BrightError::IndexAlreadyExists("a".into()).command_kind(),
            CommandErrorKind::AlreadyExists
        );
        assert_eq!(
            BrightError::DocumentNotFound("1".into()).command_kind(),
            CommandErrorKind::NotFound
        );
        assert_eq!(
            BrightError::Internal("boom".into()).command_kind(),
            CommandErrorKind::Internal
        );
    }
}
