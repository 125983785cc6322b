use serde::{Deserialize, Serialize};

use super::Document;
use crate::error::{BrightError, Result};

/// Commands replicated through the Raft log.
///
/// Encoded as `{"type": <tag>, "data": <payload>}` so new variants are
/// additive; a replica decoding an unknown tag refuses the entry with a
/// well-defined error instead of guessing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Command {
    CreateIndex {
        id: String,
        #[serde(rename = "primaryKey")]
        primary_key: String,
        #[serde(rename = "excludeAttributes", default)]
        exclude_attributes: Vec<String>,
    },

    DeleteIndex {
        id: String,
    },

    UpdateIndex {
        id: String,
        #[serde(rename = "primaryKey")]
        primary_key: String,
        #[serde(rename = "excludeAttributes", default)]
        exclude_attributes: Vec<String>,
    },

    AddDocuments {
        index_id: String,
        documents: Vec<Document>,
    },

    DeleteDocument {
        index_id: String,
        document_id: String,
    },

    DeleteDocuments {
        index_id: String,
        #[serde(default)]
        filter: String,
        #[serde(default)]
        ids: Vec<String>,
    },

    UpdateDocument {
        index_id: String,
        document_id: String,
        updates: Document,
    },

    AutoCreateAndAddDocuments {
        index_id: String,
        primary_key: String,
        documents: Vec<Document>,
    },
}

impl Command {
    /// Get a human-readable name for this command (for logging)
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateIndex { .. } => "create_index",
            Command::DeleteIndex { .. } => "delete_index",
            Command::UpdateIndex { .. } => "update_index",
            Command::AddDocuments { .. } => "add_documents",
            Command::DeleteDocument { .. } => "delete_document",
            Command::DeleteDocuments { .. } => "delete_documents",
            Command::UpdateDocument { .. } => "update_document",
            Command::AutoCreateAndAddDocuments { .. } => "auto_create_and_add_documents",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| BrightError::InvalidArgument(format!("unknown command: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_encoding() {
        let cmd = Command::CreateIndex {
            id: "books".to_string(),
            primary_key: "isbn".to_string(),
            exclude_attributes: vec![],
        };

        let json: serde_json::Value = serde_json::from_slice(&cmd.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "create_index");
        assert_eq!(json["data"]["id"], "books");
        assert_eq!(json["data"]["primaryKey"], "isbn");
    }

    #[test]
    fn test_round_trip() {
        let mut doc = Document::new();
        doc.insert("isbn".to_string(), serde_json::json!("9780131103627"));

        let cmd = Command::AddDocuments {
            index_id: "books".to_string(),
            documents: vec![doc],
        };

        let decoded = Command::decode(&cmd.encode().unwrap()).unwrap();
        match decoded {
            Command::AddDocuments { index_id, documents } => {
                assert_eq!(index_id, "books");
                assert_eq!(documents.len(), 1);
            }
            other => panic!("unexpected variant: {}", other.name()),
        }
    }

    #[test]
    fn test_unknown_tag_is_refused() {
        let bytes = br#"{"type":"shrink_index","data":{"id":"books"}}"#;
        let err = Command::decode(bytes).unwrap_err();
        assert!(err.to_string().contains("unknown command"));
    }

    #[test]
    fn test_delete_documents_defaults() {
        let bytes = br#"{"type":"delete_documents","data":{"index_id":"books"}}"#;
        match Command::decode(bytes).unwrap() {
            Command::DeleteDocuments { filter, ids, .. } => {
                assert!(filter.is_empty());
                assert!(ids.is_empty());
            }
            other => panic!("unexpected variant: {}", other.name()),
        }
    }
}
