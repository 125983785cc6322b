pub mod command;

use serde::{Deserialize, Serialize};

pub use command::Command;

/// A schemaless document: attribute name to JSON value
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Configuration of a named index
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub id: String,

    #[serde(rename = "primaryKey")]
    pub primary_key: String,

    #[serde(
        rename = "excludeAttributes",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub exclude_attributes: Vec<String>,
}

/// Search request body for POST /indexes/:id/searches
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub q: String,

    #[serde(default)]
    pub offset: usize,

    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default)]
    pub page: Option<usize>,

    #[serde(default)]
    pub sort: Vec<String>,

    #[serde(rename = "attributesToRetrieve", default)]
    pub attributes_to_retrieve: Vec<String>,

    #[serde(rename = "attributesToExclude", default)]
    pub attributes_to_exclude: Vec<String>,
}

/// Search response body
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<Document>,

    #[serde(rename = "totalHits")]
    pub total_hits: u64,

    #[serde(rename = "totalPages")]
    pub total_pages: usize,
}

impl IndexConfig {
    pub fn new(id: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            primary_key: primary_key.into(),
            exclude_attributes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_config_wire_names() {
        let config = IndexConfig {
            id: "books".to_string(),
            primary_key: "isbn".to_string(),
            exclude_attributes: vec!["blob".to_string()],
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["id"], "books");
        assert_eq!(json["primaryKey"], "isbn");
        assert_eq!(json["excludeAttributes"][0], "blob");
    }

    #[test]
    fn test_exclude_attributes_omitted_when_empty() {
        let config = IndexConfig::new("books", "isbn");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("excludeAttributes"));
    }

    #[test]
    fn test_search_request_defaults() {
        let req: SearchRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.q, "");
        assert_eq!(req.offset, 0);
        assert!(req.limit.is_none());
        assert!(req.sort.is_empty());
    }
}
