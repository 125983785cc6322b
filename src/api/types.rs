use serde::{Deserialize, Serialize};

/// Query parameters for POST /indexes
#[derive(Debug, Deserialize)]
pub struct CreateIndexParams {
    pub id: Option<String>,
    #[serde(rename = "primaryKey")]
    pub primary_key: Option<String>,
}

/// Optional body for POST /indexes
#[derive(Debug, Default, Deserialize)]
pub struct CreateIndexBody {
    #[serde(rename = "excludeAttributes", default)]
    pub exclude_attributes: Vec<String>,
}

/// Body for PATCH /indexes/:id
#[derive(Debug, Deserialize)]
pub struct UpdateIndexBody {
    #[serde(rename = "primaryKey")]
    pub primary_key: String,
    #[serde(rename = "excludeAttributes", default)]
    pub exclude_attributes: Vec<String>,
}

/// Pagination for GET /indexes
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub page: Option<usize>,
}

/// Query parameters for POST /indexes/:id/documents
#[derive(Debug, Deserialize)]
pub struct AddDocumentsParams {
    pub format: Option<String>,
    #[serde(rename = "primaryKey")]
    pub primary_key: Option<String>,
}

/// Response for document insertion
#[derive(Debug, Serialize)]
pub struct IndexedResponse {
    pub indexed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_created: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
}

/// Body for POST /cluster/join
#[derive(Debug, Deserialize)]
pub struct ClusterJoinBody {
    pub node_id: u64,
    pub addr: String,
}

/// Body for POST /indexes/:id/ingresses
#[derive(Debug, Deserialize)]
pub struct CreateIngressBody {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Body for PATCH /indexes/:id/ingresses/:ingressId
#[derive(Debug, Deserialize)]
pub struct UpdateIngressBody {
    pub state: String,
}
