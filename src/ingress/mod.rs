pub mod manager;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consensus::BrightNode;
use crate::error::Result;
use crate::metrics::BrightMetrics;
use crate::store::IndexStore;

pub use manager::IngressManager;

/// Lifecycle state of an ingress
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressStatus {
    Stopped,
    Starting,
    Running,
    Syncing,
    Paused,
    Error,
}

/// Synchronization statistics exposed through the API
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    pub documents_synced: u64,
    pub documents_deleted: u64,
    pub full_sync_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub error_count: u64,
}

/// A long-running task projecting an external source into one index.
///
/// New ingress types register a factory with the manager; the core never
/// names concrete types.
#[async_trait]
pub trait Ingress: Send + Sync {
    fn id(&self) -> &str;
    fn index_id(&self) -> &str;
    fn kind(&self) -> &'static str;
    fn status(&self) -> IngressStatus;
    async fn start(self: Arc<Self>) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
    async fn resync(&self) -> Result<()>;
    fn statistics(&self) -> Statistics;
    fn config(&self) -> serde_json::Value;

    /// Remove any source-side objects this ingress installed. Runs on
    /// delete, after `stop`.
    async fn teardown(&self) -> Result<()> {
        Ok(())
    }
}

/// Persisted registration of one ingress
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngressConfig {
    pub id: String,
    pub index_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub config: serde_json::Value,
}

/// Capabilities handed to every ingress: the store for standalone
/// delivery, the raft node for clustered delivery, metrics for counters.
#[derive(Clone)]
pub struct IngressContext {
    pub store: Arc<IndexStore>,
    pub node: Option<Arc<BrightNode>>,
    pub metrics: Arc<BrightMetrics>,
}

/// API projection of an ingress
#[derive(Clone, Debug, Serialize)]
pub struct IngressInfo {
    pub id: String,
    pub index_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: IngressStatus,
    pub config: serde_json::Value,
    pub stats: Statistics,
}

impl IngressInfo {
    pub fn from_ingress(ingress: &dyn Ingress) -> Self {
        Self {
            id: ingress.id().to_string(),
            index_id: ingress.index_id().to_string(),
            kind: ingress.kind().to_string(),
            status: ingress.status(),
            config: ingress.config(),
            stats: ingress.statistics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&IngressStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&IngressStatus::Error).unwrap(),
            "\"error\""
        );
    }

    #[test]
    fn test_ingress_config_type_field() {
        let config: IngressConfig = serde_json::from_value(serde_json::json!({
            "id": "products-pg",
            "index_id": "products",
            "type": "postgres",
            "config": {"dsn": "postgres://localhost/app", "table": "products", "primary_key": "id"},
        }))
        .unwrap();
        assert_eq!(config.kind, "postgres");
    }
}
