use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BrightError, Result};

fn default_schema() -> String {
    "public".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_batch_size() -> i64 {
    1000
}

/// How the ingress observes changes after the initial full sync
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Polling,
    Listen,
}

/// Configuration for a PostgreSQL ingress
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// PostgreSQL connection string
    pub dsn: String,

    #[serde(default = "default_schema")]
    pub schema: String,

    /// Table to project into the index
    pub table: String,

    /// Columns to sync; empty means all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,

    /// Source column whose value becomes the document primary key
    pub primary_key: String,

    /// source column -> document field renames
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub column_mapping: HashMap<String, String>,

    /// Monotonic timestamp column driving incremental sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_column: Option<String>,

    /// Extra SQL filter appended to every query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,

    #[serde(default)]
    pub sync_mode: SyncMode,

    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// Install the delete-tracking trigger (and the notify trigger in
    /// listen mode) on start
    #[serde(default)]
    pub auto_triggers: bool,

    /// LISTEN/NOTIFY channel; defaults to `bright_<table>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_channel: Option<String>,
}

impl PostgresConfig {
    pub fn parse(raw: &serde_json::Value) -> Result<Self> {
        let config: PostgresConfig = serde_json::from_value(raw.clone())
            .map_err(|e| BrightError::InvalidArgument(format!("invalid postgres config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dsn.is_empty() {
            return Err(BrightError::InvalidArgument("dsn is required".to_string()));
        }
        if self.table.is_empty() {
            return Err(BrightError::InvalidArgument("table is required".to_string()));
        }
        if self.primary_key.is_empty() {
            return Err(BrightError::InvalidArgument(
                "primary_key is required".to_string(),
            ));
        }
        if self.sync_mode == SyncMode::Polling && self.updated_at_column.is_none() {
            return Err(BrightError::InvalidArgument(
                "updated_at_column is required for polling mode".to_string(),
            ));
        }
        if self.batch_size <= 0 {
            return Err(BrightError::InvalidArgument(
                "batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// schema-qualified table name
    pub fn full_table_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn notify_channel(&self) -> String {
        self.notify_channel
            .clone()
            .unwrap_or_else(|| format!("bright_{}", self.table))
    }

    /// Column list for SELECT clauses; `*` when no whitelist is set
    pub fn select_columns(&self) -> String {
        if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_applied() {
        let config = PostgresConfig::parse(&json!({
            "dsn": "postgres://localhost/app",
            "table": "products",
            "primary_key": "id",
            "updated_at_column": "updated_at",
        }))
        .unwrap();

        assert_eq!(config.schema, "public");
        assert_eq!(config.sync_mode, SyncMode::Polling);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.notify_channel(), "bright_products");
        assert_eq!(config.full_table_name(), "public.products");
        assert_eq!(config.select_columns(), "*");
    }

    #[test]
    fn test_poll_interval_parses_human_durations() {
        let config = PostgresConfig::parse(&json!({
            "dsn": "postgres://localhost/app",
            "table": "products",
            "primary_key": "id",
            "updated_at_column": "updated_at",
            "poll_interval": "1s",
        }))
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_polling_requires_updated_at_column() {
        let err = PostgresConfig::parse(&json!({
            "dsn": "postgres://localhost/app",
            "table": "products",
            "primary_key": "id",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("updated_at_column"));
    }

    #[test]
    fn test_listen_mode_without_updated_at_is_valid() {
        let config = PostgresConfig::parse(&json!({
            "dsn": "postgres://localhost/app",
            "table": "products",
            "primary_key": "id",
            "sync_mode": "listen",
        }))
        .unwrap();
        assert_eq!(config.sync_mode, SyncMode::Listen);
    }

    #[test]
    fn test_required_fields() {
        for missing in ["dsn", "table", "primary_key"] {
            let mut body = json!({
                "dsn": "postgres://localhost/app",
                "table": "products",
                "primary_key": "id",
                "updated_at_column": "updated_at",
            });
            body.as_object_mut().unwrap().remove(missing);
            assert!(PostgresConfig::parse(&body).is_err(), "{} missing", missing);
        }
    }

    #[test]
    fn test_column_whitelist_select() {
        let config = PostgresConfig::parse(&json!({
            "dsn": "postgres://localhost/app",
            "table": "products",
            "primary_key": "id",
            "updated_at_column": "updated_at",
            "columns": ["id", "title"],
        }))
        .unwrap();
        assert_eq!(config.select_columns(), "id, title");
    }
}
