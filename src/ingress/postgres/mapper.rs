use serde_json::{Number, Value};
use tokio_postgres::types::Type;
use tokio_postgres::Row;
use tracing::warn;

use super::config::PostgresConfig;
use crate::error::{BrightError, Result};
use crate::models::Document;

/// Converts PostgreSQL rows to JSON documents, applying the column
/// whitelist and renames.
pub struct Mapper {
    config: PostgresConfig,
}

impl Mapper {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }

    pub fn row_to_document(&self, row: &Row) -> Result<Document> {
        let mut doc = Document::new();

        for (idx, column) in row.columns().iter().enumerate() {
            let name = column.name();

            if !self.config.columns.is_empty()
                && !self.config.columns.iter().any(|c| c == name)
            {
                continue;
            }

            let field = self
                .config
                .column_mapping
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_string());

            doc.insert(field, convert_value(row, idx, column.type_())?);
        }

        Ok(doc)
    }

    /// Extract the document's primary-key value as a string
    pub fn primary_key_value(&self, doc: &Document) -> Result<String> {
        let field = self
            .config
            .column_mapping
            .get(&self.config.primary_key)
            .cloned()
            .unwrap_or_else(|| self.config.primary_key.clone());

        match doc.get(&field) {
            Some(value) => crate::store::coerce_document_id(value),
            None => Err(BrightError::MissingPrimaryKey(field)),
        }
    }
}

fn number(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

/// Map one column to a JSON value. Unsupported types fall back to their
/// text form, or null with a warning.
fn convert_value(row: &Row, idx: usize, pg_type: &Type) -> Result<Value> {
    let value = if *pg_type == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool)
    } else if *pg_type == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Number(Number::from(v)))
    } else if *pg_type == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Number(Number::from(v)))
    } else if *pg_type == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?
            .map(|v| Value::Number(Number::from(v)))
    } else if *pg_type == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?.map(|v| number(v as f64))
    } else if *pg_type == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(number)
    } else if *pg_type == Type::NUMERIC {
        row.try_get::<_, Option<rust_decimal::Decimal>>(idx)?
            .map(|v| number(rust_decimal::prelude::ToPrimitive::to_f64(&v).unwrap_or(f64::NAN)))
    } else if *pg_type == Type::TEXT
        || *pg_type == Type::VARCHAR
        || *pg_type == Type::BPCHAR
        || *pg_type == Type::NAME
    {
        row.try_get::<_, Option<String>>(idx)?.map(Value::String)
    } else if *pg_type == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(|v| Value::String(v.to_rfc3339()))
    } else if *pg_type == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
    } else if *pg_type == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(idx)?
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string()))
    } else if *pg_type == Type::UUID {
        row.try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|v| Value::String(v.to_string()))
    } else if *pg_type == Type::JSON || *pg_type == Type::JSONB {
        row.try_get::<_, Option<Value>>(idx)?
    } else if *pg_type == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|v| Value::String(String::from_utf8_lossy(&v).into_owned()))
    } else {
        match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v.map(Value::String),
            Err(_) => {
                warn!(pg_type = %pg_type, "unsupported column type, storing null");
                Some(Value::Null)
            }
        }
    };

    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> PostgresConfig {
        PostgresConfig::parse(&json!({
            "dsn": "postgres://localhost/app",
            "table": "products",
            "primary_key": "id",
            "updated_at_column": "updated_at",
            "column_mapping": {"id": "productId"},
        }))
        .unwrap()
    }

    #[test]
    fn test_primary_key_honors_column_mapping() {
        let mapper = Mapper::new(test_config());

        let mut doc = Document::new();
        doc.insert("productId".to_string(), json!(42));
        assert_eq!(mapper.primary_key_value(&doc).unwrap(), "42");
    }

    #[test]
    fn test_primary_key_missing_is_an_error() {
        let mapper = Mapper::new(test_config());
        let doc = Document::new();
        assert!(mapper.primary_key_value(&doc).is_err());
    }
}
