use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_postgres::Client;
use tracing::{debug, info};

use super::config::PostgresConfig;
use super::mapper::Mapper;
use super::schema::DELETES_TABLE;
use crate::error::{BrightError, Result};
use crate::models::Document;

/// Where batches go once fetched. The ingress implements this with its
/// delivery path: raft on the leader, the store when clustering is off.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver_documents(&self, documents: Vec<Document>) -> Result<()>;
    async fn deliver_deletes(&self, ids: Vec<String>) -> Result<()>;
}

/// Durable position of the ingress within its source table
#[derive(Clone, Debug, Default)]
pub struct CursorState {
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Only set while a full sync is in progress
    pub last_id: Option<String>,
    pub full_sync_complete: bool,
}

/// Polling synchronization: one full table pass keyed on the primary key,
/// then incremental passes keyed on the updated-at column plus the
/// delete-tracking table.
pub struct Poller {
    config: PostgresConfig,
    mapper: Mapper,
    state: Mutex<CursorState>,
}

impl Poller {
    pub fn new(config: PostgresConfig) -> Self {
        Self {
            mapper: Mapper::new(config.clone()),
            config,
            state: Mutex::new(CursorState::default()),
        }
    }

    pub fn state(&self) -> CursorState {
        self.state.lock().clone()
    }

    pub fn set_state(&self, state: CursorState) {
        *self.state.lock() = state;
    }

    /// Forget all progress; the next poll runs a full sync from the start
    pub fn reset(&self) {
        *self.state.lock() = CursorState::default();
    }

    /// One poll cycle: full sync until it completes once, incremental after
    pub async fn poll(&self, client: &Client, sink: &dyn DeliverySink) -> Result<()> {
        if !self.state.lock().full_sync_complete {
            self.full_sync(client, sink).await
        } else {
            self.incremental_sync(client, sink).await
        }
    }

    async fn full_sync(&self, client: &Client, sink: &dyn DeliverySink) -> Result<()> {
        info!(table = %self.config.full_table_name(), "starting full sync");

        let mut total = 0usize;
        loop {
            let after_id = self.state.lock().last_id.clone();
            let (documents, last_id) = self.fetch_batch(client, after_id).await?;
            if documents.is_empty() {
                break;
            }

            let batch_len = documents.len();
            sink.deliver_documents(documents).await?;
            total += batch_len;

            {
                let mut state = self.state.lock();
                state.last_id = last_id.clone();
            }

            debug!(
                batch = batch_len,
                total,
                last_id = last_id.as_deref().unwrap_or(""),
                "full sync batch delivered"
            );

            if batch_len < self.config.batch_size as usize {
                break;
            }
        }

        {
            // The timestamp is wall clock: the poller runs outside the FSM,
            // so non-deterministic time is fine here.
            let mut state = self.state.lock();
            state.full_sync_complete = true;
            state.last_id = None;
            state.last_sync_at = Some(Utc::now());
        }

        info!(
            table = %self.config.full_table_name(),
            documents = total,
            "full sync completed"
        );
        Ok(())
    }

    async fn incremental_sync(&self, client: &Client, sink: &dyn DeliverySink) -> Result<()> {
        let since = self.since();

        let documents = self.fetch_changes(client, since).await?;
        if !documents.is_empty() {
            debug!(count = documents.len(), "incremental sync: updates");
            sink.deliver_documents(documents).await?;
        }

        let deleted_ids = self.fetch_deletes(client, since).await?;
        if !deleted_ids.is_empty() {
            debug!(count = deleted_ids.len(), "incremental sync: deletes");
            sink.deliver_deletes(deleted_ids).await?;
        }

        self.state.lock().last_sync_at = Some(Utc::now());
        Ok(())
    }

    fn since(&self) -> DateTime<Utc> {
        self.state
            .lock()
            .last_sync_at
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    fn where_clause(&self) -> String {
        match &self.config.where_clause {
            Some(clause) => format!("WHERE {}", clause),
            None => String::new(),
        }
    }

    fn and_where_clause(&self) -> String {
        match &self.config.where_clause {
            Some(clause) => format!("AND {}", clause),
            None => String::new(),
        }
    }

    /// Full-sync page query. The primary key is compared and ordered as
    /// text so one statement serves every key type; the ordering only has
    /// to be total and stable for pagination to terminate.
    fn full_sync_query(&self, with_cursor: bool) -> String {
        if with_cursor {
            format!(
                "SELECT {} FROM {} WHERE {}::text > $1 {} ORDER BY {}::text LIMIT $2",
                self.config.select_columns(),
                self.config.full_table_name(),
                self.config.primary_key,
                self.and_where_clause(),
                self.config.primary_key,
            )
        } else {
            format!(
                "SELECT {} FROM {} {} ORDER BY {}::text LIMIT $1",
                self.config.select_columns(),
                self.config.full_table_name(),
                self.where_clause(),
                self.config.primary_key,
            )
        }
    }

    fn incremental_query(&self) -> Result<String> {
        let updated_at = self.config.updated_at_column.as_deref().ok_or_else(|| {
            BrightError::InvalidArgument("updated_at_column is required for polling mode".to_string())
        })?;
        Ok(format!(
            "SELECT {} FROM {} WHERE {} > $1 {} ORDER BY {} LIMIT $2",
            self.config.select_columns(),
            self.config.full_table_name(),
            updated_at,
            self.and_where_clause(),
            updated_at,
        ))
    }

    fn deletes_query(&self) -> String {
        format!(
            "SELECT deleted_id FROM {} WHERE source_table = $1 AND deleted_at > $2 \
             ORDER BY deleted_at LIMIT $3",
            DELETES_TABLE
        )
    }

    async fn fetch_batch(
        &self,
        client: &Client,
        after_id: Option<String>,
    ) -> Result<(Vec<Document>, Option<String>)> {
        let rows = match &after_id {
            Some(id) => {
                client
                    .query(self.full_sync_query(true).as_str(), &[id, &self.config.batch_size])
                    .await?
            }
            None => {
                client
                    .query(self.full_sync_query(false).as_str(), &[&self.config.batch_size])
                    .await?
            }
        };

        let mut documents = Vec::with_capacity(rows.len());
        let mut last_id = None;
        for row in &rows {
            let doc = self.mapper.row_to_document(row)?;
            last_id = Some(self.mapper.primary_key_value(&doc)?);
            documents.push(doc);
        }

        Ok((documents, last_id))
    }

    async fn fetch_changes(
        &self,
        client: &Client,
        since: DateTime<Utc>,
    ) -> Result<Vec<Document>> {
        let query = self.incremental_query()?;
        let rows = client
            .query(query.as_str(), &[&since, &self.config.batch_size])
            .await?;

        rows.iter()
            .map(|row| self.mapper.row_to_document(row))
            .collect()
    }

    async fn fetch_deletes(
        &self,
        client: &Client,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let rows = client
            .query(
                self.deletes_query().as_str(),
                &[&self.config.table, &since, &self.config.batch_size],
            )
            .await?;

        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(BrightError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_poller(where_clause: Option<&str>) -> Poller {
        let mut body = json!({
            "dsn": "postgres://localhost/app",
            "table": "products",
            "primary_key": "id",
            "updated_at_column": "updated_at",
        });
        if let Some(clause) = where_clause {
            body.as_object_mut()
                .unwrap()
                .insert("where_clause".to_string(), json!(clause));
        }
        Poller::new(PostgresConfig::parse(&body).unwrap())
    }

    #[test]
    fn test_full_sync_query_shapes() {
        let poller = test_poller(None);
        assert_eq!(
            poller.full_sync_query(false),
            "SELECT * FROM public.products  ORDER BY id::text LIMIT $1"
        );
        assert_eq!(
            poller.full_sync_query(true),
            "SELECT * FROM public.products WHERE id::text > $1  ORDER BY id::text LIMIT $2"
        );
    }

    #[test]
    fn test_where_clause_appended_everywhere() {
        let poller = test_poller(Some("active = true"));
        assert!(poller
            .full_sync_query(false)
            .contains("WHERE active = true"));
        assert!(poller
            .full_sync_query(true)
            .contains("AND active = true"));
        assert!(poller
            .incremental_query()
            .unwrap()
            .contains("AND active = true"));
    }

    #[test]
    fn test_incremental_query_orders_by_updated_at() {
        let poller = test_poller(None);
        assert_eq!(
            poller.incremental_query().unwrap(),
            "SELECT * FROM public.products WHERE updated_at > $1  ORDER BY updated_at LIMIT $2"
        );
    }

    #[test]
    fn test_reset_clears_cursor() {
        let poller = test_poller(None);
        poller.set_state(CursorState {
            last_sync_at: Some(Utc::now()),
            last_id: Some("99".to_string()),
            full_sync_complete: true,
        });

        poller.reset();
        let state = poller.state();
        assert!(state.last_sync_at.is_none());
        assert!(state.last_id.is_none());
        assert!(!state.full_sync_complete);
    }
}
