use tokio_postgres::Client;

use super::config::PostgresConfig;
use crate::error::Result;

pub const SYNC_TABLE: &str = "__bright_synchronization";
pub const DELETES_TABLE: &str = "__bright_synchronization_deletes";

/// DDL for the cursor tables and the per-table triggers. All trigger and
/// function names are suffixed with the table name so many ingresses can
/// share one database.
pub struct Schema<'a> {
    client: &'a Client,
    config: &'a PostgresConfig,
}

impl<'a> Schema<'a> {
    pub fn new(client: &'a Client, config: &'a PostgresConfig) -> Self {
        Self { client, config }
    }

    /// Create the cursor and delete-tracking tables if absent
    pub async fn create_sync_tables(&self) -> Result<()> {
        self.client
            .batch_execute(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {sync} (
                    table_name VARCHAR(255) PRIMARY KEY,
                    last_sync_at TIMESTAMPTZ,
                    last_id TEXT,
                    full_sync_complete BOOLEAN DEFAULT FALSE,
                    updated_at TIMESTAMPTZ DEFAULT NOW()
                );
                CREATE TABLE IF NOT EXISTS {deletes} (
                    id SERIAL PRIMARY KEY,
                    source_table VARCHAR(255) NOT NULL,
                    deleted_id TEXT NOT NULL,
                    deleted_at TIMESTAMPTZ DEFAULT NOW()
                );
                CREATE INDEX IF NOT EXISTS idx_bright_deletes_table_time
                ON {deletes}(source_table, deleted_at);
                "#,
                sync = SYNC_TABLE,
                deletes = DELETES_TABLE,
            ))
            .await?;
        Ok(())
    }

    /// Install the AFTER DELETE trigger feeding the delete-tracking table
    pub async fn create_delete_trigger(&self) -> Result<()> {
        let table = &self.config.table;
        let full_table = self.config.full_table_name();
        let primary_key = &self.config.primary_key;
        let func = format!("__bright_track_deletes_{}", table);
        let trigger = format!("__bright_delete_trigger_{}", table);

        self.client
            .batch_execute(&format!(
                r#"
                CREATE OR REPLACE FUNCTION {func}()
                RETURNS TRIGGER AS $$
                BEGIN
                    INSERT INTO {deletes} (source_table, deleted_id)
                    VALUES ('{table}', OLD.{pk}::TEXT);
                    RETURN OLD;
                END;
                $$ LANGUAGE plpgsql;
                DROP TRIGGER IF EXISTS {trigger} ON {full_table};
                CREATE TRIGGER {trigger}
                AFTER DELETE ON {full_table}
                FOR EACH ROW EXECUTE FUNCTION {func}();
                "#,
                func = func,
                deletes = DELETES_TABLE,
                table = table,
                pk = primary_key,
                trigger = trigger,
                full_table = full_table,
            ))
            .await?;
        Ok(())
    }

    /// Install the notify trigger used by listen mode; each row change
    /// publishes `{"op": ..., "id": ...}` on the configured channel
    pub async fn create_notify_trigger(&self) -> Result<()> {
        let table = &self.config.table;
        let full_table = self.config.full_table_name();
        let primary_key = &self.config.primary_key;
        let channel = self.config.notify_channel();
        let func = format!("__bright_notify_{}", table);
        let trigger = format!("__bright_notify_trigger_{}", table);

        self.client
            .batch_execute(&format!(
                r#"
                CREATE OR REPLACE FUNCTION {func}()
                RETURNS TRIGGER AS $$
                BEGIN
                    PERFORM pg_notify('{channel}',
                        json_build_object(
                            'op', TG_OP,
                            'id', COALESCE(NEW.{pk}, OLD.{pk})::TEXT
                        )::TEXT
                    );
                    RETURN COALESCE(NEW, OLD);
                END;
                $$ LANGUAGE plpgsql;
                DROP TRIGGER IF EXISTS {trigger} ON {full_table};
                CREATE TRIGGER {trigger}
                AFTER INSERT OR UPDATE OR DELETE ON {full_table}
                FOR EACH ROW EXECUTE FUNCTION {func}();
                "#,
                func = func,
                channel = channel,
                pk = primary_key,
                trigger = trigger,
                full_table = full_table,
            ))
            .await?;
        Ok(())
    }

    /// Best-effort removal of the triggers and functions for this table
    pub async fn drop_triggers(&self) -> Result<()> {
        let table = &self.config.table;
        let full_table = self.config.full_table_name();

        let statements = [
            format!(
                "DROP TRIGGER IF EXISTS __bright_delete_trigger_{} ON {}",
                table, full_table
            ),
            format!(
                "DROP TRIGGER IF EXISTS __bright_notify_trigger_{} ON {}",
                table, full_table
            ),
            format!("DROP FUNCTION IF EXISTS __bright_track_deletes_{}()", table),
            format!("DROP FUNCTION IF EXISTS __bright_notify_{}()", table),
        ];

        for statement in statements {
            let _ = self.client.batch_execute(&statement).await;
        }
        Ok(())
    }
}
