pub mod config;
pub mod connector;
pub mod listener;
pub mod mapper;
pub mod poller;
pub mod schema;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_postgres::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use self::config::{PostgresConfig, SyncMode};
use self::connector::{Connector, PgConnection};
use self::listener::{Listener, NotifyHandler};
use self::mapper::Mapper;
use self::poller::{CursorState, DeliverySink, Poller};
use self::schema::{Schema, SYNC_TABLE};
use super::{Ingress, IngressConfig, IngressContext, IngressStatus, Statistics};
use crate::error::{BrightError, Result};
use crate::models::{Command, Document};

/// Ingress-originated batches get a longer apply deadline than edge writes
const APPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct StatsInner {
    documents_synced: u64,
    documents_deleted: u64,
    last_error: Option<String>,
    error_count: u64,
}

struct Runtime {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    connection: PgConnection,
}

/// Projects one PostgreSQL table into one index with at-least-once
/// delivery; the replicated upsert makes re-delivery harmless.
pub struct PostgresIngress {
    id: String,
    index_id: String,
    config: PostgresConfig,
    raw_config: serde_json::Value,
    ctx: IngressContext,
    poller: Poller,
    mapper: Mapper,
    status: RwLock<IngressStatus>,
    stats: Mutex<StatsInner>,
    runtime: AsyncMutex<Option<Runtime>>,
}

/// Factory registered with the ingress manager under the type `postgres`
pub fn factory(
    cfg: IngressConfig,
    ctx: IngressContext,
) -> Result<Arc<dyn Ingress>> {
    Ok(PostgresIngress::new(cfg, ctx)?)
}

impl PostgresIngress {
    pub fn new(cfg: IngressConfig, ctx: IngressContext) -> Result<Arc<Self>> {
        let config = PostgresConfig::parse(&cfg.config)?;

        Ok(Arc::new(Self {
            id: cfg.id,
            index_id: cfg.index_id,
            poller: Poller::new(config.clone()),
            mapper: Mapper::new(config.clone()),
            config,
            raw_config: cfg.config,
            ctx,
            status: RwLock::new(IngressStatus::Stopped),
            stats: Mutex::new(StatsInner::default()),
            runtime: AsyncMutex::new(None),
        }))
    }

    fn set_status(&self, status: IngressStatus) {
        *self.status.write() = status;
    }

    fn record_error(&self, message: String) {
        error!(ingress = %self.id, error = %message, "ingress error");
        let mut stats = self.stats.lock();
        stats.last_error = Some(message);
        stats.error_count += 1;
    }

    async fn client(&self) -> Option<Arc<Client>> {
        self.runtime
            .lock()
            .await
            .as_ref()
            .map(|runtime| Arc::clone(&runtime.connection.client))
    }

    async fn load_state(&self, client: &Client) {
        let query = format!(
            "SELECT last_sync_at, last_id, full_sync_complete FROM {} WHERE table_name = $1",
            SYNC_TABLE
        );
        let row = match client
            .query_opt(query.as_str(), &[&self.config.table])
            .await
        {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "failed to load sync state, starting fresh");
                return;
            }
        };

        if let Some(row) = row {
            self.poller.set_state(CursorState {
                last_sync_at: row.get(0),
                last_id: row.get(1),
                full_sync_complete: row.get(2),
            });
        }
    }

    async fn save_state(&self, client: &Client) {
        let state = self.poller.state();
        let query = format!(
            "INSERT INTO {table} (table_name, last_sync_at, last_id, full_sync_complete, updated_at) \
             VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (table_name) DO UPDATE SET \
                 last_sync_at = EXCLUDED.last_sync_at, \
                 last_id = EXCLUDED.last_id, \
                 full_sync_complete = EXCLUDED.full_sync_complete, \
                 updated_at = NOW()",
            table = SYNC_TABLE
        );
        let result = client
            .execute(
                query.as_str(),
                &[
                    &self.config.table,
                    &state.last_sync_at,
                    &state.last_id,
                    &state.full_sync_complete,
                ],
            )
            .await;

        if let Err(e) = result {
            warn!(error = %e, "failed to save sync state");
        }
    }

    async fn do_poll(&self, client: &Client) {
        if *self.status.read() == IngressStatus::Running {
            self.set_status(IngressStatus::Syncing);
        }

        let sink: &dyn DeliverySink = self;
        match self.poller.poll(client, sink).await {
            Ok(()) => {
                self.save_state(client).await;
            }
            Err(e) => {
                self.record_error(format!("poll failed: {}", e));
            }
        }

        if *self.status.read() == IngressStatus::Syncing {
            self.set_status(IngressStatus::Running);
        }
    }

    async fn fetch_document(&self, client: &Client, id: &str) -> Result<Option<Document>> {
        let query = format!(
            "SELECT {} FROM {} WHERE {}::text = $1",
            self.config.select_columns(),
            self.config.full_table_name(),
            self.config.primary_key,
        );

        let row = client.query_opt(query.as_str(), &[&id]).await?;
        match row {
            Some(row) => Ok(Some(self.mapper.row_to_document(&row)?)),
            None => Ok(None),
        }
    }
}

fn spawn_poll_loop(
    ingress: Arc<PostgresIngress>,
    client: Arc<Client>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ingress.config.poll_interval);
        let mut client = client;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if *ingress.status.read() == IngressStatus::Paused {
                        continue;
                    }

                    if client.is_closed() {
                        let connector = Connector::new(&ingress.config.dsn);
                        match connector.connect_with_backoff(&cancel).await {
                            Ok(connection) => {
                                client = Arc::clone(&connection.client);
                                // Skip the swap during shutdown; the driver
                                // task keeps the fresh client alive either way
                                if let Ok(mut guard) = ingress.runtime.try_lock() {
                                    if let Some(runtime) = guard.as_mut() {
                                        runtime.connection.abort();
                                        runtime.connection = connection;
                                    }
                                }
                            }
                            Err(e) => {
                                ingress.record_error(format!("reconnect failed: {}", e));
                                ingress.set_status(IngressStatus::Error);
                                return;
                            }
                        }
                    }

                    ingress.do_poll(&client).await;
                }
            }
        }
    })
}

#[async_trait]
impl Ingress for PostgresIngress {
    fn id(&self) -> &str {
        &self.id
    }

    fn index_id(&self) -> &str {
        &self.index_id
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }

    fn status(&self) -> IngressStatus {
        *self.status.read()
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Ok(());
        }

        self.set_status(IngressStatus::Starting);
        info!(ingress = %self.id, index = %self.index_id, "starting postgres ingress");

        let connection = match Connector::new(&self.config.dsn).connect().await {
            Ok(connection) => connection,
            Err(e) => {
                self.record_error(format!("connection failed: {}", e));
                self.set_status(IngressStatus::Error);
                return Err(e);
            }
        };
        let client = Arc::clone(&connection.client);

        let schema = Schema::new(&client, &self.config);
        if let Err(e) = schema.create_sync_tables().await {
            self.record_error(format!("failed to create sync tables: {}", e));
            self.set_status(IngressStatus::Error);
            connection.abort();
            return Err(e);
        }

        if self.config.auto_triggers {
            if let Err(e) = schema.create_delete_trigger().await {
                warn!(error = %e, "failed to create delete trigger");
            }
            if self.config.sync_mode == SyncMode::Listen {
                if let Err(e) = schema.create_notify_trigger().await {
                    warn!(error = %e, "failed to create notify trigger");
                }
            }
        }

        self.load_state(&client).await;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        match self.config.sync_mode {
            SyncMode::Polling => {
                tasks.push(spawn_poll_loop(
                    Arc::clone(&self),
                    Arc::clone(&client),
                    cancel.clone(),
                ));
            }
            SyncMode::Listen => {
                if !self.poller.state().full_sync_complete {
                    info!(ingress = %self.id, "performing initial full sync before listening");
                    let sink: &dyn DeliverySink = self.as_ref();
                    if let Err(e) = self.poller.poll(&client, sink).await {
                        self.record_error(format!("initial sync failed: {}", e));
                        self.set_status(IngressStatus::Error);
                        connection.abort();
                        return Err(e);
                    }
                    self.save_state(&client).await;
                }

                let listener = Listener::new(self.config.clone());
                let handler: Arc<dyn NotifyHandler> = Arc::clone(&self) as Arc<dyn NotifyHandler>;
                let listener_cancel = cancel.clone();
                tasks.push(tokio::spawn(async move {
                    listener.run(listener_cancel, handler).await;
                }));
            }
        }

        *runtime = Some(Runtime {
            cancel,
            tasks,
            connection,
        });
        drop(runtime);

        self.set_status(IngressStatus::Running);
        info!(ingress = %self.id, sync_mode = ?self.config.sync_mode, "postgres ingress started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        let Some(runtime) = runtime.take() else {
            self.set_status(IngressStatus::Stopped);
            return Ok(());
        };

        info!(ingress = %self.id, "stopping postgres ingress");
        runtime.cancel.cancel();
        for task in runtime.tasks {
            let _ = task.await;
        }

        self.save_state(&runtime.connection.client).await;
        runtime.connection.abort();

        self.set_status(IngressStatus::Stopped);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        let mut status = self.status.write();
        if !matches!(*status, IngressStatus::Running | IngressStatus::Syncing) {
            return Err(BrightError::Ingress("ingress is not running".to_string()));
        }
        *status = IngressStatus::Paused;
        info!(ingress = %self.id, "postgres ingress paused");
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        let mut status = self.status.write();
        if *status != IngressStatus::Paused {
            return Err(BrightError::Ingress("ingress is not paused".to_string()));
        }
        *status = IngressStatus::Running;
        info!(ingress = %self.id, "postgres ingress resumed");
        Ok(())
    }

    async fn resync(&self) -> Result<()> {
        if !matches!(
            self.status(),
            IngressStatus::Running | IngressStatus::Syncing | IngressStatus::Paused
        ) {
            return Err(BrightError::Ingress(
                "resync requires a running or paused ingress".to_string(),
            ));
        }

        info!(ingress = %self.id, "triggering full resync");
        self.poller.reset();

        {
            let mut stats = self.stats.lock();
            stats.documents_synced = 0;
            stats.documents_deleted = 0;
        }

        if let Some(client) = self.client().await {
            let query = format!("DELETE FROM {} WHERE table_name = $1", SYNC_TABLE);
            let result = client
                .execute(query.as_str(), &[&self.config.table])
                .await;
            if let Err(e) = result {
                warn!(error = %e, "failed to clear sync state");
            }
        }

        Ok(())
    }

    fn statistics(&self) -> Statistics {
        let stats = self.stats.lock();
        let cursor = self.poller.state();
        Statistics {
            last_sync_at: cursor.last_sync_at,
            documents_synced: stats.documents_synced,
            documents_deleted: stats.documents_deleted,
            full_sync_complete: cursor.full_sync_complete,
            last_error: stats.last_error.clone(),
            error_count: stats.error_count,
        }
    }

    fn config(&self) -> serde_json::Value {
        self.raw_config.clone()
    }

    async fn teardown(&self) -> Result<()> {
        if !self.config.auto_triggers {
            return Ok(());
        }

        let connection = Connector::new(&self.config.dsn).connect().await?;
        Schema::new(&connection.client, &self.config)
            .drop_triggers()
            .await?;
        connection.abort();
        Ok(())
    }
}

#[async_trait]
impl DeliverySink for PostgresIngress {
    /// Delivery path: replicate through the leader's raft log, write the
    /// store directly when clustering is off, and no-op on followers (the
    /// leader's ingress does the work).
    async fn deliver_documents(&self, documents: Vec<Document>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let count = documents.len() as u64;

        match &self.ctx.node {
            Some(node) => {
                if !node.is_leader().await {
                    return Ok(());
                }
                node.apply(
                    Command::AddDocuments {
                        index_id: self.index_id.clone(),
                        documents,
                    },
                    APPLY_TIMEOUT,
                )
                .await?;
            }
            None => {
                self.ctx.store.add_documents(&self.index_id, &documents)?;
            }
        }

        self.stats.lock().documents_synced += count;
        self.ctx.metrics.ingress_documents_synced.inc_by(count as f64);
        Ok(())
    }

    async fn deliver_deletes(&self, ids: Vec<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let count = ids.len() as u64;

        match &self.ctx.node {
            Some(node) => {
                if !node.is_leader().await {
                    return Ok(());
                }
                node.apply(
                    Command::DeleteDocuments {
                        index_id: self.index_id.clone(),
                        filter: String::new(),
                        ids,
                    },
                    APPLY_TIMEOUT,
                )
                .await?;
            }
            None => {
                self.ctx.store.delete_documents(&self.index_id, "", &ids)?;
            }
        }

        self.stats.lock().documents_deleted += count;
        self.ctx.metrics.ingress_documents_deleted.inc_by(count as f64);
        Ok(())
    }
}

#[async_trait]
impl NotifyHandler for PostgresIngress {
    async fn handle_notify(&self, op: &str, id: &str) -> Result<()> {
        match op {
            "INSERT" | "UPDATE" => {
                let Some(client) = self.client().await else {
                    return Ok(());
                };
                if let Some(document) = self.fetch_document(&client, id).await? {
                    self.deliver_documents(vec![document]).await?;
                }
            }
            "DELETE" => {
                self.deliver_deletes(vec![id.to_string()]).await?;
            }
            other => {
                warn!(op = %other, "ignoring unknown notification op");
            }
        }
        Ok(())
    }
}
