use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{BrightError, Result};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);
const MAX_ATTEMPTS: usize = 30;

/// One live connection: the client plus its spawned driver task
pub struct PgConnection {
    pub client: Arc<Client>,
    driver: JoinHandle<()>,
}

impl PgConnection {
    pub fn abort(&self) {
        self.driver.abort();
    }
}

/// Opens connections to the source database, with exponential backoff on
/// reconnect. Cursor state lives in the source database, so a reconnect
/// resumes exactly where the last connection left off.
pub struct Connector {
    dsn: String,
}

impl Connector {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }

    /// Open a single connection and spawn its driver task
    pub async fn connect(&self) -> Result<PgConnection> {
        let (client, connection) = tokio_postgres::connect(&self.dsn, NoTls).await?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection terminated");
            }
        });

        Ok(PgConnection {
            client: Arc::new(client),
            driver,
        })
    }

    /// Reconnect with exponential backoff: 1s doubling to 5 minutes, up to
    /// 30 attempts. Honors cancellation at every wait.
    pub async fn connect_with_backoff(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PgConnection> {
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 1..=MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(BrightError::Ingress("connect cancelled".to_string()));
            }

            match self.connect().await {
                Ok(connection) => {
                    if attempt > 1 {
                        info!(attempt, "reconnected to postgres");
                    }
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "failed to connect to postgres"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(BrightError::Ingress("connect cancelled".to_string()));
                }
                _ = tokio::time::sleep(backoff) => {}
            }

            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        Err(BrightError::Ingress(format!(
            "failed to connect after {} attempts",
            MAX_ATTEMPTS
        )))
    }
}
