use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::PostgresConfig;
use crate::error::Result;

/// Flush pending notifications at this size or age, whichever first
const BATCH_SIZE: usize = 100;
const BATCH_TIMEOUT: Duration = Duration::from_millis(100);

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Payload published by the notify trigger
#[derive(Clone, Debug, Deserialize)]
pub struct NotifyPayload {
    pub op: String,
    pub id: String,
}

/// Consumer of batched notifications
#[async_trait]
pub trait NotifyHandler: Send + Sync {
    async fn handle_notify(&self, op: &str, id: &str) -> Result<()>;
}

/// LISTEN/NOTIFY synchronization: a dedicated connection subscribed to the
/// ingress channel, batching events before they reach the handler.
pub struct Listener {
    config: PostgresConfig,
}

impl Listener {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }

    /// Run until cancelled, reconnecting after connection loss
    pub async fn run(&self, cancel: CancellationToken, handler: Arc<dyn NotifyHandler>) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            if let Err(e) = self.run_once(&cancel, &handler).await {
                warn!(error = %e, "listener connection failed");
            }

            if cancel.is_cancelled() {
                return;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn run_once(
        &self,
        cancel: &CancellationToken,
        handler: &Arc<dyn NotifyHandler>,
    ) -> Result<()> {
        let (client, mut connection) = tokio_postgres::connect(&self.config.dsn, NoTls).await?;

        // The driver future owns the socket; notifications surface through
        // its message stream, not the client.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver_cancel = cancel.clone();
        let driver = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = driver_cancel.cancelled() => break,
                    message = std::future::poll_fn(|cx| connection.poll_message(cx)) => message,
                };

                match message {
                    Some(Ok(AsyncMessage::Notification(notification))) => {
                        if tx.send(notification).is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "error waiting for notification");
                        break;
                    }
                    None => break,
                }
            }
        });

        let channel = self.config.notify_channel();
        client.batch_execute(&format!("LISTEN {}", channel)).await?;
        info!(channel = %channel, "listening for notifications");

        let mut pending: Vec<NotifyPayload> = Vec::new();
        let mut flush = tokio::time::interval(BATCH_TIMEOUT);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = flush.tick() => {
                    drain(&mut pending, handler).await;
                }
                notification = rx.recv() => {
                    let Some(notification) = notification else {
                        // Connection dropped; flush what we have and resync
                        drain(&mut pending, handler).await;
                        driver.abort();
                        return Err(crate::error::BrightError::Ingress(
                            "notification stream closed".to_string(),
                        ));
                    };

                    match serde_json::from_str::<NotifyPayload>(notification.payload()) {
                        Ok(payload) => pending.push(payload),
                        Err(e) => {
                            warn!(
                                payload = %notification.payload(),
                                error = %e,
                                "failed to parse notification payload"
                            );
                        }
                    }

                    if pending.len() >= BATCH_SIZE {
                        drain(&mut pending, handler).await;
                    }
                }
            }
        }

        drain(&mut pending, handler).await;
        driver.abort();
        Ok(())
    }
}

async fn drain(pending: &mut Vec<NotifyPayload>, handler: &Arc<dyn NotifyHandler>) {
    for payload in pending.drain(..) {
        if let Err(e) = handler.handle_notify(&payload.op, &payload.id).await {
            warn!(op = %payload.op, id = %payload.id, error = %e, "failed to process notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_payload_parses_trigger_output() {
        let payload: NotifyPayload =
            serde_json::from_str(r#"{"op":"INSERT","id":"42"}"#).unwrap();
        assert_eq!(payload.op, "INSERT");
        assert_eq!(payload.id, "42");
    }

    #[test]
    fn test_notify_payload_rejects_garbage() {
        assert!(serde_json::from_str::<NotifyPayload>("not json").is_err());
    }
}
