// Log tail: one polling task per subscription, delivering entries in timestamp order.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::{Engine, LogQuery};
use crate::error::{EngineError, with_timeout};
use crate::models::LogEntry;

#[derive(Debug, Clone)]
pub struct LogTailConfig {
    pub poll_interval: Duration,
    /// Entries fetched on the first poll of a subscription.
    pub history_lines: usize,
    pub channel_capacity: usize,
    pub request_timeout: Duration,
}

#[derive(Clone)]
pub struct LogTail {
    engine: Arc<dyn Engine>,
    config: LogTailConfig,
}

impl LogTail {
    pub fn new(engine: Arc<dyn Engine>, config: LogTailConfig) -> Self {
        Self { engine, config }
    }

    /// Start tailing `container_id`: the recent history window first, then new entries.
    pub fn subscribe(&self, container_id: &str) -> LogSubscription {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let task = tokio::spawn(pump(
            self.engine.clone(),
            container_id.to_string(),
            self.config.clone(),
            tx,
        ));
        debug!(container = container_id, "log subscription opened");
        LogSubscription {
            container_id: container_id.to_string(),
            rx,
            task,
        }
    }
}

/// A live tail. Yields entries until cancelled or dropped; a failed poll yields one
/// terminal error and ends the stream.
pub struct LogSubscription {
    container_id: String,
    rx: mpsc::Receiver<Result<LogEntry, EngineError>>,
    task: JoinHandle<()>,
}

impl LogSubscription {
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub async fn next_entry(&mut self) -> Option<Result<LogEntry, EngineError>> {
        self.rx.recv().await
    }

    /// Stop polling. Once this returns the poll task has finished and nothing more is delivered.
    pub async fn cancel(mut self) {
        self.rx.close();
        self.task.abort();
        let _ = (&mut self.task).await;
        debug!(container = %self.container_id, "log subscription cancelled");
    }
}

impl Stream for LogSubscription {
    type Item = Result<LogEntry, EngineError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn pump(
    engine: Arc<dyn Engine>,
    container_id: String,
    config: LogTailConfig,
    tx: mpsc::Sender<Result<LogEntry, EngineError>>,
) {
    let mut tick = tokio::time::interval(config.poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut cursor: Option<DateTime<Utc>> = None;

    loop {
        tick.tick().await;
        let query = match cursor {
            None => LogQuery {
                since: None,
                tail: Some(config.history_lines),
            },
            Some(since) => LogQuery {
                since: Some(since),
                tail: None,
            },
        };
        let batch = match with_timeout(config.request_timeout, engine.logs(&container_id, query))
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(container = %container_id, error = %e, "log poll failed; closing subscription");
                let _ = tx.send(Err(e)).await;
                return;
            }
        };
        for entry in order_batch(batch, cursor) {
            cursor = Some(entry.timestamp);
            if tx.send(Ok(entry)).await.is_err() {
                return;
            }
        }
    }
}

/// Sort a poll result by timestamp (stable, so same-instant lines keep engine order) and
/// drop anything not newer than `cursor`.
pub(crate) fn order_batch(
    mut batch: Vec<LogEntry>,
    cursor: Option<DateTime<Utc>>,
) -> Vec<LogEntry> {
    batch.sort_by_key(|e| e.timestamp);
    if let Some(cursor) = cursor {
        batch.retain(|e| e.timestamp > cursor);
    }
    batch
}
