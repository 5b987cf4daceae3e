// Background inventory poller: the single owner of periodic refreshes.
// Out-of-band refresh requests (after actions, POST /api/refresh) are coalesced through a
// capacity-1 channel and served by the same loop, so fetches never overlap.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, interval};
use tracing::Instrument;

use crate::error::EngineError;
use crate::fetcher::SnapshotFetcher;
use crate::models::ChangeSet;
use crate::store::InventoryStore;

/// Cloneable handle for asking the poller to refresh soon.
#[derive(Clone)]
pub struct RefreshHandle {
    tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Ask for a refresh. Returns false only if the poller has shut down;
    /// a request already pending absorbs this one.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Ask for a refresh once `delay` has elapsed.
    pub fn request_after(&self, delay: Duration) {
        if delay.is_zero() {
            self.request();
            return;
        }
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.request();
        });
    }
}

pub fn refresh_channel() -> (RefreshHandle, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (RefreshHandle { tx }, rx)
}

/// Per-refresh outcome. `Ok(None)` means the fetch succeeded but was stale and discarded.
#[derive(Debug)]
pub struct RefreshReport {
    pub containers: Result<Option<ChangeSet>, EngineError>,
    pub images: Result<Option<ChangeSet>, EngineError>,
}

impl RefreshReport {
    pub fn is_ok(&self) -> bool {
        self.containers.is_ok() && self.images.is_ok()
    }
}

/// Fetch containers and images concurrently and reconcile whatever arrived.
/// A failed fetch leaves the last good snapshot in place.
pub async fn refresh_once(
    fetcher: &SnapshotFetcher,
    store: &InventoryStore,
    request_timeout: Duration,
    collect_stats: bool,
) -> RefreshReport {
    let containers_seq = store.begin_fetch();
    let images_seq = store.begin_fetch();
    let (containers, images) = tokio::join!(
        fetcher.fetch_containers(request_timeout),
        fetcher.fetch_images(request_timeout),
    );

    let containers = match containers {
        Ok(snapshot) => Ok(store.reconcile_containers(containers_seq, snapshot).await),
        Err(e) => Err(e),
    };
    let images = match images {
        Ok(snapshot) => Ok(store.reconcile_images(images_seq, snapshot).await),
        Err(e) => Err(e),
    };

    if collect_stats && containers.is_ok() {
        let running = store.running_ids().await;
        if !running.is_empty() {
            let samples = fetcher.fetch_stats_many(&running, request_timeout).await;
            store.update_stats(samples).await;
        }
    }

    RefreshReport { containers, images }
}

/// Store, fetcher and channels for the poller.
pub struct PollerDeps {
    pub fetcher: SnapshotFetcher,
    pub store: Arc<InventoryStore>,
    pub refresh_rx: mpsc::Receiver<()>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

/// Poller timing and logging config.
pub struct PollerConfig {
    pub interval_ms: u64,
    pub request_timeout_ms: u64,
    pub collect_stats: bool,
    /// How often to log app stats (real seconds).
    pub stats_log_interval_secs: u64,
}

pub fn spawn(deps: PollerDeps, config: PollerConfig) -> tokio::task::JoinHandle<()> {
    let PollerDeps {
        fetcher,
        store,
        mut refresh_rx,
        mut shutdown_rx,
    } = deps;
    let PollerConfig {
        interval_ms,
        request_timeout_ms,
        collect_stats,
        stats_log_interval_secs,
    } = config;
    let request_timeout = Duration::from_millis(request_timeout_ms);
    let poller_span = tracing::span!(tracing::Level::DEBUG, "poller", interval_ms);

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_millis(interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_log_tick = interval(Duration::from_secs(stats_log_interval_secs));
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut refresh_open = true;
        let mut refreshes_failed_total: u64 = 0;

        loop {
            let trigger = tokio::select! {
                _ = tick.tick() => "interval",
                request = refresh_rx.recv(), if refresh_open => {
                    if request.is_none() {
                        refresh_open = false;
                        continue;
                    }
                    "requested"
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Poller shutting down");
                    break;
                }
                _ = stats_log_tick.tick() => {
                    let summary = store.summary().await;
                    tracing::info!(
                        event_subscribers = store.subscriber_count(),
                        containers = summary.containers,
                        running = summary.running,
                        images = summary.images,
                        refreshes_failed_total,
                        "app stats"
                    );
                    continue;
                }
            };

            // Shutdown abandons an in-flight refresh; its result would be discarded anyway.
            let report = tokio::select! {
                report = refresh_once(&fetcher, &store, request_timeout, collect_stats) => report,
                _ = &mut shutdown_rx => {
                    tracing::debug!("Poller shutting down mid-refresh");
                    break;
                }
            };
            if let Err(e) = &report.containers {
                tracing::warn!(
                    error = %e,
                    trigger,
                    operation = "fetch_containers",
                    "container refresh failed; keeping last snapshot"
                );
            }
            if let Err(e) = &report.images {
                tracing::warn!(
                    error = %e,
                    trigger,
                    operation = "fetch_images",
                    "image refresh failed; keeping last snapshot"
                );
            }
            if report.is_ok() {
                tracing::debug!(trigger, "inventory refreshed");
            } else {
                refreshes_failed_total += 1;
            }
        }
    }
    .instrument(poller_span))
}
