use anyhow::Result;
use dockboard::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let engine: Arc<dyn engine::Engine> = Arc::new(engine::DockerEngine::connect(
        app_config.engine.socket.as_deref(),
    )?);
    let store = Arc::new(store::InventoryStore::new(
        app_config.polling.broadcast_capacity,
    ));
    let fetcher = fetcher::SnapshotFetcher::new(engine.clone());
    let (refresh, refresh_rx) = poller::refresh_channel();
    let dispatcher = Arc::new(dispatcher::Dispatcher::new(
        engine.clone(),
        store.clone(),
        refresh.clone(),
        app_config.refresh_delay(),
    ));
    let log_tail = logs::LogTail::new(engine.clone(), app_config.log_tail_config());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let poller_handle = poller::spawn(
        poller::PollerDeps {
            fetcher: fetcher.clone(),
            store: store.clone(),
            refresh_rx,
            shutdown_rx,
        },
        poller::PollerConfig {
            interval_ms: app_config.polling.interval_ms,
            request_timeout_ms: app_config.engine.request_timeout_ms,
            collect_stats: app_config.polling.collect_stats,
            stats_log_interval_secs: app_config.monitoring.stats_log_interval_secs,
        },
    );

    let app = routes::app(
        routes::AppDeps {
            store,
            fetcher,
            dispatcher,
            log_tail,
            refresh,
        },
        app_config.clone(),
    );
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
            let _ = poller_handle.await;
        }
    }

    Ok(())
}
