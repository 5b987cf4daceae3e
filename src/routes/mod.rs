// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::fetcher::SnapshotFetcher;
use crate::logs::LogTail;
use crate::poller::RefreshHandle;
use crate::store::InventoryStore;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<InventoryStore>,
    pub(crate) fetcher: SnapshotFetcher,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) log_tail: LogTail,
    pub(crate) refresh: RefreshHandle,
    pub(crate) config: AppConfig,
}

/// Shared components the API serves from.
pub struct AppDeps {
    pub store: Arc<InventoryStore>,
    pub fetcher: SnapshotFetcher,
    pub dispatcher: Arc<Dispatcher>,
    pub log_tail: LogTail,
    pub refresh: RefreshHandle,
}

pub fn app(deps: AppDeps, config: AppConfig) -> Router {
    let AppDeps {
        store,
        fetcher,
        dispatcher,
        log_tail,
        refresh,
    } = deps;
    let state = AppState {
        store,
        fetcher,
        dispatcher,
        log_tail,
        refresh,
        config,
    };
    Router::new()
        .route("/", get(|| async { "dockboard: container inventory service" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/containers", get(http::list_containers)) // GET /api/containers
        .route("/api/containers/{id}", get(http::get_container)) // GET /api/containers/{id}
        .route(
            "/api/containers/{id}/stats",
            get(http::get_container_stats), // GET /api/containers/{id}/stats
        )
        .route(
            "/api/containers/{id}/{action}",
            post(http::dispatch_action), // POST /api/containers/{id}/{start|stop|restart}
        )
        .route("/api/images", get(http::list_images)) // GET /api/images
        .route("/api/images/{id}", get(http::get_image)) // GET /api/images/{id}
        .route("/api/summary", get(http::summary_handler)) // GET /api/summary
        .route("/api/info", get(http::engine_info_handler)) // GET /api/info
        .route("/api/refresh", post(http::refresh_handler)) // POST /api/refresh
        .route("/ws/events", get(ws::ws_events)) // WS /ws/events
        .route("/ws/logs/{id}", get(ws::ws_logs)) // WS /ws/logs/{id}
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
