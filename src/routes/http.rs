// HTTP handlers: inventory reads, actions, engine info, refresh

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::dispatcher::Action;
use crate::error::{ActionError, EngineError, ErrorKind};

/// JSON error body: `{"error": "...", "kind": "..."}`.
pub(super) struct ApiError {
    status: StatusCode,
    kind: Option<ErrorKind>,
    message: String,
}

impl ApiError {
    fn not_found(what: &str, id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: None,
            message: format!("{} {} not found", what, id),
        }
    }
}

/// HTTP status for an error kind.
pub(super) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::EngineUnreachable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::EngineError => StatusCode::BAD_GATEWAY,
        ErrorKind::InvalidState | ErrorKind::ActionInProgress => StatusCode::CONFLICT,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

/// Like [`status_for`], except that a missing container or image at the engine stays a 404.
fn engine_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::Api { status, .. } if *status == StatusCode::NOT_FOUND.as_u16() => {
            StatusCode::NOT_FOUND
        }
        other => status_for(other.kind()),
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self {
            status: engine_status(&e),
            kind: Some(e.kind()),
            message: e.to_string(),
        }
    }
}

impl From<ActionError> for ApiError {
    fn from(e: ActionError) -> Self {
        let status = e
            .cause
            .as_ref()
            .map(engine_status)
            .unwrap_or_else(|| status_for(e.kind));
        Self {
            status,
            kind: Some(e.kind),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message, "kind": self.kind });
        (self.status, Json(body)).into_response()
    }
}

/// GET /version: package name and version baked in at build time.
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/containers: last known containers with provenance and latest stats.
pub(super) async fn list_containers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.containers().await)
}

pub(super) async fn get_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .store
        .container(&id)
        .await
        .ok_or_else(|| ApiError::not_found("container", &id))?;
    Ok(Json(view))
}

pub(super) async fn get_container_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .store
        .stats(&id)
        .await
        .ok_or_else(|| ApiError::not_found("stats for container", &id))?;
    Ok(Json(stats))
}

/// POST /api/containers/{id}/{action}: 202 once the engine accepted the action.
pub(super) async fn dispatch_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let action: Action = action.parse().map_err(|e: crate::dispatcher::UnknownAction| ApiError {
        status: StatusCode::BAD_REQUEST,
        kind: None,
        message: e.to_string(),
    })?;
    state
        .dispatcher
        .dispatch(&id, action, state.config.action_timeout())
        .await?;
    let container = state.store.container(&id).await;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "containerId": id,
            "action": action,
            "container": container,
        })),
    ))
}

pub(super) async fn list_images(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.images().await)
}

pub(super) async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let image = state
        .store
        .image(&id)
        .await
        .ok_or_else(|| ApiError::not_found("image", &id))?;
    Ok(Json(image))
}

/// GET /api/summary: counts from the last known snapshot (served even while refreshes fail).
pub(super) async fn summary_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.summary().await)
}

/// GET /api/info: live engine info.
pub(super) async fn engine_info_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let info = state
        .fetcher
        .fetch_engine_info(state.config.request_timeout())
        .await?;
    Ok(Json(info))
}

/// POST /api/refresh: ask the poller for an immediate refresh.
pub(super) async fn refresh_handler(State(state): State<AppState>) -> Response {
    if state.refresh.request() {
        StatusCode::ACCEPTED.into_response()
    } else {
        ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            kind: None,
            message: "poller is not running".into(),
        }
        .into_response()
    }
}
