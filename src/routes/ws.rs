// WebSocket handlers: inventory change events and per-container log tails

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::logs::LogSubscription;
use crate::models::InventoryEvent;
use crate::store::InventoryStore;

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Send one text frame; false when the client is gone or too slow.
async fn send_text(socket: &mut WebSocket, json: String) -> bool {
    let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await;
    matches!(r, Ok(Ok(())))
}

async fn send_ping(socket: &mut WebSocket) -> bool {
    let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await;
    matches!(r, Ok(Ok(())))
}

pub(super) async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let store = state.store.clone();
    ws.on_upgrade(move |socket| async move {
        let mut rx = store.subscribe();
        if let Err(e) = stream_events(socket, &mut rx, store).await {
            tracing::info!("Events stream error: {}", e);
        }
    })
}

async fn stream_events(
    mut socket: WebSocket,
    rx: &mut broadcast::Receiver<InventoryEvent>,
    store: Arc<InventoryStore>,
) -> anyhow::Result<()> {
    tracing::info!("Client connected to events stream");

    // Current counts first so a client can render before the next change arrives.
    let welcome = serde_json::json!({ "type": "summary", "summary": store.summary().await });
    if !send_text(&mut socket, serde_json::to_string(&welcome)?).await {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_text(&mut socket, serde_json::to_string(&event)?).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket /ws/events client lagged, skipped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                if matches!(incoming, None | Some(Ok(Message::Close(_))) | Some(Err(_))) {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if !send_ping(&mut socket).await {
                    break;
                }
            }
        }
    }
    Ok(())
}

pub(super) async fn ws_logs(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let log_tail = state.log_tail.clone();
    ws.on_upgrade(move |socket| async move {
        let subscription = log_tail.subscribe(&id);
        if let Err(e) = stream_logs(socket, subscription).await {
            tracing::info!(container = %id, "Log stream error: {}", e);
        }
    })
}

async fn stream_logs(mut socket: WebSocket, mut logs: LogSubscription) -> anyhow::Result<()> {
    tracing::info!(container = logs.container_id(), "Client connected to log stream");
    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            item = logs.next() => {
                match item {
                    Some(Ok(entry)) => {
                        if !send_text(&mut socket, serde_json::to_string(&entry)?).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        let msg = serde_json::json!({
                            "type": "error",
                            "kind": e.kind(),
                            "error": e.to_string(),
                        });
                        send_text(&mut socket, serde_json::to_string(&msg)?).await;
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                if matches!(incoming, None | Some(Ok(Message::Close(_))) | Some(Err(_))) {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if !send_ping(&mut socket).await {
                    break;
                }
            }
        }
    }
    logs.cancel().await;
    Ok(())
}
