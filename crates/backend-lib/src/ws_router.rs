// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
/** WebSocket router for the room chat server.
This module accepts WebSocket connections, pumps frames between the socket and
the `ConnectionGateway`, and exposes a small read-only HTTP surface. */
use crate::{
    error::AppError,
    registry::{RoomSnapshot, RoomSummary},
    AppState,
};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/rooms", get(rooms_handler))
        .route("/rooms/{room}", get(room_handler))
        .layer(TraceLayer::new_for_http());

    let router = if state.settings.allow_any_origin {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "Healthy"
}

async fn rooms_handler(State(state): State<Arc<AppState>>) -> Json<Vec<RoomSummary>> {
    Json(state.gateway.rooms())
}

async fn room_handler(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> Result<Json<RoomSnapshot>, AppError> {
    state
        .gateway
        .room(&room)
        .map(Json)
        .ok_or(AppError::RoomNotFound(room))
}

/// Handle WebSocket connections
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    tracing::debug!("WebSocket connection attempt from: {}", addr);
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, mut rx) = state.gateway.accept();
    let ping_interval = state.settings.ping_interval();
    let idle_timeout = state.settings.idle_timeout();

    tracing::info!(%connection_id, %addr, "WebSocket connection established");

    // Forward queued events to the socket and keep the peer alive with pings
    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        // the first tick completes immediately
        ping.tick().await;

        loop {
            tokio::select! {
                next = rx.recv() => {
                    let Some(event) = next else { break };
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                tracing::debug!(%connection_id, "socket closed while sending");
                                break;
                            }
                        },
                        Err(e) => {
                            tracing::error!(%connection_id, error = %e, "Failed to serialize event");
                        },
                    }
                },
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                },
            }
        }

        let _ = sender.close().await;
    });

    // Feed inbound frames to the gateway until close, error or idle timeout
    let gateway = state.gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            match tokio::time::timeout(idle_timeout, receiver.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    gateway.handle_text(connection_id, text.as_str());
                },
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                    tracing::debug!(%connection_id, "Client disconnected");
                    break;
                },
                Ok(Some(Ok(_))) => {
                    // Pongs, pings and binary frames only refresh the idle timer
                },
                Ok(Some(Err(e))) => {
                    tracing::debug!(%connection_id, error = %e, "WebSocket error");
                    break;
                },
                Err(_) => {
                    tracing::info!(%connection_id, "Idle timeout, closing connection");
                    break;
                },
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.gateway.disconnect(connection_id);
    tracing::info!(%connection_id, %addr, "WebSocket connection closed");
}
