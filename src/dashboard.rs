//! Progress dashboard: a websocket push channel plus read-only JSON views of
//! the result store.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::store::ResultStore;

#[derive(Clone)]
pub struct DashboardState {
    pub store: Arc<ResultStore>,
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/status", get(status_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/{id}", get(get_job_handler))
        .with_state(state)
}

/// Serves on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: DashboardState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Binds `addr` and serves. Failures are logged; the node keeps running
/// without a dashboard.
pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };
    tracing::info!(addr = %addr, "Starting dashboard server");
    if let Err(e) = serve(listener, state, shutdown).await {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    records: usize,
    running: usize,
    subscribers: usize,
}

async fn status_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let running = state
        .store
        .list()
        .iter()
        .filter(|record| !record.context.phase.is_terminal())
        .count();
    Json(StatusResponse {
        records: state.store.len(),
        running,
        subscribers: state.store.subscriber_count(),
    })
}

async fn list_jobs_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.store.list())
}

async fn get_job_handler(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get(&id) {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, format!("job {id} not found")).into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<DashboardState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| forward_events(socket, state.store))
}

async fn forward_events(mut socket: WebSocket, store: Arc<ResultStore>) {
    let mut subscription = store.subscribe();
    tracing::info!(subscriber = %subscription.id, "Dashboard client connected");

    loop {
        tokio::select! {
            event = subscription.receiver.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(event.as_ref()) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not encode store event");
                        continue;
                    }
                };
                if let Err(e) = socket.send(Message::Text(text.into())).await {
                    tracing::debug!(error = %e, "Dashboard client went away");
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Dashboard socket error");
                    break;
                }
            }
        }
    }

    store.unsubscribe(&subscription.id);
    tracing::info!(subscriber = %subscription.id, "Dashboard client disconnected");
}
