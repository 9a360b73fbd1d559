//! HTTP/WebSocket server assembly.
//!
//! One axum router serves the WebSocket endpoint and a small HTTP
//! surface (health probe, poll history). All session traffic flows
//! through the coordinator; the HTTP routes only read the store.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use classpoll_store::{Database, PollRepo};

use crate::client::{handle_ws_connection, spawn_stale_sweeper, ClientRegistry};
use crate::coordinator::{Command, Coordinator};

/// Polls returned by `GET /api/polls/history`.
const HTTP_HISTORY_LIMIT: u32 = 100;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// Per-connection outbound queue capacity.
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            max_send_queue: 256,
        }
    }
}

#[derive(Clone)]
struct AppState {
    clients: Arc<ClientRegistry>,
    commands: mpsc::Sender<Command>,
    db: Database,
}

/// A running server. Dropping the handle aborts nothing; the tasks
/// run until the process exits.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _coordinator: tokio::task::JoinHandle<()>,
    _sweeper: tokio::task::JoinHandle<()>,
}

/// Bind the listener, spawn the coordinator, and start serving.
/// `port: 0` binds an ephemeral port; the actual port is on the
/// returned handle.
pub async fn start(config: ServerConfig, db: Database) -> std::io::Result<ServerHandle> {
    let clients = Arc::new(ClientRegistry::new(config.max_send_queue));
    let coordinator = Coordinator::new(clients.clone(), db.clone());
    let commands = coordinator.command_sender();
    let coordinator_task = tokio::spawn(coordinator.run());
    let sweeper_task = spawn_stale_sweeper(clients.clone());

    let state = AppState {
        clients,
        commands,
        db,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    let port = listener.local_addr()?.port();
    tracing::info!(port, "server listening");

    let server_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port,
        _server: server_task,
        _coordinator: coordinator_task,
        _sweeper: sweeper_task,
    })
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health))
        .route("/api/polls/history", get(poll_history))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let (connection_id, rx) = state.clients.register();
    tracing::debug!(connection_id = %connection_id, "websocket upgrade");
    ws.on_upgrade(move |socket| {
        handle_ws_connection(socket, connection_id, rx, state.clients, state.commands)
    })
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn poll_history(State(state): State<AppState>) -> Response {
    let repo = PollRepo::new(state.db.clone());
    match repo.history(HTTP_HISTORY_LIMIT) {
        Ok(polls) => Json(polls).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to load poll history");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "failed to load poll history" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start_test_server() -> ServerHandle {
        let db = Database::in_memory().unwrap();
        start(
            ServerConfig {
                port: 0,
                ..Default::default()
            },
            db,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn serves_health_endpoint() {
        let handle = start_test_server().await;

        let body: serde_json::Value =
            reqwest::get(format!("http://127.0.0.1:{}/api/health", handle.port))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn poll_history_starts_empty() {
        let handle = start_test_server().await;

        let response = reqwest::get(format!(
            "http://127.0.0.1:{}/api/polls/history",
            handle.port
        ))
        .await
        .unwrap();
        assert!(response.status().is_success());

        let polls: serde_json::Value = response.json().await.unwrap();
        assert_eq!(polls, serde_json::json!([]));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let handle = start_test_server().await;

        let response = reqwest::get(format!("http://127.0.0.1:{}/nope", handle.port))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }
}
