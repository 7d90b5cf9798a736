use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use lobby_core::ids::ConnId;
use lobby_core::now_ms;
use lobby_engine::config::DECAY_INTERVAL_MS;
use lobby_engine::{ChatRoom, RoomConfig, RoomStats};
use lobby_settings::{BadWords, LobbySettings};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::{self, ClientRegistry};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub command_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 1234,
            max_send_queue: 256,
            command_queue: 1024,
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &LobbySettings) -> Self {
        Self {
            port: settings.port,
            ..Self::default()
        }
    }
}

/// Everything the room task reacts to besides its own timers.
#[derive(Debug)]
pub enum RoomCommand {
    Connect { conn: ConnId, address: String },
    /// One text frame.
    Inbound { conn: ConnId, text: String },
    /// Ping or pong from the client.
    Activity { conn: ConnId },
    /// The socket is gone.
    Disconnected { conn: ConnId },
    Stats { reply: oneshot::Sender<RoomStats> },
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub clients: Arc<ClientRegistry>,
    pub commands: mpsc::Sender<RoomCommand>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind, spawn the room task, and start serving. Returns a handle that keeps
/// both running.
pub async fn start(
    config: ServerConfig,
    room_config: RoomConfig,
    words: Arc<BadWords>,
) -> Result<ServerHandle, std::io::Error> {
    let clients = Arc::new(ClientRegistry::new(config.max_send_queue));
    let (command_tx, command_rx) = mpsc::channel::<RoomCommand>(config.command_queue);

    let heartbeat_every = Duration::from_millis(room_config.heartbeat_interval_ms());
    let room = ChatRoom::new(room_config, words, clients.clone(), now_ms());
    let room_handle = tokio::spawn(run_room(room, command_rx, heartbeat_every));

    let state = AppState {
        clients,
        commands: command_tx,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(address = %local_addr, "lobby server listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server: server_handle,
        room: room_handle,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
    room: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and drop the room.
    pub fn shutdown(&self) {
        self.server.abort();
        self.room.abort();
    }
}

/// The room task. Owns the [`ChatRoom`] and runs one handler at a time.
async fn run_room(
    mut room: ChatRoom,
    mut commands: mpsc::Receiver<RoomCommand>,
    heartbeat_every: Duration,
) {
    let mut decay = tokio::time::interval(Duration::from_millis(DECAY_INTERVAL_MS));
    decay.tick().await; // consume first immediate tick
    let mut heartbeat = tokio::time::interval(heartbeat_every);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => apply(&mut room, command),
                None => break,
            },
            _ = decay.tick() => room.decay_tick(),
            _ = heartbeat.tick() => {
                let removed = room.heartbeat_tick(now_ms());
                if removed > 0 {
                    tracing::debug!(removed, "heartbeat sweep");
                }
            }
        }
    }
    tracing::info!("room task stopped");
}

fn apply(room: &mut ChatRoom, command: RoomCommand) {
    match command {
        RoomCommand::Connect { conn, address } => {
            let _ = room.connect(conn, &address, now_ms());
        }
        RoomCommand::Inbound { conn, text } => {
            let outcome = room.handle_frame(&conn, &text, now_ms());
            tracing::trace!(conn_id = %conn, ?outcome, "handled frame");
        }
        RoomCommand::Activity { conn } => {
            room.touch(&conn, now_ms());
        }
        RoomCommand::Disconnected { conn } => {
            room.disconnect(&conn);
        }
        RoomCommand::Stats { reply } => {
            let _ = reply.send(room.stats());
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

/// Register the socket, ask the room to admit it, then pump frames.
async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let (conn, rx) = state.clients.register();
    let address = peer.ip().to_string();
    tracing::debug!(conn_id = %conn, address = %address, "websocket connected");

    let connect = RoomCommand::Connect {
        conn: conn.clone(),
        address,
    };
    if state.commands.send(connect).await.is_err() {
        state.clients.unregister(&conn);
        return;
    }

    client::handle_ws_connection(socket, conn, rx, state.clients, state.commands).await;
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    room: RoomStats,
}

/// Health check HTTP endpoint. Answered by the room task.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (reply, rx) = oneshot::channel();
    if state.commands.send(RoomCommand::Stats { reply }).await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable" })),
        );
    }
    match rx.await {
        Ok(room) => {
            let body = HealthResponse { status: "ok", room };
            (
                StatusCode::OK,
                Json(serde_json::to_value(body).unwrap_or_default()),
            )
        }
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable" })),
        ),
    }
}

async fn index_handler() -> &'static str {
    "lobby: anonymous chat, connect a WebSocket to /ws\n"
}
