use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use lobby_core::ids::ConnId;
use lobby_core::messages::ServerEvent;
use lobby_core::transport::Transport;
use tokio::sync::mpsc;

use crate::server::RoomCommand;

/// Outbound queues for every open socket.
///
/// Each socket has one bounded queue drained by its writer task. The queue's
/// only sender lives here, so dropping the entry ends the writer once it has
/// flushed what is already queued. Broadcasts skip sockets the room has not
/// admitted yet.
pub struct ClientRegistry {
    clients: DashMap<ConnId, Client>,
    max_send_queue: usize,
}

struct Client {
    tx: mpsc::Sender<String>,
    admitted: bool,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new socket and return its id and outbound queue.
    pub fn register(&self) -> (ConnId, mpsc::Receiver<String>) {
        let id = ConnId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue.max(1));
        self.clients.insert(id.clone(), Client { tx, admitted: false });
        (id, rx)
    }

    pub fn unregister(&self, id: &ConnId) -> bool {
        self.clients.remove(id).is_some()
    }

    /// Queue a raw frame for one socket. Drops it if the queue is full.
    pub fn send_raw(&self, id: &ConnId, frame: String) -> bool {
        match self.clients.get(id) {
            Some(client) => queue(id, &client.tx, frame),
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }
}

fn queue(id: &ConnId, tx: &mpsc::Sender<String>, frame: String) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(frame)) => {
            tracing::warn!(
                conn_id = %id,
                frame_len = frame.len(),
                "send queue full, dropping frame"
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

impl Transport for ClientRegistry {
    fn send(&self, conn: &ConnId, event: &ServerEvent) -> bool {
        match event.to_json() {
            Some(frame) => self.send_raw(conn, frame),
            None => false,
        }
    }

    fn admit(&self, conn: &ConnId) {
        if let Some(mut client) = self.clients.get_mut(conn) {
            client.admitted = true;
        }
    }

    fn broadcast(&self, event: &ServerEvent) {
        let Some(frame) = event.to_json() else {
            return;
        };
        for entry in self.clients.iter().filter(|e| e.admitted) {
            let _ = queue(entry.key(), &entry.tx, frame.clone());
        }
    }

    fn close(&self, conn: &ConnId) {
        self.unregister(conn);
    }
}

/// Drive one WebSocket: a writer drains the outbound queue, a reader forwards
/// inbound frames to the room. Returns when either side ends.
pub async fn handle_ws_connection(
    socket: WebSocket,
    conn: ConnId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    commands: mpsc::Sender<RoomCommand>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                return;
            }
        }
        // Queue closed by the room: everything queued is out, say goodbye.
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    let reader_conn = conn.clone();
    let reader_commands = commands.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            let command = match msg {
                WsMessage::Text(text) => RoomCommand::Inbound {
                    conn: reader_conn.clone(),
                    text: text.to_string(),
                },
                WsMessage::Ping(_) | WsMessage::Pong(_) => RoomCommand::Activity {
                    conn: reader_conn.clone(),
                },
                WsMessage::Close(_) => break,
                _ => continue,
            };
            if reader_commands.send(command).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => {
            // Let a pending bye go out before tearing the socket down.
            registry.unregister(&conn);
            let _ = writer.await;
        }
    }

    registry.unregister(&conn);
    let _ = commands.send(RoomCommand::Disconnected { conn }).await;
}
