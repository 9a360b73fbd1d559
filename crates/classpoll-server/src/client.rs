//! WebSocket transport: connection registry and per-socket task pair.
//!
//! The transport knows nothing about polls. It assigns connection
//! identities, owns a bounded send queue per socket, and funnels every
//! inbound frame into the coordinator's command queue.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use classpoll_core::{ClientEvent, ConnectionId, ServerEvent};

use crate::coordinator::Command;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// A connection that has not answered a ping for this long is dropped
/// by the sweeper.
const STALE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

struct Client {
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    /// Unix seconds of the last pong (or registration).
    last_pong: AtomicI64,
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Registry of all connected WebSocket clients, keyed by the
/// connection identity handed to the coordinator.
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, Client>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new connection and return its identity plus the
    /// receiving end of its send queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients.insert(
            id.clone(),
            Client {
                tx,
                connected: AtomicBool::new(true),
                last_pong: AtomicI64::new(now_secs()),
            },
        );
        (id, rx)
    }

    /// Note a pong from a connection, keeping it out of the sweep.
    pub fn record_pong(&self, id: &ConnectionId) {
        if let Some(client) = self.clients.get(id) {
            client.last_pong.store(now_secs(), Ordering::Relaxed);
        }
    }

    /// Close every connection whose last pong is older than the stale
    /// timeout, returning their identities. Each close tears the
    /// socket tasks down, which emits the usual disconnect command.
    pub fn sweep_stale(&self) -> Vec<ConnectionId> {
        let cutoff = now_secs() - STALE_CONNECTION_TIMEOUT.as_secs() as i64;
        let stale: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|entry| entry.value().last_pong.load(Ordering::Relaxed) < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &stale {
            self.close(id);
        }
        stale
    }

    /// Remove a connection. Idempotent.
    pub fn unregister(&self, id: &ConnectionId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    /// Drop a connection from the server side. Queued messages are
    /// still delivered before the socket closes, so a final notice
    /// (e.g. `kicked-out`) can be sent just before calling this.
    pub fn close(&self, id: &ConnectionId) {
        self.unregister(id);
    }

    /// Send a serialized frame to one connection. Messages are dropped
    /// with a warning when the send queue is full.
    pub fn send_raw(&self, id: &ConnectionId, frame: String) -> bool {
        if let Some(client) = self.clients.get(id) {
            match client.tx.try_send(frame) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(msg)) => {
                    tracing::warn!(
                        connection_id = %id,
                        frame_len = msg.len(),
                        "send queue full, dropping frame"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        } else {
            false
        }
    }

    /// Serialize an event and send it to one connection.
    pub fn send_event(&self, id: &ConnectionId, event: &ServerEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(frame) => self.send_raw(id, frame),
            Err(err) => {
                tracing::error!(event = event.event_name(), error = %err, "event serialization failed");
                false
            }
        }
    }

    /// Serialize an event once and send it to a group of connections.
    pub fn send_event_to_all<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a ConnectionId>,
        event: &ServerEvent,
    ) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(event = event.event_name(), error = %err, "event serialization failed");
                return;
            }
        };
        for id in ids {
            self.send_raw(id, frame.clone());
        }
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.clients
            .get(id)
            .map(|c| c.connected.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// Periodically drop connections that stopped answering pings.
pub fn spawn_stale_sweeper(registry: Arc<ClientRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            for id in registry.sweep_stale() {
                tracing::warn!(connection_id = %id, "dropping unresponsive connection");
            }
        }
    })
}

/// Handle one WebSocket connection: a writer task draining the send
/// queue (plus periodic pings) and a reader task parsing frames into
/// coordinator commands. When either task finishes the other is
/// aborted, so a closed connection can never keep feeding commands;
/// the disconnect command is then emitted exactly once.
pub async fn handle_ws_connection(
    socket: WebSocket,
    connection_id: ConnectionId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    commands: mpsc::Sender<Command>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let reader_cid = connection_id.clone();
    let reader_commands = commands.clone();
    let reader_registry = registry.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let command = match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => Command::Inbound {
                            conn: reader_cid.clone(),
                            event,
                        },
                        Err(err) => Command::Malformed {
                            conn: reader_cid.clone(),
                            error: err.to_string(),
                        },
                    };
                    if reader_commands.send(command).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => reader_registry.record_pong(&reader_cid),
                WsMessage::Close(_) => break,
                // axum answers pings automatically
                _ => {}
            }
        }
    });

    // The writer exits once its queue sender is dropped (kick, sweep),
    // after draining any queued notice; the reader exits when the peer
    // goes away. Either way the survivor must not linger.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    registry.unregister(&connection_id);
    let _ = commands
        .send(Command::Disconnected {
            conn: connection_id,
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister() {
        let registry = ClientRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_eq!(registry.count(), 2);
        assert!(registry.is_connected(&id1));

        registry.unregister(&id1);
        assert_eq!(registry.count(), 1);
        assert!(!registry.is_connected(&id1));

        // Idempotent
        registry.unregister(&id1);
        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn send_event_to_one_connection() {
        let registry = ClientRegistry::new(32);
        let (id, mut rx) = registry.register();

        let sent = registry.send_event(&id, &ServerEvent::ResponseSubmitted);
        assert!(sent);

        let frame = rx.try_recv().unwrap();
        let event: ServerEvent = serde_json::from_str(&frame).unwrap();
        assert_eq!(event.event_name(), "response-submitted");
    }

    #[test]
    fn send_to_unknown_connection_fails() {
        let registry = ClientRegistry::new(32);
        let ghost = ConnectionId::new();
        assert!(!registry.send_event(&ghost, &ServerEvent::ResponseSubmitted));
    }

    #[test]
    fn full_queue_drops_frame() {
        let registry = ClientRegistry::new(2);
        let (id, _rx) = registry.register();

        assert!(registry.send_raw(&id, "one".into()));
        assert!(registry.send_raw(&id, "two".into()));
        assert!(!registry.send_raw(&id, "three".into()));
    }

    #[test]
    fn group_send_reaches_only_listed_connections() {
        let registry = ClientRegistry::new(32);
        let (id1, mut rx1) = registry.register();
        let (id2, mut rx2) = registry.register();
        let (_id3, mut rx3) = registry.register();

        registry.send_event_to_all([&id1, &id2], &ServerEvent::ResponseSubmitted);

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn sweep_drops_only_stale_connections() {
        let registry = ClientRegistry::new(32);
        let (fresh, _fresh_rx) = registry.register();
        let (stale, mut stale_rx) = registry.register();

        registry
            .clients
            .get(&stale)
            .unwrap()
            .last_pong
            .store(now_secs() - 1000, Ordering::Relaxed);

        let swept = registry.sweep_stale();
        assert_eq!(swept, vec![stale.clone()]);
        assert!(registry.is_connected(&fresh));
        assert!(!registry.is_connected(&stale));
        // The swept entry's sender is gone; its writer drains and exits.
        assert!(matches!(
            stale_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn pong_refreshes_staleness() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register();
        registry
            .clients
            .get(&id)
            .unwrap()
            .last_pong
            .store(now_secs() - 1000, Ordering::Relaxed);

        registry.record_pong(&id);
        assert!(registry.sweep_stale().is_empty());
        assert!(registry.is_connected(&id));
    }

    #[test]
    fn closed_connection_receives_queued_frames() {
        let registry = ClientRegistry::new(32);
        let (id, mut rx) = registry.register();

        registry.send_event(&id, &ServerEvent::KickedOut { message: "bye".into() });
        registry.close(&id);

        // The queued notice is still deliverable after close
        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("kicked-out"));
        // ...and the channel then reports closed
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
