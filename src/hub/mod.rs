//! Connection hub
//!
//! The hub owns every authenticated connection. Each connection is
//! represented by a [`ConnectionHandle`] holding the sending half of its
//! bounded outbound queue and its cancellation token; the socket itself is
//! driven by the tasks in [`server`].
//!
//! Delivery never blocks: [`Hub::send`] and [`Hub::broadcast`] use
//! `try_send`, and a connection whose queue is full or closed is torn down.

pub mod auth;
pub mod dispatch;
pub mod protocol;
pub mod server;

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use dispatch::Dispatcher;
pub use protocol::{ClientMessage, Envelope};
pub use server::AppState;

/// Identifier assigned to a connection at registration.
pub type ConnectionId = Uuid;

/// Hub-side view of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Connection ID
    pub id: ConnectionId,
    /// Platform reported by the client, `unknown` when not sent
    pub platform: String,
    /// Key the connection authenticated with
    pub token: String,
    /// Outbound queue
    pub tx: mpsc::Sender<Envelope>,
    /// Fired when the connection is torn down
    pub cancel: CancellationToken,
}

impl ConnectionHandle {
    /// New handle with a fresh ID.
    pub fn new(platform: &str, token: &str, tx: mpsc::Sender<Envelope>) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform: platform.to_string(),
            token: token.to_string(),
            tx,
            cancel: CancellationToken::new(),
        }
    }
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct Hub {
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
}

impl Hub {
    /// Empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an authenticated connection. Returns the new connection count.
    pub async fn register(&self, handle: ConnectionHandle) -> usize {
        let mut connections = self.connections.write().await;
        let id = handle.id;
        let platform = handle.platform.clone();
        connections.insert(id, handle);
        let count = connections.len();
        tracing::info!(connection_id = %id, platform = %platform, connections = count, "client connected");
        count
    }

    /// Remove a connection and fire its cancellation token.
    ///
    /// Returns `false` when the connection was already gone.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.remove(&id) {
            Some(handle) => {
                handle.cancel.cancel();
                tracing::info!(connection_id = %id, connections = connections.len(), "client disconnected");
                true
            }
            None => false,
        }
    }

    /// Queue `envelope` for one connection.
    ///
    /// Returns `false` when the connection is unknown or had to be torn down
    /// because its queue was full or closed.
    pub async fn send(&self, id: ConnectionId, envelope: Envelope) -> bool {
        let result = {
            let connections = self.connections.read().await;
            match connections.get(&id) {
                Some(handle) => handle.tx.try_send(envelope),
                None => return false,
            }
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(connection_id = %id, "outbound queue unusable, dropping connection: {}", e);
                self.unregister(id).await;
                false
            }
        }
    }

    /// Queue `envelope` for every connection. Returns how many accepted it.
    pub async fn broadcast(&self, envelope: Envelope) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let connections = self.connections.read().await;
            for (id, handle) in connections.iter() {
                match handle.tx.try_send(envelope.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => dead.push(*id),
                }
            }
        }
        for id in dead {
            tracing::warn!(connection_id = %id, "outbound queue unusable during broadcast, dropping connection");
            self.unregister(id).await;
        }
        delivered
    }

    /// Number of registered connections.
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Cancellation token of a registered connection.
    pub async fn cancel_token(&self, id: ConnectionId) -> Option<CancellationToken> {
        self.connections
            .read()
            .await
            .get(&id)
            .map(|handle| handle.cancel.clone())
    }
}
