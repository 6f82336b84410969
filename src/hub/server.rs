//! WebSocket server
//!
//! `GET /ws` upgrades to the duplex channel, `GET /health` reports liveness.
//! Each connection runs three tasks:
//!
//! - the **reader** (this handler) decodes frames, answers control messages
//!   inline and queues everything else for the worker;
//! - the **writer** drains the outbound queue, sends heartbeat pings and
//!   closes the socket when the peer goes silent;
//! - the **worker** handles queued commands one at a time, in arrival order.
//!
//! All three stop when the connection's cancellation token fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::assistant::Assistant;
use crate::config::Config;
use crate::container::ContainerManager;
use crate::error::{DockhandError, Result};
use crate::gateway::ExternalTool;
use crate::hub::auth::{self, AuthMethod, ClientIdentity};
use crate::hub::protocol::{server, ClientMessage, Envelope};
use crate::hub::{ConnectionHandle, ConnectionId, Dispatcher, Hub};
use crate::permission::{HeuristicDetector, PermissionWorkflow};
use crate::router::CommandRouter;
use crate::session::SessionStore;

/// Shared state behind every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Effective configuration
    pub config: Arc<Config>,
    /// Key clients must present
    pub auth_key: Arc<String>,
    /// Connection registry
    pub hub: Arc<Hub>,
    /// Message handler
    pub dispatcher: Arc<Dispatcher>,
    /// Project environments
    pub containers: Arc<ContainerManager>,
}

impl AppState {
    /// Build every service from configuration on top of `tool`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use dockhand::config::Config;
    /// use dockhand::gateway::ProcessTool;
    /// use dockhand::hub::AppState;
    ///
    /// let state = AppState::build(Config::default(), Arc::new(ProcessTool::new()), "secret-key");
    /// assert_eq!(state.auth_key.as_str(), "secret-key");
    /// ```
    pub fn build(config: Config, tool: Arc<dyn ExternalTool>, auth_key: &str) -> Self {
        let hub = Arc::new(Hub::new());
        let containers = Arc::new(ContainerManager::new(tool, config.container.clone()));
        let sessions = Arc::new(SessionStore::new(config.conversation.clone()));
        let permissions = Arc::new(PermissionWorkflow::new(Duration::from_secs(
            config.permission.timeout_secs,
        )));
        let assistant = Arc::new(Assistant::new(
            Arc::clone(&containers),
            Arc::clone(&sessions),
            Arc::clone(&permissions),
            Arc::new(HeuristicDetector::new()),
            config.assistant.clone(),
        ));
        let router = CommandRouter::new(Arc::clone(&containers), assistant);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&hub),
            Arc::clone(&containers),
            sessions,
            permissions,
            router,
        ));

        Self {
            config: Arc::new(config),
            auth_key: Arc::new(auth_key.to_string()),
            hub,
            dispatcher,
            containers,
        }
    }
}

/// HTTP routes of the server.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DockhandError::Config(format!("cannot bind {}: {}", addr, e)))?;
    tracing::info!(address = %addr, "dockhand listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.hub.count().await,
    }))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    key: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.key))
        .into_response()
}

/// Milliseconds since `origin`, for lock-free last-seen tracking.
fn millis_since(origin: Instant) -> u64 {
    origin.elapsed().as_millis() as u64
}

async fn handle_socket(socket: WebSocket, state: AppState, query_key: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let server_config = &state.config.server;

    let identity: Result<ClientIdentity> = match query_key.as_deref() {
        Some(key) => auth::authenticate_query(&state.auth_key, key),
        None => {
            auth::await_auth_message(
                &mut ws_rx,
                &state.auth_key,
                Duration::from_secs(server_config.handshake_timeout_secs),
            )
            .await
        }
    };
    let identity = match identity {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!("rejected connection: {}", e);
            if let Ok(text) = server::auth_failed(&e.to_string()).to_text() {
                let _ = ws_tx.send(Message::Text(text)).await;
            }
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    let (out_tx, out_rx) = mpsc::channel::<Envelope>(server_config.outbound_queue_size);
    let handle = ConnectionHandle::new(identity.platform(), &identity.token, out_tx);
    let id = handle.id;
    let cancel = handle.cancel.clone();
    state.hub.register(handle).await;

    if identity.method == AuthMethod::Message {
        state
            .hub
            .send(id, server::auth_success(&id.to_string()))
            .await;
    }
    state
        .hub
        .send(id, server::connection_established(&id.to_string()))
        .await;

    let origin = Instant::now();
    let last_seen = Arc::new(AtomicU64::new(0));

    let writer = tokio::spawn(write_loop(
        ws_tx,
        out_rx,
        cancel.clone(),
        Duration::from_secs(server_config.heartbeat_interval_secs),
        Duration::from_secs(server_config.heartbeat_timeout_secs),
        origin,
        Arc::clone(&last_seen),
        id,
    ));

    let (cmd_tx, cmd_rx) = mpsc::channel::<ClientMessage>(server_config.command_queue_size);
    let worker = tokio::spawn(work_loop(
        cmd_rx,
        Arc::clone(&state.dispatcher),
        cancel.clone(),
        id,
    ));

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {
                last_seen.store(millis_since(origin), Ordering::Relaxed);
                continue;
            }
            Some(Err(e)) => {
                tracing::debug!(connection_id = %id, "socket error: {}", e);
                break;
            }
        };
        last_seen.store(millis_since(origin), Ordering::Relaxed);

        let message = match ClientMessage::parse(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(connection_id = %id, "rejected message: {}", e);
                state.hub.send(id, server::error(e.to_string())).await;
                continue;
            }
        };

        if message.is_control() {
            state.dispatcher.handle(id, message).await;
            continue;
        }
        if let Err(e) = cmd_tx.try_send(message) {
            tracing::warn!(connection_id = %id, "command queue unusable: {}", e);
            state
                .hub
                .send(id, server::error("too many pending commands, request dropped"))
                .await;
        }
    }

    cancel.cancel();
    state.hub.unregister(id).await;
    state.dispatcher.connection_closed(id).await;
    let _ = writer.await;
    let _ = worker.await;
}

#[allow(clippy::too_many_arguments)]
async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Envelope>,
    cancel: tokio_util::sync::CancellationToken,
    interval: Duration,
    timeout: Duration,
    origin: Instant,
    last_seen: Arc<AtomicU64>,
    id: ConnectionId,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let silent_for = millis_since(origin).saturating_sub(last_seen.load(Ordering::Relaxed));
                if silent_for > timeout.as_millis() as u64 {
                    tracing::warn!(connection_id = %id, silent_ms = silent_for, "heartbeat timeout");
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            envelope = out_rx.recv() => {
                let Some(envelope) = envelope else { break };
                let text = match envelope.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(connection_id = %id, "failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    tracing::debug!(connection_id = %id, "send failed, client disconnected");
                    break;
                }
            }
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
    cancel.cancel();
}

async fn work_loop(
    mut cmd_rx: mpsc::Receiver<ClientMessage>,
    dispatcher: Arc<Dispatcher>,
    cancel: tokio_util::sync::CancellationToken,
    id: ConnectionId,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = cmd_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = dispatcher.handle(id, message) => {}
        }
    }
}
