//! Inbound message dispatch
//!
//! [`Dispatcher`] turns decoded client messages into calls on the container
//! manager, router, session store and permission workflow, and queues the
//! replies on the originating connection. A failing request produces an
//! `error`, `claude_error` or `claude_stream_error` reply; it never closes
//! the connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::container::{ContainerManager, ExecStream, ProjectSpec};
use crate::error::{captured_output, is_not_found, DockhandError, Result};
use crate::hub::protocol::{server, ClientMessage, Envelope};
use crate::hub::{ConnectionId, Hub};
use crate::permission::{PermissionNotifier, PermissionRequest, PermissionWorkflow};
use crate::router::{classify, split_prefix, Classification, CommandRouter, Prefix, RouteContext};
use crate::session::{Role, SessionStore};

/// Delivers permission requests to one connection through the hub.
#[derive(Debug)]
pub struct ConnectionNotifier {
    hub: Arc<Hub>,
    connection: ConnectionId,
}

impl ConnectionNotifier {
    /// Notifier bound to `connection`.
    pub fn new(hub: Arc<Hub>, connection: ConnectionId) -> Self {
        Self { hub, connection }
    }
}

#[async_trait::async_trait]
impl PermissionNotifier for ConnectionNotifier {
    async fn notify(&self, request: &PermissionRequest) -> Result<()> {
        if self
            .hub
            .send(self.connection, server::permission_request(request))
            .await
        {
            Ok(())
        } else {
            Err(DockhandError::Protocol(format!(
                "connection {} is gone",
                self.connection
            ))
            .into())
        }
    }
}

/// Handles every inbound message type.
#[derive(Debug)]
pub struct Dispatcher {
    hub: Arc<Hub>,
    containers: Arc<ContainerManager>,
    sessions: Arc<SessionStore>,
    permissions: Arc<PermissionWorkflow>,
    router: CommandRouter,
    streams: Mutex<HashMap<StreamKey, (u64, CancellationToken)>>,
    next_stream: AtomicU64,
}

type StreamKey = (ConnectionId, String);

fn require_project(project_id: &str) -> Result<()> {
    if project_id.trim().is_empty() {
        Err(DockhandError::Protocol("missing or invalid project ID".to_string()).into())
    } else {
        Ok(())
    }
}

impl Dispatcher {
    /// Wire a dispatcher to the shared services.
    pub fn new(
        hub: Arc<Hub>,
        containers: Arc<ContainerManager>,
        sessions: Arc<SessionStore>,
        permissions: Arc<PermissionWorkflow>,
        router: CommandRouter,
    ) -> Self {
        Self {
            hub,
            containers,
            sessions,
            permissions,
            router,
            streams: Mutex::new(HashMap::new()),
            next_stream: AtomicU64::new(1),
        }
    }

    async fn reply(&self, connection: ConnectionId, envelope: Envelope) {
        if !self.hub.send(connection, envelope).await {
            tracing::debug!(connection_id = %connection, "reply dropped, connection gone");
        }
    }

    /// Decode a raw text frame and handle it.
    ///
    /// Undecodable input is answered with an `error` message.
    pub async fn dispatch(&self, connection: ConnectionId, raw: &str) {
        match ClientMessage::parse(raw) {
            Ok(message) => self.handle(connection, message).await,
            Err(e) => {
                tracing::warn!(connection_id = %connection, "rejected message: {}", e);
                self.reply(connection, server::error(e.to_string())).await;
            }
        }
    }

    /// Handle one decoded message and send its replies.
    pub async fn handle(&self, connection: ConnectionId, message: ClientMessage) {
        tracing::debug!(connection_id = %connection, kind = message.kind(), "handling message");

        let project_id = match &message {
            ClientMessage::ProjectStart(r)
            | ClientMessage::ProjectStop(r)
            | ClientMessage::ProjectRemove(r)
            | ClientMessage::StreamCancel(r)
            | ClientMessage::History(r)
            | ClientMessage::Clear(r) => Some(r.project_id.as_str()),
            ClientMessage::Execute(r) | ClientMessage::ExecuteStream(r) => Some(r.project_id.as_str()),
            ClientMessage::Continue(r) => Some(r.project_id.as_str()),
            _ => None,
        };
        if let Some(Err(e)) = project_id.map(require_project) {
            self.reply(connection, server::error(e.to_string())).await;
            return;
        }

        match message {
            ClientMessage::Auth(_) => {
                self.reply(connection, server::error("already authenticated"))
                    .await
            }
            ClientMessage::Ping(data) => self.reply(connection, server::pong(data)).await,
            ClientMessage::ProjectList => self.list_projects(connection).await,
            ClientMessage::ProjectCreate(spec) => self.create_project(connection, spec).await,
            ClientMessage::ProjectStart(r) => {
                let result = self.containers.start(&r.project_id).await;
                let status = result.map(|s| s.to_string());
                self.lifecycle_reply(connection, "project_start_response", &r.project_id, status)
                    .await
            }
            ClientMessage::ProjectStop(r) => {
                let result = self.containers.stop(&r.project_id).await;
                let status = result.map(|s| s.to_string());
                self.lifecycle_reply(connection, "project_stop_response", &r.project_id, status)
                    .await
            }
            ClientMessage::ProjectRemove(r) => {
                let result = self.containers.remove(&r.project_id).await;
                if result.is_ok() {
                    self.sessions.clear(&r.project_id).await;
                }
                let status = result.map(|_| "removed".to_string());
                self.lifecycle_reply(connection, "project_remove_response", &r.project_id, status)
                    .await
            }
            ClientMessage::Execute(r) => self.execute(connection, &r.project_id, &r.command).await,
            ClientMessage::Continue(r) => {
                self.execute(connection, &r.project_id, &r.follow_up).await
            }
            ClientMessage::ExecuteStream(r) => {
                self.execute_stream(connection, &r.project_id, &r.command)
                    .await
            }
            ClientMessage::StreamCancel(r) => self.cancel_stream(connection, &r.project_id).await,
            ClientMessage::History(r) => {
                let session = self.sessions.get(&r.project_id).await;
                self.reply(connection, server::history(&r.project_id, session.as_ref()))
                    .await
            }
            ClientMessage::Clear(r) => {
                self.sessions.clear(&r.project_id).await;
                self.reply(connection, server::cleared(&r.project_id)).await
            }
            ClientMessage::PermissionResponse(response) => {
                let request_id = response.request_id.clone();
                if !self.permissions.respond(response).await {
                    tracing::debug!(connection_id = %connection, request_id = %request_id, "permission response matched nothing");
                }
            }
        }
    }

    async fn list_projects(&self, connection: ConnectionId) {
        let reply = match self.containers.list().await {
            Ok(projects) => server::project_list(&projects),
            Err(e) => server::error(format!("failed to list projects: {}", e)),
        };
        self.reply(connection, reply).await;
    }

    async fn create_project(&self, connection: ConnectionId, spec: ProjectSpec) {
        self.reply(
            connection,
            server::project_create_status("creating", &format!("Creating project: {}", spec.name)),
        )
        .await;

        let reply = match self.containers.create(spec).await {
            Ok(project) => server::project_created(&project),
            Err(e) => {
                tracing::warn!(connection_id = %connection, "project creation failed: {:#}", e);
                server::error(format!("failed to create project: {}", e))
            }
        };
        self.reply(connection, reply).await;
    }

    async fn lifecycle_reply(
        &self,
        connection: ConnectionId,
        kind: &str,
        project_id: &str,
        result: Result<String>,
    ) {
        let reply = match result {
            Ok(status) => server::project_lifecycle(
                kind,
                project_id,
                &status,
                &format!("Project '{}' is {}", project_id, status),
            ),
            Err(e) => server::error(e.to_string()),
        };
        self.reply(connection, reply).await;
    }

    /// Record one exchange in the project's conversation.
    async fn record(&self, project_id: &str, command: &str, output: &str) -> usize {
        self.sessions
            .append_message(project_id, Role::User, command, Some(command), None)
            .await;
        self.sessions
            .append_message(project_id, Role::Assistant, output, Some(command), Some(output))
            .await
    }

    /// Record a failed exchange, or forget the session when the project
    /// does not exist.
    async fn record_failure(&self, project_id: &str, command: &str, error: &anyhow::Error) {
        if is_not_found(error) {
            self.sessions.clear(project_id).await;
        } else {
            let output = captured_output(error).unwrap_or_default();
            self.record(project_id, command, output).await;
        }
    }

    async fn run_routed(
        &self,
        connection: ConnectionId,
        project_id: &str,
        command: &str,
        classification: Classification,
        language: &str,
    ) -> Result<String> {
        let notifier = ConnectionNotifier::new(Arc::clone(&self.hub), connection);
        self.router
            .route(
                classification,
                project_id,
                command,
                RouteContext {
                    language,
                    notifier: &notifier,
                },
            )
            .await
    }

    async fn execute(&self, connection: ConnectionId, project_id: &str, command: &str) {
        let command = command.trim();
        let language = self.sessions.observe_language(project_id, command).await;
        let classification = classify(command);
        tracing::info!(connection_id = %connection, project_id, %classification, "executing command");

        let result = self
            .run_routed(connection, project_id, command, classification, &language)
            .await;

        let reply = match result {
            Ok(output) => {
                let count = self.record(project_id, command, &output).await;
                server::command_output(
                    project_id,
                    command,
                    &output,
                    &language,
                    count,
                    serde_json::to_value(classification).unwrap_or_default(),
                )
            }
            Err(e) => {
                let output = captured_output(&e).unwrap_or_default().to_string();
                self.record_failure(project_id, command, &e).await;
                tracing::warn!(project_id, command, "command failed: {}", e);
                server::command_error(project_id, command, &e.to_string(), &output)
            }
        };
        self.reply(connection, reply).await;
    }

    /// Shell text to stream for `command`, if it is a plain shell command.
    fn streamable(command: &str, classification: Classification) -> Option<String> {
        match classification {
            Classification::ShellLike => Some(command.to_string()),
            Classification::Prefixed(Prefix::Code) => split_prefix(command)
                .map(|(_, rest)| rest.to_string())
                .filter(|rest| !rest.is_empty()),
            _ => None,
        }
    }

    async fn execute_stream(&self, connection: ConnectionId, project_id: &str, command: &str) {
        let command = command.trim();
        let language = self.sessions.observe_language(project_id, command).await;
        let classification = classify(command);
        let count = self
            .sessions
            .get(project_id)
            .await
            .map(|s| s.messages.len())
            .unwrap_or_default();

        let Some(shell) = Self::streamable(command, classification) else {
            // Prefix handlers and the assistant produce one result; deliver it
            // as a single chunk.
            self.reply(connection, server::stream_start(project_id, command, &language, count))
                .await;
            let reply = match self
                .run_routed(connection, project_id, command, classification, &language)
                .await
            {
                Ok(output) => {
                    self.record(project_id, command, &output).await;
                    self.reply(connection, server::stream_output(project_id, command, &output))
                        .await;
                    server::stream_end(project_id, command)
                }
                Err(e) => {
                    self.record_failure(project_id, command, &e).await;
                    server::stream_error(project_id, command, &e.to_string())
                }
            };
            self.reply(connection, reply).await;
            return;
        };

        let token = match self.hub.cancel_token(connection).await {
            Some(parent) => parent.child_token(),
            None => return,
        };
        let key = (connection, project_id.to_string());
        let stream_id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self
            .streams
            .lock()
            .await
            .insert(key.clone(), (stream_id, token.clone()))
        {
            previous.cancel();
        }

        let stream = self
            .containers
            .stream_execute(project_id, &shell, token.clone())
            .await;
        let ExecStream {
            mut output,
            mut errors,
        } = match stream {
            Ok(stream) => stream,
            Err(e) => {
                self.finish_stream(&key, stream_id).await;
                if is_not_found(&e) {
                    self.sessions.clear(project_id).await;
                }
                self.reply(connection, server::stream_error(project_id, command, &e.to_string()))
                    .await;
                return;
            }
        };

        self.reply(connection, server::stream_start(project_id, command, &language, count))
            .await;

        let mut collected = String::new();
        while let Some(chunk) = output.recv().await {
            collected.push_str(&chunk);
            if !self
                .hub
                .send(connection, server::stream_output(project_id, command, &chunk))
                .await
            {
                token.cancel();
            }
        }
        let failure = errors.recv().await;
        self.finish_stream(&key, stream_id).await;
        self.record(project_id, command, &collected).await;

        let reply = match failure {
            None => server::stream_end(project_id, command),
            Some(e) => {
                tracing::info!(project_id, command, "streamed command ended early: {}", e);
                server::stream_error(project_id, command, &e.to_string())
            }
        };
        self.reply(connection, reply).await;
    }

    /// Drop the stream entry unless a newer stream has replaced it.
    async fn finish_stream(&self, key: &StreamKey, stream_id: u64) {
        let mut streams = self.streams.lock().await;
        if streams.get(key).is_some_and(|(id, _)| *id == stream_id) {
            streams.remove(key);
        }
    }

    async fn cancel_stream(&self, connection: ConnectionId, project_id: &str) {
        let token = self
            .streams
            .lock()
            .await
            .remove(&(connection, project_id.to_string()));
        match token {
            Some((_, token)) => {
                tracing::info!(connection_id = %connection, project_id, "cancelling stream");
                token.cancel();
            }
            None => {
                self.reply(
                    connection,
                    server::error(format!("no active stream for project {}", project_id)),
                )
                .await
            }
        }
    }

    /// Cancel and forget every stream started by `connection`.
    pub async fn connection_closed(&self, connection: ConnectionId) {
        self.streams.lock().await.retain(|(owner, _), (_, token)| {
            if *owner == connection {
                token.cancel();
                false
            } else {
                true
            }
        });
    }

    /// Number of streams currently running.
    pub async fn active_streams(&self) -> usize {
        self.streams.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streamable_commands() {
        assert_eq!(
            Dispatcher::streamable("npm test", classify("npm test")).as_deref(),
            Some("npm test")
        );
        assert_eq!(
            Dispatcher::streamable("code: make all", classify("code: make all")).as_deref(),
            Some("make all")
        );
        assert!(Dispatcher::streamable("code:", classify("code:")).is_none());
        assert!(Dispatcher::streamable("file:read a.txt", classify("file:read a.txt")).is_none());
        assert!(Dispatcher::streamable("explain this repo", classify("explain this repo")).is_none());
    }

    #[test]
    fn test_require_project() {
        assert!(require_project("p1").is_ok());
        assert!(require_project("  ").is_err());
    }
}
