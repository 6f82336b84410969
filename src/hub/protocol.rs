//! Wire protocol
//!
//! Every frame in either direction is a JSON envelope `{"type": ..., "data": ...}`.
//! Inbound envelopes are decoded in two steps: [`Envelope::parse`] checks the
//! outer shape and [`ClientMessage::from_envelope`] decodes the payload for the
//! given type, so an unknown type and a malformed payload produce different
//! error messages. Outbound messages are built with the constructors in
//! [`server`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::container::ProjectSpec;
use crate::error::{DockhandError, Result};
use crate::permission::PermissionResponse;

/// Protocol revision announced in `connection_established`.
pub const API_VERSION: &str = "1.0";

/// Features announced in `connection_established`.
pub const CAPABILITIES: [&str; 6] = [
    "project_management",
    "command_execution",
    "ai_assistant",
    "conversation_history",
    "permission_workflow",
    "streaming",
];

/// `{type, data}` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Build an envelope from any serializable payload.
    pub fn new(kind: &str, data: impl Serialize) -> Self {
        Self {
            kind: kind.to_string(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    /// Decode the outer envelope of a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Protocol`] for invalid JSON or a missing
    /// `type` field.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            DockhandError::Protocol(format!("invalid message format: {}", e)).into()
        })
    }

    /// Serialize for the socket.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Client details sent with the `auth` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client platform (`ios`, `android`, `cli`, ...)
    #[serde(default)]
    pub platform: String,
    /// Client version string
    #[serde(default)]
    pub version: String,
}

/// Payload of `auth`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Presented session key
    pub token: String,
    /// Optional client details
    #[serde(default)]
    pub client_info: ClientInfo,
}

/// Payload naming a single project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRef {
    /// Target project
    pub project_id: String,
}

/// Payload of `claude_execute` and `claude_execute_stream`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Target project
    pub project_id: String,
    /// Raw command text
    #[serde(default)]
    pub command: String,
}

/// Payload of `conversation_continue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinueRequest {
    /// Target project
    pub project_id: String,
    /// Follow-up text, handled like a fresh command
    #[serde(default)]
    pub follow_up: String,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Late or repeated `auth`
    Auth(AuthRequest),
    /// Application-level ping; the payload is echoed back
    Ping(Value),
    /// `project_list_request`
    ProjectList,
    /// `project_create_request`
    ProjectCreate(ProjectSpec),
    /// `project_start_request`
    ProjectStart(ProjectRef),
    /// `project_stop_request`
    ProjectStop(ProjectRef),
    /// `project_remove_request`
    ProjectRemove(ProjectRef),
    /// `claude_execute`
    Execute(ExecuteRequest),
    /// `claude_execute_stream`
    ExecuteStream(ExecuteRequest),
    /// `claude_stream_cancel`
    StreamCancel(ProjectRef),
    /// `conversation_history`
    History(ProjectRef),
    /// `conversation_clear`
    Clear(ProjectRef),
    /// `conversation_continue`
    Continue(ContinueRequest),
    /// `permission_response`
    PermissionResponse(PermissionResponse),
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| {
        DockhandError::Protocol(format!("invalid {} payload: {}", kind, e)).into()
    })
}

impl ClientMessage {
    /// Decode the payload of `envelope` according to its type.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Protocol`] for an unknown type or a payload
    /// that does not match it.
    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        let Envelope { kind, data } = envelope;
        let message = match kind.as_str() {
            "auth" => Self::Auth(payload(&kind, data)?),
            "ping" => Self::Ping(data),
            "project_list_request" => Self::ProjectList,
            "project_create_request" => Self::ProjectCreate(payload(&kind, data)?),
            "project_start_request" => Self::ProjectStart(payload(&kind, data)?),
            "project_stop_request" => Self::ProjectStop(payload(&kind, data)?),
            "project_remove_request" => Self::ProjectRemove(payload(&kind, data)?),
            "claude_execute" => Self::Execute(payload(&kind, data)?),
            "claude_execute_stream" => Self::ExecuteStream(payload(&kind, data)?),
            "claude_stream_cancel" => Self::StreamCancel(payload(&kind, data)?),
            "conversation_history" => Self::History(payload(&kind, data)?),
            "conversation_clear" => Self::Clear(payload(&kind, data)?),
            "conversation_continue" => Self::Continue(payload(&kind, data)?),
            "permission_response" => Self::PermissionResponse(payload(&kind, data)?),
            other => {
                return Err(
                    DockhandError::Protocol(format!("unknown message type: {}", other)).into(),
                )
            }
        };
        Ok(message)
    }

    /// Parse a raw text frame.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::from_envelope(Envelope::parse(raw)?)
    }

    /// Messages answered by the connection's reader without queueing.
    ///
    /// These must never wait behind a running command: a permission answer
    /// or a cancel targets exactly that command.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::Ping(_) | Self::PermissionResponse(_) | Self::StreamCancel(_) | Self::Auth(_)
        )
    }

    /// Wire type name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Ping(_) => "ping",
            Self::ProjectList => "project_list_request",
            Self::ProjectCreate(_) => "project_create_request",
            Self::ProjectStart(_) => "project_start_request",
            Self::ProjectStop(_) => "project_stop_request",
            Self::ProjectRemove(_) => "project_remove_request",
            Self::Execute(_) => "claude_execute",
            Self::ExecuteStream(_) => "claude_execute_stream",
            Self::StreamCancel(_) => "claude_stream_cancel",
            Self::History(_) => "conversation_history",
            Self::Clear(_) => "conversation_clear",
            Self::Continue(_) => "conversation_continue",
            Self::PermissionResponse(_) => "permission_response",
        }
    }
}

/// Constructors for server-to-client messages.
pub mod server {
    use serde_json::{json, Value};

    use super::{Envelope, API_VERSION, CAPABILITIES};
    use crate::container::Project;
    use crate::permission::PermissionRequest;
    use crate::session::ConversationSession;

    /// Session ID reported for a project's conversation.
    pub fn session_id(project_id: &str) -> String {
        format!("session_{}", project_id)
    }

    /// `error{message}`
    pub fn error(message: impl Into<String>) -> Envelope {
        Envelope::new("error", json!({ "message": message.into() }))
    }

    /// `auth_result` for a successful handshake.
    pub fn auth_success(session_id: &str) -> Envelope {
        Envelope::new(
            "auth_result",
            json!({ "status": "success", "session_id": session_id }),
        )
    }

    /// `auth_result` for a rejected handshake.
    pub fn auth_failed(message: &str) -> Envelope {
        Envelope::new(
            "auth_result",
            json!({ "status": "failed", "message": message }),
        )
    }

    /// Greeting sent once a connection is registered.
    pub fn connection_established(connection_id: &str) -> Envelope {
        Envelope::new(
            "connection_established",
            json!({
                "server_version": env!("CARGO_PKG_VERSION"),
                "api_version": API_VERSION,
                "capabilities": CAPABILITIES,
                "connection_id": connection_id,
            }),
        )
    }

    /// `pong` echoing the ping payload.
    pub fn pong(timestamp: Value) -> Envelope {
        Envelope::new("pong", json!({ "timestamp": timestamp }))
    }

    /// `project_list_response`
    pub fn project_list(projects: &[Project]) -> Envelope {
        Envelope::new(
            "project_list_response",
            json!({ "projects": projects, "total": projects.len() }),
        )
    }

    /// `project_create_status` progress notice.
    pub fn project_create_status(status: &str, message: &str) -> Envelope {
        Envelope::new(
            "project_create_status",
            json!({ "status": status, "message": message }),
        )
    }

    /// `project_create_response`
    pub fn project_created(project: &Project) -> Envelope {
        Envelope::new(
            "project_create_response",
            json!({
                "project": project,
                "message": format!("Project '{}' created", project.name),
            }),
        )
    }

    /// `project_start_response`, `project_stop_response` or
    /// `project_remove_response`.
    pub fn project_lifecycle(kind: &str, project_id: &str, status: &str, message: &str) -> Envelope {
        Envelope::new(
            kind,
            json!({ "project_id": project_id, "status": status, "message": message }),
        )
    }

    /// `claude_output` for a finished command.
    pub fn command_output(
        project_id: &str,
        command: &str,
        output: &str,
        language: &str,
        message_count: usize,
        classification: Value,
    ) -> Envelope {
        Envelope::new(
            "claude_output",
            json!({
                "project_id": project_id,
                "session_id": session_id(project_id),
                "language": language,
                "message_count": message_count,
                "command": command,
                "output": output,
                "classification": classification,
                "status": "completed",
            }),
        )
    }

    /// `claude_error` carrying the captured output of the failed command.
    pub fn command_error(project_id: &str, command: &str, error: &str, output: &str) -> Envelope {
        Envelope::new(
            "claude_error",
            json!({
                "project_id": project_id,
                "command": command,
                "error": error,
                "output": output,
            }),
        )
    }

    /// `claude_stream_start`
    pub fn stream_start(project_id: &str, command: &str, language: &str, message_count: usize) -> Envelope {
        Envelope::new(
            "claude_stream_start",
            json!({
                "project_id": project_id,
                "session_id": session_id(project_id),
                "language": language,
                "message_count": message_count,
                "command": command,
            }),
        )
    }

    /// `claude_stream_output` with one chunk.
    pub fn stream_output(project_id: &str, command: &str, chunk: &str) -> Envelope {
        Envelope::new(
            "claude_stream_output",
            json!({ "project_id": project_id, "command": command, "output": chunk }),
        )
    }

    /// `claude_stream_end`
    pub fn stream_end(project_id: &str, command: &str) -> Envelope {
        Envelope::new(
            "claude_stream_end",
            json!({ "project_id": project_id, "command": command, "status": "completed" }),
        )
    }

    /// `claude_stream_error`
    pub fn stream_error(project_id: &str, command: &str, error: &str) -> Envelope {
        Envelope::new(
            "claude_stream_error",
            json!({ "project_id": project_id, "command": command, "error": error }),
        )
    }

    /// `conversation_history_response`; an unknown project yields an empty history.
    pub fn history(project_id: &str, session: Option<&ConversationSession>) -> Envelope {
        let data = match session {
            Some(session) => json!({
                "project_id": project_id,
                "session_id": session_id(project_id),
                "messages": session.messages,
                "language": session.language,
                "created_at": session.created_at,
                "last_activity": session.last_activity,
                "message_count": session.messages.len(),
                "status": "success",
            }),
            None => json!({
                "project_id": project_id,
                "messages": [],
                "language": crate::session::LANGUAGE_AUTO,
                "message_count": 0,
                "status": "success",
            }),
        };
        Envelope::new("conversation_history_response", data)
    }

    /// `conversation_clear_response`
    pub fn cleared(project_id: &str) -> Envelope {
        Envelope::new(
            "conversation_clear_response",
            json!({ "project_id": project_id, "status": "success" }),
        )
    }

    /// `permission_request` forwarded to the originating client.
    pub fn permission_request(request: &PermissionRequest) -> Envelope {
        Envelope::new("permission_request", request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_execute() {
        let msg = ClientMessage::parse(
            r#"{"type":"claude_execute","data":{"project_id":"p1","command":"ls"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Execute(ExecuteRequest {
                project_id: "p1".to_string(),
                command: "ls".to_string(),
            })
        );
        assert!(!msg.is_control());
    }

    #[test]
    fn test_parse_create_with_numeric_cpus() {
        let msg = ClientMessage::parse(
            r#"{"type":"project_create_request","data":{"name":"demo","type":"python","resources":{"memory":"1g","cpus":2}}}"#,
        )
        .unwrap();
        let ClientMessage::ProjectCreate(spec) = msg else {
            panic!("expected project_create_request");
        };
        assert_eq!(spec.name, "demo");
        assert_eq!(spec.project_type.as_deref(), Some("python"));
        assert_eq!(spec.resources.unwrap().cpus.as_deref(), Some("2"));
    }

    #[test]
    fn test_ping_without_data() {
        let msg = ClientMessage::parse(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping(Value::Null));
        assert!(msg.is_control());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = ClientMessage::parse(r#"{"type":"teleport","data":{}}"#).unwrap_err();
        assert!(err.to_string().contains("unknown message type: teleport"));
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        assert!(ClientMessage::parse("not json").is_err());
        assert!(ClientMessage::parse(r#"{"data":{}}"#).is_err());
        let err = ClientMessage::parse(r#"{"type":"claude_execute","data":{}}"#).unwrap_err();
        assert!(err.to_string().contains("invalid claude_execute payload"));
    }

    #[test]
    fn test_outbound_shapes() {
        let env = server::error("boom");
        assert_eq!(env.to_text().unwrap(), r#"{"type":"error","data":{"message":"boom"}}"#);

        let env = server::connection_established("c1");
        assert_eq!(env.data["api_version"], API_VERSION);
        assert_eq!(env.data["connection_id"], "c1");

        let env = server::history("p1", None);
        assert_eq!(env.data["messages"], serde_json::json!([]));
        assert_eq!(env.data["language"], "auto");
    }
}
