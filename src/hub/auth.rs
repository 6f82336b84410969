//! Connection authentication
//!
//! A client proves it knows the server's session key either with the `key`
//! query parameter of the upgrade request or with an `auth` message sent as
//! its first frame. Nothing else is accepted before authentication.

use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};

use crate::error::{DockhandError, Result};
use crate::hub::protocol::{AuthRequest, ClientInfo, ClientMessage, Envelope};

/// How a connection authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// `?key=` on the upgrade request
    Query,
    /// First-frame `auth` message
    Message,
}

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientIdentity {
    /// How the key was presented
    pub method: AuthMethod,
    /// Key presented by the client
    pub token: String,
    /// Details the client sent, empty for query authentication
    pub client_info: ClientInfo,
}

impl ClientIdentity {
    /// Platform tag for logging, `unknown` when the client sent none.
    pub fn platform(&self) -> &str {
        if self.client_info.platform.is_empty() {
            "unknown"
        } else {
            &self.client_info.platform
        }
    }
}

/// Random 32-character hex session key.
pub fn generate_key() -> String {
    rand::random::<[u8; 16]>()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Compare keys without short-circuiting on the first differing byte.
pub fn key_matches(expected: &str, presented: &str) -> bool {
    let (a, b) = (expected.as_bytes(), presented.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check a key taken from the upgrade request's query string.
///
/// # Errors
///
/// Returns [`DockhandError::Auth`] when the key does not match.
pub fn authenticate_query(expected: &str, presented: &str) -> Result<ClientIdentity> {
    if !key_matches(expected, presented) {
        return Err(DockhandError::Auth("invalid authentication key".to_string()).into());
    }
    Ok(ClientIdentity {
        method: AuthMethod::Query,
        token: presented.to_string(),
        client_info: ClientInfo::default(),
    })
}

/// Wait for the first application frame and require it to be a valid `auth`.
///
/// Protocol-level ping and pong frames are skipped. The whole wait is bounded
/// by `window`.
///
/// # Errors
///
/// Returns [`DockhandError::Auth`] when the window elapses, the socket
/// closes, the first frame is not `auth`, or the key does not match.
pub async fn await_auth_message<S, E>(
    frames: &mut S,
    expected: &str,
    window: Duration,
) -> Result<ClientIdentity>
where
    S: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let request = tokio::time::timeout(window, first_auth_request(frames))
        .await
        .map_err(|_| DockhandError::Auth("authentication timed out".to_string()))??;

    if !key_matches(expected, &request.token) {
        return Err(DockhandError::Auth("invalid authentication key".to_string()).into());
    }
    Ok(ClientIdentity {
        method: AuthMethod::Message,
        token: request.token,
        client_info: request.client_info,
    })
}

async fn first_auth_request<S, E>(frames: &mut S) -> Result<AuthRequest>
where
    S: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(frame) = frames.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                return Err(DockhandError::Auth("expected auth message".to_string()).into())
            }
            Err(e) => return Err(DockhandError::Auth(format!("socket error: {}", e)).into()),
        };
        return match Envelope::parse(&text).and_then(ClientMessage::from_envelope) {
            Ok(ClientMessage::Auth(request)) => Ok(request),
            Ok(_) => Err(DockhandError::Auth("expected auth message".to_string()).into()),
            Err(e) => Err(DockhandError::Auth(e.to_string()).into()),
        };
    }
    Err(DockhandError::Auth("connection closed before authentication".to_string()).into())
}
