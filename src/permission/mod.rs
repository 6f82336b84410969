//! Human-in-the-loop permission workflow
//!
//! When the assistant's unprivileged response announces a file mutation or
//! command, the server asks the originating client for approval and waits
//! for the answer with a deadline.
//!
//! Per request: `Detected -> Pending -> {Approved | Denied | TimedOut}`.
//!
//! - The pending entry is inserted *before* the request is sent, so an
//!   immediate answer can never be lost.
//! - Each pending entry is a [`oneshot::Sender`]; the first response wins
//!   and removes it, later or duplicate responses are ignored.
//! - The entry is owned by a guard inside the waiting future, so a timeout,
//!   a delivery failure or a dropped wait (the connection went away) all
//!   remove it.

pub mod detector;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::Result;

pub use detector::{HeuristicDetector, MutationDetector};

/// Kind of mutation a request asks approval for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    /// Write a new file
    CreateFile,
    /// Change an existing file
    ModifyFile,
    /// Delete a file
    DeleteFile,
    /// Run a command
    ExecuteCommand,
}

/// A pending question to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Correlation ID, `req_<uuid>`
    pub request_id: String,
    /// What would happen
    pub action: PermissionAction,
    /// File name or command line
    pub target: String,
    /// Human-readable summary
    pub description: String,
    /// Content preview, empty when there is none
    pub preview: String,
    /// Unix timestamp (seconds) of detection
    pub timestamp: i64,
}

impl PermissionRequest {
    /// New request with a fresh ID and the current time.
    pub fn new(
        action: PermissionAction,
        target: &str,
        description: String,
        preview: String,
    ) -> Self {
        Self {
            request_id: format!("req_{}", uuid::Uuid::new_v4().simple()),
            action,
            target: target.to_string(),
            description,
            preview,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// The user's answer to a [`PermissionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionResponse {
    /// ID of the request being answered
    pub request_id: String,
    /// Whether the user approved
    pub approved: bool,
    /// Optional free text
    #[serde(default)]
    pub user_comment: String,
}

/// How a permission request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionOutcome {
    /// The user approved
    Approved(PermissionResponse),
    /// The user refused
    Denied(PermissionResponse),
    /// No answer arrived in time
    TimedOut,
}

/// Delivers a permission request to the client that triggered it.
#[async_trait::async_trait]
pub trait PermissionNotifier: Send + Sync {
    /// Send `request` to the client.
    async fn notify(&self, request: &PermissionRequest) -> Result<()>;
}

type PendingMap = HashMap<String, oneshot::Sender<PermissionResponse>>;

/// Registry of pending permission requests.
#[derive(Debug)]
pub struct PermissionWorkflow {
    timeout: Duration,
    pending: Mutex<PendingMap>,
}

/// Removes a request's pending entry when the wait ends, however it ends.
struct PendingEntry<'a> {
    pending: &'a Mutex<PendingMap>,
    request_id: &'a str,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        let removed = lock_pending(self.pending).remove(self.request_id);
        if removed.is_some() {
            tracing::debug!(request_id = %self.request_id, "pending permission entry released");
        }
    }
}

fn lock_pending(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PermissionWorkflow {
    /// Create a workflow whose requests expire after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Ask the client and wait for its answer.
    ///
    /// Dropping the returned future before it completes withdraws the
    /// request.
    ///
    /// # Errors
    ///
    /// Returns the notifier's error when the request could not be
    /// delivered; the pending entry is removed first.
    pub async fn request_approval(
        &self,
        request: &PermissionRequest,
        notifier: &dyn PermissionNotifier,
    ) -> Result<PermissionOutcome> {
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(request.request_id.clone(), tx);
        let _entry = PendingEntry {
            pending: &self.pending,
            request_id: &request.request_id,
        };

        notifier.notify(request).await?;

        tracing::info!(
            request_id = %request.request_id,
            action = ?request.action,
            target = %request.target,
            "awaiting permission"
        );

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) if response.approved => {
                tracing::info!(request_id = %request.request_id, "permission approved");
                Ok(PermissionOutcome::Approved(response))
            }
            Ok(Ok(response)) => {
                tracing::info!(request_id = %request.request_id, "permission denied");
                Ok(PermissionOutcome::Denied(response))
            }
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(request_id = %request.request_id, "permission request timed out");
                Ok(PermissionOutcome::TimedOut)
            }
        }
    }

    /// Record a client's answer.
    ///
    /// Returns `false` when no request with that ID is pending (late,
    /// duplicate or unknown).
    pub async fn respond(&self, response: PermissionResponse) -> bool {
        let sender = lock_pending(&self.pending).remove(&response.request_id);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                tracing::debug!(request_id = %response.request_id, "ignoring response for unknown request");
                false
            }
        }
    }

    /// Number of requests still waiting for an answer.
    pub async fn pending_count(&self) -> usize {
        lock_pending(&self.pending).len()
    }
}
