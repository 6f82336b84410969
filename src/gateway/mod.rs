//! External tool gateway
//!
//! Everything Dockhand runs on the host (the container runtime, and through
//! it the AI assistant CLI) goes through the [`ExternalTool`] trait. The
//! container manager never spawns processes itself, so tests can substitute
//! the scripted `fake::FakeTool` (behind the `test-util` feature) or a
//! `mockall` mock for the real [`process::ProcessTool`].
//!
//! # Canonical Import Path
//!
//! ```no_run
//! use dockhand::gateway::{ExternalTool, ToolEvent, ToolOutput};
//! ```

#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod process;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use process::ProcessTool;

/// Captured result of a finished external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Everything written to stdout
    pub stdout: String,
    /// Everything written to stderr
    pub stderr: String,
    /// Exit code, -1 when the process was killed by a signal
    pub exit_code: i32,
}

impl ToolOutput {
    /// Successful output carrying only stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Failed output carrying only stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// True when the process exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let mut out = self.stdout.clone();
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&self.stderr);
                out
            }
        }
    }
}

/// One event of a streamed execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEvent {
    /// A line written to stdout, without its trailing newline
    Stdout(String),
    /// A line written to stderr, without its trailing newline
    Stderr(String),
    /// The process finished; always the last event unless cancelled
    Exited(i32),
    /// The cancellation token fired and the process was killed
    Cancelled,
}

/// Abstraction over spawning host executables.
///
/// Implementations must never block the Tokio executor and must kill the
/// child promptly when a streamed execution is cancelled.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ExternalTool: Send + Sync + std::fmt::Debug {
    /// Run `program` with `args` to completion and capture its output.
    ///
    /// A non-zero exit code is not an error at this layer; callers decide
    /// what a failure means. Spawn failures are returned as errors.
    async fn execute(&self, program: &str, args: &[String]) -> Result<ToolOutput>;

    /// Spawn `program` with `args` and stream its output line by line.
    ///
    /// The returned receiver yields [`ToolEvent::Stdout`] and
    /// [`ToolEvent::Stderr`] events as they happen, followed by exactly one
    /// [`ToolEvent::Exited`] or [`ToolEvent::Cancelled`], then closes.
    async fn stream_execute(
        &self,
        program: &str,
        args: &[String],
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ToolEvent>>;
}
