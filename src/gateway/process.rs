//! Process-backed external tool
//!
//! [`ProcessTool`] spawns real host executables with `tokio::process`.
//! Streamed executions merge the child's stdout and stderr line streams and
//! forward them through a bounded channel from a background task that also
//! watches the cancellation token.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{DockhandError, Result};
use crate::gateway::{ExternalTool, ToolEvent, ToolOutput};

const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Runs external tools as child processes of the server.
///
/// # Examples
///
/// ```no_run
/// use dockhand::gateway::{ExternalTool, ProcessTool};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let tool = ProcessTool::new();
/// let output = tool.execute("docker", &["version".to_string()]).await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProcessTool;

impl ProcessTool {
    /// Create a new process-backed tool runner.
    pub fn new() -> Self {
        Self
    }

    fn spawn_error(program: &str, err: std::io::Error) -> anyhow::Error {
        DockhandError::ExternalTool {
            tool: program.to_string(),
            exit_code: -1,
            output: format!("failed to spawn: {}", err),
        }
        .into()
    }
}

#[async_trait::async_trait]
impl ExternalTool for ProcessTool {
    async fn execute(&self, program: &str, args: &[String]) -> Result<ToolOutput> {
        tracing::debug!(program, ?args, "executing external tool");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Self::spawn_error(program, e))?;

        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        if !result.success() {
            tracing::debug!(
                program,
                exit_code = result.exit_code,
                "external tool exited non-zero"
            );
        }

        Ok(result)
    }

    async fn stream_execute(
        &self,
        program: &str,
        args: &[String],
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ToolEvent>> {
        tracing::debug!(program, ?args, "streaming external tool");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Self::spawn_error(program, e))?;

        let stdout = child.stdout.take().ok_or_else(|| DockhandError::ExternalTool {
            tool: program.to_string(),
            exit_code: -1,
            output: "child stdout unavailable after spawn".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| DockhandError::ExternalTool {
            tool: program.to_string(),
            exit_code: -1,
            output: "child stderr unavailable after spawn".to_string(),
        })?;

        let out_lines =
            LinesStream::new(BufReader::new(stdout).lines()).map(|l| l.map(ToolEvent::Stdout));
        let err_lines =
            LinesStream::new(BufReader::new(stderr).lines()).map(|l| l.map(ToolEvent::Stderr));
        let mut merged = out_lines.merge(err_lines);

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let program = program.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let _ = child.kill().await;
                        tracing::debug!(program = %program, "streamed execution cancelled");
                        let _ = tx.send(ToolEvent::Cancelled).await;
                        return;
                    }
                    next = merged.next() => match next {
                        Some(Ok(event)) => {
                            if tx.send(event).await.is_err() {
                                // Receiver gone: nobody wants the rest.
                                let _ = child.kill().await;
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::debug!(program = %program, "stopped reading output: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
            }

            let exit_code = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    let _ = tx.send(ToolEvent::Cancelled).await;
                    return;
                }
                status = child.wait() => match status {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(e) => {
                        tracing::warn!(program = %program, "failed to reap child: {}", e);
                        -1
                    }
                },
            };

            let _ = tx.send(ToolEvent::Exited(exit_code)).await;
        });

        Ok(rx)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_execute_captures_output_and_exit_code() {
        let tool = ProcessTool::new();
        let output = tool
            .execute("sh", &args(&["-c", "echo out; echo err >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_execute_missing_program_is_error() {
        let tool = ProcessTool::new();
        let err = tool
            .execute("definitely-not-a-real-binary-dockhand", &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DockhandError>(),
            Some(DockhandError::ExternalTool { exit_code: -1, .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_execute_yields_lines_then_exit() {
        let tool = ProcessTool::new();
        let mut rx = tool
            .stream_execute(
                "sh",
                &args(&["-c", "echo one; echo two; exit 4"]),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(
            events,
            vec![
                ToolEvent::Stdout("one".to_string()),
                ToolEvent::Stdout("two".to_string()),
                ToolEvent::Exited(4),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_execute_cancel_kills_process() {
        let tool = ProcessTool::new();
        let cancel = CancellationToken::new();
        let mut rx = tool
            .stream_execute("sh", &args(&["-c", "echo started; sleep 30"]), cancel.clone())
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(ToolEvent::Stdout("started".to_string())));
        cancel.cancel();

        let last = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("cancellation should be prompt");
        assert_eq!(last, Some(ToolEvent::Cancelled));
        assert_eq!(rx.recv().await, None);
    }
}
