use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dockhand::config::Config;
use dockhand::gateway::fake::FakeTool;
use dockhand::gateway::ToolOutput;
use dockhand::hub::{AppState, ConnectionHandle, ConnectionId, Envelope};
use tempfile::TempDir;
use tokio::sync::mpsc;

#[allow(dead_code)]
pub const TEST_KEY: &str = "integration-key";

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Fake runtime whose exec handler plays a shell and an assistant CLI.
///
/// - `claude --print ...` answers with a file-creation proposal, and with
///   `Created hello.py` when elevated;
/// - `git status` prints a clean tree;
/// - any other shell command echoes itself.
#[allow(dead_code)]
pub fn scripted_tool() -> FakeTool {
    let fake = FakeTool::new();
    fake.set_exec_handler(|argv| {
        if argv.first().map(String::as_str) == Some("claude") {
            if argv.iter().any(|a| a == "--dangerously-skip-permissions") {
                return ToolOutput::ok("Created hello.py\n");
            }
            let prompt = argv.last().cloned().unwrap_or_default();
            if prompt.to_lowercase().contains("python") {
                return ToolOutput::ok(
                    "I'll create hello.py with the following content:\n```python\nprint(\"Hello\")\n```\n",
                );
            }
            return ToolOutput::ok(format!("Answer to: {}\n", prompt));
        }
        match argv.last().map(String::as_str) {
            Some("git status") => ToolOutput::ok("On branch main\nnothing to commit, working tree clean\n"),
            Some("false") => ToolOutput::failed(1, "command failed\n"),
            Some(other) => ToolOutput::ok(format!("{}\n", other)),
            None => ToolOutput::ok(""),
        }
    });
    fake
}

/// Config tuned for fast tests.
#[allow(dead_code)]
pub fn test_config(permission_timeout_secs: u64) -> Config {
    let mut config = Config::default();
    config.server.auth_key = Some(TEST_KEY.to_string());
    config.permission.timeout_secs = permission_timeout_secs;
    config.container.stream_timeout_secs = 5;
    config
}

#[allow(dead_code)]
pub fn app_state(fake: &FakeTool, permission_timeout_secs: u64) -> AppState {
    AppState::build(
        test_config(permission_timeout_secs),
        Arc::new(fake.clone()),
        TEST_KEY,
    )
}

/// Register an in-process connection and return its outbound queue.
#[allow(dead_code)]
pub async fn connect(state: &AppState) -> (ConnectionId, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(64);
    let handle = ConnectionHandle::new("test", TEST_KEY, tx);
    let id = handle.id;
    state.hub.register(handle).await;
    (id, rx)
}

/// Next queued envelope, failing the test after two seconds.
#[allow(dead_code)]
pub async fn next(rx: &mut mpsc::Receiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("connection queue closed")
}

/// Skip envelopes until one of type `kind` arrives.
#[allow(dead_code)]
pub async fn next_of(rx: &mut mpsc::Receiver<Envelope>, kind: &str) -> Envelope {
    loop {
        let envelope = next(rx).await;
        if envelope.kind == kind {
            return envelope;
        }
    }
}
