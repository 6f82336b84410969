//! In-process fake container runtime for tests
//!
//! [`FakeTool`] implements [`ExternalTool`] by interpreting the container
//! runtime argv Dockhand issues (`volume create`, `run`, `inspect`, `start`,
//! `stop`, `rm`, `ps`, `exec`, `logs`) against an in-memory table of
//! containers and volumes. Commands run through `exec` are answered by a
//! pluggable handler, so tests can script what a project environment prints.
//!
//! Every invocation is recorded and can be read back with [`FakeTool::calls`].
//!
//! # Example
//!
//! ```
//! use dockhand::gateway::fake::FakeTool;
//! use dockhand::gateway::{ExternalTool, ToolOutput};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let fake = FakeTool::new();
//! fake.set_exec_handler(|argv| ToolOutput::ok(format!("ran {}", argv.join(" "))));
//!
//! let args: Vec<String> = ["volume", "create", "v1"].iter().map(|s| s.to_string()).collect();
//! fake.execute("docker", &args).await.unwrap();
//! assert!(fake.volume_names().contains(&"v1".to_string()));
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::gateway::{ExternalTool, ToolEvent, ToolOutput};

/// Handler invoked for `exec`; receives the argv run inside the container.
pub type ExecHandler = Arc<dyn Fn(&[String]) -> ToolOutput + Send + Sync>;

/// A container tracked by the fake runtime.
#[derive(Debug, Clone)]
pub struct FakeContainer {
    /// Container ID returned from `run`
    pub id: String,
    /// Container name
    pub name: String,
    /// Image the container was started from
    pub image: String,
    /// Runtime state: `running`, `exited` or `created`
    pub status: String,
    /// Labels passed with `--label`
    pub labels: BTreeMap<String, String>,
    /// Raw argv of the `run` invocation
    pub run_args: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    volumes: BTreeSet<String>,
    calls: Vec<Vec<String>>,
    failing: HashSet<String>,
    exec_handler: Option<ExecHandler>,
    hold_streams: bool,
    next_id: u64,
}

/// Scripted stand-in for the container runtime binary.
#[derive(Clone, Default)]
pub struct FakeTool {
    state: Arc<Mutex<FakeState>>,
}

impl std::fmt::Debug for FakeTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeTool")
            .field("containers", &state.containers.len())
            .field("volumes", &state.volumes.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}

impl FakeTool {
    /// Create an empty fake runtime.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer every `exec` with `handler`.
    pub fn set_exec_handler<F>(&self, handler: F)
    where
        F: Fn(&[String]) -> ToolOutput + Send + Sync + 'static,
    {
        self.lock().exec_handler = Some(Arc::new(handler));
    }

    /// Make every invocation of `subcommand` (e.g. `run`, `volume create`) fail.
    pub fn fail_subcommand(&self, subcommand: &str) {
        self.lock().failing.insert(subcommand.to_string());
    }

    /// Keep streamed executions open after their output until cancelled.
    pub fn hold_streams(&self, hold: bool) {
        self.lock().hold_streams = hold;
    }

    /// Add a pre-existing container, as if created by an earlier server run.
    pub fn insert_container(&self, container: FakeContainer) {
        self.lock()
            .containers
            .insert(container.name.clone(), container);
    }

    /// Every argv the fake has received, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.lock().calls.clone()
    }

    /// Names of containers that currently exist.
    pub fn container_names(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    /// Names of volumes that currently exist.
    pub fn volume_names(&self) -> Vec<String> {
        self.lock().volumes.iter().cloned().collect()
    }

    /// Look up a container by name.
    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.lock().containers.get(name).cloned()
    }

    fn handle(&self, args: &[String]) -> ToolOutput {
        let mut state = self.lock();
        state.calls.push(args.to_vec());

        let sub = subcommand(args);
        if state.failing.contains(&sub) {
            return ToolOutput::failed(125, format!("Error: injected failure for {}", sub));
        }

        let rest: Vec<String> = args.iter().skip(sub.split(' ').count()).cloned().collect();
        match sub.as_str() {
            "volume create" => {
                if let Some(name) = rest.last() {
                    state.volumes.insert(name.clone());
                    ToolOutput::ok(format!("{}\n", name))
                } else {
                    ToolOutput::failed(1, "volume name required")
                }
            }
            "volume rm" => {
                for name in rest.iter().filter(|a| !a.starts_with('-')) {
                    state.volumes.remove(name);
                }
                ToolOutput::ok("")
            }
            "run" => run_container(&mut state, &rest),
            "inspect" => inspect(&state, &rest),
            "start" => set_status(&mut state, &rest, "running"),
            "stop" => set_status(&mut state, &rest, "exited"),
            "rm" => {
                let names: Vec<&String> = rest.iter().filter(|a| !a.starts_with('-')).collect();
                for name in names {
                    state.containers.remove(name);
                }
                ToolOutput::ok("")
            }
            "ps" => {
                let label = flag_value(&rest, "--filter")
                    .and_then(|f| f.strip_prefix("label=").map(str::to_string));
                let names: Vec<String> = state
                    .containers
                    .values()
                    .filter(|c| match &label {
                        Some(l) => match l.split_once('=') {
                            Some((k, v)) => c.labels.get(k).map(String::as_str) == Some(v),
                            None => c.labels.contains_key(l),
                        },
                        None => true,
                    })
                    .map(|c| c.name.clone())
                    .collect();
                ToolOutput::ok(names.join("\n"))
            }
            "logs" => match rest.last().and_then(|n| state.containers.get(n)) {
                Some(c) => ToolOutput::ok(format!("log line from {}\n", c.name)),
                None => no_such_container(rest.last()),
            },
            "exec" => {
                let (name, argv) = split_exec(&rest);
                let status = name
                    .as_ref()
                    .and_then(|n| state.containers.get(n))
                    .map(|c| c.status.clone());
                match status {
                    Some(status) if status == "running" => {
                        let handler = state.exec_handler.clone();
                        drop(state);
                        match handler {
                            Some(h) => h(&argv),
                            None => ToolOutput::ok(""),
                        }
                    }
                    Some(_) => ToolOutput::failed(
                        1,
                        format!(
                            "Error response from daemon: container {} is not running",
                            name.unwrap_or_default()
                        ),
                    ),
                    None => no_such_container(name.as_ref()),
                }
            }
            other => ToolOutput::failed(1, format!("unknown command: {}", other)),
        }
    }
}

fn subcommand(args: &[String]) -> String {
    match args.first().map(String::as_str) {
        Some("volume") => format!("volume {}", args.get(1).cloned().unwrap_or_default()),
        Some(s) => s.to_string(),
        None => String::new(),
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn no_such_container(name: Option<&String>) -> ToolOutput {
    ToolOutput::failed(
        1,
        format!(
            "Error: No such container: {}",
            name.map(String::as_str).unwrap_or_default()
        ),
    )
}

fn run_container(state: &mut FakeState, rest: &[String]) -> ToolOutput {
    let mut name = None;
    let mut labels = BTreeMap::new();
    let mut image = None;
    let mut i = 0;
    while i < rest.len() {
        let arg = &rest[i];
        if arg == "-d" {
            i += 1;
            continue;
        }
        if arg.starts_with("--") {
            let value = rest.get(i + 1).cloned().unwrap_or_default();
            match arg.as_str() {
                "--name" => name = Some(value),
                "--label" => {
                    if let Some((k, v)) = value.split_once('=') {
                        labels.insert(k.to_string(), v.to_string());
                    }
                }
                "--volume" => {
                    if let Some((vol, _)) = value.split_once(':') {
                        state.volumes.insert(vol.to_string());
                    }
                }
                _ => {}
            }
            i += 2;
            continue;
        }
        image = Some(arg.clone());
        break;
    }

    let Some(name) = name else {
        return ToolOutput::failed(1, "--name required");
    };
    if state.containers.contains_key(&name) {
        return ToolOutput::failed(
            125,
            format!("Error: the container name \"{}\" is already in use", name),
        );
    }

    state.next_id += 1;
    let id = format!("{:012x}", state.next_id);
    state.containers.insert(
        name.clone(),
        FakeContainer {
            id: id.clone(),
            name,
            image: image.unwrap_or_default(),
            status: "running".to_string(),
            labels,
            run_args: rest.to_vec(),
        },
    );
    ToolOutput::ok(format!("{}\n", id))
}

fn inspect(state: &FakeState, rest: &[String]) -> ToolOutput {
    let format = flag_value(rest, "--format");
    let names: Vec<&String> = rest
        .iter()
        .enumerate()
        .filter(|(i, a)| {
            !a.starts_with("--") && (*i == 0 || rest[i - 1] != "--format")
        })
        .map(|(_, a)| a)
        .collect();

    let mut found = Vec::new();
    for name in &names {
        match state.containers.get(*name) {
            Some(c) => found.push(c),
            None => return ToolOutput::failed(1, format!("Error: No such object: {}", name)),
        }
    }

    if let Some(format) = format {
        if format.contains(".State.Status") {
            let lines: Vec<&str> = found.iter().map(|c| c.status.as_str()).collect();
            return ToolOutput::ok(format!("{}\n", lines.join("\n")));
        }
    }

    let docs: Vec<serde_json::Value> = found
        .iter()
        .map(|c| {
            serde_json::json!({
                "Id": c.id,
                "Name": format!("/{}", c.name),
                "Created": "2024-01-01T00:00:00Z",
                "State": { "Status": c.status },
                "Config": { "Image": c.image, "Labels": c.labels },
            })
        })
        .collect();
    ToolOutput::ok(serde_json::Value::Array(docs).to_string())
}

fn set_status(state: &mut FakeState, rest: &[String], status: &str) -> ToolOutput {
    let Some(name) = rest.iter().rev().find(|a| !a.starts_with('-')) else {
        return ToolOutput::failed(1, "container name required");
    };
    match state.containers.get_mut(name) {
        Some(c) => {
            c.status = status.to_string();
            ToolOutput::ok(format!("{}\n", name))
        }
        None => no_such_container(Some(name)),
    }
}

fn split_exec(rest: &[String]) -> (Option<String>, Vec<String>) {
    let mut i = 0;
    while i < rest.len() {
        match rest[i].as_str() {
            "-i" | "-t" | "-it" => i += 1,
            "-w" | "--workdir" | "-e" | "--env" | "-u" | "--user" => i += 2,
            _ => break,
        }
    }
    let name = rest.get(i).cloned();
    let argv = rest.iter().skip(i + 1).cloned().collect();
    (name, argv)
}

#[async_trait::async_trait]
impl ExternalTool for FakeTool {
    async fn execute(&self, _program: &str, args: &[String]) -> Result<ToolOutput> {
        Ok(self.handle(args))
    }

    async fn stream_execute(
        &self,
        _program: &str,
        args: &[String],
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ToolEvent>> {
        let output = self.handle(args);
        let hold = self.lock().hold_streams;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            for line in output.stdout.lines() {
                if tx.send(ToolEvent::Stdout(line.to_string())).await.is_err() {
                    return;
                }
            }
            for line in output.stderr.lines() {
                if tx.send(ToolEvent::Stderr(line.to_string())).await.is_err() {
                    return;
                }
            }
            if hold {
                cancel.cancelled().await;
                let _ = tx.send(ToolEvent::Cancelled).await;
                return;
            }
            let _ = tx.send(ToolEvent::Exited(output.exit_code)).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_then_inspect_status() {
        let fake = FakeTool::new();
        fake.execute("docker", &args(&["run", "-d", "--name", "c1", "--label", "a=b", "img"]))
            .await
            .unwrap();

        let out = fake
            .execute("docker", &args(&["inspect", "--format", "{{.State.Status}}", "c1"]))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "running");
        assert_eq!(fake.container("c1").unwrap().labels.get("a").unwrap(), "b");
    }

    #[tokio::test]
    async fn test_exec_requires_running_container() {
        let fake = FakeTool::new();
        fake.execute("docker", &args(&["run", "-d", "--name", "c1", "img"]))
            .await
            .unwrap();
        fake.execute("docker", &args(&["stop", "c1"])).await.unwrap();

        let out = fake
            .execute("docker", &args(&["exec", "-i", "c1", "ls"]))
            .await
            .unwrap();
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_exec_handler_sees_inner_argv() {
        let fake = FakeTool::new();
        fake.set_exec_handler(|argv| ToolOutput::ok(argv.join("|")));
        fake.execute("docker", &args(&["run", "-d", "--name", "c1", "img"]))
            .await
            .unwrap();

        let out = fake
            .execute(
                "docker",
                &args(&["exec", "-i", "-w", "/workspace", "c1", "/bin/bash", "-c", "pwd"]),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout, "/bin/bash|-c|pwd");
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let fake = FakeTool::new();
        fake.fail_subcommand("volume create");
        let out = fake
            .execute("docker", &args(&["volume", "create", "v"]))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 125);
        assert!(fake.volume_names().is_empty());
    }
}
