//! Container manager
//!
//! [`ContainerManager`] drives the container runtime through an
//! [`ExternalTool`]. It holds no project table of its own: every lookup goes
//! to the runtime, and only the last-access timestamps live in memory.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::ContainerConfig;
use crate::container::{slugify, Project, ProjectSpec, ProjectStatus, ResourceLimits};
use crate::error::{DockhandError, Result};
use crate::gateway::{ExternalTool, ToolEvent, ToolOutput};

const LABEL_MANAGED: &str = "dockhand.managed";
const LABEL_ID: &str = "dockhand.project.id";
const LABEL_NAME: &str = "dockhand.project.name";
const LABEL_TYPE: &str = "dockhand.project.type";
const LABEL_MEMORY: &str = "dockhand.resources.memory";
const LABEL_CPUS: &str = "dockhand.resources.cpus";
const LABEL_CREATED: &str = "dockhand.created_at";

const MAX_NAME_LEN: usize = 64;

/// Live output of a streamed execution.
///
/// `output` carries stdout and stderr lines (newline-terminated) in the
/// order they were read. A non-zero exit, cancellation or deadline is
/// reported once on `errors`. Both channels close when the command ends.
#[derive(Debug)]
pub struct ExecStream {
    /// Output chunks
    pub output: mpsc::Receiver<String>,
    /// Terminal failure, if any
    pub errors: mpsc::Receiver<anyhow::Error>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectDoc {
    id: String,
    name: String,
    #[serde(default)]
    created: Option<String>,
    state: InspectState,
    config: InspectConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    image: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

/// Manages per-project container environments.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use dockhand::config::ContainerConfig;
/// use dockhand::container::{ContainerManager, ProjectSpec};
/// use dockhand::gateway::ProcessTool;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let manager = ContainerManager::new(Arc::new(ProcessTool::new()), ContainerConfig::default());
/// let project = manager.create(ProjectSpec::named("demo")).await?;
/// let out = manager.execute(&project.id, "ls -la").await?;
/// println!("{}", out);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ContainerManager {
    tool: Arc<dyn ExternalTool>,
    config: ContainerConfig,
    last_access: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl ContainerManager {
    /// Create a manager that drives `config.runtime` through `tool`.
    pub fn new(tool: Arc<dyn ExternalTool>, config: ContainerConfig) -> Self {
        Self {
            tool,
            config,
            last_access: RwLock::new(HashMap::new()),
        }
    }

    /// Runtime container name for a project.
    pub fn container_name(&self, project_id: &str) -> String {
        format!("{}{}", self.config.name_prefix, project_id)
    }

    /// Runtime volume name for a project.
    pub fn volume_name(&self, project_id: &str) -> String {
        format!("{}project-{}", self.config.name_prefix, project_id)
    }

    /// Container configuration in use.
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    async fn run(&self, args: Vec<String>) -> Result<ToolOutput> {
        self.tool.execute(&self.config.runtime, &args).await
    }

    /// Run and turn a non-zero exit into [`DockhandError::ExternalTool`].
    async fn run_checked(&self, args: Vec<String>) -> Result<String> {
        let output = self.run(args).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(DockhandError::ExternalTool {
                tool: self.config.runtime.clone(),
                exit_code: output.exit_code,
                output: output.combined().trim().to_string(),
            }
            .into())
        }
    }

    fn missing(output: &ToolOutput) -> bool {
        output.combined().contains("No such")
    }

    /// Create a project and its environment.
    ///
    /// Validates the request first, then creates the volume, starts the
    /// container and runs the configured init command. If any step after
    /// the first resource exists fails, the container and volume are
    /// removed before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::InvalidResourceSpec`] for rejected names or
    /// limits (no runtime call is made), otherwise the runtime failure.
    pub async fn create(&self, spec: ProjectSpec) -> Result<Project> {
        let name = spec.name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(DockhandError::InvalidResourceSpec(format!(
                "project name must be 1-{} characters",
                MAX_NAME_LEN
            ))
            .into());
        }

        let requested = spec.resources.clone().unwrap_or_default();
        let resources = ResourceLimits::new(
            requested
                .memory
                .as_deref()
                .unwrap_or(&self.config.default_memory),
            requested.cpus.as_deref().unwrap_or(&self.config.default_cpus),
        );
        resources.validate(self.config.max_cpus)?;

        let project_type = spec
            .project_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("general")
            .to_string();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = format!("{}-{}", slugify(&name), &suffix[..8]);
        let container_name = self.container_name(&id);
        let volume = self.volume_name(&id);
        let created_at = Utc::now();

        tracing::info!(project_id = %id, name = %name, "creating project");

        self.run_checked(vec![
            "volume".into(),
            "create".into(),
            "--label".into(),
            format!("{}=true", LABEL_MANAGED),
            "--label".into(),
            format!("{}={}", LABEL_ID, id),
            volume.clone(),
        ])
        .await?;

        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            container_name.clone(),
            "--memory".into(),
            resources.memory.clone(),
            "--cpus".into(),
            resources.cpus.clone(),
            "--security-opt".into(),
            "no-new-privileges:true".into(),
            "--user".into(),
            self.config.user.clone(),
        ];
        if let Some(network) = &self.config.network {
            args.push("--network".into());
            args.push(network.clone());
        }
        let labels = [
            (LABEL_MANAGED, "true".to_string()),
            (LABEL_ID, id.clone()),
            (LABEL_NAME, name.clone()),
            (LABEL_TYPE, project_type.clone()),
            (LABEL_MEMORY, resources.memory.clone()),
            (LABEL_CPUS, resources.cpus.clone()),
            (LABEL_CREATED, created_at.to_rfc3339()),
        ];
        for (key, value) in labels {
            args.push("--label".into());
            args.push(format!("{}={}", key, value));
        }
        let mut env: BTreeMap<String, String> = spec.config.clone().into_iter().collect();
        env.insert("PROJECT_ID".into(), id.clone());
        env.insert("PROJECT_NAME".into(), name.clone());
        env.insert("PROJECT_TYPE".into(), project_type.clone());
        for (key, value) in env {
            args.push("--env".into());
            args.push(format!("{}={}", key, value));
        }
        args.extend([
            "--volume".into(),
            format!("{}:{}", volume, self.config.workdir),
            "--workdir".into(),
            self.config.workdir.clone(),
            self.config.image.clone(),
            "/bin/sh".into(),
            "-c".into(),
            "tail -f /dev/null".into(),
        ]);

        let container_id = match self.run_checked(args).await {
            Ok(stdout) => stdout.trim().to_string(),
            Err(e) => {
                self.rollback(&id).await;
                return Err(e);
            }
        };

        if let Some(init) = &self.config.init_command {
            let result = self
                .exec_in(&container_name, init, vec!["/bin/bash".into(), "-c".into(), init.clone()])
                .await;
            if let Err(e) = result {
                tracing::warn!(project_id = %id, "init command failed: {:#}", e);
                self.rollback(&id).await;
                return Err(e);
            }
        }

        tracing::info!(project_id = %id, container = %container_name, "project created");

        Ok(Project {
            id,
            name,
            project_type,
            status: ProjectStatus::Running,
            container_id,
            container_name,
            image: self.config.image.clone(),
            resources,
            created_at,
            last_access: None,
        })
    }

    async fn rollback(&self, project_id: &str) {
        tracing::warn!(project_id, "rolling back partially created project");
        let container = self.container_name(project_id);
        let volume = self.volume_name(project_id);
        if let Err(e) = self.run(vec!["rm".into(), "-f".into(), container]).await {
            tracing::error!(project_id, "rollback failed to remove container: {:#}", e);
        }
        if let Err(e) = self
            .run(vec!["volume".into(), "rm".into(), "-f".into(), volume])
            .await
        {
            tracing::error!(project_id, "rollback failed to remove volume: {:#}", e);
        }
    }

    /// Current status of a project's environment.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::ProjectNotFound`] when no container exists.
    pub async fn status(&self, project_id: &str) -> Result<ProjectStatus> {
        let output = self
            .run(vec![
                "inspect".into(),
                "--format".into(),
                "{{.State.Status}}".into(),
                self.container_name(project_id),
            ])
            .await?;

        if output.success() {
            Ok(ProjectStatus::from_runtime(&output.stdout))
        } else if Self::missing(&output) {
            Err(DockhandError::ProjectNotFound(project_id.to_string()).into())
        } else {
            Err(DockhandError::ExternalTool {
                tool: self.config.runtime.clone(),
                exit_code: output.exit_code,
                output: output.combined().trim().to_string(),
            }
            .into())
        }
    }

    /// Start a project. Starting a running project is a no-op.
    pub async fn start(&self, project_id: &str) -> Result<ProjectStatus> {
        if self.status(project_id).await? == ProjectStatus::Running {
            tracing::debug!(project_id, "start requested for running project");
            return Ok(ProjectStatus::Running);
        }
        self.run_checked(vec!["start".into(), self.container_name(project_id)])
            .await?;
        tracing::info!(project_id, "project started");
        Ok(ProjectStatus::Running)
    }

    /// Stop a project. Stopping a project that is not running is a no-op.
    pub async fn stop(&self, project_id: &str) -> Result<ProjectStatus> {
        let status = self.status(project_id).await?;
        if status != ProjectStatus::Running {
            tracing::debug!(project_id, %status, "stop requested for idle project");
            return Ok(status);
        }
        self.run_checked(vec!["stop".into(), self.container_name(project_id)])
            .await?;
        tracing::info!(project_id, "project stopped");
        Ok(ProjectStatus::Stopped)
    }

    /// Remove a project, its container and its volume.
    ///
    /// Removing a project that no longer exists succeeds; its volume is
    /// still swept in case an earlier removal was interrupted.
    pub async fn remove(&self, project_id: &str) -> Result<()> {
        match self.status(project_id).await {
            Ok(ProjectStatus::Running) => {
                self.run_checked(vec!["stop".into(), self.container_name(project_id)])
                    .await?;
                self.run_checked(vec!["rm".into(), "-f".into(), self.container_name(project_id)])
                    .await?;
            }
            Ok(_) => {
                self.run_checked(vec!["rm".into(), "-f".into(), self.container_name(project_id)])
                    .await?;
            }
            Err(e) if crate::error::is_not_found(&e) => {
                tracing::debug!(project_id, "remove requested for missing project");
            }
            Err(e) => return Err(e),
        }

        self.run_checked(vec![
            "volume".into(),
            "rm".into(),
            "-f".into(),
            self.volume_name(project_id),
        ])
        .await?;

        self.last_access.write().await.remove(project_id);
        tracing::info!(project_id, "project removed");
        Ok(())
    }

    async fn ensure_running(&self, project_id: &str) -> Result<()> {
        match self.status(project_id).await? {
            ProjectStatus::Running => Ok(()),
            status => Err(DockhandError::Container(format!(
                "project {} is {}; start it before running commands",
                project_id, status
            ))
            .into()),
        }
    }

    async fn touch(&self, project_id: &str) {
        self.last_access
            .write()
            .await
            .insert(project_id.to_string(), Utc::now());
    }

    fn exec_args(&self, container: &str, argv: Vec<String>) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "-i".to_string(),
            "-w".to_string(),
            self.config.workdir.clone(),
            container.to_string(),
        ];
        args.extend(argv);
        args
    }

    async fn exec_in(&self, container: &str, command: &str, argv: Vec<String>) -> Result<String> {
        let output = self.run(self.exec_args(container, argv)).await?;
        if output.success() {
            Ok(output.combined())
        } else {
            Err(DockhandError::CommandFailed {
                command: command.to_string(),
                exit_code: output.exit_code,
                output: output.combined(),
            }
            .into())
        }
    }

    /// Run a shell command inside a project and return its combined output.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::CommandFailed`] with the captured output on a
    /// non-zero exit. The environment stays up either way.
    pub async fn execute(&self, project_id: &str, command: &str) -> Result<String> {
        self.ensure_running(project_id).await?;
        self.touch(project_id).await;
        tracing::debug!(project_id, command, "executing command");
        self.exec_in(
            &self.container_name(project_id),
            command,
            vec!["/bin/bash".into(), "-c".into(), command.to_string()],
        )
        .await
    }

    /// Run an exact argv inside a project, bypassing the shell.
    pub async fn execute_argv(&self, project_id: &str, argv: &[String]) -> Result<String> {
        self.ensure_running(project_id).await?;
        self.touch(project_id).await;
        let command = argv.join(" ");
        tracing::debug!(project_id, program = ?argv.first(), "executing argv");
        self.exec_in(&self.container_name(project_id), &command, argv.to_vec())
            .await
    }

    /// Run a shell command inside a project and stream its output.
    ///
    /// The execution ends when the command exits, when `cancel` fires, or
    /// when `stream_timeout_secs` elapses; the process is killed in the
    /// latter two cases.
    pub async fn stream_execute(
        &self,
        project_id: &str,
        command: &str,
        cancel: CancellationToken,
    ) -> Result<ExecStream> {
        self.ensure_running(project_id).await?;
        self.touch(project_id).await;

        let run_token = cancel.child_token();
        let args = self.exec_args(
            &self.container_name(project_id),
            vec!["/bin/bash".into(), "-c".into(), command.to_string()],
        );
        let mut events = self
            .tool
            .stream_execute(&self.config.runtime, &args, run_token.clone())
            .await?;

        let (out_tx, out_rx) = mpsc::channel(64);
        let (err_tx, err_rx) = mpsc::channel(1);
        let deadline = Duration::from_secs(self.config.stream_timeout_secs);
        let command = command.to_string();
        let project_id = project_id.to_string();

        tokio::spawn(async move {
            let sleep = tokio::time::sleep(deadline);
            tokio::pin!(sleep);
            let mut timed_out = false;

            loop {
                tokio::select! {
                    _ = &mut sleep, if !timed_out => {
                        tracing::warn!(project_id = %project_id, "streamed command hit its deadline");
                        timed_out = true;
                        run_token.cancel();
                    }
                    event = events.recv() => match event {
                        Some(ToolEvent::Stdout(line)) | Some(ToolEvent::Stderr(line)) => {
                            if out_tx.send(format!("{}\n", line)).await.is_err() {
                                run_token.cancel();
                            }
                        }
                        Some(ToolEvent::Exited(0)) | None => break,
                        Some(ToolEvent::Exited(code)) => {
                            let _ = err_tx
                                .send(
                                    DockhandError::CommandFailed {
                                        command: command.clone(),
                                        exit_code: code,
                                        output: String::new(),
                                    }
                                    .into(),
                                )
                                .await;
                            break;
                        }
                        Some(ToolEvent::Cancelled) => {
                            let reason = if timed_out {
                                format!("command timed out after {}s", deadline.as_secs())
                            } else {
                                "command cancelled".to_string()
                            };
                            let _ = err_tx.send(DockhandError::Container(reason).into()).await;
                            break;
                        }
                    }
                }
            }
        });

        Ok(ExecStream {
            output: out_rx,
            errors: err_rx,
        })
    }

    /// List every project the runtime knows about.
    pub async fn list(&self) -> Result<Vec<Project>> {
        let names = self
            .run_checked(vec![
                "ps".into(),
                "-a".into(),
                "--filter".into(),
                format!("label={}=true", LABEL_MANAGED),
                "--format".into(),
                "{{.Names}}".into(),
            ])
            .await?;
        let names: Vec<String> = names
            .lines()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["inspect".to_string()];
        args.extend(names.iter().cloned());
        let docs = match self.run(args).await? {
            output if output.success() => parse_inspect(&output.stdout)?,
            _ => {
                // A container vanished between `ps` and `inspect`.
                let mut docs = Vec::new();
                for name in &names {
                    let output = self.run(vec!["inspect".into(), name.clone()]).await?;
                    if output.success() {
                        docs.extend(parse_inspect(&output.stdout)?);
                    }
                }
                docs
            }
        };

        let access = self.last_access.read().await;
        let mut projects: Vec<Project> = docs
            .into_iter()
            .filter_map(|doc| project_from_inspect(doc, &access))
            .collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(projects)
    }

    /// Look up one project.
    pub async fn get(&self, project_id: &str) -> Result<Project> {
        let output = self
            .run(vec!["inspect".into(), self.container_name(project_id)])
            .await?;
        if !output.success() {
            return Err(DockhandError::ProjectNotFound(project_id.to_string()).into());
        }
        let access = self.last_access.read().await;
        parse_inspect(&output.stdout)?
            .into_iter()
            .find_map(|doc| project_from_inspect(doc, &access))
            .ok_or_else(|| DockhandError::ProjectNotFound(project_id.to_string()).into())
    }

    /// Last `lines` lines of the environment's own log output.
    pub async fn logs(&self, project_id: &str, lines: usize) -> Result<String> {
        let output = self
            .run(vec![
                "logs".into(),
                "--tail".into(),
                lines.to_string(),
                self.container_name(project_id),
            ])
            .await?;
        if output.success() {
            Ok(output.combined())
        } else if Self::missing(&output) {
            Err(DockhandError::ProjectNotFound(project_id.to_string()).into())
        } else {
            Err(DockhandError::ExternalTool {
                tool: self.config.runtime.clone(),
                exit_code: output.exit_code,
                output: output.combined().trim().to_string(),
            }
            .into())
        }
    }

    /// When a command last ran in this project, if one has since startup.
    pub async fn last_access(&self, project_id: &str) -> Option<DateTime<Utc>> {
        self.last_access.read().await.get(project_id).copied()
    }
}

fn parse_inspect(stdout: &str) -> Result<Vec<InspectDoc>> {
    serde_json::from_str(stdout).map_err(|e| {
        DockhandError::Container(format!("unexpected inspect output: {}", e)).into()
    })
}

fn project_from_inspect(
    doc: InspectDoc,
    access: &HashMap<String, DateTime<Utc>>,
) -> Option<Project> {
    let labels = doc.config.labels.unwrap_or_default();
    let id = labels.get(LABEL_ID)?.clone();
    let label = |key: &str, default: &str| {
        labels
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    };
    let created_at = labels
        .get(LABEL_CREATED)
        .or(doc.created.as_ref())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(Project {
        last_access: access.get(&id).copied(),
        name: label(LABEL_NAME, &id),
        project_type: label(LABEL_TYPE, "general"),
        status: ProjectStatus::from_runtime(&doc.state.status),
        container_id: doc.id,
        container_name: doc.name.trim_start_matches('/').to_string(),
        image: doc.config.image,
        resources: ResourceLimits::new(&label(LABEL_MEMORY, ""), &label(LABEL_CPUS, "")),
        created_at,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ResourceRequest;
    use crate::gateway::fake::FakeTool;
    use crate::gateway::MockExternalTool;

    fn manager_with(fake: &FakeTool) -> ContainerManager {
        ContainerManager::new(Arc::new(fake.clone()), ContainerConfig::default())
    }

    #[tokio::test]
    async fn test_create_passes_limits_and_security_options() {
        let fake = FakeTool::new();
        let manager = manager_with(&fake);

        let mut spec = ProjectSpec::named("Web App");
        spec.resources = Some(ResourceRequest {
            memory: Some("512m".to_string()),
            cpus: Some("0.5".to_string()),
        });
        let project = manager.create(spec).await.unwrap();

        assert!(project.id.starts_with("web-app-"));
        assert_eq!(project.status, ProjectStatus::Running);
        let container = fake.container(&project.container_name).unwrap();
        let args = container.run_args.join(" ");
        assert!(args.contains("--memory 512m"));
        assert!(args.contains("--cpus 0.5"));
        assert!(args.contains("--security-opt no-new-privileges:true"));
        assert!(args.contains("--user 1000:1000"));
        assert!(args.contains(&format!("--env PROJECT_ID={}", project.id)));
        assert_eq!(container.labels.get(LABEL_NAME).unwrap(), "Web App");
        assert!(fake.volume_names().contains(&manager.volume_name(&project.id)));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_limits_without_runtime_calls() {
        let fake = FakeTool::new();
        let manager = manager_with(&fake);

        let mut spec = ProjectSpec::named("api");
        spec.resources = Some(ResourceRequest {
            memory: Some("huge".to_string()),
            cpus: None,
        });
        let err = manager.create(spec).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DockhandError>(),
            Some(DockhandError::InvalidResourceSpec(_))
        ));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_rolls_back_when_run_fails() {
        let fake = FakeTool::new();
        fake.fail_subcommand("run");
        let manager = manager_with(&fake);

        assert!(manager.create(ProjectSpec::named("api")).await.is_err());
        assert!(fake.container_names().is_empty());
        assert!(fake.volume_names().is_empty());
    }

    #[tokio::test]
    async fn test_create_rolls_back_when_init_fails() {
        let fake = FakeTool::new();
        fake.set_exec_handler(|_| ToolOutput::failed(1, "init exploded"));
        let mut config = ContainerConfig::default();
        config.init_command = Some("project-init".to_string());
        let manager = ContainerManager::new(Arc::new(fake.clone()), config);

        let err = manager.create(ProjectSpec::named("api")).await.unwrap_err();
        assert_eq!(crate::error::captured_output(&err), Some("init exploded"));
        assert!(fake.container_names().is_empty());
        assert!(fake.volume_names().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let fake = FakeTool::new();
        let manager = manager_with(&fake);
        let project = manager.create(ProjectSpec::named("api")).await.unwrap();

        assert_eq!(manager.stop(&project.id).await.unwrap(), ProjectStatus::Stopped);
        let calls_before = fake.calls().len();
        assert_eq!(manager.stop(&project.id).await.unwrap(), ProjectStatus::Stopped);
        // Only the status probe ran the second time.
        assert_eq!(fake.calls().len(), calls_before + 1);

        assert_eq!(manager.start(&project.id).await.unwrap(), ProjectStatus::Running);
        assert_eq!(manager.start(&project.id).await.unwrap(), ProjectStatus::Running);
        assert_eq!(manager.status(&project.id).await.unwrap(), ProjectStatus::Running);
    }

    #[tokio::test]
    async fn test_unknown_project_is_not_found() {
        let fake = FakeTool::new();
        let manager = manager_with(&fake);

        for err in [
            manager.start("ghost").await.unwrap_err(),
            manager.execute("ghost", "ls").await.unwrap_err(),
            manager.get("ghost").await.unwrap_err(),
            manager.logs("ghost", 10).await.unwrap_err(),
        ] {
            assert!(crate::error::is_not_found(&err), "{:#}", err);
        }
    }

    #[tokio::test]
    async fn test_execute_failure_carries_output() {
        let fake = FakeTool::new();
        fake.set_exec_handler(|argv| {
            if argv.last().map(String::as_str) == Some("false") {
                ToolOutput::failed(1, "nope")
            } else {
                ToolOutput::ok("fine\n")
            }
        });
        let manager = manager_with(&fake);
        let project = manager.create(ProjectSpec::named("api")).await.unwrap();

        assert_eq!(manager.execute(&project.id, "true").await.unwrap(), "fine\n");
        let err = manager.execute(&project.id, "false").await.unwrap_err();
        match err.downcast_ref::<DockhandError>() {
            Some(DockhandError::CommandFailed {
                command,
                exit_code,
                output,
            }) => {
                assert_eq!(command, "false");
                assert_eq!(*exit_code, 1);
                assert_eq!(output, "nope");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(manager.last_access(&project.id).await.is_some());
        // The environment survives a failed command.
        assert_eq!(manager.status(&project.id).await.unwrap(), ProjectStatus::Running);
    }

    #[tokio::test]
    async fn test_execute_on_stopped_project_is_rejected() {
        let fake = FakeTool::new();
        let manager = manager_with(&fake);
        let project = manager.create(ProjectSpec::named("api")).await.unwrap();
        manager.stop(&project.id).await.unwrap();

        let err = manager.execute(&project.id, "ls").await.unwrap_err();
        assert!(err.to_string().contains("start it"));
    }

    #[tokio::test]
    async fn test_remove_twice_succeeds() {
        let fake = FakeTool::new();
        let manager = manager_with(&fake);
        let project = manager.create(ProjectSpec::named("api")).await.unwrap();

        manager.remove(&project.id).await.unwrap();
        manager.remove(&project.id).await.unwrap();
        assert!(fake.container_names().is_empty());
        assert!(fake.volume_names().is_empty());
    }

    #[tokio::test]
    async fn test_list_rebuilds_projects_from_labels() {
        let fake = FakeTool::new();
        let manager = manager_with(&fake);
        let mut spec = ProjectSpec::named("first");
        spec.project_type = Some("python".to_string());
        let first = manager.create(spec).await.unwrap();
        let second = manager.create(ProjectSpec::named("second")).await.unwrap();
        manager.stop(&second.id).await.unwrap();

        let projects = manager.list().await.unwrap();
        assert_eq!(projects.len(), 2);
        let listed = projects.iter().find(|p| p.id == first.id).unwrap();
        assert_eq!(listed.name, "first");
        assert_eq!(listed.project_type, "python");
        assert_eq!(listed.resources.memory, "2g");
        assert_eq!(listed.created_at, first.created_at);
        let stopped = projects.iter().find(|p| p.id == second.id).unwrap();
        assert_eq!(stopped.status, ProjectStatus::Stopped);
    }

    #[tokio::test]
    async fn test_get_and_logs() {
        let fake = FakeTool::new();
        let manager = manager_with(&fake);
        let project = manager.create(ProjectSpec::named("api")).await.unwrap();

        let fetched = manager.get(&project.id).await.unwrap();
        assert_eq!(fetched.name, "api");
        assert_eq!(fetched.status, ProjectStatus::Running);

        let logs = manager.logs(&project.id, 50).await.unwrap();
        assert_eq!(logs, format!("log line from {}\n", project.container_name));
        assert!(fake
            .calls()
            .iter()
            .any(|argv| argv.iter().any(|a| a == "--tail")));

        manager.remove(&project.id).await.unwrap();
        let err = manager.logs(&project.id, 50).await.unwrap_err();
        assert!(crate::error::is_not_found(&err));
    }

    #[tokio::test]
    async fn test_stream_execute_reports_non_zero_exit() {
        let fake = FakeTool::new();
        fake.set_exec_handler(|_| ToolOutput {
            stdout: "line 1\nline 2\n".to_string(),
            stderr: String::new(),
            exit_code: 2,
        });
        let manager = manager_with(&fake);
        let project = manager.create(ProjectSpec::named("api")).await.unwrap();

        let mut stream = manager
            .stream_execute(&project.id, "make", CancellationToken::new())
            .await
            .unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.output.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["line 1\n".to_string(), "line 2\n".to_string()]);
        let err = stream.errors.recv().await.unwrap();
        assert!(err.to_string().contains("exit code 2"));
        assert!(stream.errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_execute_cancel() {
        let fake = FakeTool::new();
        fake.hold_streams(true);
        let manager = manager_with(&fake);
        let project = manager.create(ProjectSpec::named("api")).await.unwrap();

        let cancel = CancellationToken::new();
        let mut stream = manager
            .stream_execute(&project.id, "sleep 100", cancel.clone())
            .await
            .unwrap();
        cancel.cancel();

        let err = stream.errors.recv().await.unwrap();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_exec_argv_shape() {
        let mut mock = MockExternalTool::new();
        mock.expect_execute()
            .withf(|program, args| program.to_string() == "docker" && args[0] == "inspect")
            .returning(|_, _| Ok(ToolOutput::ok("running\n")));
        mock.expect_execute()
            .withf(|_, args| args.join(" ") == "exec -i -w /workspace dockhand-p1 /bin/bash -c git status")
            .times(1)
            .returning(|_, _| Ok(ToolOutput::ok("clean\n")));

        let manager = ContainerManager::new(Arc::new(mock), ContainerConfig::default());
        assert_eq!(manager.execute("p1", "git status").await.unwrap(), "clean\n");
    }
}
