//! Command routing
//!
//! A command from a client is classified by [`classify`] and then routed:
//! shell-like commands run verbatim in the project's environment, prefixed
//! commands go to their handler, and everything else goes to the
//! [`Assistant`]. Prefix handlers talk to the environment directly and never
//! pass through the assistant or the permission workflow.

pub mod classifier;
mod help;

use std::sync::Arc;

use crate::assistant::Assistant;
use crate::container::ContainerManager;
use crate::error::{DockhandError, Result};
use crate::permission::PermissionNotifier;

pub use classifier::{classify, split_prefix, Classification, Prefix};
pub use help::help_text;

/// Per-request inputs the router cannot derive itself.
pub struct RouteContext<'a> {
    /// Session language (`auto`, `en`, `ja`, ...)
    pub language: &'a str,
    /// Channel back to the client for permission requests
    pub notifier: &'a dyn PermissionNotifier,
}

/// Quote `value` for a POSIX shell.
///
/// ```
/// use dockhand::router::shell_quote;
///
/// assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
/// ```
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Dispatches classified commands to the right executor.
#[derive(Debug)]
pub struct CommandRouter {
    containers: Arc<ContainerManager>,
    assistant: Arc<Assistant>,
}

impl CommandRouter {
    /// Create a router over the given executors.
    pub fn new(containers: Arc<ContainerManager>, assistant: Arc<Assistant>) -> Self {
        Self {
            containers,
            assistant,
        }
    }

    /// Execute `command` for `project_id` according to `classification`.
    ///
    /// # Errors
    ///
    /// Propagates execution failures, which carry the command and its
    /// captured output, and rejects malformed prefix commands with
    /// [`DockhandError::Protocol`].
    pub async fn route(
        &self,
        classification: Classification,
        project_id: &str,
        command: &str,
        ctx: RouteContext<'_>,
    ) -> Result<String> {
        tracing::debug!(project_id, %classification, "routing command");
        match classification {
            Classification::ShellLike => self.containers.execute(project_id, command.trim()).await,
            Classification::NaturalLanguage => {
                self.assistant
                    .respond(project_id, command, ctx.notifier)
                    .await
            }
            Classification::Prefixed(prefix) => {
                let remainder = split_prefix(command).map(|(_, rest)| rest).unwrap_or("");
                match prefix {
                    Prefix::Code => self.code(project_id, remainder).await,
                    Prefix::File => self.file(project_id, remainder).await,
                    Prefix::Git => self.git(project_id, remainder).await,
                    Prefix::Info => self.info(project_id, remainder).await,
                    Prefix::Help => Ok(help_text(ctx.language)),
                }
            }
        }
    }

    async fn code(&self, project_id: &str, command: &str) -> Result<String> {
        if command.is_empty() {
            return Err(DockhandError::Protocol("usage: code: <command>".to_string()).into());
        }
        self.containers.execute(project_id, command).await
    }

    async fn git(&self, project_id: &str, args: &str) -> Result<String> {
        let args = if args.is_empty() { "status" } else { args };
        self.containers
            .execute(project_id, &format!("git {}", args))
            .await
    }

    async fn info(&self, project_id: &str, topic: &str) -> Result<String> {
        let command = match topic.to_lowercase().as_str() {
            "status" => "ps aux | head -10",
            "disk" => "df -h",
            "memory" => "free -h",
            "env" => "env",
            _ => "uname -a && whoami && pwd",
        };
        self.containers.execute(project_id, command).await
    }

    async fn file(&self, project_id: &str, args: &str) -> Result<String> {
        let (action, rest) = match args.split_once(char::is_whitespace) {
            Some((action, rest)) => (action, rest.trim_start()),
            None => (args, ""),
        };
        let (target, content) = match rest.split_once(char::is_whitespace) {
            Some((target, content)) => (target, content),
            None => (rest, ""),
        };

        let require_target = || -> Result<()> {
            if target.is_empty() {
                Err(DockhandError::Protocol(format!("usage: file:{} <path>", action)).into())
            } else {
                Ok(())
            }
        };

        match action.to_lowercase().as_str() {
            "read" | "cat" => {
                require_target()?;
                self.containers
                    .execute(project_id, &format!("cat -- {}", shell_quote(target)))
                    .await
            }
            "list" | "ls" => {
                let dir = if target.is_empty() { "." } else { target };
                self.containers
                    .execute(project_id, &format!("ls -la -- {}", shell_quote(dir)))
                    .await
            }
            "write" | "create" => {
                require_target()?;
                let quoted = shell_quote(target);
                let command = format!(
                    "mkdir -p \"$(dirname -- {path})\" && printf '%s\\n' {content} > {path}",
                    path = quoted,
                    content = shell_quote(content),
                );
                self.containers.execute(project_id, &command).await?;
                tracing::info!(project_id, path = target, "file written");
                Ok(format!(
                    "File {} written ({} bytes)",
                    target,
                    content.len() + 1
                ))
            }
            "delete" | "rm" => {
                require_target()?;
                self.containers
                    .execute(project_id, &format!("rm -f -- {}", shell_quote(target)))
                    .await?;
                Ok(format!("File {} deleted", target))
            }
            _ => Err(DockhandError::Protocol(format!(
                "unknown file action '{}'; use read, list, write, create or delete",
                action
            ))
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssistantConfig, ContainerConfig, ConversationConfig};
    use crate::container::ProjectSpec;
    use crate::gateway::fake::FakeTool;
    use crate::gateway::ToolOutput;
    use crate::permission::{HeuristicDetector, PermissionRequest, PermissionWorkflow};
    use crate::session::SessionStore;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Silent;

    #[async_trait::async_trait]
    impl PermissionNotifier for Silent {
        async fn notify(&self, _request: &PermissionRequest) -> Result<()> {
            Ok(())
        }
    }

    async fn router_with(fake: &FakeTool) -> (CommandRouter, String) {
        let containers = Arc::new(ContainerManager::new(
            Arc::new(fake.clone()),
            ContainerConfig::default(),
        ));
        let project_id = containers
            .create(ProjectSpec::named("demo"))
            .await
            .unwrap()
            .id;
        let assistant = Arc::new(Assistant::new(
            Arc::clone(&containers),
            Arc::new(SessionStore::new(ConversationConfig::default())),
            Arc::new(PermissionWorkflow::new(Duration::from_secs(1))),
            Arc::new(HeuristicDetector::new()),
            AssistantConfig::default(),
        ));
        (CommandRouter::new(containers, assistant), project_id)
    }

    fn recording_fake() -> (FakeTool, Arc<Mutex<Vec<Vec<String>>>>) {
        let fake = FakeTool::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        fake.set_exec_handler(move |argv| {
            sink.lock().unwrap().push(argv.to_vec());
            ToolOutput::ok(format!("ran: {}", argv.last().cloned().unwrap_or_default()))
        });
        (fake, seen)
    }

    async fn run(router: &CommandRouter, project_id: &str, command: &str) -> Result<String> {
        router
            .route(
                classify(command),
                project_id,
                command,
                RouteContext {
                    language: "en",
                    notifier: &Silent,
                },
            )
            .await
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("a'b"), r"'a'\''b'");
    }

    #[tokio::test]
    async fn test_shell_like_runs_verbatim() {
        let (fake, seen) = recording_fake();
        let (router, id) = router_with(&fake).await;

        let out = run(&router, &id, "git status").await.unwrap();
        assert_eq!(out, "ran: git status");
        let argv = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(argv, vec!["/bin/bash", "-c", "git status"]);
    }

    #[tokio::test]
    async fn test_file_write_bypasses_assistant() {
        let (fake, seen) = recording_fake();
        let (router, id) = router_with(&fake).await;

        let out = run(&router, &id, "file:write test.py print('hi')").await.unwrap();
        assert_eq!(out, "File test.py written (12 bytes)");

        let calls = seen.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let script = calls[0].last().unwrap();
        assert!(script.contains(r"'print('\''hi'\'')'"));
        assert!(script.ends_with("> 'test.py'"));
        assert!(!calls[0].iter().any(|a| a == "claude"));
    }

    #[tokio::test]
    async fn test_file_read_and_list() {
        let (fake, seen) = recording_fake();
        let (router, id) = router_with(&fake).await;

        run(&router, &id, "file:read README.md").await.unwrap();
        run(&router, &id, "file:list").await.unwrap();
        let calls = seen.lock().unwrap().clone();
        assert_eq!(calls[0].last().unwrap(), "cat -- 'README.md'");
        assert_eq!(calls[1].last().unwrap(), "ls -la -- '.'");
    }

    #[tokio::test]
    async fn test_file_requires_target_and_known_action() {
        let (fake, _) = recording_fake();
        let (router, id) = router_with(&fake).await;

        assert!(run(&router, &id, "file:read").await.is_err());
        assert!(run(&router, &id, "file:frobnicate x").await.is_err());
        assert!(run(&router, &id, "code:").await.is_err());
    }

    #[tokio::test]
    async fn test_git_and_info_prefixes() {
        let (fake, seen) = recording_fake();
        let (router, id) = router_with(&fake).await;

        run(&router, &id, "git: log --oneline").await.unwrap();
        run(&router, &id, "git:").await.unwrap();
        run(&router, &id, "info:disk").await.unwrap();
        run(&router, &id, "info:").await.unwrap();
        let calls = seen.lock().unwrap().clone();
        assert_eq!(calls[0].last().unwrap(), "git log --oneline");
        assert_eq!(calls[1].last().unwrap(), "git status");
        assert_eq!(calls[2].last().unwrap(), "df -h");
        assert_eq!(calls[3].last().unwrap(), "uname -a && whoami && pwd");
    }

    #[tokio::test]
    async fn test_help_needs_no_environment() {
        let (fake, seen) = recording_fake();
        let (router, id) = router_with(&fake).await;

        let out = run(&router, &id, "help").await.unwrap();
        assert!(out.contains("code:"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_natural_language_goes_to_assistant() {
        let (fake, seen) = recording_fake();
        let (router, id) = router_with(&fake).await;

        let out = run(&router, &id, "explain the project layout").await.unwrap();
        assert_eq!(out, "ran: explain the project layout");
        let argv = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(argv[0], "claude");
        assert_eq!(argv[1], "--print");
    }
}
