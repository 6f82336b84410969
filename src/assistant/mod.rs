//! AI assistant path
//!
//! Natural-language commands are answered by the assistant CLI running
//! inside the project's environment. The first call is unprivileged; if the
//! response announces a mutation the permission workflow asks the client,
//! and only an approval re-runs the prompt with the CLI's elevated flags.

use std::sync::Arc;

use crate::config::AssistantConfig;
use crate::container::ContainerManager;
use crate::error::Result;
use crate::permission::{
    MutationDetector, PermissionNotifier, PermissionOutcome, PermissionWorkflow,
};
use crate::session::SessionStore;

/// Reply to an empty request.
pub const GREETING: &str = "Hello! How can I help you today?";

/// Reply when the assistant printed nothing.
pub const EMPTY_RESPONSE: &str =
    "I'm sorry, but I couldn't generate a response to your request.";

/// Appended when the user refuses a permission request.
pub const DENIED_NOTE: &str = "❌ Permission denied. The operation was not performed.";

/// Appended when a permission request expires.
pub const TIMEOUT_NOTE: &str = "⏰ Permission request timed out. The operation was not performed.";

/// Prefix of the elevated result appended after an approval.
pub const GRANTED_NOTE: &str = "✅ Permission granted!";

/// Runs prompts through the assistant CLI and gates mutations.
#[derive(Debug)]
pub struct Assistant {
    containers: Arc<ContainerManager>,
    sessions: Arc<SessionStore>,
    permissions: Arc<PermissionWorkflow>,
    detector: Arc<dyn MutationDetector>,
    config: AssistantConfig,
}

impl Assistant {
    /// Wire the assistant to its collaborators.
    pub fn new(
        containers: Arc<ContainerManager>,
        sessions: Arc<SessionStore>,
        permissions: Arc<PermissionWorkflow>,
        detector: Arc<dyn MutationDetector>,
        config: AssistantConfig,
    ) -> Self {
        Self {
            containers,
            sessions,
            permissions,
            detector,
            config,
        }
    }

    /// Argv that runs `prompt` through the CLI, optionally with edit rights.
    pub fn cli_args(&self, prompt: &str, elevated: bool) -> Vec<String> {
        let mut args = vec![self.config.cli_path.clone(), "--print".to_string()];
        if elevated {
            args.extend([
                "--permission-mode".to_string(),
                "acceptEdits".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ]);
        }
        args.push(prompt.to_string());
        args
    }

    /// Prompt for `command`, prefixed with the project's recent history.
    pub async fn build_prompt(&self, project_id: &str, command: &str) -> String {
        let context = self.sessions.build_context(project_id).await;
        if context.is_empty() {
            command.to_string()
        } else {
            format!(
                "Context from previous conversation:\n{}\nCurrent request: {}",
                context, command
            )
        }
    }

    /// Answer a natural-language request for a project.
    ///
    /// # Errors
    ///
    /// Returns the container manager's error when the unprivileged CLI call
    /// fails. Permission delivery failures and elevated-run failures are
    /// folded into the returned text instead.
    pub async fn respond(
        &self,
        project_id: &str,
        command: &str,
        notifier: &dyn PermissionNotifier,
    ) -> Result<String> {
        let command = command.trim();
        if command.is_empty() {
            return Ok(GREETING.to_string());
        }

        let prompt = self.build_prompt(project_id, command).await;
        let response = self
            .containers
            .execute_argv(project_id, &self.cli_args(&prompt, false))
            .await?;
        let response = match response.trim() {
            "" => EMPTY_RESPONSE.to_string(),
            text => text.to_string(),
        };

        let Some(request) = self.detector.detect(&response) else {
            return Ok(response);
        };

        tracing::info!(
            project_id,
            request_id = %request.request_id,
            "assistant response needs permission"
        );

        let outcome = match self.permissions.request_approval(&request, notifier).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(project_id, "could not deliver permission request: {:#}", e);
                return Ok(response);
            }
        };

        match outcome {
            PermissionOutcome::Approved(_) => {
                match self
                    .containers
                    .execute_argv(project_id, &self.cli_args(&prompt, true))
                    .await
                {
                    Ok(elevated) => Ok(format!(
                        "{}\n\n{}\n\n{}",
                        response,
                        GRANTED_NOTE,
                        elevated.trim()
                    )),
                    Err(e) => Ok(format!(
                        "{}\n\n✅ Permission granted, but execution failed: {}",
                        response, e
                    )),
                }
            }
            PermissionOutcome::Denied(_) => Ok(format!("{}\n\n{}", response, DENIED_NOTE)),
            PermissionOutcome::TimedOut => Ok(format!("{}\n\n{}", response, TIMEOUT_NOTE)),
        }
    }
}
