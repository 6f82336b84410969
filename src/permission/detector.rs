//! Mutation intent detection
//!
//! Detection is a heuristic over the assistant's unprivileged response: it
//! looks for wording that announces a file creation, modification, deletion
//! or command execution, or that asks for permission outright. False
//! positives and negatives are accepted; the strategy sits behind
//! [`MutationDetector`] so it can be replaced.

use regex::Regex;

use crate::permission::{PermissionAction, PermissionRequest};

/// Strategy that decides whether a response needs the user's approval.
pub trait MutationDetector: Send + Sync + std::fmt::Debug {
    /// Return a request describing the mutation `text` announces, if any.
    fn detect(&self, text: &str) -> Option<PermissionRequest>;
}

/// Regex and phrase based [`MutationDetector`].
#[derive(Debug)]
pub struct HeuristicDetector {
    creation: Vec<Regex>,
    modification: Vec<Regex>,
    deletion: Vec<Regex>,
    execution: Vec<Regex>,
    filename: Vec<Regex>,
    quoted_filename: Regex,
    inline_command: Regex,
    code_block: Regex,
    phrases: Vec<&'static str>,
}

impl Default for HeuristicDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("Invalid regex pattern"))
        .collect()
}

impl HeuristicDetector {
    /// Build the detector with its built-in pattern set.
    pub fn new() -> Self {
        Self {
            // Matched against lowercased text.
            creation: compile(&[
                r"create.*\.py",
                r"create.*\.js",
                r"create.*\.ts",
                r"create.*\.go",
                r"create.*\.rs",
                r"create.*\.html",
                r"save.*as.*\.",
                r"write.*to.*\.",
            ]),
            modification: compile(&[
                r"modify.*file",
                r"update.*file",
                r"edit.*file",
                r"change.*in.*file",
            ]),
            deletion: compile(&[r"(delete|remove).*file", r"\brm\s+(-[a-z]+\s+)*[\w./-]+"]),
            execution: compile(&[
                r"(should|shall|may|can) i (run|execute)",
                r"(would you like|do you want) me to (run|execute)",
            ]),
            // Matched against the original text.
            filename: compile(&[
                r"([a-zA-Z0-9_-]+\.(py|js|ts|go|rs|html|css|txt|md|json|yaml|yml|sh))\b",
                r"(?i)create.*?([a-zA-Z0-9_-]+\.[a-zA-Z0-9]+)",
                r"(?i)save.*?as.*?([a-zA-Z0-9_-]+\.[a-zA-Z0-9]+)",
            ]),
            quoted_filename: Regex::new(r#"['"`]([a-zA-Z0-9_./-]+\.[a-zA-Z0-9]+)['"`]"#)
                .expect("Invalid regex pattern"),
            inline_command: Regex::new(r"`([^`\n]+)`").expect("Invalid regex pattern"),
            code_block: Regex::new(r"(?s)```(?:[a-zA-Z0-9_+-]+)?\n?(.*?)\n?```")
                .expect("Invalid regex pattern"),
            phrases: vec![
                "i need permission",
                "would you like me to create",
                "should i create",
                "can i create",
                "may i create",
                "permission to create",
                "create this as",
            ],
        }
    }

    fn any_match(patterns: &[Regex], text: &str) -> bool {
        patterns.iter().any(|re| re.is_match(text))
    }

    fn extract_filename(&self, text: &str) -> Option<String> {
        if let Some(caps) = self.quoted_filename.captures(text) {
            return Some(caps[1].to_string());
        }
        self.filename
            .iter()
            .find_map(|re| re.captures(text).map(|caps| caps[1].to_string()))
    }

    fn extract_code_block(&self, text: &str) -> String {
        self.code_block
            .captures(text)
            .map(|caps| caps[1].trim().to_string())
            .unwrap_or_default()
    }
}

impl MutationDetector for HeuristicDetector {
    fn detect(&self, text: &str) -> Option<PermissionRequest> {
        let text = text.trim();
        let lower = text.to_lowercase();

        if Self::any_match(&self.creation, &lower) {
            if let Some(file) = self.extract_filename(text) {
                let preview = self.extract_code_block(text);
                return Some(PermissionRequest::new(
                    PermissionAction::CreateFile,
                    &file,
                    format!("Create file: {}", file),
                    preview,
                ));
            }
        }

        if Self::any_match(&self.modification, &lower) {
            if let Some(file) = self.extract_filename(text) {
                return Some(PermissionRequest::new(
                    PermissionAction::ModifyFile,
                    &file,
                    format!("Modify file: {}", file),
                    self.extract_code_block(text),
                ));
            }
        }

        if Self::any_match(&self.deletion, &lower) {
            if let Some(file) = self.extract_filename(text) {
                return Some(PermissionRequest::new(
                    PermissionAction::DeleteFile,
                    &file,
                    format!("Delete file: {}", file),
                    String::new(),
                ));
            }
        }

        if Self::any_match(&self.execution, &lower) {
            let block = self.extract_code_block(text);
            let command = if block.is_empty() {
                self.inline_command
                    .captures(text)
                    .map(|caps| caps[1].trim().to_string())
            } else {
                Some(block)
            };
            if let Some(command) = command {
                return Some(PermissionRequest::new(
                    PermissionAction::ExecuteCommand,
                    &command,
                    format!("Execute command: {}", command),
                    command.clone(),
                ));
            }
        }

        if self.phrases.iter().any(|p| lower.contains(p)) {
            let file = self.extract_filename(text).unwrap_or_default();
            return Some(PermissionRequest::new(
                PermissionAction::CreateFile,
                &file,
                "The assistant is requesting permission to create a file".to_string(),
                self.extract_code_block(text),
            ));
        }

        None
    }
}
