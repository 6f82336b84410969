//! Error types for Dockhand
//!
//! This module defines all error types used throughout the server,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Dockhand operations
///
/// Covers connection authentication, wire protocol problems, container
/// lifecycle failures, command execution and the permission workflow.
#[derive(Error, Debug)]
pub enum DockhandError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection failed the authentication handshake
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Malformed or unsupported wire message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Container runtime failure during a lifecycle operation
    #[error("Container error: {0}")]
    Container(String),

    /// No project with the given ID is known to the container runtime
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Resource limits rejected before any container is created
    #[error("Invalid resource specification: {0}")]
    InvalidResourceSpec(String),

    /// A command ran inside a project environment and exited non-zero
    #[error("Command failed with exit code {exit_code}: {command}")]
    CommandFailed {
        /// The command as submitted by the client
        command: String,
        /// Process exit code (-1 when killed by a signal)
        exit_code: i32,
        /// Combined stdout and stderr captured before the failure
        output: String,
    },

    /// A host-side external tool (container runtime, AI CLI) failed
    #[error("External tool `{tool}` failed with exit code {exit_code}: {output}")]
    ExternalTool {
        /// Program name
        tool: String,
        /// Process exit code (-1 when it could not be spawned)
        exit_code: i32,
        /// Combined stdout and stderr
        output: String,
    },

    /// Nobody answered a permission request in time
    #[error("Permission request {0} timed out")]
    PermissionTimeout(String),

    /// The client refused a permission request
    #[error("Permission request {0} was denied")]
    PermissionDenied(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Dockhand operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Returns the output a failed command captured, if the error carries one.
///
/// Clients receive this next to the error message so a failing `make` or
/// `git` invocation still shows what it printed.
pub fn captured_output(err: &anyhow::Error) -> Option<&str> {
    match err.downcast_ref::<DockhandError>()? {
        DockhandError::CommandFailed { output, .. } | DockhandError::ExternalTool { output, .. } => {
            Some(output.as_str())
        }
        _ => None,
    }
}

/// Returns true when the error means the project does not exist.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<DockhandError>(),
        Some(DockhandError::ProjectNotFound(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = DockhandError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_project_not_found_display() {
        let error = DockhandError::ProjectNotFound("web-1a2b3c4d".to_string());
        assert_eq!(error.to_string(), "Project not found: web-1a2b3c4d");
    }

    #[test]
    fn test_command_failed_display() {
        let error = DockhandError::CommandFailed {
            command: "make test".to_string(),
            exit_code: 2,
            output: "missing target".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Command failed with exit code 2: make test"
        );
    }

    #[test]
    fn test_external_tool_display() {
        let error = DockhandError::ExternalTool {
            tool: "docker".to_string(),
            exit_code: 125,
            output: "no such image".to_string(),
        };
        assert!(error.to_string().contains("docker"));
        assert!(error.to_string().contains("125"));
    }

    #[test]
    fn test_captured_output_from_command_failure() {
        let err: anyhow::Error = DockhandError::CommandFailed {
            command: "ls nope".to_string(),
            exit_code: 2,
            output: "ls: cannot access 'nope'".to_string(),
        }
        .into();
        assert_eq!(captured_output(&err), Some("ls: cannot access 'nope'"));
    }

    #[test]
    fn test_captured_output_absent_for_other_errors() {
        let err: anyhow::Error = DockhandError::Auth("bad key".to_string()).into();
        assert!(captured_output(&err).is_none());
        assert!(captured_output(&anyhow::anyhow!("plain")).is_none());
    }

    #[test]
    fn test_is_not_found() {
        let err: anyhow::Error = DockhandError::ProjectNotFound("x".to_string()).into();
        assert!(is_not_found(&err));
        let other: anyhow::Error = DockhandError::Container("x".to_string()).into();
        assert!(!is_not_found(&other));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: DockhandError = io_error.into();
        assert!(matches!(error, DockhandError::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<DockhandError>();
        assert_sync::<DockhandError>();
    }
}
