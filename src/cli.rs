//! Command-line interface definition for Dockhand
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to run the server and to inspect its state.

use clap::{Parser, Subcommand};

/// Dockhand - remote project sessions in isolated containers
///
/// Serves a WebSocket endpoint that lets a remote client manage per-project
/// container environments, run commands in them and talk to an AI assistant.
#[derive(Parser, Debug, Clone)]
#[command(name = "dockhand")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "DOCKHAND_JSON_LOGS")]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Dockhand
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the WebSocket server
    Serve {
        /// Interface to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Session key clients must present (generated when omitted)
        #[arg(short, long, env = "DOCKHAND_KEY", hide_env_values = true)]
        key: Option<String>,
    },

    /// Show how a command would be routed
    Classify {
        /// Print the classification as JSON
        #[arg(long)]
        json: bool,

        /// Command text, as a client would send it
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// List project environments known to the container runtime
    Projects {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            command: Commands::Serve {
                host: None,
                port: None,
                key: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(matches!(cli.command, Commands::Serve { port: None, .. }));
    }

    #[test]
    fn test_cli_parse_serve_with_overrides() {
        let cli = Cli::try_parse_from([
            "dockhand", "serve", "--host", "127.0.0.1", "--port", "9001", "--key", "abcdefgh",
        ])
        .unwrap();
        if let Commands::Serve { host, port, key } = cli.command {
            assert_eq!(host.as_deref(), Some("127.0.0.1"));
            assert_eq!(port, Some(9001));
            assert_eq!(key.as_deref(), Some("abcdefgh"));
        } else {
            panic!("Expected Serve command");
        }
    }

    #[test]
    fn test_cli_parse_classify_joins_words() {
        let cli = Cli::try_parse_from(["dockhand", "classify", "git", "status"]).unwrap();
        if let Commands::Classify { command, .. } = cli.command {
            assert_eq!(command.join(" "), "git status");
        } else {
            panic!("Expected Classify command");
        }
    }

    #[test]
    fn test_cli_parse_classify_keeps_hyphenated_args() {
        let cli = Cli::try_parse_from(["dockhand", "classify", "ls", "-la"]).unwrap();
        if let Commands::Classify { command, .. } = cli.command {
            assert_eq!(command, vec!["ls".to_string(), "-la".to_string()]);
        } else {
            panic!("Expected Classify command");
        }
    }

    #[test]
    fn test_cli_parse_classify_requires_text() {
        assert!(Cli::try_parse_from(["dockhand", "classify"]).is_err());
    }

    #[test]
    fn test_cli_parse_projects_json() {
        let cli = Cli::try_parse_from(["dockhand", "--json-logs", "projects", "--json"]).unwrap();
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::Projects { json: true }));
    }

    #[test]
    fn test_cli_parse_with_config_and_verbose() {
        let cli = Cli::try_parse_from(["dockhand", "-c", "custom.yaml", "-v", "projects"]).unwrap();
        assert_eq!(cli.config, Some("custom.yaml".to_string()));
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_parse_no_command_fails() {
        assert!(Cli::try_parse_from(["dockhand"]).is_err());
    }
}
