//! Configuration management for Dockhand
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{DockhandError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for Dockhand
///
/// Every section has defaults so a partial YAML file (or none at all)
/// produces a runnable server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket listener and connection hub settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Container runtime settings for project environments
    #[serde(default)]
    pub container: ContainerConfig,
    /// AI assistant CLI settings
    #[serde(default)]
    pub assistant: AssistantConfig,
    /// Conversation history settings
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// Permission workflow settings
    #[serde(default)]
    pub permission: PermissionConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to bind
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared session key clients must present. Generated at startup when unset.
    #[serde(default)]
    pub auth_key: Option<String>,

    /// Seconds between server pings
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Seconds of silence after which a connection is dropped
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Seconds a connection has to authenticate after upgrading
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Capacity of each connection's outbound queue
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,

    /// Capacity of each connection's pending command queue
    #[serde(default = "default_command_queue_size")]
    pub command_queue_size: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_outbound_queue_size() -> usize {
    256
}

fn default_command_queue_size() -> usize {
    32
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_key: None,
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
            outbound_queue_size: default_outbound_queue_size(),
            command_queue_size: default_command_queue_size(),
        }
    }
}

/// Container runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Container runtime binary
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Image every project environment starts from
    #[serde(default = "default_image")]
    pub image: String,

    /// Prefix for container and volume names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Network to attach containers to; runtime default when unset
    #[serde(default)]
    pub network: Option<String>,

    /// `uid:gid` the environment runs as
    #[serde(default = "default_user")]
    pub user: String,

    /// Mount point of the project volume and working directory for commands
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Memory limit used when a create request omits one
    #[serde(default = "default_memory")]
    pub default_memory: String,

    /// CPU limit used when a create request omits one
    #[serde(default = "default_cpus")]
    pub default_cpus: String,

    /// Upper bound accepted for a project's CPU limit
    #[serde(default = "default_max_cpus")]
    pub max_cpus: f64,

    /// Command run once inside a freshly created environment
    #[serde(default)]
    pub init_command: Option<String>,

    /// Hard deadline for streamed executions
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "dockhand-workspace:latest".to_string()
}

fn default_name_prefix() -> String {
    "dockhand-".to_string()
}

fn default_user() -> String {
    "1000:1000".to_string()
}

fn default_workdir() -> String {
    "/workspace".to_string()
}

fn default_memory() -> String {
    "2g".to_string()
}

fn default_cpus() -> String {
    "1.0".to_string()
}

fn default_max_cpus() -> f64 {
    16.0
}

fn default_stream_timeout() -> u64 {
    600
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            image: default_image(),
            name_prefix: default_name_prefix(),
            network: None,
            user: default_user(),
            workdir: default_workdir(),
            default_memory: default_memory(),
            default_cpus: default_cpus(),
            max_cpus: default_max_cpus(),
            init_command: None,
            stream_timeout_secs: default_stream_timeout(),
        }
    }
}

/// AI assistant CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Path of the assistant CLI inside project environments
    #[serde(default = "default_cli_path")]
    pub cli_path: String,
}

fn default_cli_path() -> String {
    "claude".to_string()
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            cli_path: default_cli_path(),
        }
    }
}

/// Conversation history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Messages kept per project before the oldest is evicted
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Most recent messages folded into an AI prompt
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,

    /// Upper bound on the rendered context string
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

fn default_max_messages() -> usize {
    20
}

fn default_context_messages() -> usize {
    5
}

fn default_max_context_chars() -> usize {
    4000
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            context_messages: default_context_messages(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

/// Permission workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// Seconds to wait for the client to answer a permission request
    #[serde(default = "default_permission_timeout")]
    pub timeout_secs: u64,
}

fn default_permission_timeout() -> u64 {
    30
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_permission_timeout(),
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DockhandError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| DockhandError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(host) = std::env::var("DOCKHAND_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("DOCKHAND_PORT") {
            if let Ok(value) = port.parse() {
                self.server.port = value;
            } else {
                tracing::warn!("Invalid DOCKHAND_PORT: {}", port);
            }
        }

        if let Ok(key) = std::env::var("DOCKHAND_AUTH_KEY") {
            if !key.is_empty() {
                self.server.auth_key = Some(key);
            }
        }

        if let Ok(runtime) = std::env::var("DOCKHAND_CONTAINER_RUNTIME") {
            self.container.runtime = runtime;
        }

        if let Ok(image) = std::env::var("DOCKHAND_IMAGE") {
            self.container.image = image;
        }

        if let Ok(network) = std::env::var("DOCKHAND_NETWORK") {
            self.container.network = if network.is_empty() {
                None
            } else {
                Some(network)
            };
        }

        if let Ok(cli_path) = std::env::var("DOCKHAND_ASSISTANT_CLI") {
            self.assistant.cli_path = cli_path;
        }

        if let Ok(max) = std::env::var("DOCKHAND_MAX_MESSAGES") {
            if let Ok(value) = max.parse() {
                self.conversation.max_messages = value;
            } else {
                tracing::warn!("Invalid DOCKHAND_MAX_MESSAGES: {}", max);
            }
        }

        if let Ok(timeout) = std::env::var("DOCKHAND_PERMISSION_TIMEOUT_SECS") {
            if let Ok(value) = timeout.parse() {
                self.permission.timeout_secs = value;
            } else {
                tracing::warn!("Invalid DOCKHAND_PERMISSION_TIMEOUT_SECS: {}", timeout);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.logging.level = "debug".to_string();
        }

        if cli.json_logs {
            self.logging.json_format = true;
        }

        if let crate::cli::Commands::Serve { host, port, key } = &cli.command {
            if let Some(host) = host {
                self.server.host = host.clone();
            }
            if let Some(port) = port {
                self.server.port = *port;
            }
            if let Some(key) = key {
                self.server.auth_key = Some(key.clone());
            }
        }
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are within acceptable ranges
    /// and that required fields are properly set.
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(DockhandError::Config("server.port must be greater than 0".to_string()).into());
        }

        if self.server.heartbeat_interval_secs == 0 {
            return Err(DockhandError::Config(
                "server.heartbeat_interval_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if self.server.heartbeat_timeout_secs <= self.server.heartbeat_interval_secs {
            return Err(DockhandError::Config(
                "server.heartbeat_timeout_secs must exceed heartbeat_interval_secs".to_string(),
            )
            .into());
        }

        if self.server.outbound_queue_size == 0 || self.server.command_queue_size == 0 {
            return Err(DockhandError::Config(
                "server queue sizes must be greater than 0".to_string(),
            )
            .into());
        }

        if matches!(&self.server.auth_key, Some(key) if key.len() < 8) {
            return Err(DockhandError::Config(
                "server.auth_key must be at least 8 characters".to_string(),
            )
            .into());
        }

        if self.container.runtime.is_empty() || self.container.image.is_empty() {
            return Err(DockhandError::Config(
                "container.runtime and container.image cannot be empty".to_string(),
            )
            .into());
        }

        if self.container.max_cpus <= 0.0 {
            return Err(
                DockhandError::Config("container.max_cpus must be positive".to_string()).into(),
            );
        }

        crate::container::ResourceLimits::new(
            &self.container.default_memory,
            &self.container.default_cpus,
        )
        .validate(self.container.max_cpus)
        .map_err(|e| DockhandError::Config(format!("container defaults: {}", e)))?;

        if self.conversation.max_messages == 0 {
            return Err(DockhandError::Config(
                "conversation.max_messages must be greater than 0".to_string(),
            )
            .into());
        }

        if self.conversation.context_messages > self.conversation.max_messages {
            return Err(DockhandError::Config(
                "conversation.context_messages cannot exceed max_messages".to_string(),
            )
            .into());
        }

        if self.permission.timeout_secs == 0 {
            return Err(DockhandError::Config(
                "permission.timeout_secs must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
