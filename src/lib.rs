//! Dockhand - remote project sessions in isolated containers
//!
//! This library provides the core of the Dockhand server: a WebSocket hub
//! through which a remote client manages per-project container environments,
//! runs commands in them, and converses with an AI assistant whose file
//! changes are gated by a human-in-the-loop permission workflow.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `gateway`: External tool abstraction (process-backed and scripted fake)
//! - `container`: Project environment lifecycle and command execution
//! - `router`: Command classification and prefix handlers
//! - `assistant`: AI assistant invocation and permission gating
//! - `session`: Bounded per-project conversation history
//! - `permission`: Mutation detection and pending-request registry
//! - `hub`: Connection registry, message dispatch and the WebSocket server
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface and its handlers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dockhand::{AppState, Config};
//! use dockhand::gateway::ProcessTool;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let state = AppState::build(config, Arc::new(ProcessTool::new()), "change-me-please");
//!     dockhand::hub::server::serve(state).await
//! }
//! ```

pub mod assistant;
pub mod cli;
pub mod commands;
pub mod config;
pub mod container;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod permission;
pub mod router;
pub mod session;

// Re-export commonly used types
pub use assistant::Assistant;
pub use config::Config;
pub use container::{ContainerManager, Project, ProjectSpec, ProjectStatus};
pub use error::{DockhandError, Result};
pub use hub::{AppState, Hub};
pub use router::{classify, Classification, CommandRouter, Prefix};
pub use session::SessionStore;
