//! Project container management
//!
//! Each project owns exactly one container and one named volume. The
//! container runtime is the source of truth for what exists: project records
//! are rebuilt from container labels, so a restarted server still sees every
//! project it created earlier.
//!
//! Lifecycle: `creating -> ready -> running <-> stopped -> removed`, with
//! `error` reachable from any state when the runtime reports something
//! unexpected.

pub mod manager;
pub mod resources;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub use manager::{ContainerManager, ExecStream};
pub use resources::ResourceLimits;

/// Status of a project's environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Resources are being provisioned
    Creating,
    /// Container exists but has never been started
    Ready,
    /// Container is running and accepts commands
    Running,
    /// Container exists but is not running
    Stopped,
    /// Runtime reported a state Dockhand does not understand
    Error,
}

impl ProjectStatus {
    /// Map the runtime's `.State.Status` value to a project status.
    pub fn from_runtime(state: &str) -> Self {
        match state.trim() {
            "running" | "restarting" => Self::Running,
            "created" => Self::Ready,
            "exited" | "paused" | "dead" | "removing" => Self::Stopped,
            _ => Self::Error,
        }
    }

    /// Lowercase name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A project and the environment that backs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Globally unique ID, `<slug>-<8 hex chars>`
    pub id: String,
    /// Human-readable name as supplied at creation
    pub name: String,
    /// Free-form project type (`general`, `python`, `node`, ...)
    #[serde(rename = "type")]
    pub project_type: String,
    /// Current status
    pub status: ProjectStatus,
    /// Runtime container ID
    pub container_id: String,
    /// Runtime container name
    pub container_name: String,
    /// Image the environment runs
    pub image: String,
    /// Applied resource limits
    pub resources: ResourceLimits,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last command executed in this project since the server started
    pub last_access: Option<DateTime<Utc>>,
}

/// Resource limits as requested by a client; omitted values use config defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Memory limit such as `2g`
    #[serde(default)]
    pub memory: Option<String>,
    /// CPU count; accepts `1.5` or `"1.5"`
    #[serde(default, deserialize_with = "string_or_number")]
    pub cpus: Option<String>,
}

/// Parameters for creating a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSpec {
    /// Human-readable project name
    pub name: String,
    /// Project type, `general` when omitted
    #[serde(rename = "type", default)]
    pub project_type: Option<String>,
    /// Extra environment variables for the container
    #[serde(default)]
    pub config: HashMap<String, String>,
    /// Requested resource limits
    #[serde(default)]
    pub resources: Option<ResourceRequest>,
}

impl ProjectSpec {
    /// Spec with only a name; everything else defaults.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Lowercase, dash-separated form of a project name used in IDs.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug.truncate(32);
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}
