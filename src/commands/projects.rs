//! `dockhand projects`

use std::sync::Arc;

use prettytable::{row, Table};

use crate::config::Config;
use crate::container::{ContainerManager, Project};
use crate::error::Result;
use crate::gateway::{ExternalTool, ProcessTool};

/// List projects through the configured runtime and print them.
///
/// # Errors
///
/// Returns an error if the runtime cannot be queried.
pub async fn run_projects(config: &Config, json: bool) -> Result<()> {
    list_with(config, Arc::new(ProcessTool::new()), json).await
}

/// Same as [`run_projects`] over an explicit tool.
pub async fn list_with(config: &Config, tool: Arc<dyn ExternalTool>, json: bool) -> Result<()> {
    let manager = ContainerManager::new(tool, config.container.clone());
    let projects = manager.list().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
    } else {
        print_table(&projects);
    }
    Ok(())
}

fn print_table(projects: &[Project]) {
    if projects.is_empty() {
        println!("No projects.");
        return;
    }

    let mut table = Table::new();
    table.add_row(row!["ID", "Name", "Type", "Status", "Memory", "CPUs", "Created"]);
    for project in projects {
        table.add_row(row![
            project.id,
            project.name,
            project.project_type,
            project.status,
            project.resources.memory,
            project.resources.cpus,
            project.created_at.format("%Y-%m-%d %H:%M")
        ]);
    }

    println!();
    table.printstd();
    println!();
}
