//! Integration tests for the project environment lifecycle
//!
//! Runs the container manager against the scripted fake runtime and checks
//! the state machine, idempotence and rollback behavior.

use std::collections::HashMap;
use std::sync::Arc;

use std::time::Duration;

use dockhand::config::ContainerConfig;
use dockhand::container::{ContainerManager, ProjectSpec, ProjectStatus, ResourceRequest};
use dockhand::error::{captured_output, is_not_found, DockhandError};
use dockhand::gateway::fake::FakeTool;
use tokio_util::sync::CancellationToken;

mod common;

fn manager(fake: &FakeTool) -> ContainerManager {
    ContainerManager::new(Arc::new(fake.clone()), ContainerConfig::default())
}

#[tokio::test]
async fn test_full_lifecycle() {
    let fake = common::scripted_tool();
    let manager = manager(&fake);

    let mut spec = ProjectSpec::named("My Web App");
    spec.project_type = Some("node".to_string());
    spec.config = HashMap::from([("NODE_ENV".to_string(), "development".to_string())]);
    let project = manager.create(spec).await.unwrap();

    assert!(project.id.starts_with("my-web-app-"));
    assert_eq!(project.status, ProjectStatus::Running);
    assert_eq!(project.container_name, format!("dockhand-{}", project.id));
    assert!(fake
        .volume_names()
        .contains(&format!("dockhand-project-{}", project.id)));

    assert_eq!(manager.status(&project.id).await.unwrap(), ProjectStatus::Running);
    assert_eq!(manager.stop(&project.id).await.unwrap(), ProjectStatus::Stopped);
    // Stopping again is a no-op.
    assert_eq!(manager.stop(&project.id).await.unwrap(), ProjectStatus::Stopped);
    assert_eq!(manager.start(&project.id).await.unwrap(), ProjectStatus::Running);
    assert_eq!(manager.start(&project.id).await.unwrap(), ProjectStatus::Running);

    let listed = manager.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "My Web App");
    assert_eq!(listed[0].project_type, "node");

    manager.remove(&project.id).await.unwrap();
    assert!(fake.container_names().is_empty());
    assert!(fake.volume_names().is_empty());
    // Removing again still succeeds.
    manager.remove(&project.id).await.unwrap();
    assert!(manager.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_resources_leave_nothing_behind() {
    let fake = FakeTool::new();
    let manager = manager(&fake);

    let mut spec = ProjectSpec::named("greedy");
    spec.resources = Some(ResourceRequest {
        memory: Some("lots".to_string()),
        cpus: Some("2".to_string()),
    });
    let err = manager.create(spec).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DockhandError>(),
        Some(DockhandError::InvalidResourceSpec(_))
    ));

    let mut spec = ProjectSpec::named("greedy");
    spec.resources = Some(ResourceRequest {
        memory: Some("1g".to_string()),
        cpus: Some("64".to_string()),
    });
    assert!(manager.create(spec).await.is_err());

    assert!(fake.container_names().is_empty());
    assert!(fake.volume_names().is_empty());
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_failed_run_rolls_back_volume() {
    let fake = FakeTool::new();
    fake.fail_subcommand("run");
    let manager = manager(&fake);

    assert!(manager.create(ProjectSpec::named("broken")).await.is_err());
    assert!(fake.container_names().is_empty());
    assert!(fake.volume_names().is_empty());
}

#[tokio::test]
async fn test_failed_command_keeps_environment() {
    let fake = common::scripted_tool();
    let manager = manager(&fake);
    let project = manager.create(ProjectSpec::named("demo")).await.unwrap();

    let err = manager.execute(&project.id, "false").await.unwrap_err();
    match err.downcast_ref::<DockhandError>() {
        Some(DockhandError::CommandFailed {
            command, exit_code, ..
        }) => {
            assert_eq!(command, "false");
            assert_eq!(*exit_code, 1);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(captured_output(&err), Some("command failed\n"));

    assert_eq!(manager.status(&project.id).await.unwrap(), ProjectStatus::Running);
    assert!(manager.last_access(&project.id).await.is_some());
    assert_eq!(
        manager.execute(&project.id, "git status").await.unwrap(),
        "On branch main\nnothing to commit, working tree clean\n"
    );
}

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let fake = FakeTool::new();
    let manager = manager(&fake);

    let err = manager.execute("ghost-00000000", "ls").await.unwrap_err();
    assert!(is_not_found(&err));
    assert!(is_not_found(&manager.get("ghost-00000000").await.unwrap_err()));
    assert!(is_not_found(&manager.start("ghost-00000000").await.unwrap_err()));
}

#[tokio::test]
async fn test_stream_execute_delivers_output_then_closes() {
    let fake = common::scripted_tool();
    let manager = manager(&fake);
    let project = manager.create(ProjectSpec::named("stream")).await.unwrap();

    let mut stream = manager
        .stream_execute(&project.id, "git status", CancellationToken::new())
        .await
        .unwrap();

    let mut chunks = Vec::new();
    while let Some(chunk) = stream.output.recv().await {
        chunks.push(chunk);
    }
    assert_eq!(
        chunks,
        vec!["On branch main\n", "nothing to commit, working tree clean\n"]
    );
    assert!(stream.errors.recv().await.is_none());
}

#[tokio::test]
async fn test_stream_execute_cancellation() {
    let fake = common::scripted_tool();
    fake.hold_streams(true);
    let manager = manager(&fake);
    let project = manager.create(ProjectSpec::named("held")).await.unwrap();

    let cancel = CancellationToken::new();
    let mut stream = manager
        .stream_execute(&project.id, "tail -f log.txt", cancel.clone())
        .await
        .unwrap();
    assert_eq!(stream.output.recv().await.unwrap(), "tail -f log.txt\n");

    cancel.cancel();
    let err = stream.errors.recv().await.unwrap();
    assert!(err.to_string().contains("cancelled"));
    assert!(stream.output.recv().await.is_none());
}

#[tokio::test]
async fn test_stream_execute_deadline() {
    let fake = common::scripted_tool();
    fake.hold_streams(true);
    let config = ContainerConfig {
        stream_timeout_secs: 1,
        ..ContainerConfig::default()
    };
    let manager = ContainerManager::new(Arc::new(fake.clone()), config);
    let project = manager.create(ProjectSpec::named("slow")).await.unwrap();

    let mut stream = manager
        .stream_execute(&project.id, "npm run dev", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stream.output.recv().await.unwrap(), "npm run dev\n");

    let err = tokio::time::timeout(Duration::from_secs(5), stream.errors.recv())
        .await
        .expect("deadline should end the stream")
        .unwrap();
    assert_eq!(err.to_string(), "Container error: command timed out after 1s");
    assert!(stream.output.recv().await.is_none());
    assert!(stream.errors.recv().await.is_none());
}
