//! Smoke test - a YAML workflow with shell steps, end to end
//!
//! Requires `sh`. Run with: cargo test --test smoke_test

use serde_json::json;
use std::time::Duration;
use workflow_pipeline::core::config::WorkflowConfig;
use workflow_pipeline::{WorkflowContext, WorkflowState, WorkflowTemplate};

fn config(dir: &std::path::Path) -> String {
    format!(
        r#"
title: "Smoke Test Workflow"

variables:
  greeting: "hello"

engine:
  backup_dir: "{backup}"
  default_timeout_secs: 10

stages:
  - id: greet
    name: Greet
    weight: 1
    steps:
      - id: say
        name: Say
        run: "echo {{{{ greeting }}}} {{{{ target }}}}"

  - id: edit
    name: Edit notes
    weight: 3
    checkpoint:
      files: ["{notes}"]
    steps:
      - id: scribble
        name: Scribble
        run: "echo scribbled > {notes} && exit 2"

gates:
  - id: greet-gate
    stage_id: greet
    threshold: 1.0
    blocking: true
    checks: [greeted]

checks:
  - id: greeted
    kind: pattern
    pattern: "hello world"
"#,
        backup = dir.join("backups").display(),
        notes = dir.join("notes.txt").display(),
    )
}

#[tokio::test]
async fn smoke_test_shell_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, "original").unwrap();

    let config = WorkflowConfig::from_yaml(&config(dir.path())).expect("Should parse YAML");
    let template = WorkflowTemplate::from_config(&config).unwrap();
    let pipeline = template.build(&config.title, &config.description).unwrap();

    let context = WorkflowContext::from_data(config.context_variables().unwrap());
    context.set("target", json!("world"));

    let result = tokio::time::timeout(Duration::from_secs(30), pipeline.execute(json!(null), context))
        .await
        .expect("workflow should finish");

    // the greeting passes its gate, the second stage fails and is rolled back
    assert_eq!(result.results["greet"]["say"], json!("hello world"));
    assert!(!result.success);
    assert_eq!(result.failed_stage.as_deref(), Some("edit"));
    assert!(result.error.unwrap().contains("code 2"));
    assert_eq!(pipeline.state().await, WorkflowState::Failed);
    assert_eq!(std::fs::read_to_string(&notes).unwrap(), "original");
    assert_eq!(pipeline.overall_progress().await, 25);
}
