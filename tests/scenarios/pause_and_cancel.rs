//! Test: pausing at a stage boundary, then cancelling while paused

use crate::helpers::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use workflow_pipeline::{PipelineBuilder, Stage, WorkflowContext, WorkflowError, WorkflowState};

#[tokio::test]
async fn test_cancel_while_paused_does_not_deadlock() {
    let parked = Arc::new(ParkedStage::new(30, json!("first")));
    let reached = parked.reached.clone();
    let release = parked.release.clone();
    let second_calls = Arc::new(AtomicUsize::new(0));

    let pipeline = PipelineBuilder::new("pausable")
        .stage(Stage::new("first", "First").with_executor(parked))
        .stage(counted_stage("second", 1.0, json!("second"), second_calls.clone()))
        .build()
        .unwrap();

    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.execute(json!(null), WorkflowContext::new()).await });

    reached.notified().await;
    pipeline.pause().await.unwrap();
    assert_eq!(pipeline.state().await, WorkflowState::Paused);
    release.notify_one();

    // the loop parks before the second stage
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.state().await, WorkflowState::Paused);

    pipeline.cancel("operator stop").await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cancelled workflow should finish")
        .unwrap();

    assert!(!result.success);
    assert_eq!(pipeline.state().await, WorkflowState::Cancelled);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.results["first"], json!("first"));
}

#[tokio::test]
async fn test_pause_then_resume_completes() {
    let parked = Arc::new(ParkedStage::new(0, json!("first")));
    let reached = parked.reached.clone();
    let release = parked.release.clone();

    let pipeline = PipelineBuilder::new("resumable")
        .stage(Stage::new("first", "First").with_executor(parked))
        .stage(fixed_stage("second", 1.0, json!("second")))
        .build()
        .unwrap();

    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.execute(json!(null), WorkflowContext::new()).await });

    reached.notified().await;
    pipeline.pause().await.unwrap();
    assert!(matches!(
        pipeline.pause().await,
        Err(WorkflowError::InvalidTransition { .. })
    ));
    release.notify_one();
    pipeline.resume().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.success);
    assert_eq!(pipeline.state().await, WorkflowState::Completed);

    let states: Vec<_> = pipeline.history().await.iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            WorkflowState::Running,
            WorkflowState::Paused,
            WorkflowState::Running,
            WorkflowState::Completed
        ]
    );
}

#[tokio::test]
async fn test_failure_while_paused_ends_failed_after_resume() {
    let parked = Arc::new(ParkedStage::failing(40));
    let reached = parked.reached.clone();
    let release = parked.release.clone();
    let second_calls = Arc::new(AtomicUsize::new(0));

    let pipeline = PipelineBuilder::new("pause-on-failure")
        .stage(Stage::new("first", "First").with_executor(parked))
        .stage(counted_stage("second", 1.0, json!("second"), second_calls.clone()))
        .build()
        .unwrap();

    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.execute(json!(null), WorkflowContext::new()).await });

    reached.notified().await;
    pipeline.pause().await.unwrap();
    release.notify_one();

    // the stage has failed, but the workflow stays paused until resumed
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pipeline.state().await, WorkflowState::Paused);
    assert!(!handle.is_finished());

    pipeline.resume().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("failed workflow should finish after resume")
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.failed_stage.as_deref(), Some("first"));
    assert_eq!(pipeline.state().await, WorkflowState::Failed);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    assert_logged(&pipeline.logs(100).await, "deferring failure until resumed");
}
