//! Test: retry re-runs only the failed stage and those after it

use crate::helpers::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use workflow_pipeline::{PipelineBuilder, StageStatus, WorkflowContext, WorkflowState};

#[tokio::test]
async fn test_retry_resumes_from_failed_stage() {
    let calls: Vec<_> = (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();

    let pipeline = PipelineBuilder::new("resume")
        .stage(counted_stage("one", 1.0, json!("one"), calls[0].clone()))
        .stage(counted_stage("two", 1.0, json!("two"), calls[1].clone()))
        .stage(flaky_stage("three", 1, calls[2].clone()))
        .stage(counted_stage("four", 1.0, json!("four"), calls[3].clone()))
        .build()
        .unwrap();

    let failed = pipeline.execute(json!("seed"), WorkflowContext::new()).await;
    assert!(!failed.success);
    assert_eq!(failed.failed_stage.as_deref(), Some("three"));
    assert!(!failed.results.contains_key("three"));
    assert_eq!(pipeline.stages()[2].status, StageStatus::Failed);

    let retried = pipeline.retry().await;
    assert!(retried.success, "{:?}", retried.error);

    let counts: Vec<_> = calls.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(counts, vec![1, 1, 2, 1]);
    // the flaky stage echoes its input, which is the previous stage's result
    assert_eq!(retried.results["three"], json!("two"));
    let order: Vec<_> = retried.results.keys().cloned().collect();
    assert_eq!(order, vec!["one", "two", "three", "four"]);
    assert_eq!(pipeline.state().await, WorkflowState::Completed);

    let transitions: Vec<_> = pipeline
        .history()
        .await
        .iter()
        .map(|t| (t.from, t.to))
        .collect();
    assert!(transitions.contains(&(WorkflowState::Failed, WorkflowState::Running)));
}

#[tokio::test]
async fn test_retry_of_first_stage_reuses_original_input() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = PipelineBuilder::new("first")
        .stage(flaky_stage("only", 1, calls.clone()))
        .build()
        .unwrap();

    assert!(!pipeline.execute(json!({"seed": 7}), WorkflowContext::new()).await.success);
    let retried = pipeline.retry().await;
    assert!(retried.success);
    assert_eq!(retried.results["only"], json!({"seed": 7}));
}
