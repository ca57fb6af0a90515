//! Test: weighted progress mid-stage, then a blocking gate failure with rollback

use crate::helpers::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use workflow_pipeline::core::stage::stage_fn;
use workflow_pipeline::gates::{CheckRegistry, QualityGate, QualityGateManager};
use workflow_pipeline::{PipelineBuilder, Stage, StageStatus, WorkflowContext, WorkflowState};

#[tokio::test]
async fn test_progress_then_blocking_gate_failure() {
    let dir = tempfile::tempdir().unwrap();
    let parked = Arc::new(ParkedStage::new(50, json!({"draft": "v1"})));
    let reached = parked.reached.clone();
    let release = parked.release.clone();
    let third_calls = Arc::new(AtomicUsize::new(0));

    let checks = CheckRegistry::new()
        .with("coverage", constant_check("Coverage", 0.5))
        .with("style", constant_check("Style", 0.7));
    let gates = QualityGateManager::new(checks)
        .with_gate(
            QualityGate::new("review", "build", 0.8)
                .with_check("coverage")
                .with_check("style")
                .blocking(true),
        )
        .unwrap();

    let pipeline = PipelineBuilder::new("weighted")
        .stage(fixed_stage("plan", 10.0, json!("plan")))
        .stage(Stage::new("build", "Build").with_weight(70.0).with_executor(parked))
        .stage(counted_stage("ship", 20.0, json!("shipped"), third_calls.clone()))
        .gates(gates)
        .snapshots(temp_snapshots(&dir))
        .build()
        .unwrap();

    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.execute(json!(null), WorkflowContext::new()).await });

    reached.notified().await;
    assert_eq!(pipeline.overall_progress().await, 45);
    assert_eq!(pipeline.current_stage_index().await, Some(1));
    release.notify_one();

    let result = handle.await.unwrap();
    assert!(!result.success);
    assert_eq!(result.failed_stage.as_deref(), Some("build"));
    assert!(result.error.unwrap().contains("review"));
    assert_eq!(pipeline.state().await, WorkflowState::Failed);
    assert_eq!(third_calls.load(Ordering::SeqCst), 0);

    let gate = pipeline.gate_manager().result("review").await.unwrap();
    assert!(!gate.passed);
    assert!((gate.score - 0.6).abs() < 1e-9);
    assert_eq!(gate.passed_checks, 2);

    assert_logged(&pipeline.logs(100).await, "Attempting snapshot rollback");
}

#[tokio::test]
async fn test_rollback_restores_context() {
    let dir = tempfile::tempdir().unwrap();
    let mutating = Stage::new("edit", "Edit").with_executor(stage_fn(|_input, ctx| async move {
        ctx.set("draft", json!("mutated"));
        ctx.set("scratch", json!(true));
        Err(workflow_pipeline::ExecutorError::msg("edit failed"))
    }));

    let pipeline = PipelineBuilder::new("rollback")
        .stage(mutating)
        .snapshots(temp_snapshots(&dir))
        .build()
        .unwrap();

    let context = WorkflowContext::new();
    context.set("draft", json!("original"));
    let result = pipeline.execute(json!(null), context.clone()).await;

    assert!(!result.success);
    assert_eq!(context.get("draft"), Some(json!("original")));
    // keys created by the failed stage are not in the snapshot and survive the merge
    assert_eq!(context.get("scratch"), Some(json!(true)));
    assert_eq!(pipeline.stages()[0].status, StageStatus::Failed);
}

#[tokio::test]
async fn test_advisory_gate_failure_continues() {
    let checks = CheckRegistry::new().with("low", constant_check("Low", 0.1));
    let gates = QualityGateManager::new(checks)
        .with_gate(QualityGate::new("advice", "first", 0.9).with_check("low"))
        .unwrap();

    let pipeline = PipelineBuilder::new("advisory")
        .stage(fixed_stage("first", 1.0, json!(1)))
        .stage(fixed_stage("second", 1.0, json!(2)))
        .gates(gates)
        .build()
        .unwrap();

    let result = pipeline.execute(json!(null), WorkflowContext::new()).await;
    assert!(result.success);
    assert_eq!(result.results["second"], json!(2));
    assert_logged(&pipeline.logs(100).await, "Non-blocking gate advice failed");
}
