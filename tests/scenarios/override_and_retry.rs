//! Test: overriding a failed blocking gate lets a retry through

use crate::helpers::*;
use serde_json::json;
use workflow_pipeline::core::GateStatus;
use workflow_pipeline::gates::{CheckRegistry, QualityGate, QualityGateManager};
use workflow_pipeline::{PipelineBuilder, WorkflowContext, WorkflowState};

#[tokio::test]
async fn test_override_then_retry_completes() {
    let checks = CheckRegistry::new().with("strict", constant_check("Strict", 0.2));
    let gates = QualityGateManager::new(checks)
        .with_gate(
            QualityGate::new("release-gate", "build", 0.9)
                .with_check("strict")
                .blocking(true),
        )
        .unwrap();

    let pipeline = PipelineBuilder::new("override")
        .stage(fixed_stage("build", 1.0, json!("artifact")))
        .stage(fixed_stage("publish", 1.0, json!("published")))
        .gates(gates)
        .build()
        .unwrap();

    let failed = pipeline.execute(json!(null), WorkflowContext::new()).await;
    assert!(!failed.success);
    assert_eq!(pipeline.state().await, WorkflowState::Failed);
    assert_eq!(
        pipeline.gates().await["release-gate"].status,
        GateStatus::Failed
    );

    pipeline
        .override_gate("release-gate", "approved by release manager")
        .await
        .unwrap();
    assert!(pipeline.override_gate("missing", "x").await.is_err());

    let retried = pipeline.retry().await;
    assert!(retried.success, "{:?}", retried.error);
    assert_eq!(retried.results["publish"], json!("published"));

    let gate = pipeline.gate_manager().result("release-gate").await.unwrap();
    assert!(gate.passed);
    assert!(gate.message.contains("approved by release manager"));
    assert_logged(&pipeline.logs(100).await, "Gate release-gate overridden");
}
