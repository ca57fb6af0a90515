//! Test: driving workflows through the command surface

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use workflow_pipeline::core::stage::stage_fn;
use workflow_pipeline::{
    Command, CommandResponse, WorkflowManager, WorkflowService, WorkflowState, WorkflowTemplate,
};
use uuid::Uuid;

fn service() -> WorkflowService {
    let scored = |score: f64| {
        stage_fn(move |_input, _ctx| async move { Ok(json!({"summary": "ok", "score": score})) })
    };
    let template = WorkflowTemplate::default_stage_set()
        .with_stage_executor("analysis", scored(0.9))
        .with_stage_executor("planning", scored(0.9))
        .with_stage_executor("generation", scored(0.9))
        .with_stage_executor("validation", scored(0.5))
        .with_stage_executor("delivery", scored(0.9));
    WorkflowService::new(Arc::new(WorkflowManager::new(template)))
}

fn workflow_id(response: &CommandResponse) -> Uuid {
    let id = response.data.as_ref().unwrap()["id"].clone();
    serde_json::from_value(id).unwrap()
}

async fn send(service: &WorkflowService, command: serde_json::Value) -> CommandResponse {
    let command: Command = serde_json::from_value(command).unwrap();
    service.handle(command).await
}

#[tokio::test]
async fn test_default_workflow_fails_validation_then_overrides() {
    let service = service();
    let created = send(&service, json!({"command": "create", "title": "release"})).await;
    assert!(created.success);
    let id = workflow_id(&created);

    let started = send(&service, json!({"command": "start", "workflow_id": id})).await;
    assert!(started.success, "{:?}", started.error);
    let result = tokio::time::timeout(Duration::from_secs(5), service.manager().wait(id))
        .await
        .unwrap()
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.failed_stage.as_deref(), Some("validation"));

    let status = send(&service, json!({"command": "get-status", "workflow_id": id})).await;
    let status = status.data.unwrap();
    assert_eq!(status["state"], json!(WorkflowState::Failed));
    // the validation stage itself completed; only its gate failed
    assert_eq!(status["progress"], json!(90));

    let gates = send(&service, json!({"command": "get-gates", "workflow_id": id})).await;
    assert_eq!(gates.data.unwrap()["validation-gate"]["passed"], json!(false));

    let overridden = send(
        &service,
        json!({
            "command": "override-gate",
            "workflow_id": id,
            "gate_id": "validation-gate",
            "reason": "manual sign-off"
        }),
    )
    .await;
    assert!(overridden.success);

    let retried = send(&service, json!({"command": "retry", "workflow_id": id})).await;
    assert!(retried.success);
    let result = service.manager().wait(id).await.unwrap();
    assert!(result.success, "{:?}", result.error);

    let stages = send(&service, json!({"command": "get-stages", "workflow_id": id})).await;
    let stages = stages.data.unwrap();
    assert_eq!(stages.as_array().unwrap().len(), 5);
    assert!(stages
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["status"] == json!("completed")));

    let logs = send(&service, json!({"command": "get-logs", "workflow_id": id, "limit": 3})).await;
    assert_eq!(logs.data.unwrap().as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_unknown_workflow_is_an_error_response() {
    let service = service();
    let response = send(
        &service,
        json!({"command": "pause", "workflow_id": Uuid::new_v4()}),
    )
    .await;
    assert!(!response.success);
    assert!(response.data.is_none());
    assert!(response.error.is_some());
}
