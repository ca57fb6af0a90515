//! Test: weighted progress is monotonic and reaches 100

use crate::helpers::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use workflow_pipeline::{PipelineBuilder, Stage, WorkflowContext, WorkflowEvent};

#[tokio::test]
async fn test_progress_is_monotonic() {
    let pipeline = PipelineBuilder::new("progress")
        .stage(fixed_stage("a", 10.0, json!(1)))
        .stage(fixed_stage("b", 70.0, json!(2)))
        .stage(fixed_stage("c", 20.0, json!(3)))
        .build()
        .unwrap();
    let recorder = record_progress(&pipeline);

    let result = pipeline.execute(json!(null), WorkflowContext::new()).await;
    assert!(result.success);

    let seen = recorder.await.unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
    assert!(seen.contains(&10));
    assert!(seen.contains(&80));
    assert_eq!(seen.last(), Some(&100));
}

#[tokio::test]
async fn test_skipped_stages_count_as_done() {
    let pipeline = PipelineBuilder::new("skipped")
        .stage(fixed_stage("a", 1.0, json!(1)))
        .stage(fixed_stage("b", 3.0, json!(2)))
        .build()
        .unwrap();
    pipeline.skip_stage("b", "handled elsewhere").await.unwrap();
    assert_eq!(pipeline.overall_progress().await, 75);
}

#[tokio::test]
async fn test_stage_progress_is_emitted_mid_stage() {
    let parked = Arc::new(ParkedStage::new(50, json!(2)));
    let reached = parked.reached.clone();
    let release = parked.release.clone();

    let pipeline = PipelineBuilder::new("live")
        .stage(fixed_stage("a", 10.0, json!(1)))
        .stage(Stage::new("b", "B").with_weight(70.0).with_executor(parked))
        .stage(fixed_stage("c", 20.0, json!(3)))
        .build()
        .unwrap();
    let mut events = pipeline.subscribe();

    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.execute(json!(null), WorkflowContext::new()).await });

    reached.notified().await;
    let live = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let envelope = events.recv().await.unwrap();
            if let WorkflowEvent::StageProgress { stage_id, progress } = envelope.event {
                break (stage_id, progress);
            }
        }
    })
    .await
    .expect("mid-stage progress event");
    assert_eq!(live, ("b".to_string(), 50));
    assert_eq!(pipeline.overall_progress().await, 45);

    release.notify_one();
    assert!(handle.await.unwrap().success);
}
