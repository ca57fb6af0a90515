//! Pipeline orchestrator - drives stages, gates and checkpoints for one workflow

use crate::core::{
    context::WorkflowContext,
    error::WorkflowError,
    event::{EventBus, EventEnvelope, WorkflowEvent},
    log::{LogEntry, LogLevel, WorkflowLog},
    stage::{CancelFlag, Stage, StageInfo},
    state::{StageStatus, WorkflowState},
    state_machine::{StateMachine, Transition},
};
use crate::execution::{checkpoint::Checkpoint, pause::PauseGate};
use crate::gates::{GateSummary, QualityGateManager};
use crate::snapshot::SnapshotManager;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

/// Terminal outcome of `execute` or `retry`
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub results: IndexMap<String, Value>,
    pub error: Option<String>,
    pub failed_stage: Option<String>,
    pub duration_ms: u64,
}

/// Point-in-time view of a workflow
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatus {
    pub id: Uuid,
    pub title: String,
    pub state: WorkflowState,
    pub progress: u8,
    pub current_stage: Option<StageInfo>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub logs: Vec<LogEntry>,
}

/// One row of a workflow listing
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    pub id: Uuid,
    pub title: String,
    pub state: WorkflowState,
    pub progress: u8,
}

struct RunState {
    current_index: Option<usize>,
    results: IndexMap<String, Value>,
    input: Value,
    context: WorkflowContext,
    failed_index: Option<usize>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl RunState {
    fn new() -> Self {
        Self {
            current_index: None,
            results: IndexMap::new(),
            input: Value::Null,
            context: WorkflowContext::new(),
            failed_index: None,
            started_at: None,
            ended_at: None,
        }
    }
}

/// Everything a pipeline is assembled from; see `PipelineBuilder`
pub(crate) struct PipelineParts {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub stages: Vec<Stage>,
    pub gates: QualityGateManager,
    pub snapshots: Option<Arc<SnapshotManager>>,
    pub events: EventBus,
    pub log_tail: usize,
}

struct PipelineInner {
    id: Uuid,
    title: String,
    description: String,
    stages: Vec<Stage>,
    machine: Mutex<StateMachine>,
    gates: QualityGateManager,
    snapshots: Option<Arc<SnapshotManager>>,
    run: Mutex<RunState>,
    log: Mutex<WorkflowLog>,
    pause: PauseGate,
    cancel: CancelFlag,
    events: EventBus,
    log_tail: usize,
}

/// A workflow: ordered stages run on one logical worker.
///
/// Cloning is cheap and every clone controls the same workflow, so one clone
/// can run `execute` while another pauses or cancels it.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub(crate) fn from_parts(parts: PipelineParts) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                id: parts.id,
                title: parts.title,
                description: parts.description,
                stages: parts.stages,
                machine: Mutex::new(StateMachine::new(parts.events.clone())),
                gates: parts.gates,
                snapshots: parts.snapshots,
                run: Mutex::new(RunState::new()),
                log: Mutex::new(WorkflowLog::new(parts.id)),
                pause: PauseGate::new(),
                cancel: CancelFlag::new(),
                events: parts.events,
                log_tail: parts.log_tail,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub async fn state(&self) -> WorkflowState {
        self.inner.machine.lock().await.state()
    }

    pub async fn history(&self) -> Vec<Transition> {
        self.inner.machine.lock().await.history().to_vec()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Subscribe to this workflow's events
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.inner.events.subscribe()
    }

    /// Add an event handler, driven by a background task
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.inner.events.add_event_handler(handler);
    }

    async fn log(&self, level: LogLevel, message: impl Into<String>, stage_id: Option<&str>) {
        self.inner.log.lock().await.push(level, message, stage_id);
    }

    /// Run every stage in order, from the beginning.
    ///
    /// Never panics on stage or gate failure; the outcome is always returned
    /// as a [`PipelineResult`].
    pub async fn execute(&self, input: Value, context: WorkflowContext) -> PipelineResult {
        let started = Instant::now();
        let inner = &self.inner;

        let refused = {
            let mut machine = inner.machine.lock().await;
            let state = machine.state();
            (!machine.start()).then_some(state)
        };
        if let Some(state) = refused {
            let error = WorkflowError::CannotStart(state);
            self.log(LogLevel::Error, error.to_string(), None).await;
            return PipelineResult {
                success: false,
                results: self.results().await,
                error: Some(error.to_string()),
                failed_stage: None,
                duration_ms: elapsed_ms(started),
            };
        }

        {
            let mut run = inner.run.lock().await;
            *run = RunState::new();
            run.input = input.clone();
            run.context = context.clone();
            run.started_at = Some(Utc::now());
        }

        self.log(
            LogLevel::Info,
            format!("Workflow '{}' started with {} stages", inner.title, inner.stages.len()),
            None,
        )
        .await;
        inner.events.emit(WorkflowEvent::WorkflowStarted {
            title: inner.title.clone(),
            total_stages: inner.stages.len(),
        });

        self.run_from(0, input, context, started).await
    }

    async fn run_from(
        &self,
        start: usize,
        mut input: Value,
        context: WorkflowContext,
        started: Instant,
    ) -> PipelineResult {
        let inner = &self.inner;

        for index in start..inner.stages.len() {
            let stage = &inner.stages[index];

            inner.pause.wait().await;
            if inner.cancel.is_cancelled() {
                return self.finish_failure(WorkflowError::Cancelled, None, started).await;
            }

            if stage.status() == StageStatus::Skipped {
                self.log(
                    LogLevel::Info,
                    format!("Skipping stage {}", stage.name),
                    Some(&stage.id),
                )
                .await;
                continue;
            }

            inner.run.lock().await.current_index = Some(index);
            self.log(
                LogLevel::Info,
                format!("Starting stage {} ({}/{})", stage.name, index + 1, inner.stages.len()),
                Some(&stage.id),
            )
            .await;

            let checkpoint = inner
                .snapshots
                .as_deref()
                .map(|snapshots| Checkpoint::new(snapshots, stage));
            if let Some(checkpoint) = &checkpoint {
                if let Err(e) = checkpoint.capture(&context).await {
                    self.log(
                        LogLevel::Warn,
                        format!("Could not snapshot stage {}: {}", stage.id, e),
                        Some(&stage.id),
                    )
                    .await;
                }
            }

            let result = match stage
                .execute(input.clone(), &context, &inner.events, &inner.cancel)
                .await
            {
                Ok(result) => result,
                Err(source) => {
                    self.log(
                        LogLevel::Error,
                        format!("Stage {} failed: {}", stage.name, source),
                        Some(&stage.id),
                    )
                    .await;
                    self.rollback(checkpoint.as_ref(), stage, &context).await;
                    let error = WorkflowError::Stage {
                        stage_id: stage.id.clone(),
                        source,
                    };
                    return self.finish_failure(error, Some(index), started).await;
                }
            };

            inner
                .run
                .lock()
                .await
                .results
                .insert(stage.id.clone(), result.clone());
            self.log(
                LogLevel::Info,
                format!("Stage {} completed", stage.name),
                Some(&stage.id),
            )
            .await;
            self.emit_progress(Some(stage)).await;

            if let Some(gate_id) = &stage.gate_id {
                let gate = inner.gates.check(gate_id, &result, &context).await;
                if gate.is_blocking_failure() {
                    self.log(LogLevel::Error, gate.message.clone(), Some(&stage.id))
                        .await;
                    self.rollback(checkpoint.as_ref(), stage, &context).await;
                    let error = WorkflowError::GateFailed {
                        gate_id: gate.gate_id,
                        score: gate.score,
                        threshold: gate.threshold,
                    };
                    return self.finish_failure(error, Some(index), started).await;
                }
                if !gate.passed {
                    self.log(
                        LogLevel::Warn,
                        format!("Non-blocking gate {} failed: {}", gate.gate_id, gate.message),
                        Some(&stage.id),
                    )
                    .await;
                }
            }

            if let Some(checkpoint) = &checkpoint {
                checkpoint.release().await;
            }
            input = result;
        }

        let refused = loop {
            inner.pause.wait().await;
            if inner.cancel.is_cancelled() {
                return self.finish_failure(WorkflowError::Cancelled, None, started).await;
            }
            let mut machine = inner.machine.lock().await;
            let state = machine.state();
            // paused after the gate opened; wait again
            if state == WorkflowState::Paused {
                continue;
            }
            break (!machine.complete()).then_some(state);
        };
        if let Some(state) = refused {
            let error = WorkflowError::InvalidTransition {
                action: "complete",
                state,
            };
            return self.finish_failure(error, None, started).await;
        }

        let duration_ms = elapsed_ms(started);
        let results = {
            let mut run = inner.run.lock().await;
            run.ended_at = Some(Utc::now());
            run.results.clone()
        };
        self.log(
            LogLevel::Info,
            format!("Workflow completed in {}ms", duration_ms),
            None,
        )
        .await;
        self.emit_progress(None).await;
        inner
            .events
            .emit(WorkflowEvent::WorkflowCompleted { duration_ms });

        PipelineResult {
            success: true,
            results,
            error: None,
            failed_stage: None,
            duration_ms,
        }
    }

    /// Restore the stage's snapshot; failures here are logged, never returned
    async fn rollback(
        &self,
        checkpoint: Option<&Checkpoint<'_>>,
        stage: &Stage,
        context: &WorkflowContext,
    ) {
        let Some(checkpoint) = checkpoint else {
            return;
        };
        self.log(
            LogLevel::Warn,
            format!("Attempting snapshot rollback for stage {}", stage.id),
            Some(&stage.id),
        )
        .await;

        let success = match checkpoint.rollback(context).await {
            Ok(result) if result.success => {
                self.log(
                    LogLevel::Info,
                    format!("Rolled back stage {} to its snapshot", stage.id),
                    Some(&stage.id),
                )
                .await;
                true
            }
            Ok(result) => {
                self.log(
                    LogLevel::Warn,
                    format!(
                        "Rollback of stage {} was partial: {}",
                        stage.id,
                        result.errors.join("; ")
                    ),
                    Some(&stage.id),
                )
                .await;
                false
            }
            Err(e) => {
                self.log(
                    LogLevel::Error,
                    format!("Rollback of stage {} failed: {}", stage.id, e),
                    Some(&stage.id),
                )
                .await;
                false
            }
        };
        self.inner.events.emit(WorkflowEvent::SnapshotRestored {
            stage_id: stage.id.clone(),
            success,
        });
    }

    async fn finish_failure(
        &self,
        error: WorkflowError,
        failed_index: Option<usize>,
        started: Instant,
    ) -> PipelineResult {
        let inner = &self.inner;
        let message = error.to_string();

        // A paused workflow cannot fail; wait for resume or cancel first.
        let mut deferred = false;
        loop {
            if !deferred && !inner.pause.is_open() {
                deferred = true;
                self.log(
                    LogLevel::Info,
                    "Workflow paused, deferring failure until resumed",
                    None,
                )
                .await;
            }
            inner.pause.wait().await;
            if inner.cancel.is_cancelled() {
                break;
            }
            let mut machine = inner.machine.lock().await;
            // paused after the gate opened; wait again
            if machine.state() == WorkflowState::Paused {
                continue;
            }
            machine.fail(&message);
            break;
        }

        let failed_stage = failed_index.map(|i| inner.stages[i].id.clone());
        let results = {
            let mut run = inner.run.lock().await;
            if failed_index.is_some() {
                run.failed_index = failed_index;
            }
            run.ended_at = Some(Utc::now());
            run.results.clone()
        };

        self.log(LogLevel::Error, message.clone(), failed_stage.as_deref())
            .await;
        inner.events.emit(WorkflowEvent::WorkflowError {
            error: message.clone(),
            failed_stage: failed_stage.clone(),
        });

        PipelineResult {
            success: false,
            results,
            error: Some(message),
            failed_stage,
            duration_ms: elapsed_ms(started),
        }
    }

    async fn emit_progress(&self, stage: Option<&Stage>) {
        let overall = self.overall_progress().await;
        self.inner.events.emit(WorkflowEvent::Progress {
            overall,
            stage_id: stage.map(|s| s.id.clone()),
            stage_progress: stage.map(Stage::progress).unwrap_or(100),
        });
    }

    /// Weighted completion percentage, 100 once `Completed`
    pub async fn overall_progress(&self) -> u8 {
        if self.state().await == WorkflowState::Completed {
            return 100;
        }
        weighted_progress(&self.inner.stages)
    }

    pub async fn pause(&self) -> Result<(), WorkflowError> {
        {
            let mut machine = self.inner.machine.lock().await;
            let state = machine.state();
            if !machine.pause() {
                return Err(WorkflowError::InvalidTransition {
                    action: "pause",
                    state,
                });
            }
            self.inner.pause.close();
        }
        self.log(LogLevel::Info, "Workflow paused", None).await;
        self.inner.events.emit(WorkflowEvent::Paused);
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), WorkflowError> {
        {
            let mut machine = self.inner.machine.lock().await;
            let state = machine.state();
            if !machine.resume() {
                return Err(WorkflowError::InvalidTransition {
                    action: "resume",
                    state,
                });
            }
            self.inner.pause.open();
        }
        self.log(LogLevel::Info, "Workflow resumed", None).await;
        self.inner.events.emit(WorkflowEvent::Resumed);
        Ok(())
    }

    /// Cancel the workflow. Takes effect at the next stage boundary; a
    /// paused workflow is released so its loop can observe the cancellation.
    pub async fn cancel(&self, reason: &str) -> Result<(), WorkflowError> {
        {
            let mut machine = self.inner.machine.lock().await;
            let state = machine.state();
            if !machine.cancel(reason) {
                return Err(WorkflowError::InvalidTransition {
                    action: "cancel",
                    state,
                });
            }
            self.inner.cancel.cancel();
            self.inner.pause.open();
        }
        self.inner.run.lock().await.ended_at = Some(Utc::now());
        self.log(LogLevel::Warn, format!("Workflow cancelled: {}", reason), None)
            .await;
        self.inner.events.emit(WorkflowEvent::Cancelled {
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Re-run a failed workflow from the stage that failed.
    ///
    /// Earlier results are kept; the failed stage receives the previous
    /// stage's result (or the original input) again.
    pub async fn retry(&self) -> PipelineResult {
        let started = Instant::now();
        let inner = &self.inner;

        let refused = {
            let mut machine = inner.machine.lock().await;
            let state = machine.state();
            (!machine.retry()).then_some(state)
        };
        if let Some(state) = refused {
            let error = WorkflowError::InvalidTransition {
                action: "retry",
                state,
            };
            self.log(LogLevel::Warn, error.to_string(), None).await;
            return PipelineResult {
                success: false,
                results: self.results().await,
                error: Some(error.to_string()),
                failed_stage: None,
                duration_ms: elapsed_ms(started),
            };
        }

        let (resume_at, input, context) = {
            let mut run = inner.run.lock().await;
            let resume_at = run.failed_index.or(run.current_index).unwrap_or(0);

            for stage in &inner.stages[resume_at..] {
                if stage.status() != StageStatus::Skipped {
                    stage.reset();
                }
                run.results.shift_remove(&stage.id);
            }

            let input = inner.stages[..resume_at]
                .iter()
                .rev()
                .find_map(|s| run.results.get(&s.id).cloned())
                .unwrap_or_else(|| run.input.clone());

            run.failed_index = None;
            run.ended_at = None;
            (resume_at, input, run.context.clone())
        };

        let stage_name = inner
            .stages
            .get(resume_at)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        self.log(
            LogLevel::Info,
            format!("Retrying workflow from stage {}", stage_name),
            None,
        )
        .await;

        self.run_from(resume_at, input, context, started).await
    }

    /// Mark a stage that has not run yet as skipped
    pub async fn skip_stage(&self, stage_id: &str, reason: &str) -> Result<(), WorkflowError> {
        let stage = self
            .inner
            .stages
            .iter()
            .find(|s| s.id == stage_id)
            .ok_or_else(|| WorkflowError::NotFound(stage_id.to_string()))?;
        match stage.status() {
            StageStatus::Pending | StageStatus::Failed => {}
            status => {
                return Err(WorkflowError::Validation(format!(
                    "cannot skip stage '{}' while {}",
                    stage_id, status
                )))
            }
        }
        stage.skip(reason);
        self.log(
            LogLevel::Info,
            format!("Stage {} skipped: {}", stage.name, reason),
            Some(stage_id),
        )
        .await;
        self.inner.events.emit(WorkflowEvent::StageSkipped {
            stage_id: stage_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Force a gate to pass on its next check
    pub async fn override_gate(&self, gate_id: &str, reason: &str) -> Result<(), WorkflowError> {
        self.inner.gates.override_gate(gate_id, reason).await?;
        self.log(
            LogLevel::Warn,
            format!("Gate {} overridden: {}", gate_id, reason),
            None,
        )
        .await;
        Ok(())
    }

    pub fn stages(&self) -> Vec<StageInfo> {
        self.inner.stages.iter().map(Stage::info).collect()
    }

    pub fn gate_manager(&self) -> &QualityGateManager {
        &self.inner.gates
    }

    pub async fn gates(&self) -> IndexMap<String, GateSummary> {
        self.inner.gates.summaries().await
    }

    pub async fn results(&self) -> IndexMap<String, Value> {
        self.inner.run.lock().await.results.clone()
    }

    /// Index of the stage currently (or last) executing
    pub async fn current_stage_index(&self) -> Option<usize> {
        self.inner.run.lock().await.current_index
    }

    /// Most recent `limit` log entries
    pub async fn logs(&self, limit: usize) -> Vec<LogEntry> {
        self.inner.log.lock().await.tail(limit)
    }

    pub async fn status(&self) -> WorkflowStatus {
        let state = self.state().await;
        let progress = self.overall_progress().await;
        let (current_index, started_at, ended_at) = {
            let run = self.inner.run.lock().await;
            (run.current_index, run.started_at, run.ended_at)
        };
        WorkflowStatus {
            id: self.inner.id,
            title: self.inner.title.clone(),
            state,
            progress,
            current_stage: current_index
                .and_then(|i| self.inner.stages.get(i))
                .map(Stage::info),
            started_at,
            ended_at,
            logs: self.logs(self.inner.log_tail).await,
        }
    }

    pub async fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.inner.id,
            title: self.inner.title.clone(),
            state: self.state().await,
            progress: self.overall_progress().await,
        }
    }
}

fn weighted_progress(stages: &[Stage]) -> u8 {
    let total: f64 = stages.iter().map(|s| s.weight).sum();
    if total <= 0.0 {
        return 0;
    }
    let done: f64 = stages
        .iter()
        .map(|stage| match stage.status() {
            StageStatus::Completed | StageStatus::Skipped => stage.weight,
            StageStatus::Running => stage.weight * f64::from(stage.progress()) / 100.0,
            StageStatus::Pending | StageStatus::Failed => 0.0,
        })
        .sum();
    (100.0 * done / total).round().clamp(0.0, 100.0) as u8
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
