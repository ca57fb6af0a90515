//! Stage domain model

use crate::core::{
    context::WorkflowContext,
    error::{ExecutorError, StageError},
    event::{EventBus, WorkflowEvent},
    state::{StageStatus, StepStatus},
    step::{Step, StepHandle, StepInfo},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Executes a whole stage, replacing the default step loop
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(
        &self,
        input: Value,
        context: &WorkflowContext,
        stage: &StageHandle,
    ) -> Result<Value, ExecutorError>;
}

/// Adapter turning an async closure into a [`StageExecutor`]
pub struct FnStage<F>(pub F);

#[async_trait]
impl<F, Fut> StageExecutor for FnStage<F>
where
    F: Fn(Value, WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecutorError>> + Send + 'static,
{
    async fn execute(
        &self,
        input: Value,
        context: &WorkflowContext,
        _stage: &StageHandle,
    ) -> Result<Value, ExecutorError> {
        (self.0)(input, context.clone()).await
    }
}

/// Wrap an async closure as a shared [`StageExecutor`]
pub fn stage_fn<F, Fut>(f: F) -> Arc<dyn StageExecutor>
where
    F: Fn(Value, WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecutorError>> + Send + 'static,
{
    Arc::new(FnStage(f))
}

/// Cooperative cancellation flag shared between a pipeline and its executors
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What to capture before a stage runs, when checkpointing is enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    /// Capture the workflow context
    #[serde(default = "default_true")]
    pub capture_context: bool,

    /// Files to back up
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Tables to copy through the snapshot table store
    #[serde(default)]
    pub tables: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            capture_context: true,
            files: Vec::new(),
            tables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct StageRuntime {
    status: StageStatus,
    progress: u8,
    result: Option<Value>,
    error: Option<String>,
    skip_reason: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    steps: Vec<StepInfo>,
}

impl StageRuntime {
    fn new(steps: &[Step]) -> Self {
        Self {
            status: StageStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            skip_reason: None,
            started_at: None,
            completed_at: None,
            steps: steps.iter().map(Step::initial_info).collect(),
        }
    }

    fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }
}

fn percent(done: f64, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    (100.0 * done / total as f64).round().clamp(0.0, 100.0) as u8
}

/// One ordered phase of a workflow
#[derive(Clone)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub description: String,

    /// Relative share of overall workflow progress
    pub weight: f64,

    /// Quality gate evaluated after this stage
    pub gate_id: Option<String>,

    pub checkpoint: CheckpointPolicy,

    steps: Vec<Step>,
    executor: Option<Arc<dyn StageExecutor>>,
    state: Arc<RwLock<StageRuntime>>,
}

impl Stage {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            weight: 1.0,
            gate_id: None,
            checkpoint: CheckpointPolicy::default(),
            steps: Vec::new(),
            executor: None,
            state: Arc::new(RwLock::new(StageRuntime::new(&[]))),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_gate(mut self, gate_id: impl Into<String>) -> Self {
        self.gate_id = Some(gate_id.into());
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: CheckpointPolicy) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self.state = Arc::new(RwLock::new(StageRuntime::new(&self.steps)));
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Same definition and executors, with its own `Pending` runtime state.
    /// Plain `clone` shares runtime state with the original.
    pub fn fresh_copy(&self) -> Self {
        let mut stage = self.clone();
        stage.state = Arc::new(RwLock::new(StageRuntime::new(&self.steps)));
        stage
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StageRuntime> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StageRuntime> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> StageStatus {
        self.read_state().status
    }

    pub fn progress(&self) -> u8 {
        self.read_state().progress
    }

    pub fn result(&self) -> Option<Value> {
        self.read_state().result.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.read_state().error.clone()
    }

    /// Run the stage.
    ///
    /// Uses the injected executor when present, otherwise runs the steps in
    /// declaration order. Errors are recorded on the stage and returned.
    pub async fn execute(
        &self,
        input: Value,
        context: &WorkflowContext,
        events: &EventBus,
        cancel: &CancelFlag,
    ) -> Result<Value, StageError> {
        {
            let mut state = self.write_state();
            *state = StageRuntime::new(&self.steps);
            state.status = StageStatus::Running;
            state.started_at = Some(Utc::now());
        }
        info!("Executing stage: {}", self.id);
        events.emit(WorkflowEvent::StageStarted {
            stage_id: self.id.clone(),
            name: self.name.clone(),
        });

        let handle = StageHandle {
            stage_id: self.id.clone(),
            state: self.state.clone(),
            events: events.clone(),
            cancel: cancel.clone(),
        };

        let outcome = match &self.executor {
            Some(executor) => executor
                .execute(input, context, &handle)
                .await
                .map_err(StageError::from),
            None => self.run_steps(input, context, &handle).await,
        };

        match outcome {
            Ok(result) => {
                {
                    let mut state = self.write_state();
                    state.status = StageStatus::Completed;
                    state.progress = 100;
                    state.result = Some(result.clone());
                    state.completed_at = Some(Utc::now());
                }
                info!("Stage {} completed", self.id);
                events.emit(WorkflowEvent::StageCompleted {
                    stage_id: self.id.clone(),
                    result: result.clone(),
                });
                Ok(result)
            }
            Err(e) => {
                {
                    let mut state = self.write_state();
                    state.status = StageStatus::Failed;
                    state.error = Some(e.to_string());
                    state.completed_at = Some(Utc::now());
                }
                warn!("Stage {} failed: {}", self.id, e);
                events.emit(WorkflowEvent::StageError {
                    stage_id: self.id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Default step loop: every step needs an executor, checked before any runs
    async fn run_steps(
        &self,
        input: Value,
        context: &WorkflowContext,
        handle: &StageHandle,
    ) -> Result<Value, StageError> {
        if self.steps.is_empty() {
            return Err(StageError::MissingExecutor {
                stage_id: self.id.clone(),
            });
        }
        if let Some(step) = self.steps.iter().find(|s| s.executor().is_none()) {
            return Err(StageError::MissingStepExecutor {
                stage_id: self.id.clone(),
                step_id: step.id.clone(),
            });
        }

        let total = self.steps.len();
        let mut outputs = Map::new();

        for (index, step) in self.steps.iter().enumerate() {
            let Some(executor) = step.executor() else {
                continue;
            };

            {
                let mut state = self.write_state();
                let info = &mut state.steps[index];
                info.status = StepStatus::Running;
                info.started_at = Some(Utc::now());
            }
            debug!("Stage {}: running step {}", self.id, step.id);
            handle.events.emit(WorkflowEvent::StepStarted {
                stage_id: self.id.clone(),
                step_id: step.id.clone(),
            });

            let step_handle = StepHandle {
                stage: handle,
                index,
            };
            match executor.run(&input, context, &step_handle).await {
                Ok(output) => {
                    {
                        let mut state = self.write_state();
                        let info = &mut state.steps[index];
                        info.status = StepStatus::Completed;
                        info.progress = 100;
                        info.completed_at = Some(Utc::now());
                        let completed = state.completed_steps();
                        state.progress = percent(completed as f64, total);
                    }
                    handle.events.emit(WorkflowEvent::StepCompleted {
                        stage_id: self.id.clone(),
                        step_id: step.id.clone(),
                    });
                    outputs.insert(step.id.clone(), output);
                }
                Err(e) => {
                    {
                        let mut state = self.write_state();
                        let info = &mut state.steps[index];
                        info.status = StepStatus::Failed;
                        info.message = Some(e.to_string());
                        info.completed_at = Some(Utc::now());
                    }
                    handle.events.emit(WorkflowEvent::StepError {
                        stage_id: self.id.clone(),
                        step_id: step.id.clone(),
                        error: e.to_string(),
                    });
                    return Err(StageError::Step {
                        step_id: step.id.clone(),
                        source: e,
                    });
                }
            }
        }

        Ok(Value::Object(outputs))
    }

    /// Return to `Pending`, clearing result, error, progress and step states
    pub fn reset(&self) {
        *self.write_state() = StageRuntime::new(&self.steps);
    }

    /// Mark the stage skipped; it produces no result but counts as done
    pub fn skip(&self, reason: &str) {
        let mut state = self.write_state();
        state.status = StageStatus::Skipped;
        state.progress = 100;
        state.result = None;
        state.skip_reason = Some(reason.to_string());
        state.completed_at = Some(Utc::now());
    }

    /// Serializable view of the stage
    pub fn info(&self) -> StageInfo {
        let state = self.read_state();
        StageInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            weight: self.weight,
            gate_id: self.gate_id.clone(),
            status: state.status,
            progress: state.progress,
            result: state.result.clone(),
            error: state.error.clone(),
            skip_reason: state.skip_reason.clone(),
            started_at: state.started_at,
            completed_at: state.completed_at,
            steps: state.steps.clone(),
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("gate_id", &self.gate_id)
            .field("steps", &self.steps)
            .field("has_executor", &self.executor.is_some())
            .field("status", &self.status())
            .finish()
    }
}

/// Snapshot of a stage's definition and runtime state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub weight: f64,
    pub gate_id: Option<String>,
    pub status: StageStatus,
    pub progress: u8,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepInfo>,
}

/// Handle given to a running stage executor
#[derive(Clone)]
pub struct StageHandle {
    stage_id: String,
    state: Arc<RwLock<StageRuntime>>,
    events: EventBus,
    cancel: CancelFlag,
}

impl StageHandle {
    fn write_state(&self) -> RwLockWriteGuard<'_, StageRuntime> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Report live progress (0-100) of the whole stage
    pub fn report_progress(&self, progress: u8) {
        let progress = progress.min(100);
        self.write_state().progress = progress;
        self.events.emit(WorkflowEvent::StageProgress {
            stage_id: self.stage_id.clone(),
            progress,
        });
    }

    pub fn progress(&self) -> u8 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .progress
    }

    /// Whether cancellation of the workflow was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn step_id(&self, index: usize) -> String {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .steps
            .get(index)
            .map(|s| s.id.clone())
            .unwrap_or_default()
    }

    pub(crate) fn report_step_progress(&self, index: usize, progress: u8) {
        let event = {
            let mut state = self.write_state();
            let total = state.steps.len();
            let completed = state.completed_steps();
            let Some(step) = state.steps.get_mut(index) else {
                return;
            };
            if step.status != StepStatus::Running {
                return;
            }
            step.progress = progress.min(100);
            let step_id = step.id.clone();
            let step_progress = step.progress;
            let live = completed as f64 + f64::from(step_progress) / 100.0;
            state.progress = percent(live, total);
            WorkflowEvent::StepProgress {
                stage_id: self.stage_id.clone(),
                step_id,
                progress: step_progress,
                stage_progress: state.progress,
            }
        };
        self.events.emit(event);
    }

    pub(crate) fn set_step_message(&self, index: usize, message: String) {
        if let Some(step) = self.write_state().steps.get_mut(index) {
            step.message = Some(message);
        }
    }
}
