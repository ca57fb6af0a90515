//! Step domain model

use crate::core::{
    context::WorkflowContext,
    error::ExecutorError,
    stage::StageHandle,
    state::StepStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Executes the work of a single step
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run the step against the stage input.
    ///
    /// The returned value is recorded as the step's output.
    async fn run(
        &self,
        input: &Value,
        context: &WorkflowContext,
        step: &StepHandle<'_>,
    ) -> Result<Value, ExecutorError>;
}

/// Adapter turning an async closure into a [`StepExecutor`]
pub struct FnStep<F>(pub F);

#[async_trait]
impl<F, Fut> StepExecutor for FnStep<F>
where
    F: Fn(Value, WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecutorError>> + Send + 'static,
{
    async fn run(
        &self,
        input: &Value,
        context: &WorkflowContext,
        _step: &StepHandle<'_>,
    ) -> Result<Value, ExecutorError> {
        (self.0)(input.clone(), context.clone()).await
    }
}

/// Wrap an async closure as a shared [`StepExecutor`]
pub fn step_fn<F, Fut>(f: F) -> Arc<dyn StepExecutor>
where
    F: Fn(Value, WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecutorError>> + Send + 'static,
{
    Arc::new(FnStep(f))
}

/// A single step in a stage
#[derive(Clone)]
pub struct Step {
    /// Step identifier, unique within its stage
    pub id: String,

    /// Human-readable name
    pub name: String,

    pub description: String,

    executor: Option<Arc<dyn StepExecutor>>,
}

impl Step {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            executor: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn executor(&self) -> Option<&Arc<dyn StepExecutor>> {
        self.executor.as_ref()
    }

    /// Fresh runtime record for this step
    pub(crate) fn initial_info(&self) -> StepInfo {
        StepInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            status: StepStatus::Pending,
            progress: 0,
            message: None,
            started_at: None,
            completed_at: None,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}

/// Runtime view of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: StepStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Handle given to a running step executor
pub struct StepHandle<'a> {
    pub(crate) stage: &'a StageHandle,
    pub(crate) index: usize,
}

impl StepHandle<'_> {
    pub fn step_id(&self) -> String {
        self.stage.step_id(self.index)
    }

    /// Report partial progress (0-100) of this step
    pub fn report_progress(&self, progress: u8) {
        self.stage.report_step_progress(self.index, progress);
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.stage.set_step_message(self.index, message.into());
    }

    /// Whether cancellation of the workflow was requested
    pub fn is_cancelled(&self) -> bool {
        self.stage.is_cancelled()
    }
}
