//! Registry of live workflows

use crate::core::{context::WorkflowContext, error::WorkflowError};
use crate::execution::{Pipeline, PipelineResult};
use crate::service::template::WorkflowTemplate;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Tracks workflows by id, each running on its own task once started.
///
/// Created once by the host and passed to whatever needs it.
pub struct WorkflowManager {
    template: WorkflowTemplate,
    workflows: RwLock<IndexMap<Uuid, Pipeline>>,
    tasks: Mutex<HashMap<Uuid, JoinHandle<PipelineResult>>>,
}

impl WorkflowManager {
    pub fn new(template: WorkflowTemplate) -> Self {
        Self {
            template,
            workflows: RwLock::new(IndexMap::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn template(&self) -> &WorkflowTemplate {
        &self.template
    }

    /// Build and register a new idle workflow
    pub async fn create(&self, title: &str, description: &str) -> Result<Pipeline, WorkflowError> {
        let pipeline = self.template.build(title, description)?;
        info!("Created workflow {} ({})", pipeline.id(), title);
        self.workflows
            .write()
            .await
            .insert(pipeline.id(), pipeline.clone());
        Ok(pipeline)
    }

    pub async fn get(&self, id: Uuid) -> Option<Pipeline> {
        self.workflows.read().await.get(&id).cloned()
    }

    /// Workflows in creation order
    pub async fn list(&self) -> Vec<Pipeline> {
        self.workflows.read().await.values().cloned().collect()
    }

    pub async fn remove(&self, id: Uuid) -> Option<Pipeline> {
        self.tasks.lock().await.remove(&id);
        self.workflows.write().await.shift_remove(&id)
    }

    async fn require(&self, id: Uuid) -> Result<Pipeline, WorkflowError> {
        self.get(id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))
    }

    /// Run a workflow in the background; returns once the task is spawned
    pub async fn start(
        &self,
        id: Uuid,
        input: Value,
        context: WorkflowContext,
    ) -> Result<(), WorkflowError> {
        let pipeline = self.require(id).await?;
        let handle = tokio::spawn(async move { pipeline.execute(input, context).await });
        self.track(id, handle).await;
        Ok(())
    }

    /// Retry a failed workflow in the background
    pub async fn retry(&self, id: Uuid) -> Result<(), WorkflowError> {
        let pipeline = self.require(id).await?;
        let handle = tokio::spawn(async move { pipeline.retry().await });
        self.track(id, handle).await;
        Ok(())
    }

    async fn track(&self, id: Uuid, handle: JoinHandle<PipelineResult>) {
        if let Some(previous) = self.tasks.lock().await.insert(id, handle) {
            if !previous.is_finished() {
                warn!("Workflow {} already had a running task", id);
            }
        }
    }

    /// Wait for the workflow's latest background run to finish
    pub async fn wait(&self, id: Uuid) -> Option<PipelineResult> {
        let handle = self.tasks.lock().await.remove(&id)?;
        match handle.await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Workflow {} task ended abnormally: {}", id, e);
                None
            }
        }
    }
}
