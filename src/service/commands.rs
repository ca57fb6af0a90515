//! Typed command surface over the workflow manager

use crate::core::{context::{ContextData, WorkflowContext}, state::WorkflowState};
use crate::service::manager::WorkflowManager;
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

fn default_reason() -> String {
    "cancelled by user".to_string()
}

fn default_log_limit() -> usize {
    50
}

/// A request against the workflow registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    Create {
        title: String,
        #[serde(default)]
        description: String,
    },
    Start {
        workflow_id: Uuid,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        context: ContextData,
    },
    Pause {
        workflow_id: Uuid,
    },
    Resume {
        workflow_id: Uuid,
    },
    Cancel {
        workflow_id: Uuid,
        #[serde(default = "default_reason")]
        reason: String,
    },
    Retry {
        workflow_id: Uuid,
    },
    GetStatus {
        workflow_id: Uuid,
    },
    GetStages {
        workflow_id: Uuid,
    },
    GetGates {
        workflow_id: Uuid,
    },
    OverrideGate {
        workflow_id: Uuid,
        gate_id: String,
        reason: String,
    },
    GetLogs {
        workflow_id: Uuid,
        #[serde(default = "default_log_limit")]
        limit: usize,
    },
    GetAll,
    Delete {
        workflow_id: Uuid,
    },
}

/// Uniform reply: `data` on success, `error` otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Dispatches [`Command`]s; every failure becomes a `CommandResponse`
#[derive(Clone)]
pub struct WorkflowService {
    manager: Arc<WorkflowManager>,
}

impl WorkflowService {
    pub fn new(manager: Arc<WorkflowManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<WorkflowManager> {
        &self.manager
    }

    pub async fn handle(&self, command: Command) -> CommandResponse {
        debug!("Handling command {:?}", command);
        match self.dispatch(command).await {
            Ok(data) => CommandResponse::ok(data),
            Err(e) => CommandResponse::err(format!("{:#}", e)),
        }
    }

    async fn dispatch(&self, command: Command) -> Result<Value> {
        let manager = &self.manager;
        let workflow = |id: Uuid| async move {
            manager
                .get(id)
                .await
                .ok_or_else(|| anyhow!("Workflow not found: {}", id))
        };

        let data = match command {
            Command::Create { title, description } => {
                let pipeline = manager.create(&title, &description).await?;
                serde_json::to_value(pipeline.summary().await)?
            }
            Command::Start {
                workflow_id,
                input,
                context,
            } => {
                let state = workflow(workflow_id).await?.state().await;
                if state != WorkflowState::Idle {
                    bail!("Cannot start workflow in state {}", state);
                }
                manager
                    .start(workflow_id, input, WorkflowContext::from_data(context))
                    .await?;
                json!({ "workflow_id": workflow_id, "started": true })
            }
            Command::Pause { workflow_id } => {
                let pipeline = workflow(workflow_id).await?;
                pipeline.pause().await?;
                json!({ "state": pipeline.state().await })
            }
            Command::Resume { workflow_id } => {
                let pipeline = workflow(workflow_id).await?;
                pipeline.resume().await?;
                json!({ "state": pipeline.state().await })
            }
            Command::Cancel {
                workflow_id,
                reason,
            } => {
                let pipeline = workflow(workflow_id).await?;
                pipeline.cancel(&reason).await?;
                json!({ "state": pipeline.state().await })
            }
            Command::Retry { workflow_id } => {
                let state = workflow(workflow_id).await?.state().await;
                if state != WorkflowState::Failed {
                    bail!("Cannot retry workflow in state {}", state);
                }
                manager.retry(workflow_id).await?;
                json!({ "workflow_id": workflow_id, "retrying": true })
            }
            Command::GetStatus { workflow_id } => {
                serde_json::to_value(workflow(workflow_id).await?.status().await)?
            }
            Command::GetStages { workflow_id } => {
                serde_json::to_value(workflow(workflow_id).await?.stages())?
            }
            Command::GetGates { workflow_id } => {
                serde_json::to_value(workflow(workflow_id).await?.gates().await)?
            }
            Command::OverrideGate {
                workflow_id,
                gate_id,
                reason,
            } => {
                let pipeline = workflow(workflow_id).await?;
                pipeline.override_gate(&gate_id, &reason).await?;
                serde_json::to_value(pipeline.gates().await)?
            }
            Command::GetLogs { workflow_id, limit } => {
                serde_json::to_value(workflow(workflow_id).await?.logs(limit).await)?
            }
            Command::GetAll => {
                let mut summaries = Vec::new();
                for pipeline in manager.list().await {
                    summaries.push(pipeline.summary().await);
                }
                serde_json::to_value(summaries)?
            }
            Command::Delete { workflow_id } => {
                let pipeline = workflow(workflow_id).await?;
                if pipeline.state().await.is_active() {
                    pipeline.cancel("workflow deleted").await?;
                }
                manager.remove(workflow_id).await;
                json!({ "workflow_id": workflow_id, "deleted": true })
            }
        };
        Ok(data)
    }
}
