use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mesh_a2a_agent::{AgentRuntime, MessageHandler};
use mesh_a2a_auth::AuthToken;
use mesh_a2a_core::{Message, Result, WorkflowError};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::workflow::{Task, Workflow, WorkflowStatus};

/// Capabilities an orchestrator advertises.
pub const ORCHESTRATOR_CAPABILITIES: &[&str] =
    &["a2a:orchestration", "a2a:coordination", "a2a:workflow"];

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Pause between assignment cycles.
    pub assignment_cycle: Duration,
    /// Pause while waiting on running tasks with nothing ready.
    pub stall_cycle: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            assignment_cycle: Duration::from_millis(500),
            stall_cycle: Duration::from_secs(1),
        }
    }
}

/// Owns workflows and drives their tasks to terminal states by assigning
/// them to capable agents over the normal message path.
///
/// A task that cannot be assigned fails without failing the workflow; the
/// workflow transitions to `completed` once every task is terminal, whatever
/// the mix of outcomes. Callers inspect task states to detect partial
/// failure.
pub struct OrchestratorAgent {
    /// Back-reference for executor tasks and message handlers.
    self_ref: Weak<OrchestratorAgent>,
    runtime: Arc<AgentRuntime>,
    config: OrchestratorConfig,
    workflows: Mutex<HashMap<String, Workflow>>,
    /// task_id -> assigned agent, released when the response arrives.
    assignments: Mutex<HashMap<String, String>>,
    /// Capabilities reported by agents via `capability_update`.
    agent_capabilities: Mutex<HashMap<String, Vec<String>>>,
}

impl OrchestratorAgent {
    pub fn new(runtime: Arc<AgentRuntime>, config: OrchestratorConfig) -> Arc<Self> {
        let orchestrator = Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            runtime,
            config,
            workflows: Mutex::new(HashMap::new()),
            assignments: Mutex::new(HashMap::new()),
            agent_capabilities: Mutex::new(HashMap::new()),
        });
        orchestrator.install_handlers();
        orchestrator
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    fn install_handlers(&self) {
        self.runtime.register_message_handler(
            "task_response",
            Arc::new(TaskResponseHandler {
                orchestrator: self.self_ref.clone(),
            }),
        );
        self.runtime.register_message_handler(
            "workflow_status_request",
            Arc::new(WorkflowStatusHandler {
                orchestrator: self.self_ref.clone(),
            }),
        );
        self.runtime.register_message_handler(
            "capability_update",
            Arc::new(CapabilityUpdateHandler {
                orchestrator: self.self_ref.clone(),
            }),
        );
    }

    /// Create a workflow in `created` state and return its id.
    pub fn create_workflow(
        &self,
        name: &str,
        description: &str,
        context: Option<Map<String, Value>>,
    ) -> String {
        let mut workflows = self.workflows.lock().unwrap();
        let workflow_id = format!("wf_{}", workflows.len() + 1);
        workflows.insert(
            workflow_id.clone(),
            Workflow::new(&workflow_id, name, description, context.unwrap_or_default()),
        );
        info!(workflow_id, name, "created workflow");
        workflow_id
    }

    /// Append a pending task. Task ids are deterministic:
    /// `task_<workflow_id>_<n>` with n = current task count + 1.
    pub fn add_task_to_workflow(
        &self,
        workflow_id: &str,
        task_type: &str,
        description: &str,
        required_capabilities: Vec<String>,
        parameters: Map<String, Value>,
        dependencies: Vec<String>,
    ) -> Result<String> {
        let mut workflows = self.workflows.lock().unwrap();
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;

        let task_id = format!("task_{workflow_id}_{}", workflow.task_count() + 1);
        workflow.add_task(Task::new(
            &task_id,
            task_type,
            description,
            required_capabilities,
            parameters,
            dependencies,
        ));
        info!(workflow_id, task_id, "added task to workflow");
        Ok(task_id)
    }

    /// Mark the workflow running and spawn its background executor.
    pub fn start_workflow(&self, workflow_id: &str) -> Result<()> {
        {
            let mut workflows = self.workflows.lock().unwrap();
            let workflow = workflows
                .get_mut(workflow_id)
                .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
            workflow.status = WorkflowStatus::Running;
            workflow.started_at = Some(Utc::now());
        }

        let Some(orchestrator) = self.self_ref.upgrade() else {
            return Err(WorkflowError::WorkflowNotFound(workflow_id.to_string()).into());
        };
        let workflow_id = workflow_id.to_string();
        tokio::spawn(async move {
            orchestrator.execute_workflow(workflow_id).await;
        });
        Ok(())
    }

    /// Executor loop: assign ready tasks, wait on running ones, and finish
    /// when every task is terminal. A workflow with nothing ready and
    /// nothing running is stuck; the executor exits without transitioning it.
    async fn execute_workflow(&self, workflow_id: String) {
        enum Step {
            Finished,
            Stuck,
            Wait,
            Assign(Vec<String>),
        }

        loop {
            let step = {
                let mut workflows = self.workflows.lock().unwrap();
                let Some(workflow) = workflows.get_mut(&workflow_id) else {
                    return;
                };
                if workflow.status != WorkflowStatus::Running {
                    return;
                }
                if workflow.is_completed() {
                    workflow.status = WorkflowStatus::Completed;
                    workflow.completed_at = Some(Utc::now());
                    Step::Finished
                } else {
                    let ready = workflow.ready_task_ids();
                    if !ready.is_empty() {
                        Step::Assign(ready)
                    } else if workflow.running_task_ids().is_empty() {
                        Step::Stuck
                    } else {
                        Step::Wait
                    }
                }
            };

            match step {
                Step::Finished => {
                    info!(workflow_id, "workflow completed");
                    return;
                }
                Step::Stuck => {
                    warn!(workflow_id, "workflow has no ready or running tasks");
                    return;
                }
                Step::Wait => tokio::time::sleep(self.config.stall_cycle).await,
                Step::Assign(ready) => {
                    for task_id in ready {
                        self.assign_and_start_task(&workflow_id, &task_id).await;
                    }
                    tokio::time::sleep(self.config.assignment_cycle).await;
                }
            }
        }
    }

    /// Find a capable agent (never this orchestrator), mark the task running,
    /// and send the `task_assignment` message. Assignment failures are fatal
    /// to the task, not the workflow.
    async fn assign_and_start_task(&self, workflow_id: &str, task_id: &str) {
        let (required_capabilities, assignment) = {
            let workflows = self.workflows.lock().unwrap();
            let Some(workflow) = workflows.get(workflow_id) else {
                return;
            };
            let Some(task) = workflow.task(task_id) else {
                return;
            };
            let mut payload = Map::new();
            payload.insert("workflow_id".to_string(), json!(workflow_id));
            payload.insert("task_id".to_string(), json!(task_id));
            payload.insert("task_type".to_string(), json!(task.task_type));
            payload.insert("description".to_string(), json!(task.description));
            payload.insert("parameters".to_string(), Value::Object(task.parameters.clone()));
            payload.insert("context".to_string(), Value::Object(workflow.context.clone()));
            (task.required_capabilities.clone(), payload)
        };

        let mut candidates = self
            .runtime
            .discover_agents(Some(required_capabilities.clone()), 50);
        candidates.retain(|agent| agent.agent_id != self.runtime.agent_id());

        let Some(agent) = candidates.first() else {
            error!(
                workflow_id,
                task_id,
                ?required_capabilities,
                "no suitable agents found"
            );
            self.fail_task(workflow_id, task_id, "No suitable agents available");
            return;
        };
        let assigned_agent = agent.agent_id.clone();

        {
            let mut workflows = self.workflows.lock().unwrap();
            if let Some(task) = workflows
                .get_mut(workflow_id)
                .and_then(|workflow| workflow.task_mut(task_id))
            {
                task.assigned_agent = Some(assigned_agent.clone());
                task.mark_started();
            }
            self.assignments
                .lock()
                .unwrap()
                .insert(task_id.to_string(), assigned_agent.clone());
        }

        match self
            .runtime
            .send_message(&assigned_agent, "task_assignment", assignment, None)
            .await
        {
            Some(_) => {
                info!(workflow_id, task_id, assigned_agent, "assigned task");
            }
            None => {
                self.assignments.lock().unwrap().remove(task_id);
                self.fail_task(workflow_id, task_id, "Failed to send task assignment");
            }
        }
    }

    fn fail_task(&self, workflow_id: &str, task_id: &str, reason: &str) {
        let mut workflows = self.workflows.lock().unwrap();
        if let Some(task) = workflows
            .get_mut(workflow_id)
            .and_then(|workflow| workflow.task_mut(task_id))
        {
            task.mark_failed(reason);
        }
    }

    /// Apply a `task_response` payload: record the result or failure and
    /// release the assignment. Completed results propagate into the workflow
    /// context under `task_<task_id>_result`.
    pub fn handle_task_response(&self, payload: &Map<String, Value>) {
        let Some(task_id) = payload.get("task_id").and_then(Value::as_str) else {
            return;
        };
        let status = payload.get("status").and_then(Value::as_str).unwrap_or("");

        let mut workflows = self.workflows.lock().unwrap();
        let Some(workflow) = workflows
            .values_mut()
            .find(|workflow| workflow.contains_task(task_id))
        else {
            warn!(task_id, "task response for unknown task");
            return;
        };

        match status {
            "completed" => {
                let result = payload.get("result").cloned();
                if let Some(task) = workflow.task_mut(task_id) {
                    task.mark_completed(result.clone());
                }
                workflow.context.insert(
                    format!("task_{task_id}_result"),
                    result.unwrap_or(Value::Null),
                );
                info!(task_id, "task completed");
            }
            "failed" => {
                let reason = payload
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("Task failed");
                if let Some(task) = workflow.task_mut(task_id) {
                    task.mark_failed(reason);
                }
                error!(task_id, reason, "task failed");
            }
            other => warn!(task_id, status = other, "unrecognized task response status"),
        }

        self.assignments.lock().unwrap().remove(task_id);
    }

    /// Cancel a running workflow: every running task is marked cancelled
    /// immediately and its agent notified best-effort, without awaiting
    /// acknowledgement.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> bool {
        let notifications = {
            let mut workflows = self.workflows.lock().unwrap();
            let Some(workflow) = workflows.get_mut(workflow_id) else {
                return false;
            };
            if workflow.status != WorkflowStatus::Running {
                return false;
            }

            let mut notifications = Vec::new();
            let running = workflow.running_task_ids();
            for task_id in running {
                if let Some(task) = workflow.task_mut(&task_id) {
                    task.mark_cancelled();
                    if let Some(agent) = task.assigned_agent.clone() {
                        notifications.push((agent, task_id.clone()));
                    }
                }
                self.assignments.lock().unwrap().remove(&task_id);
            }
            workflow.status = WorkflowStatus::Cancelled;
            workflow.completed_at = Some(Utc::now());
            notifications
        };

        for (agent, task_id) in notifications {
            let mut payload = Map::new();
            payload.insert("task_id".to_string(), json!(task_id));
            if self
                .runtime
                .send_message(&agent, "task_cancellation", payload, None)
                .await
                .is_none()
            {
                warn!(task_id, agent, "failed to notify agent of cancellation");
            }
        }

        info!(workflow_id, "cancelled workflow");
        true
    }

    pub fn get_workflow_status(&self, workflow_id: &str) -> Option<Value> {
        let workflows = self.workflows.lock().unwrap();
        let workflow = workflows.get(workflow_id)?;
        Some(workflow_status_value(workflow))
    }

    pub fn list_workflows(&self) -> Vec<Value> {
        let workflows = self.workflows.lock().unwrap();
        let mut ids: Vec<&String> = workflows.keys().collect();
        ids.sort();
        ids.iter()
            .filter_map(|id| workflows.get(*id).map(workflow_status_value))
            .collect()
    }

    /// Ready task ids of one workflow; empty for unknown workflows.
    pub fn get_ready_tasks(&self, workflow_id: &str) -> Vec<String> {
        let workflows = self.workflows.lock().unwrap();
        workflows
            .get(workflow_id)
            .map(|workflow| workflow.ready_task_ids())
            .unwrap_or_default()
    }

    /// Snapshot of one task, for inspection.
    pub fn get_task(&self, workflow_id: &str, task_id: &str) -> Option<Task> {
        let workflows = self.workflows.lock().unwrap();
        workflows
            .get(workflow_id)
            .and_then(|workflow| workflow.task(task_id))
            .cloned()
    }

    pub fn cached_capabilities(&self, agent_id: &str) -> Option<Vec<String>> {
        self.agent_capabilities.lock().unwrap().get(agent_id).cloned()
    }
}

fn workflow_status_value(workflow: &Workflow) -> Value {
    let tasks: Map<String, Value> = workflow
        .tasks_in_order()
        .map(|task| {
            (
                task.task_id.clone(),
                json!({
                    "status": task.status.as_str(),
                    "assigned_agent": task.assigned_agent,
                    "started_at": task.started_at,
                    "completed_at": task.completed_at,
                    "error_message": task.error_message,
                }),
            )
        })
        .collect();

    json!({
        "workflow_id": workflow.workflow_id,
        "name": workflow.name,
        "status": workflow.status.as_str(),
        "created_at": workflow.created_at,
        "started_at": workflow.started_at,
        "completed_at": workflow.completed_at,
        "completion_percentage": workflow.completion_percentage(),
        "task_count": workflow.task_count(),
        "tasks": tasks,
        "context": workflow.context,
    })
}

struct TaskResponseHandler {
    orchestrator: Weak<OrchestratorAgent>,
}

#[async_trait]
impl MessageHandler for TaskResponseHandler {
    async fn handle(
        &self,
        message: &Message,
        _token: &AuthToken,
    ) -> Result<Option<Map<String, Value>>> {
        if let Some(orchestrator) = self.orchestrator.upgrade() {
            orchestrator.handle_task_response(&message.payload);
        }
        Ok(None)
    }
}

struct WorkflowStatusHandler {
    orchestrator: Weak<OrchestratorAgent>,
}

#[async_trait]
impl MessageHandler for WorkflowStatusHandler {
    async fn handle(
        &self,
        message: &Message,
        _token: &AuthToken,
    ) -> Result<Option<Map<String, Value>>> {
        let mut payload = Map::new();
        let Some(orchestrator) = self.orchestrator.upgrade() else {
            payload.insert("error".to_string(), json!("orchestrator gone"));
            return Ok(Some(payload));
        };
        let Some(workflow_id) = message.payload.get("workflow_id").and_then(Value::as_str)
        else {
            payload.insert("error".to_string(), json!("missing workflow_id"));
            return Ok(Some(payload));
        };

        match orchestrator.get_workflow_status(workflow_id) {
            Some(status) => {
                payload.insert("workflow".to_string(), status);
            }
            None => {
                payload.insert("error".to_string(), json!("workflow not found"));
            }
        }
        Ok(Some(payload))
    }
}

struct CapabilityUpdateHandler {
    orchestrator: Weak<OrchestratorAgent>,
}

#[async_trait]
impl MessageHandler for CapabilityUpdateHandler {
    async fn handle(
        &self,
        message: &Message,
        _token: &AuthToken,
    ) -> Result<Option<Map<String, Value>>> {
        let capabilities: Vec<String> = message
            .payload
            .get("capabilities")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        info!(agent_id = %message.sender_id, ?capabilities, "capability update");
        if let Some(orchestrator) = self.orchestrator.upgrade() {
            orchestrator
                .agent_capabilities
                .lock()
                .unwrap()
                .insert(message.sender_id.clone(), capabilities);
        }
        Ok(None)
    }
}
