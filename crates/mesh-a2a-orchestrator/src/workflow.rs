use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Created => "created",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

/// A unit of work requiring a set of capabilities. Once terminal, a task
/// never transitions again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub task_type: String,
    pub description: String,
    pub assigned_agent: Option<String>,
    pub required_capabilities: Vec<String>,
    pub parameters: Map<String, Value>,
    /// Ids of tasks that must complete before this one may start.
    pub dependencies: Vec<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
}

impl Task {
    pub fn new(
        task_id: &str,
        task_type: &str,
        description: &str,
        required_capabilities: Vec<String>,
        parameters: Map<String, Value>,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            task_type: task_type.to_string(),
            description: description.to_string(),
            assigned_agent: None,
            required_capabilities,
            parameters,
            dependencies,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
        }
    }

    /// Ready iff every dependency id is in the completed set.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| completed.contains(dep))
    }

    pub fn mark_started(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: Option<Value>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = result;
    }

    pub fn mark_failed(&mut self, error_message: &str) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error_message.to_string());
    }

    pub fn mark_cancelled(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}

/// An acyclic DAG of tasks with shared context. Completed iff every task is
/// terminal, whatever the mix of outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub name: String,
    pub description: String,
    tasks: HashMap<String, Task>,
    /// Insertion order; ready tasks are assigned in this order.
    task_order: Vec<String>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Shared key/value context; task results land under
    /// `task_<task_id>_result`.
    pub context: Map<String, Value>,
}

impl Workflow {
    pub fn new(workflow_id: &str, name: &str, description: &str, context: Map<String, Value>) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            tasks: HashMap::new(),
            task_order: Vec::new(),
            status: WorkflowStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            context,
        }
    }

    pub fn add_task(&mut self, task: Task) {
        self.task_order.push(task.task_id.clone());
        self.tasks.insert(task.task_id.clone(), task);
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(task_id)
    }

    pub fn contains_task(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Tasks in insertion order.
    pub fn tasks_in_order(&self) -> impl Iterator<Item = &Task> {
        self.task_order.iter().filter_map(|id| self.tasks.get(id))
    }

    fn completed_ids(&self) -> HashSet<String> {
        self.tasks
            .values()
            .filter(|task| task.status == TaskStatus::Completed)
            .map(|task| task.task_id.clone())
            .collect()
    }

    /// Pending tasks whose dependencies are all completed, in insertion
    /// order.
    pub fn ready_task_ids(&self) -> Vec<String> {
        let completed = self.completed_ids();
        self.tasks_in_order()
            .filter(|task| task.status == TaskStatus::Pending && task.is_ready(&completed))
            .map(|task| task.task_id.clone())
            .collect()
    }

    pub fn running_task_ids(&self) -> Vec<String> {
        self.tasks_in_order()
            .filter(|task| task.status == TaskStatus::Running)
            .map(|task| task.task_id.clone())
            .collect()
    }

    /// Completed iff every task has reached a terminal state.
    pub fn is_completed(&self) -> bool {
        self.tasks.values().all(|task| task.status.is_terminal())
    }

    /// Terminal tasks over total tasks, as a percentage. An empty workflow is
    /// vacuously complete.
    pub fn completion_percentage(&self) -> f64 {
        if self.tasks.is_empty() {
            return 100.0;
        }
        let terminal = self
            .tasks
            .values()
            .filter(|task| task.status.is_terminal())
            .count();
        (terminal as f64 / self.tasks.len() as f64) * 100.0
    }
}
