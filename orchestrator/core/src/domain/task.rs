// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Aggregate
//!
//! A [`Task`] is the unit of work created on the first interpreted request of a
//! workflow. It owns its Digital Twin document ([`TaskContext`]) and references its
//! current plan hypothesis and checkpoint.
//!
//! Tasks are never deleted; they are status-transitioned into a terminal state
//! (`completed`, `failed`, `cancelled`). The context document can only be changed
//! through [`Task::apply_context`], which enforces merge-only semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::context::{ContextError, ContextMutation, TaskContext};
use crate::domain::events::WorkflowId;
use crate::domain::plan::PlanId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a snapshot recorded under `context.checkpoints`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(pub Uuid);

impl CheckpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    AwaitingClarification,
    AwaitingApproval,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::AwaitingClarification => "awaiting_clarification",
            TaskStatus::AwaitingApproval => "awaiting_approval",
            TaskStatus::Executing => "executing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "awaiting_clarification" => Some(TaskStatus::AwaitingClarification),
            "awaiting_approval" => Some(TaskStatus::AwaitingApproval),
            "executing" => Some(TaskStatus::Executing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TaskPriority::Low),
            "normal" => Some(TaskPriority::Normal),
            "high" => Some(TaskPriority::High),
            "critical" => Some(TaskPriority::Critical),
            _ => None,
        }
    }
}

/// How much the pipeline may do without a human decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Every plan requires explicit approval
    Manual,
    /// Plans require approval before execution
    #[default]
    Supervised,
    /// Approved validator_b plans execute directly
    Autonomous,
}

impl AutonomyLevel {
    pub fn requires_plan_approval(self) -> bool {
        !matches!(self, AutonomyLevel::Autonomous)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AutonomyLevel::Manual => "manual",
            AutonomyLevel::Supervised => "supervised",
            AutonomyLevel::Autonomous => "autonomous",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(AutonomyLevel::Manual),
            "supervised" => Some(AutonomyLevel::Supervised),
            "autonomous" => Some(AutonomyLevel::Autonomous),
            _ => None,
        }
    }
}

/// Identity of a human (or service) acting on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    pub role: Option<String>,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task {task_id} cannot transition from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error(transparent)]
    Context(#[from] ContextError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub created_by: Option<Actor>,
    pub approved_by: Option<Actor>,
    pub autonomy_level: AutonomyLevel,
    pub parent_task_id: Option<TaskId>,
    pub workflow_id: Option<WorkflowId>,
    pub current_plan_id: Option<PlanId>,
    pub current_checkpoint_id: Option<CheckpointId>,
    context: Option<TaskContext>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(description: impl Into<String>, autonomy_level: AutonomyLevel) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::default(),
            created_by: None,
            approved_by: None,
            autonomy_level,
            parent_task_id: None,
            workflow_id: None,
            current_plan_id: None,
            current_checkpoint_id: None,
            context: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rehydrate a stored context document; persistence adapters only
    pub(crate) fn with_stored_context(mut self, context: Option<TaskContext>) -> Self {
        self.context = context;
        self
    }

    pub fn context(&self) -> Option<&TaskContext> {
        self.context.as_ref()
    }

    /// Lazily initialise the Digital Twin document from the task description
    pub fn ensure_context(&mut self) -> &TaskContext {
        let id = self.id;
        let description = self.description.clone();
        self.context
            .get_or_insert_with(|| TaskContext::new(id, description))
    }

    /// The only mutation path for the context document
    pub fn apply_context(&mut self, mutation: ContextMutation) -> Result<&TaskContext, TaskError> {
        let id = self.id;
        let description = self.description.clone();
        let context = self
            .context
            .get_or_insert_with(|| TaskContext::new(id, description));
        mutation.apply(context)?;
        self.updated_at = Utc::now();
        Ok(context)
    }

    pub fn transition(&mut self, to: TaskStatus) -> Result<(), TaskError> {
        if self.status.is_terminal() && self.status != to {
            return Err(TaskError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_autonomy_gate() {
        assert!(AutonomyLevel::Manual.requires_plan_approval());
        assert!(AutonomyLevel::Supervised.requires_plan_approval());
        assert!(!AutonomyLevel::Autonomous.requires_plan_approval());
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut task = Task::new("summarise logs", AutonomyLevel::Autonomous);
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::Completed).unwrap();

        let err = task.transition(TaskStatus::InProgress).unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_context_initialised_lazily() {
        let mut task = Task::new("summarise logs", AutonomyLevel::Supervised);
        assert!(task.context().is_none());

        let task_id = task.id;
        let ctx = task.ensure_context();
        assert_eq!(ctx.original_user_request, "summarise logs");
        assert_eq!(ctx.metadata.task_id, task_id);
    }

    #[test]
    fn test_apply_context_merges() {
        let mut task = Task::new("summarise logs", AutonomyLevel::Supervised);
        let updates = json!({"routing": {"agents": ["log-reader"]}});
        let ctx = task
            .apply_context(ContextMutation::Merge(updates.as_object().cloned().unwrap()))
            .unwrap();
        assert_eq!(ctx.get("routing").unwrap()["agents"][0], "log-reader");
    }
}
