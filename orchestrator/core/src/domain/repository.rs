// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root: one repository per aggregate,
//! interface defined in the domain layer, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `TaskRepository` | `Task` (+ context) | `InMemoryTaskRepository`, `PostgresTaskRepository` |
//! | `PlanRepository` | `PlanHypothesis` | `InMemoryPlanRepository`, `PostgresPlanRepository` |
//! | `WorkflowEventRepository` | `WorkflowEvent` | `InMemoryWorkflowEventRepository`, `PostgresWorkflowEventRepository` |
//! | `PromptRepository` | `Prompt`, `PromptAssignment` | `InMemoryPromptRepository`, `PostgresPromptRepository` |
//! | `RegistryRepository` | `RegistryEntry` | `InMemoryRegistryRepository`, `PostgresRegistryRepository` |
//! | `ApprovalRepository` | `ApprovalRequest` | `InMemoryApprovalRepository`, `PostgresApprovalRepository` |
//!
//! The invariant-bearing writes (`apply_context`, `activate_assignment`,
//! `create_prompt_version`, `insert`, `update_if_pending`) are atomic read-modify-write
//! operations: a write lock in memory, a transaction in PostgreSQL.

use async_trait::async_trait;

use crate::domain::approval::{ApprovalId, ApprovalRequest};
use crate::domain::context::{ContextError, ContextMutation, TaskContext};
use crate::domain::events::{EventId, WorkflowEvent, WorkflowId};
use crate::domain::plan::{PlanHypothesis, PlanId};
use crate::domain::prompt::{AssignmentScope, ComponentRole, NewPrompt, Prompt, PromptAssignment, PromptId};
use crate::domain::registry::{EntryId, RegistryEntry};
use crate::domain::task::{Task, TaskId};

/// Storage backend selected at startup
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Create or update the task row; an already stored context is left untouched
    async fn save(&self, task: &Task) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError>;

    async fn list_recent(&self, limit: usize) -> Result<Vec<Task>, RepositoryError>;

    /// Atomically read, mutate and write back `Task.context`
    async fn apply_context(&self, id: TaskId, mutation: ContextMutation) -> Result<TaskContext, RepositoryError>;
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn save(&self, plan: &PlanHypothesis) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: PlanId) -> Result<Option<PlanHypothesis>, RepositoryError>;

    /// All versions of a task's plan, ascending by version
    async fn list_for_task(&self, task_id: TaskId) -> Result<Vec<PlanHypothesis>, RepositoryError>;
}

/// Append-only: there is deliberately no update or delete
#[async_trait]
pub trait WorkflowEventRepository: Send + Sync {
    async fn append(&self, event: &WorkflowEvent) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: EventId) -> Result<Option<WorkflowEvent>, RepositoryError>;

    /// Events of a workflow ordered by `(timestamp, sequence)`
    async fn list_for_workflow(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowEvent>, RepositoryError>;

    /// Most recently emitted event of a workflow
    async fn last_for_workflow(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowEvent>, RepositoryError>;

    /// Most recent events across all workflows, newest first
    async fn list_recent(&self, limit: usize) -> Result<Vec<WorkflowEvent>, RepositoryError>;
}

#[async_trait]
pub trait PromptRepository: Send + Sync {
    /// Store version `n + 1` of the named prompt (version 1 for a new name)
    async fn create_prompt_version(&self, prompt: NewPrompt) -> Result<Prompt, RepositoryError>;

    async fn find_prompt(&self, id: PromptId, version: u32) -> Result<Option<Prompt>, RepositoryError>;

    async fn list_prompts(&self) -> Result<Vec<Prompt>, RepositoryError>;

    async fn active_assignment(
        &self,
        role: &ComponentRole,
        scope: &AssignmentScope,
    ) -> Result<Option<PromptAssignment>, RepositoryError>;

    /// Supersede the active assignment for the same `(role, scope)` and insert
    /// the new one in one atomic step; returns the superseded assignment
    async fn activate_assignment(
        &self,
        assignment: &PromptAssignment,
    ) -> Result<Option<PromptAssignment>, RepositoryError>;

    async fn list_assignments(&self, role: Option<&ComponentRole>) -> Result<Vec<PromptAssignment>, RepositoryError>;
}

#[async_trait]
pub trait RegistryRepository: Send + Sync {
    /// Insert a new entry; `RepositoryError::Conflict` on a duplicate name
    async fn insert(&self, entry: &RegistryEntry) -> Result<(), RepositoryError>;

    async fn update(&self, entry: &RegistryEntry) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: EntryId) -> Result<Option<RegistryEntry>, RepositoryError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<RegistryEntry>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<RegistryEntry>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn insert(&self, request: &ApprovalRequest) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ApprovalId) -> Result<Option<ApprovalRequest>, RepositoryError>;

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, RepositoryError>;

    /// Persist a resolution only if the stored request is still pending
    async fn update_if_pending(&self, request: &ApprovalRequest) -> Result<bool, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
