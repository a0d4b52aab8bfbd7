// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits defined in
//! `crate::domain::repository`.
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresTaskRepository** / **PostgresPlanRepository** - tasks, context documents, plan versions
//! - **PostgresWorkflowEventRepository** - append-only audit log
//! - **PostgresPromptRepository** - prompt versions and scoped assignments
//! - **PostgresRegistryRepository** - agent/tool/capability catalog
//! - **PostgresApprovalRepository** - human approval requests
//!
//! ## In-Memory Repositories
//!
//! `parking_lot`-guarded `HashMap`s for development and tests. Every
//! invariant-bearing write happens under a single write-lock acquisition, which
//! gives the same atomicity the PostgreSQL transactions provide.

pub mod postgres_approval;
pub mod postgres_prompt;
pub mod postgres_registry;
pub mod postgres_task;
pub mod postgres_workflow_event;

pub use postgres_approval::PostgresApprovalRepository;
pub use postgres_prompt::PostgresPromptRepository;
pub use postgres_registry::PostgresRegistryRepository;
pub use postgres_task::{PostgresPlanRepository, PostgresTaskRepository};
pub use postgres_workflow_event::PostgresWorkflowEventRepository;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use crate::domain::context::{ContextMutation, TaskContext};
use crate::domain::events::{EventId, WorkflowEvent, WorkflowId};
use crate::domain::plan::{PlanHypothesis, PlanId};
use crate::domain::prompt::{AssignmentScope, ComponentRole, NewPrompt, Prompt, PromptAssignment, PromptId};
use crate::domain::registry::{EntryId, RegistryEntry};
use crate::domain::repository::{
    ApprovalRepository, PlanRepository, PromptRepository, RegistryRepository, RepositoryError, TaskRepository,
    WorkflowEventRepository,
};
use crate::domain::task::{Task, TaskId};

// ============================================================================
// Tasks
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: &Task) -> Result<(), RepositoryError> {
        let mut tasks = self.tasks.write();
        // A stored context is only ever changed through `apply_context`
        let stored = tasks.get(&task.id).and_then(|t| t.context().cloned());
        let mut saved = task.clone();
        if stored.is_some() {
            saved = saved.with_stored_context(stored);
        }
        tasks.insert(task.id, saved);
        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        Ok(self.tasks.read().get(&id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Task>, RepositoryError> {
        let mut tasks: Vec<Task> = self.tasks.read().values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn apply_context(&self, id: TaskId, mutation: ContextMutation) -> Result<TaskContext, RepositoryError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Task {}", id)))?;

        // Work on a copy so a rejected mutation leaves the stored task untouched
        let mut updated = task.clone();
        let context = updated.apply_context(mutation).map_err(|e| match e {
            crate::domain::task::TaskError::Context(c) => RepositoryError::Context(c),
            other => RepositoryError::Unknown(other.to_string()),
        })?;
        let context = context.clone();
        *task = updated;
        Ok(context)
    }
}

// ============================================================================
// Plans
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryPlanRepository {
    plans: Arc<RwLock<HashMap<PlanId, PlanHypothesis>>>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn save(&self, plan: &PlanHypothesis) -> Result<(), RepositoryError> {
        self.plans.write().insert(plan.id, plan.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: PlanId) -> Result<Option<PlanHypothesis>, RepositoryError> {
        Ok(self.plans.read().get(&id).cloned())
    }

    async fn list_for_task(&self, task_id: TaskId) -> Result<Vec<PlanHypothesis>, RepositoryError> {
        let mut plans: Vec<PlanHypothesis> = self
            .plans
            .read()
            .values()
            .filter(|p| p.task_id == task_id)
            .cloned()
            .collect();
        plans.sort_by_key(|p| p.version);
        Ok(plans)
    }
}

// ============================================================================
// Workflow events
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryWorkflowEventRepository {
    events: Arc<RwLock<Vec<WorkflowEvent>>>,
}

impl InMemoryWorkflowEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowEventRepository for InMemoryWorkflowEventRepository {
    async fn append(&self, event: &WorkflowEvent) -> Result<(), RepositoryError> {
        let mut events = self.events.write();
        if events.iter().any(|e| e.id == event.id) {
            return Err(RepositoryError::Conflict(format!("Event {} already recorded", event.id)));
        }
        events.push(event.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: EventId) -> Result<Option<WorkflowEvent>, RepositoryError> {
        Ok(self.events.read().iter().find(|e| e.id == id).cloned())
    }

    async fn list_for_workflow(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowEvent>, RepositoryError> {
        let mut events: Vec<WorkflowEvent> = self
            .events
            .read()
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.sequence.cmp(&b.sequence)));
        Ok(events)
    }

    async fn last_for_workflow(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowEvent>, RepositoryError> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .max_by_key(|e| e.sequence)
            .cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<WorkflowEvent>, RepositoryError> {
        let events = self.events.read();
        Ok(events.iter().rev().take(limit).cloned().collect())
    }
}

// ============================================================================
// Prompts and assignments
// ============================================================================

#[derive(Default)]
struct PromptStore {
    prompts: Vec<Prompt>,
    assignments: Vec<PromptAssignment>,
}

#[derive(Clone, Default)]
pub struct InMemoryPromptRepository {
    store: Arc<RwLock<PromptStore>>,
}

impl InMemoryPromptRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PromptRepository for InMemoryPromptRepository {
    async fn create_prompt_version(&self, prompt: NewPrompt) -> Result<Prompt, RepositoryError> {
        let mut store = self.store.write();
        let latest = store
            .prompts
            .iter()
            .filter(|p| p.name == prompt.name)
            .max_by_key(|p| p.version);

        let (id, version) = match latest {
            Some(p) => (p.id, p.version + 1),
            None => (PromptId::new(), 1),
        };

        let created = Prompt {
            id,
            name: prompt.name,
            version,
            component_role: prompt.component_role,
            text: prompt.text,
            created_by: prompt.created_by,
            created_at: Utc::now(),
        };
        store.prompts.push(created.clone());
        Ok(created)
    }

    async fn find_prompt(&self, id: PromptId, version: u32) -> Result<Option<Prompt>, RepositoryError> {
        Ok(self
            .store
            .read()
            .prompts
            .iter()
            .find(|p| p.id == id && p.version == version)
            .cloned())
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, RepositoryError> {
        let mut prompts = self.store.read().prompts.clone();
        prompts.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));
        Ok(prompts)
    }

    async fn active_assignment(
        &self,
        role: &ComponentRole,
        scope: &AssignmentScope,
    ) -> Result<Option<PromptAssignment>, RepositoryError> {
        Ok(self
            .store
            .read()
            .assignments
            .iter()
            .find(|a| a.active && &a.component_role == role && &a.scope == scope)
            .cloned())
    }

    async fn activate_assignment(
        &self,
        assignment: &PromptAssignment,
    ) -> Result<Option<PromptAssignment>, RepositoryError> {
        let mut store = self.store.write();
        let now = Utc::now();

        let mut superseded = None;
        for existing in store.assignments.iter_mut() {
            if existing.active
                && existing.component_role == assignment.component_role
                && existing.scope == assignment.scope
            {
                existing.supersede(now);
                superseded = Some(existing.clone());
            }
        }

        let mut inserted = assignment.clone();
        inserted.active = true;
        inserted.superseded_at = None;
        store.assignments.push(inserted);
        Ok(superseded)
    }

    async fn list_assignments(&self, role: Option<&ComponentRole>) -> Result<Vec<PromptAssignment>, RepositoryError> {
        Ok(self
            .store
            .read()
            .assignments
            .iter()
            .filter(|a| role.map_or(true, |r| &a.component_role == r))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryRegistryRepository {
    entries: Arc<RwLock<HashMap<EntryId, RegistryEntry>>>,
}

impl InMemoryRegistryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryRepository for InMemoryRegistryRepository {
    async fn insert(&self, entry: &RegistryEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write();
        if entries.values().any(|e| e.name == entry.name) {
            return Err(RepositoryError::Conflict(entry.name.clone()));
        }
        entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn update(&self, entry: &RegistryEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write();
        match entries.get_mut(&entry.id) {
            Some(existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("Registry entry {}", entry.name))),
        }
    }

    async fn find_by_id(&self, id: EntryId) -> Result<Option<RegistryEntry>, RepositoryError> {
        Ok(self.entries.read().get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<RegistryEntry>, RepositoryError> {
        Ok(self.entries.read().values().find(|e| e.name == name).cloned())
    }

    async fn list_all(&self) -> Result<Vec<RegistryEntry>, RepositoryError> {
        let mut entries: Vec<RegistryEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

// ============================================================================
// Approvals
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryApprovalRepository {
    requests: Arc<RwLock<HashMap<ApprovalId, ApprovalRequest>>>,
}

impl InMemoryApprovalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn insert(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        self.requests.write().insert(request.id, request.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ApprovalId) -> Result<Option<ApprovalRequest>, RepositoryError> {
        Ok(self.requests.read().get(&id).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let mut pending: Vec<ApprovalRequest> = self
            .requests
            .read()
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(pending)
    }

    async fn update_if_pending(&self, request: &ApprovalRequest) -> Result<bool, RepositoryError> {
        let mut requests = self.requests.write();
        match requests.get_mut(&request.id) {
            Some(stored) if stored.status == ApprovalStatus::Pending => {
                *stored = request.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!("Approval {}", request.id))),
        }
    }
}
