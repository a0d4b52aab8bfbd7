// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Event Service - Application Layer
//!
//! Single write path for the append-only workflow event log and the read path
//! that reconstructs a workflow's audit graph.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Assign identity, ordering and lineage to stage transitions
//! - **Integration:** Orchestrator -> `emit` -> `WorkflowEventRepository` + `EventBus`
//!
//! # Ordering
//!
//! Sequence numbers are assigned per workflow under a lock, and an event's
//! timestamp is clamped so it is never earlier than the workflow's previous
//! event. Reading back by `(timestamp, sequence)` therefore reproduces the
//! emission order even when the wall clock steps backwards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::approval::ApprovalId;
use crate::domain::events::{
    referenced_entities, EntityRef, EntityType, EventId, NewWorkflowEvent, WorkflowEvent, WorkflowGraph, WorkflowId,
};
use crate::domain::pipeline::PipelineError;
use crate::domain::plan::PlanId;
use crate::domain::registry::EntryId;
use crate::domain::repository::{
    ApprovalRepository, PlanRepository, RegistryRepository, RepositoryError, TaskRepository, WorkflowEventRepository,
};
use crate::domain::task::TaskId;
use crate::infrastructure::event_bus::{EventBus, WorkflowEventReceiver};

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<EventError> for PipelineError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Repository(e) => e.into(),
        }
    }
}

pub struct WorkflowEventService {
    events: Arc<dyn WorkflowEventRepository>,
    tasks: Arc<dyn TaskRepository>,
    plans: Arc<dyn PlanRepository>,
    registry: Arc<dyn RegistryRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    event_bus: Arc<EventBus>,
    // Serializes sequence assignment within one workflow
    emit_locks: parking_lot::Mutex<HashMap<WorkflowId, Arc<Mutex<()>>>>,
}

impl WorkflowEventService {
    pub fn new(
        events: Arc<dyn WorkflowEventRepository>,
        tasks: Arc<dyn TaskRepository>,
        plans: Arc<dyn PlanRepository>,
        registry: Arc<dyn RegistryRepository>,
        approvals: Arc<dyn ApprovalRepository>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            events,
            tasks,
            plans,
            registry,
            approvals,
            event_bus,
            emit_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Persist `event` and publish it to live subscribers
    pub async fn emit(&self, event: NewWorkflowEvent) -> Result<WorkflowEvent, EventError> {
        let workflow_id = event.workflow_id;
        let lock = self.emit_locks.lock().entry(workflow_id).or_default().clone();

        let result = {
            let _guard = lock.lock().await;
            self.append_event(event).await
        };

        // Clones are only taken under the map lock, so two owners means nobody else waits
        let mut locks = self.emit_locks.lock();
        if locks
            .get(&workflow_id)
            .is_some_and(|l| Arc::ptr_eq(l, &lock) && Arc::strong_count(l) == 2)
        {
            locks.remove(&workflow_id);
        }
        result
    }

    async fn append_event(&self, event: NewWorkflowEvent) -> Result<WorkflowEvent, EventError> {

        // Dangling and foreign parents are stored as given; the graph renders them as roots
        if let Some(parent_id) = event.parent_event_id {
            if let Some(parent) = self.events.find_by_id(parent_id).await? {
                if parent.workflow_id != event.workflow_id {
                    warn!(
                        workflow_id = %event.workflow_id,
                        parent_event_id = %parent_id,
                        parent_workflow_id = %parent.workflow_id,
                        "Parent event belongs to another workflow"
                    );
                }
            }
        }

        let previous = self.events.last_for_workflow(event.workflow_id).await?;
        let (sequence, timestamp) = match &previous {
            Some(last) => (last.sequence + 1, Utc::now().max(last.timestamp)),
            None => (1, Utc::now()),
        };

        let stored = event.into_event(EventId::new(), sequence, timestamp);
        self.events.append(&stored).await?;

        metrics::counter!(
            "aard_stage_transitions_total",
            "stage" => stored.stage.as_str(),
            "status" => stored.status.as_str()
        )
        .increment(1);

        debug!(
            workflow_id = %stored.workflow_id,
            event_id = %stored.id,
            stage = %stored.stage,
            sequence = stored.sequence,
            event_type = %stored.event_type,
            "Workflow event emitted"
        );

        self.event_bus.publish_workflow_event(stored.clone());
        Ok(stored)
    }

    /// Events of a workflow in emission order
    pub async fn events_for(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowEvent>, EventError> {
        let mut events = self.events.list_for_workflow(workflow_id).await?;
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.sequence.cmp(&b.sequence)));
        Ok(events)
    }

    pub async fn last_event(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowEvent>, EventError> {
        Ok(self.events.last_for_workflow(workflow_id).await?)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<WorkflowEvent>, EventError> {
        Ok(self.events.list_recent(limit).await?)
    }

    /// Reconstruct the audit graph of one workflow with its referenced entities
    pub async fn get_workflow(&self, workflow_id: WorkflowId) -> Result<WorkflowGraph, EventError> {
        let events = self.events_for(workflow_id).await?;

        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        for (entity_type, id) in events.iter().flat_map(referenced_entities) {
            if seen.insert((entity_type, id.clone())) {
                entities.push(self.resolve_entity(entity_type, id).await?);
            }
        }

        Ok(WorkflowGraph::build(workflow_id, events, entities))
    }

    pub fn subscribe(&self, workflow_id: WorkflowId) -> WorkflowEventReceiver {
        self.event_bus.subscribe_workflow(workflow_id)
    }

    async fn resolve_entity(&self, entity_type: EntityType, id: String) -> Result<EntityRef, RepositoryError> {
        let unknown = |id: String| EntityRef {
            name: id.clone(),
            id,
            entity_type,
            status: "unknown".to_string(),
        };

        let Ok(uuid) = Uuid::parse_str(&id) else {
            return Ok(unknown(id));
        };

        let resolved = match entity_type {
            EntityType::Task => self
                .tasks
                .find_by_id(TaskId(uuid))
                .await?
                .map(|t| (truncate(&t.description, 80), t.status.as_str().to_string())),
            EntityType::Plan => self
                .plans
                .find_by_id(PlanId(uuid))
                .await?
                .map(|p| (format!("plan v{}", p.version), p.status.as_str().to_string())),
            EntityType::Tool => self
                .registry
                .find_by_id(EntryId(uuid))
                .await?
                .map(|e| (e.name, e.status.as_str().to_string())),
            EntityType::Approval => self
                .approvals
                .find_by_id(ApprovalId(uuid))
                .await?
                .map(|a| (a.kind.as_str().to_string(), a.status.as_str().to_string())),
        };

        Ok(match resolved {
            Some((name, status)) => EntityRef {
                id,
                entity_type,
                name,
                status,
            },
            None => unknown(id),
        })
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
