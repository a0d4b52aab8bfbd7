// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Workflow Events (Audit Graph)
//!
//! Every stage transition of the decision pipeline produces exactly one
//! immutable [`WorkflowEvent`]. Events of one request traversal share a
//! [`WorkflowId`]; `parent_event_id` links form a tree per workflow.
//!
//! The presentation contract requires `component_role`, `prompt_id`/`prompt_version`,
//! `decision_source` and `reason_code` on every event, so those fields are always
//! serialised (as `null` when not applicable).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::domain::approval::ApprovalId;
use crate::domain::plan::PlanId;
use crate::domain::prompt::{ComponentRole, PromptId, PromptRef};
use crate::domain::registry::EntryId;
use crate::domain::task::TaskId;

/// Correlates all events of one end-to-end pipeline traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The seven named steps of the decision pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Interpretation,
    ValidatorA,
    Routing,
    Planning,
    ValidatorB,
    Execution,
    Reflection,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 7] = [
        PipelineStage::Interpretation,
        PipelineStage::ValidatorA,
        PipelineStage::Routing,
        PipelineStage::Planning,
        PipelineStage::ValidatorB,
        PipelineStage::Execution,
        PipelineStage::Reflection,
    ];

    /// Forward successor; `None` after reflection
    pub fn next(self) -> Option<PipelineStage> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Interpretation => "interpretation",
            PipelineStage::ValidatorA => "validator_a",
            PipelineStage::Routing => "routing",
            PipelineStage::Planning => "planning",
            PipelineStage::ValidatorB => "validator_b",
            PipelineStage::Execution => "execution",
            PipelineStage::Reflection => "reflection",
        }
    }

    /// Component role whose prompt backs this stage
    pub fn component_role(self) -> ComponentRole {
        match self {
            PipelineStage::Interpretation => ComponentRole::interpretation(),
            PipelineStage::ValidatorA => ComponentRole::semantic_validator(),
            PipelineStage::Routing => ComponentRole::decision_router(),
            PipelineStage::Planning => ComponentRole::planner(),
            PipelineStage::ValidatorB => ComponentRole::execution_validator(),
            PipelineStage::Execution => ComponentRole::executor(),
            PipelineStage::Reflection => ComponentRole::reflection(),
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("Unknown pipeline stage: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::InProgress => "in_progress",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EventStatus::Pending),
            "in_progress" => Some(EventStatus::InProgress),
            "completed" => Some(EventStatus::Completed),
            "failed" => Some(EventStatus::Failed),
            _ => None,
        }
    }
}

/// Who made the decision recorded by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// The stage's LLM produced the outcome
    Llm,
    /// The orchestrator substituted a rule-based decision
    DeterministicFallback,
    /// Outcome produced by a failure path
    ErrorPath,
    /// A human operator decided (approval, cancellation)
    Human,
}

impl DecisionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionSource::Llm => "llm",
            DecisionSource::DeterministicFallback => "deterministic_fallback",
            DecisionSource::ErrorPath => "error_path",
            DecisionSource::Human => "human",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "llm" => Some(DecisionSource::Llm),
            "deterministic_fallback" => Some(DecisionSource::DeterministicFallback),
            "error_path" => Some(DecisionSource::ErrorPath),
            "human" => Some(DecisionSource::Human),
            _ => None,
        }
    }
}

/// Well-known `event_type` values
pub mod event_types {
    pub const STAGE_COMPLETED: &str = "stage_completed";
    pub const CLARIFICATION_REQUIRED: &str = "clarification_required";
    pub const SEMANTIC_REJECTED: &str = "semantic_rejected";
    pub const PLAN_REJECTED: &str = "plan_rejected";
    pub const EXECUTION_BLOCKED: &str = "execution_blocked";
    pub const STAGE_FAILED: &str = "stage_failed";
    pub const APPROVAL_REJECTED: &str = "approval_rejected";
    pub const WORKFLOW_CANCELLED: &str = "workflow_cancelled";
}

/// Immutable audit record of one pipeline stage transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: EventId,
    pub workflow_id: WorkflowId,
    /// Emission order within the workflow (0-based)
    pub sequence: u64,
    pub event_type: String,
    pub event_source: String,
    pub stage: PipelineStage,
    pub status: EventStatus,
    pub message: String,
    pub event_data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub component_role: Option<ComponentRole>,
    pub prompt_id: Option<PromptId>,
    pub prompt_version: Option<u32>,
    pub decision_source: DecisionSource,
    pub reason_code: Option<String>,
    pub task_id: Option<TaskId>,
    pub plan_id: Option<PlanId>,
    pub tool_id: Option<EntryId>,
    pub approval_id: Option<ApprovalId>,
    pub parent_event_id: Option<EventId>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<u64>,
}

/// Event as described by the emitter before id/sequence/timestamp assignment
#[derive(Debug, Clone)]
pub struct NewWorkflowEvent {
    pub workflow_id: WorkflowId,
    pub event_type: String,
    pub event_source: String,
    pub stage: PipelineStage,
    pub status: EventStatus,
    pub message: String,
    pub event_data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub component_role: Option<ComponentRole>,
    pub prompt_id: Option<PromptId>,
    pub prompt_version: Option<u32>,
    pub decision_source: DecisionSource,
    pub reason_code: Option<String>,
    pub task_id: Option<TaskId>,
    pub plan_id: Option<PlanId>,
    pub tool_id: Option<EntryId>,
    pub approval_id: Option<ApprovalId>,
    pub parent_event_id: Option<EventId>,
    pub duration_ms: Option<u64>,
}

impl NewWorkflowEvent {
    pub fn new(
        workflow_id: WorkflowId,
        stage: PipelineStage,
        event_source: impl Into<String>,
        status: EventStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id,
            event_type: event_types::STAGE_COMPLETED.to_string(),
            event_source: event_source.into(),
            stage,
            status,
            message: message.into(),
            event_data: serde_json::Value::Null,
            metadata: serde_json::Value::Null,
            component_role: Some(stage.component_role()),
            prompt_id: None,
            prompt_version: None,
            decision_source: DecisionSource::Llm,
            reason_code: None,
            task_id: None,
            plan_id: None,
            tool_id: None,
            approval_id: None,
            parent_event_id: None,
            duration_ms: None,
        }
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn parent(mut self, parent: Option<EventId>) -> Self {
        self.parent_event_id = parent;
        self
    }

    pub fn prompt(mut self, prompt: Option<&PromptRef>) -> Self {
        if let Some(prompt) = prompt {
            self.component_role = Some(prompt.component_role.clone());
            self.prompt_id = Some(prompt.prompt_id);
            self.prompt_version = Some(prompt.version);
        }
        self
    }

    pub fn decision(mut self, source: DecisionSource) -> Self {
        self.decision_source = source;
        self
    }

    pub fn reason(mut self, code: impl Into<String>) -> Self {
        self.reason_code = Some(code.into());
        self
    }

    pub fn task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn plan(mut self, plan_id: Option<PlanId>) -> Self {
        self.plan_id = plan_id;
        self
    }

    pub fn tool(mut self, tool_id: Option<EntryId>) -> Self {
        self.tool_id = tool_id;
        self
    }

    pub fn approval(mut self, approval_id: Option<ApprovalId>) -> Self {
        self.approval_id = approval_id;
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Materialise the record; called by the emitter only
    pub fn into_event(self, id: EventId, sequence: u64, timestamp: DateTime<Utc>) -> WorkflowEvent {
        WorkflowEvent {
            id,
            workflow_id: self.workflow_id,
            sequence,
            event_type: self.event_type,
            event_source: self.event_source,
            stage: self.stage,
            status: self.status,
            message: self.message,
            event_data: self.event_data,
            metadata: self.metadata,
            component_role: self.component_role,
            prompt_id: self.prompt_id,
            prompt_version: self.prompt_version,
            decision_source: self.decision_source,
            reason_code: self.reason_code,
            task_id: self.task_id,
            plan_id: self.plan_id,
            tool_id: self.tool_id,
            approval_id: self.approval_id,
            parent_event_id: self.parent_event_id,
            timestamp,
            duration_ms: self.duration_ms,
        }
    }
}

// ============================================================================
// Read model: reconstructed workflow graph
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    Plan,
    Tool,
    Approval,
}

/// Entity referenced by at least one event of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub name: String,
    pub status: String,
}

/// Entity keys referenced by an event, before resolution
pub fn referenced_entities(event: &WorkflowEvent) -> Vec<(EntityType, String)> {
    let mut refs = Vec::new();
    if let Some(id) = event.task_id {
        refs.push((EntityType::Task, id.to_string()));
    }
    if let Some(id) = event.plan_id {
        refs.push((EntityType::Plan, id.to_string()));
    }
    if let Some(id) = event.tool_id {
        refs.push((EntityType::Tool, id.to_string()));
    }
    if let Some(id) = event.approval_id {
        refs.push((EntityType::Approval, id.to_string()));
    }
    refs
}

/// Directed audit graph of a single workflow
///
/// Built on read by following `parent_event_id` back-references. A parent that
/// is not part of this workflow (never persisted, or belonging to another
/// workflow) makes the event a root; it is never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub workflow_id: WorkflowId,
    /// Ordered by `(timestamp, sequence)`
    pub events: Vec<WorkflowEvent>,
    pub entities: Vec<EntityRef>,
    pub roots: Vec<EventId>,
    pub children: BTreeMap<String, Vec<EventId>>,
}

impl WorkflowGraph {
    pub fn build(workflow_id: WorkflowId, mut events: Vec<WorkflowEvent>, entities: Vec<EntityRef>) -> Self {
        events.retain(|e| e.workflow_id == workflow_id);
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.sequence.cmp(&b.sequence)));

        let known: HashSet<EventId> = events.iter().map(|e| e.id).collect();
        let mut roots = Vec::new();
        let mut children: BTreeMap<String, Vec<EventId>> = BTreeMap::new();

        for event in &events {
            match event.parent_event_id {
                Some(parent) if known.contains(&parent) && parent != event.id => {
                    children.entry(parent.to_string()).or_default().push(event.id);
                }
                _ => roots.push(event.id),
            }
        }

        let mut seen = HashSet::new();
        let mut entities: Vec<EntityRef> = entities
            .into_iter()
            .filter(|e| seen.insert((e.entity_type, e.id.clone())))
            .collect();
        entities.sort_by(|a, b| a.entity_type.cmp(&b.entity_type).then(a.id.cmp(&b.id)));

        Self {
            workflow_id,
            events,
            entities,
            roots,
            children,
        }
    }

    /// Parent within this workflow, if the back-reference resolves
    pub fn parent_of(&self, id: EventId) -> Option<&WorkflowEvent> {
        let event = self.event(id)?;
        let parent = event.parent_event_id?;
        self.event(parent)
    }

    pub fn event(&self, id: EventId) -> Option<&WorkflowEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn children_of(&self, id: EventId) -> &[EventId] {
        self.children
            .get(&id.to_string())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Stage sequence in execution order
    pub fn stages(&self) -> Vec<PipelineStage> {
        self.events.iter().map(|e| e.stage).collect()
    }

    /// Number of events per stage
    pub fn stage_counts(&self) -> HashMap<PipelineStage, usize> {
        let mut counts = HashMap::new();
        for event in &self.events {
            *counts.entry(event.stage).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event_at(workflow_id: WorkflowId, stage: PipelineStage, sequence: u64, offset_ms: i64, parent: Option<EventId>) -> WorkflowEvent {
        NewWorkflowEvent::new(workflow_id, stage, "test", EventStatus::Completed, "ok")
            .parent(parent)
            .into_event(EventId::new(), sequence, Utc::now() + Duration::milliseconds(offset_ms))
    }

    #[test]
    fn test_stage_order_is_fixed() {
        let mut stage = PipelineStage::Interpretation;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            visited.push(next);
            stage = next;
        }
        assert_eq!(visited, PipelineStage::ALL.to_vec());
        assert_eq!(PipelineStage::Reflection.next(), None);
    }

    #[test]
    fn test_stage_from_str() {
        assert_eq!("validator_b".parse::<PipelineStage>().unwrap(), PipelineStage::ValidatorB);
        assert!("deploy".parse::<PipelineStage>().is_err());
    }

    #[test]
    fn test_graph_orders_by_timestamp_then_sequence() {
        let wf = WorkflowId::new();
        let a = event_at(wf, PipelineStage::Interpretation, 0, 0, None);
        let b = event_at(wf, PipelineStage::ValidatorA, 1, 5, Some(a.id));
        let mut c = event_at(wf, PipelineStage::Routing, 2, 5, Some(b.id));
        c.timestamp = b.timestamp;

        let graph = WorkflowGraph::build(wf, vec![c.clone(), b.clone(), a.clone()], vec![]);
        assert_eq!(graph.events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a.id, b.id, c.id]);
        assert_eq!(graph.roots, vec![a.id]);
        assert_eq!(graph.children_of(a.id), &[b.id]);
        assert_eq!(graph.parent_of(c.id).map(|e| e.id), Some(b.id));
    }

    #[test]
    fn test_dangling_parent_is_root() {
        let wf = WorkflowId::new();
        let root = event_at(wf, PipelineStage::Interpretation, 0, 0, None);
        let orphan = event_at(wf, PipelineStage::ValidatorA, 1, 1, Some(EventId::new()));

        let graph = WorkflowGraph::build(wf, vec![root.clone(), orphan.clone()], vec![]);
        assert_eq!(graph.roots, vec![root.id, orphan.id]);
        assert!(graph.parent_of(orphan.id).is_none());
    }

    #[test]
    fn test_cross_workflow_parent_is_root() {
        let wf = WorkflowId::new();
        let other = event_at(WorkflowId::new(), PipelineStage::Interpretation, 0, 0, None);
        let child = event_at(wf, PipelineStage::Interpretation, 0, 1, Some(other.id));

        let graph = WorkflowGraph::build(wf, vec![other, child.clone()], vec![]);
        assert_eq!(graph.events.len(), 1);
        assert_eq!(graph.roots, vec![child.id]);
    }

    #[test]
    fn test_presentation_fields_always_serialised() {
        let event = event_at(WorkflowId::new(), PipelineStage::Routing, 0, 0, None);
        let json = serde_json::to_value(&event).unwrap();
        for field in ["component_role", "prompt_id", "prompt_version", "decision_source", "reason_code"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(json["component_role"], "decision_router");
        assert_eq!(json["decision_source"], "llm");
    }
}
