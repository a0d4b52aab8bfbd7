// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pipeline Orchestrator - Application Layer
//!
//! Drives one request through the fixed stage sequence
//!
//! ```text
//! interpretation -> validator_a -> routing -> planning -> validator_b -> execution -> reflection
//!                        |                       ^             |            |
//!                        | clarification         +--- re-plan -+------------+
//!                        v
//!                    suspended (resume with the same workflow_id)
//! ```
//!
//! and emits exactly one `WorkflowEvent` per stage transition, each parented
//! on the previous event of the workflow. Every failure that halts a workflow
//! is recorded as a failed event carrying its `reason_code` before it is
//! returned in the [`WorkflowReport`].
//!
//! # Branches
//!
//! - `validator_a` asking for clarification suspends the workflow
//!   (`awaiting_clarification`); [`PipelineOrchestrator::resume`] continues it.
//! - `validator_b` rejecting a plan re-enters planning up to `max_replans`
//!   times; the next rejection is `EXECUTION_BLOCKED`.
//! - A failed execution step re-plans under the same bound when
//!   `replan_on_execution_failure` is set, otherwise it is `EXECUTION_FAILURE`.
//! - Tasks whose autonomy level requires it wait on a `plan_execution`
//!   approval before the first step runs.
//!
//! Cancellation and the workflow deadline are applied around the whole stage
//! sequence, so an in-flight LLM call is dropped at its await point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::approvals::{ApprovalDecision, ApprovalService};
use crate::application::background::BackgroundTasks;
use crate::application::digital_twin::DigitalTwinStore;
use crate::application::event_emitter::WorkflowEventService;
use crate::application::prompt_resolver::PromptResolver;
use crate::application::registry::CapabilityRegistry;
use crate::application::repository_factory::Repositories;
use crate::application::stages::PipelineStages;
use crate::domain::approval::{ApprovalId, ApprovalKind};
use crate::domain::config::PipelineConfig;
use crate::domain::context::keys;
use crate::domain::events::{
    event_types, DecisionSource, EventId, EventStatus, NewWorkflowEvent, PipelineStage, WorkflowEvent, WorkflowId,
};
use crate::domain::pipeline::{codes, PipelineError};
use crate::domain::plan::{PlanError, PlanHypothesis, PlanId, PlanStep};
use crate::domain::prompt::PromptRef;
use crate::domain::registry::{CapabilityFilter, RegistryEntry};
use crate::domain::repository::{PlanRepository, TaskRepository};
use crate::domain::stage::{
    Interpretation, Reflection, StageOutput, StageRequest, StageResult, Verdict, VerdictStatus,
};
use crate::domain::task::{Actor, AutonomyLevel, Task, TaskError, TaskId, TaskStatus};
use crate::infrastructure::event_bus::EventBus;

const EVENT_SOURCE: &str = "aard-orchestrator";
const EXPERIMENT_KEY: &str = "experiment_id";

/// A new natural-language request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub request: String,
    #[serde(default)]
    pub autonomy: Option<AutonomyLevel>,
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl WorkflowRequest {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            autonomy: None,
            experiment_id: None,
            created_by: None,
        }
    }

    pub fn autonomy(mut self, autonomy: AutonomyLevel) -> Self {
        self.autonomy = Some(autonomy);
        self
    }

    pub fn experiment(mut self, experiment_id: impl Into<String>) -> Self {
        self.experiment_id = Some(experiment_id.into());
        self
    }

    pub fn created_by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = Some(actor.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Completed,
    AwaitingClarification,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::AwaitingClarification => "awaiting_clarification",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

/// Where a workflow stopped, and the events it produced so far
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub workflow_id: WorkflowId,
    pub task_id: TaskId,
    pub status: WorkflowStatus,
    pub reason_code: Option<String>,
    pub error: Option<String>,
    /// Open clarification questions when suspended
    pub questions: Vec<String>,
    pub plan_id: Option<PlanId>,
    pub plan_version: Option<u32>,
    pub replans: u32,
    pub reflection: Option<Reflection>,
    pub events: Vec<WorkflowEvent>,
}

/// The services a pipeline run reads and writes
#[derive(Clone)]
pub struct PipelineServices {
    pub events: Arc<WorkflowEventService>,
    pub twin: Arc<DigitalTwinStore>,
    pub registry: Arc<CapabilityRegistry>,
    pub approvals: Arc<ApprovalService>,
    pub prompts: Arc<PromptResolver>,
    pub tasks: Arc<dyn TaskRepository>,
    pub plans: Arc<dyn PlanRepository>,
}

impl PipelineServices {
    pub fn new(repositories: &Repositories, event_bus: Arc<EventBus>) -> Self {
        Self {
            events: Arc::new(WorkflowEventService::new(
                repositories.events.clone(),
                repositories.tasks.clone(),
                repositories.plans.clone(),
                repositories.registry.clone(),
                repositories.approvals.clone(),
                event_bus.clone(),
            )),
            twin: Arc::new(DigitalTwinStore::new(repositories.tasks.clone())),
            registry: Arc::new(CapabilityRegistry::new(repositories.registry.clone())),
            approvals: Arc::new(ApprovalService::new(repositories.approvals.clone(), event_bus)),
            prompts: Arc::new(PromptResolver::new(repositories.prompts.clone())),
            tasks: repositories.tasks.clone(),
            plans: repositories.plans.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Start,
    Resume,
}

enum Flow {
    Completed(Reflection),
    Suspended,
}

/// Mutable state of one traversal
struct Run {
    workflow_id: WorkflowId,
    task_id: TaskId,
    request: String,
    autonomy: AutonomyLevel,
    experiment_id: Option<String>,
    cancel: CancellationToken,
    last_event: Option<EventId>,
    stage: PipelineStage,
    stage_started: Instant,
    // Prompt behind the current stage's decision
    prompt: Option<PromptRef>,
    replans: u32,
    interpretation: Option<Interpretation>,
    routed: Vec<RegistryEntry>,
    plan: Option<PlanHypothesis>,
    feedback: Vec<String>,
    outcomes: Vec<Value>,
    pending_approval: Option<ApprovalId>,
    questions: Vec<String>,
}

impl Run {
    fn new(workflow_id: WorkflowId, task: &Task, experiment_id: Option<String>, cancel: CancellationToken) -> Self {
        Self {
            workflow_id,
            task_id: task.id,
            request: task.description.clone(),
            autonomy: task.autonomy_level,
            experiment_id,
            cancel,
            last_event: None,
            stage: PipelineStage::Interpretation,
            stage_started: Instant::now(),
            prompt: None,
            replans: 0,
            interpretation: None,
            routed: Vec::new(),
            plan: None,
            feedback: Vec::new(),
            outcomes: Vec::new(),
            pending_approval: None,
            questions: Vec::new(),
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        debug!(workflow_id = %self.workflow_id, stage = %stage, "Entering stage");
        self.stage = stage;
        self.stage_started = Instant::now();
        self.prompt = None;
    }

    fn elapsed_ms(&self) -> u64 {
        self.stage_started.elapsed().as_millis() as u64
    }

    fn stage_request(&self, stage: PipelineStage, content: String) -> StageRequest {
        StageRequest::new(self.workflow_id, self.task_id, stage, content)
            .experiment(self.experiment_id.clone())
            .var("request", json!(self.request))
    }

    fn interpretation_value(&self) -> Result<Value, PipelineError> {
        self.interpretation
            .as_ref()
            .map(|i| serde_json::to_value(i).unwrap_or(Value::Null))
            .ok_or_else(|| PipelineError::InvalidState(format!("Workflow {} has no interpretation", self.workflow_id)))
    }

    fn plan(&self) -> Result<&PlanHypothesis, PipelineError> {
        self.plan
            .as_ref()
            .ok_or_else(|| PipelineError::InvalidState(format!("Workflow {} has no plan", self.workflow_id)))
    }

    fn routed_names(&self) -> Value {
        json!(self.routed.iter().map(|e| e.name.as_str()).collect::<Vec<_>>())
    }
}

pub struct PipelineOrchestrator {
    stages: PipelineStages,
    services: PipelineServices,
    config: PipelineConfig,
    background: BackgroundTasks,
    running: Mutex<HashMap<WorkflowId, CancellationToken>>,
}

impl PipelineOrchestrator {
    pub fn new(
        stages: PipelineStages,
        services: PipelineServices,
        config: PipelineConfig,
        background: BackgroundTasks,
    ) -> Self {
        Self {
            stages,
            services,
            config,
            background,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &PipelineServices {
        &self.services
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_running(&self, workflow_id: WorkflowId) -> bool {
        self.running.lock().contains_key(&workflow_id)
    }

    /// Run a request to a terminal state or to a clarification suspension
    pub async fn start(&self, request: WorkflowRequest) -> Result<WorkflowReport, PipelineError> {
        let run = self.prepare(request).await?;
        Ok(self.execute(run, Entry::Start).await)
    }

    /// Run a request detached; progress is observable through its events
    pub async fn submit(self: &Arc<Self>, request: WorkflowRequest) -> Result<WorkflowId, PipelineError> {
        if self.background.is_shutting_down() {
            return Err(PipelineError::InvalidState("Orchestrator is shutting down".to_string()));
        }
        let run = self.prepare(request).await?;
        let workflow_id = run.workflow_id;
        let this = Arc::clone(self);
        self.background.spawn("workflow", async move {
            this.execute(run, Entry::Start).await;
        });
        Ok(workflow_id)
    }

    /// Continue a workflow suspended on a clarification request
    pub async fn resume(&self, workflow_id: WorkflowId, answer: impl Into<String>) -> Result<WorkflowReport, PipelineError> {
        let cancel = self.register(workflow_id)?;
        match self.prepare_resume(workflow_id, answer.into(), cancel).await {
            Ok(run) => Ok(self.execute(run, Entry::Resume).await),
            Err(e) => {
                self.release(workflow_id);
                Err(e)
            }
        }
    }

    /// Cancel a running or suspended workflow
    pub async fn cancel(&self, workflow_id: WorkflowId) -> Result<(), PipelineError> {
        // Claiming the slot keeps a concurrent resume from starting mid-cancel
        let claimed = {
            let mut running = self.running.lock();
            if let Some(token) = running.get(&workflow_id) {
                info!(workflow_id = %workflow_id, "Cancelling running workflow");
                token.cancel();
                return Ok(());
            }
            let token = CancellationToken::new();
            running.insert(workflow_id, token.clone());
            token
        };

        let result = self.cancel_suspended(workflow_id, claimed).await;
        self.release(workflow_id);
        result
    }

    async fn cancel_suspended(&self, workflow_id: WorkflowId, token: CancellationToken) -> Result<(), PipelineError> {
        let (task, last) = self.locate(workflow_id).await?;
        if task.is_terminal() {
            return Err(PipelineError::InvalidState(format!(
                "Workflow {} is already {}",
                workflow_id, task.status
            )));
        }

        info!(workflow_id = %workflow_id, status = %task.status, "Cancelling suspended workflow");
        let mut run = Run::new(workflow_id, &task, None, token);
        run.stage = last.stage;
        run.last_event = Some(last.id);
        self.conclude(&mut run, Err(PipelineError::Cancelled)).await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Run lifecycle
    // ------------------------------------------------------------------------

    async fn prepare(&self, request: WorkflowRequest) -> Result<Run, PipelineError> {
        let text = request.request.trim();
        if text.is_empty() {
            return Err(PipelineError::Validation {
                stage: PipelineStage::Interpretation,
                reasons: vec!["request must not be empty".to_string()],
            });
        }

        let workflow_id = WorkflowId::new();
        let mut task = Task::new(text, request.autonomy.unwrap_or(self.config.default_autonomy));
        task.workflow_id = Some(workflow_id);
        task.created_by = request.created_by.map(Actor::new);
        task.transition(TaskStatus::InProgress).map_err(task_error)?;
        self.services.tasks.save(&task).await?;

        if let Some(experiment_id) = &request.experiment_id {
            self.services.twin.set(task.id, EXPERIMENT_KEY, json!(experiment_id)).await?;
        }
        self.services
            .twin
            .add_to_history(task.id, keys::INTERACTION_HISTORY, json!({"role": "user", "content": text}))
            .await?;

        let cancel = self.register(workflow_id)?;
        info!(
            workflow_id = %workflow_id,
            task_id = %task.id,
            autonomy = task.autonomy_level.as_str(),
            "Workflow started"
        );
        Ok(Run::new(workflow_id, &task, request.experiment_id, cancel))
    }

    async fn prepare_resume(
        &self,
        workflow_id: WorkflowId,
        answer: String,
        cancel: CancellationToken,
    ) -> Result<Run, PipelineError> {
        let (mut task, last) = self.locate(workflow_id).await?;
        if task.status != TaskStatus::AwaitingClarification {
            return Err(PipelineError::InvalidState(format!(
                "Workflow {} is {} and not awaiting clarification",
                workflow_id, task.status
            )));
        }

        let context = self.services.twin.get_context(task.id).await?;
        let interpretation: Interpretation = context
            .get(keys::INTERPRETATION)
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| PipelineError::InvalidState(format!("Stored interpretation is unreadable: {}", e)))?
            .ok_or_else(|| PipelineError::InvalidState(format!("Workflow {} has no interpretation", workflow_id)))?;
        let experiment_id = context.get(EXPERIMENT_KEY).and_then(Value::as_str).map(str::to_string);

        self.services
            .twin
            .add_to_history(task.id, keys::CLARIFICATIONS, json!({"answer": answer}))
            .await?;
        self.services
            .twin
            .add_to_history(task.id, keys::INTERACTION_HISTORY, json!({"role": "user", "content": answer}))
            .await?;

        task.transition(TaskStatus::InProgress).map_err(task_error)?;
        self.services.tasks.save(&task).await?;

        info!(workflow_id = %workflow_id, task_id = %task.id, "Workflow resumed after clarification");
        let mut run = Run::new(workflow_id, &task, experiment_id, cancel);
        run.last_event = Some(last.id);
        run.interpretation = Some(interpretation);
        Ok(run)
    }

    async fn execute(&self, mut run: Run, entry: Entry) -> WorkflowReport {
        let token = run.cancel.clone();
        let deadline = self.config.workflow_timeout;

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(PipelineError::Cancelled),
            result = tokio::time::timeout(deadline, self.drive(&mut run, entry)) => {
                result.unwrap_or(Err(PipelineError::Timeout(deadline)))
            }
        };

        let report = self.conclude(&mut run, outcome).await;
        self.release(run.workflow_id);
        report
    }

    async fn drive(&self, run: &mut Run, entry: Entry) -> Result<Flow, PipelineError> {
        if entry == Entry::Start {
            self.interpret(run).await?;
        }
        if !self.validate_request(run).await? {
            return Ok(Flow::Suspended);
        }
        self.route(run).await?;

        loop {
            self.propose_plan(run).await?;
            if !self.validate_plan(run).await? {
                continue;
            }
            if self.execute_plan(run).await? {
                break;
            }
        }

        let reflection = self.reflect(run).await?;
        Ok(Flow::Completed(reflection))
    }

    async fn conclude(&self, run: &mut Run, outcome: Result<Flow, PipelineError>) -> WorkflowReport {
        let (status, failure, reflection) = match outcome {
            Ok(Flow::Completed(reflection)) => {
                if let Err(e) = self.set_status(run.task_id, TaskStatus::Completed).await {
                    error!(workflow_id = %run.workflow_id, error = %e, "Failed to mark task completed");
                }
                info!(workflow_id = %run.workflow_id, replans = run.replans, "Workflow completed");
                (WorkflowStatus::Completed, None, Some(reflection))
            }
            Ok(Flow::Suspended) => {
                info!(workflow_id = %run.workflow_id, questions = run.questions.len(), "Workflow awaiting clarification");
                (WorkflowStatus::AwaitingClarification, None, None)
            }
            Err(e) => {
                self.record_failure(run, &e).await;
                let status = if e.is_cancellation() {
                    WorkflowStatus::Cancelled
                } else {
                    WorkflowStatus::Failed
                };
                (status, Some(e), None)
            }
        };

        metrics::counter!("aard_workflows_total", "outcome" => status.as_str()).increment(1);

        let events = match self.services.events.events_for(run.workflow_id).await {
            Ok(events) => events,
            Err(e) => {
                warn!(workflow_id = %run.workflow_id, error = %e, "Failed to load workflow events for report");
                Vec::new()
            }
        };

        WorkflowReport {
            workflow_id: run.workflow_id,
            task_id: run.task_id,
            status,
            reason_code: failure.as_ref().map(|e| e.code().to_string()),
            error: failure.map(|e| e.to_string()),
            questions: run.questions.clone(),
            plan_id: run.plan.as_ref().map(|p| p.id),
            plan_version: run.plan.as_ref().map(|p| p.version),
            replans: run.replans,
            reflection,
            events,
        }
    }

    async fn record_failure(&self, run: &mut Run, failure: &PipelineError) {
        if let Some(approval_id) = run.pending_approval.take() {
            let reason = Some(format!("workflow ended: {}", failure.code()));
            if let Err(e) = self.services.approvals.reject(approval_id, EVENT_SOURCE, reason).await {
                debug!(approval_id = %approval_id, error = %e, "Pending approval already resolved");
            }
        }

        let (event_type, source) = failure_kind(failure);
        let approval_id = match failure {
            PipelineError::ApprovalRejected { approval_id, .. } => Some(*approval_id),
            PipelineError::ApprovalTimeout(approval_id) => Some(*approval_id),
            _ => None,
        };
        let mut data = json!({"error": {"code": failure.code(), "message": failure.to_string()}});
        match failure {
            PipelineError::Validation { reasons, .. } | PipelineError::ExecutionBlocked { reasons, .. } => {
                data["reasons"] = json!(reasons);
            }
            PipelineError::ExecutionFailure { step, .. } => {
                data["step"] = json!(step);
            }
            _ => {}
        }

        let event = self
            .event(run, run.stage, EventStatus::Failed, failure.to_string())
            .event_type(event_type)
            .decision(source)
            .reason(failure.code())
            .approval(approval_id)
            .data(data);
        if let Err(e) = self.record(run, event).await {
            error!(workflow_id = %run.workflow_id, error = %e, "Failed to record failure event");
        }

        let status = if failure.is_cancellation() {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };
        if let Err(e) = self.set_status(run.task_id, status).await {
            error!(workflow_id = %run.workflow_id, error = %e, "Failed to update task status");
        }

        warn!(
            workflow_id = %run.workflow_id,
            stage = %run.stage,
            code = failure.code(),
            error = %failure,
            "Workflow halted"
        );
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    async fn interpret(&self, run: &mut Run) -> Result<(), PipelineError> {
        run.enter(PipelineStage::Interpretation);
        let request = run.stage_request(PipelineStage::Interpretation, run.request.clone());
        let result = self.invoke(run, request).await?;
        let value = result.output.to_value();
        let StageOutput::Interpretation(interpretation) = result.output else {
            return Err(unexpected_output(run.stage));
        };

        self.services
            .twin
            .set(run.task_id, keys::INTERPRETATION, value.clone())
            .await?;

        let event = self
            .event(run, run.stage, EventStatus::Completed, format!("Interpreted intent '{}'", interpretation.intent))
            .decision(result.decision_source)
            .data(value);
        self.record(run, event).await?;
        run.interpretation = Some(interpretation);
        Ok(())
    }

    /// `false` when the workflow suspends for clarification
    async fn validate_request(&self, run: &mut Run) -> Result<bool, PipelineError> {
        run.enter(PipelineStage::ValidatorA);
        let interpretation = run.interpretation_value()?;
        let clarifications: Vec<Value> = self
            .services
            .twin
            .history(run.task_id, keys::CLARIFICATIONS)
            .await?
            .into_iter()
            .map(|entry| entry.data)
            .collect();

        let content = json!({"interpretation": interpretation, "clarifications": clarifications}).to_string();
        let request = run
            .stage_request(PipelineStage::ValidatorA, content)
            .var("interpretation", interpretation)
            .var("clarifications", json!(clarifications));
        let result = self.invoke(run, request).await?;
        let verdict = expect_verdict(run.stage, &result)?;

        match verdict.status {
            VerdictStatus::Approved => {
                let event = self
                    .event(run, run.stage, EventStatus::Completed, "Request validated")
                    .decision(result.decision_source)
                    .data(json!(verdict));
                self.record(run, event).await?;
                Ok(true)
            }
            VerdictStatus::ClarificationRequired => {
                let questions = if verdict.questions.is_empty() {
                    verdict.reasons.clone()
                } else {
                    verdict.questions.clone()
                };
                self.services
                    .twin
                    .add_to_history(run.task_id, keys::CLARIFICATIONS, json!({"questions": questions}))
                    .await?;
                self.set_status(run.task_id, TaskStatus::AwaitingClarification).await?;

                let event = self
                    .event(
                        run,
                        run.stage,
                        EventStatus::Pending,
                        format!("Clarification required ({} question(s))", questions.len()),
                    )
                    .event_type(event_types::CLARIFICATION_REQUIRED)
                    .decision(result.decision_source)
                    .reason(codes::CLARIFICATION_REQUIRED)
                    .data(json!({"questions": questions}));
                self.record(run, event).await?;
                run.questions = questions;
                Ok(false)
            }
            VerdictStatus::Rejected => Err(PipelineError::Validation {
                stage: PipelineStage::ValidatorA,
                reasons: verdict.reasons,
            }),
        }
    }

    async fn route(&self, run: &mut Run) -> Result<(), PipelineError> {
        run.enter(PipelineStage::Routing);
        let interpretation = run.interpretation_value()?;
        let catalog: Vec<Value> = self
            .services
            .registry
            .list(&CapabilityFilter::active())
            .await?
            .iter()
            .map(|e| {
                json!({
                    "name": e.name,
                    "kind": e.kind.as_str(),
                    "capabilities": e.capabilities,
                    "description": e.description,
                })
            })
            .collect();

        let content = json!({"interpretation": interpretation, "candidates": catalog}).to_string();
        let request = run
            .stage_request(PipelineStage::Routing, content)
            .var("interpretation", interpretation)
            .var("candidates", json!(catalog));
        let result = self.invoke(run, request).await?;
        let StageOutput::Routing(decision) = &result.output else {
            return Err(unexpected_output(run.stage));
        };

        let mut selected = Vec::new();
        let mut unavailable = Vec::new();
        for name in &decision.agents {
            match self.services.registry.require_active(name).await {
                Ok(entry) => selected.push(entry),
                Err(PipelineError::RegistryNotFound(_)) => unavailable.push(name.clone()),
                Err(e) => return Err(e),
            }
        }

        let mut source = result.decision_source;
        if selected.is_empty() {
            let capability = decision.capability.clone().or_else(|| {
                run.interpretation
                    .as_ref()
                    .and_then(|i| i.required_capabilities.first().cloned())
            });
            let Some(capability) = capability else {
                return Err(PipelineError::RegistryNotFound(
                    "router selected no registered agent and named no capability".to_string(),
                ));
            };
            selected = self
                .services
                .registry
                .list(&CapabilityFilter::active().with_capability(capability.clone()))
                .await?;
            if selected.is_empty() {
                return Err(PipelineError::RegistryNotFound(format!(
                    "no active entry provides '{}'",
                    capability
                )));
            }
            source = DecisionSource::DeterministicFallback;
            info!(
                workflow_id = %run.workflow_id,
                capability = %capability,
                unavailable = ?unavailable,
                "Routing fell back to capability match"
            );
        }

        let routing = json!({
            "agents": selected.iter().map(|e| json!({"id": e.id, "name": e.name})).collect::<Vec<_>>(),
            "capability": decision.capability,
            "rationale": decision.rationale,
            "unavailable": unavailable,
            "decision_source": source.as_str(),
        });
        self.services.twin.set(run.task_id, keys::ROUTING, routing.clone()).await?;

        let names: Vec<&str> = selected.iter().map(|e| e.name.as_str()).collect();
        let message = format!("Routed to {}", names.join(", "));
        let tool = selected.first().map(|e| e.id);
        run.routed = selected;

        let event = self
            .event(run, run.stage, EventStatus::Completed, message)
            .decision(source)
            .tool(tool)
            .data(routing);
        self.record(run, event).await?;
        Ok(())
    }

    async fn propose_plan(&self, run: &mut Run) -> Result<(), PipelineError> {
        run.enter(PipelineStage::Planning);
        let version = self.services.plans.list_for_task(run.task_id).await?.len() as u32 + 1;
        let interpretation = run.interpretation_value()?;

        let content = json!({
            "interpretation": interpretation,
            "agents": run.routed_names(),
            "feedback": run.feedback,
        })
        .to_string();
        let request = run
            .stage_request(PipelineStage::Planning, content)
            .var("interpretation", interpretation)
            .var("agents", run.routed_names())
            .var("feedback", json!(run.feedback))
            .var("version", json!(version));
        let result = self.invoke(run, request).await?;
        let StageOutput::Plan(draft) = result.output else {
            return Err(unexpected_output(run.stage));
        };

        let plan = PlanHypothesis::from_draft(run.task_id, version, draft)
            .map_err(|e| PipelineError::MalformedOutput(format!("planner output rejected: {}", e)))?;
        self.services.plans.save(&plan).await?;

        let mut task = self.load_task(run.task_id).await?;
        task.current_plan_id = Some(plan.id);
        self.services.tasks.save(&task).await?;

        let summary = plan.summary();
        self.services.twin.set(run.task_id, keys::PLAN, summary.clone()).await?;

        let message = format!("Plan v{} proposed with {} step(s)", plan.version, plan.steps.len());
        run.plan = Some(plan);
        let event = self
            .event(run, run.stage, EventStatus::Completed, message)
            .decision(result.decision_source)
            .data(summary);
        self.record(run, event).await?;
        Ok(())
    }

    /// `false` when the plan was rejected and planning runs again
    async fn validate_plan(&self, run: &mut Run) -> Result<bool, PipelineError> {
        run.enter(PipelineStage::ValidatorB);
        let summary = run.plan()?.summary();
        let request = run
            .stage_request(PipelineStage::ValidatorB, summary.to_string())
            .var("plan", summary)
            .var("agents", run.routed_names());
        let result = self.invoke(run, request).await?;
        let verdict = expect_verdict(run.stage, &result)?;
        let mut plan = run.plan()?.clone();

        if verdict.status == VerdictStatus::Approved {
            plan.approve().map_err(plan_error)?;
            self.services.plans.save(&plan).await?;
            self.services.twin.set(run.task_id, keys::PLAN, plan.summary()).await?;

            let message = format!("Plan v{} approved for execution", plan.version);
            run.plan = Some(plan);
            let event = self
                .event(run, run.stage, EventStatus::Completed, message)
                .decision(result.decision_source)
                .data(json!(verdict));
            self.record(run, event).await?;
            return Ok(true);
        }

        let mut reasons = verdict.reasons.clone();
        reasons.extend(verdict.questions.iter().cloned());
        plan.reject(reasons.clone()).map_err(plan_error)?;
        self.services.plans.save(&plan).await?;
        self.services
            .twin
            .add_to_history(run.task_id, keys::HISTORICAL_TODOS, plan.summary())
            .await?;
        let version = plan.version;
        run.plan = Some(plan);

        if run.replans >= self.config.max_replans {
            return Err(PipelineError::ExecutionBlocked {
                replans: run.replans,
                reasons,
            });
        }

        let event = self
            .event(run, run.stage, EventStatus::Failed, format!("Plan v{} rejected", version))
            .event_type(event_types::PLAN_REJECTED)
            .decision(result.decision_source)
            .reason(codes::VALIDATION_ERROR)
            .data(json!({
                "reasons": reasons,
                "replan": run.replans + 1,
                "max_replans": self.config.max_replans,
            }));
        self.record(run, event).await?;

        run.replans += 1;
        run.feedback = reasons;
        metrics::counter!("aard_replans_total").increment(1);
        Ok(false)
    }

    /// `false` when a failed step sent the workflow back to planning
    async fn execute_plan(&self, run: &mut Run) -> Result<bool, PipelineError> {
        run.enter(PipelineStage::Execution);
        let plan = run.plan()?.clone();
        let approval_id = if run.autonomy.requires_plan_approval() {
            Some(self.await_plan_approval(run, &plan).await?)
        } else {
            None
        };
        self.set_status(run.task_id, TaskStatus::Executing).await?;

        let summary = plan.summary();
        let mut outcomes: Vec<Value> = Vec::new();
        let mut tool = None;

        for step in &plan.steps {
            let agent = self.step_agent(run, step).await?;
            tool.get_or_insert(agent.id);

            let request = run
                .stage_request(PipelineStage::Execution, step.description.clone())
                .agent(Some(agent.id))
                .var("step", json!(step))
                .var("agent", json!(agent.name))
                .var("plan", summary.clone())
                .var("previous", json!(outcomes));
            let result = self.invoke(run, request).await?;
            let StageOutput::Step(outcome) = result.output else {
                return Err(unexpected_output(run.stage));
            };

            let record = json!({
                "step": step.index,
                "description": step.description,
                "agent": agent.name,
                "success": outcome.success,
                "output": outcome.output,
                "error": outcome.error,
            });
            self.services
                .twin
                .add_to_history(run.task_id, keys::ARTIFACTS, record.clone())
                .await?;
            outcomes.push(record);

            if outcome.success {
                continue;
            }

            let failure = PipelineError::ExecutionFailure {
                step: step.index,
                message: outcome.error.unwrap_or_else(|| "step reported failure".to_string()),
            };
            if !self.config.replan_on_execution_failure {
                return Err(failure);
            }
            if run.replans >= self.config.max_replans {
                return Err(PipelineError::ExecutionBlocked {
                    replans: run.replans,
                    reasons: vec![failure.to_string()],
                });
            }

            let mut superseded = plan.clone();
            superseded.supersede().map_err(plan_error)?;
            self.services.plans.save(&superseded).await?;
            self.services
                .twin
                .add_to_history(run.task_id, keys::HISTORICAL_TODOS, superseded.summary())
                .await?;
            run.plan = Some(superseded);
            self.set_status(run.task_id, TaskStatus::InProgress).await?;

            let event = self
                .event(run, run.stage, EventStatus::Failed, failure.to_string())
                .event_type(event_types::STAGE_FAILED)
                .decision(result.decision_source)
                .reason(failure.code())
                .tool(tool)
                .approval(approval_id)
                .data(json!({"steps": outcomes, "replan": run.replans + 1}));
            self.record(run, event).await?;

            run.replans += 1;
            run.feedback = vec![failure.to_string()];
            metrics::counter!("aard_replans_total").increment(1);
            return Ok(false);
        }

        let message = format!("Executed {} step(s) of plan v{}", outcomes.len(), plan.version);
        let event = self
            .event(run, run.stage, EventStatus::Completed, message)
            .tool(tool)
            .approval(approval_id)
            .data(json!({"steps": outcomes}));
        run.outcomes = outcomes;
        self.record(run, event).await?;
        Ok(true)
    }

    async fn await_plan_approval(&self, run: &mut Run, plan: &PlanHypothesis) -> Result<ApprovalId, PipelineError> {
        self.set_status(run.task_id, TaskStatus::AwaitingApproval).await?;
        let request = self
            .services
            .approvals
            .request(
                ApprovalKind::PlanExecution,
                Some(run.workflow_id),
                Some(run.task_id),
                Some(plan.id),
                format!("Execute plan v{}: {}", plan.version, plan.goal),
            )
            .await?;
        run.pending_approval = Some(request.id);
        info!(
            workflow_id = %run.workflow_id,
            approval_id = %request.id,
            plan_version = plan.version,
            "Waiting for plan approval"
        );

        let decision = self
            .services
            .approvals
            .await_decision(request.id, self.config.approval_timeout)
            .await?;
        run.pending_approval = None;

        self.services
            .twin
            .add_to_history(
                run.task_id,
                keys::APPROVAL,
                json!({"approval_id": request.id, "plan_id": plan.id, "decision": decision}),
            )
            .await?;

        match decision {
            ApprovalDecision::Approved { actor, .. } => {
                if let Some(actor) = actor {
                    let mut task = self.load_task(run.task_id).await?;
                    task.approved_by = Some(Actor::new(actor));
                    self.services.tasks.save(&task).await?;
                }
                Ok(request.id)
            }
            ApprovalDecision::Rejected { reason, .. } => Err(PipelineError::ApprovalRejected {
                approval_id: request.id,
                reason,
            }),
            ApprovalDecision::TimedOut => Err(PipelineError::ApprovalTimeout(request.id)),
        }
    }

    async fn reflect(&self, run: &mut Run) -> Result<Reflection, PipelineError> {
        run.enter(PipelineStage::Reflection);
        let summary = run.plan()?.summary();
        let content = json!({"plan": summary, "outcomes": run.outcomes}).to_string();
        let request = run
            .stage_request(PipelineStage::Reflection, content)
            .var("plan", summary)
            .var("outcomes", json!(run.outcomes));
        let result = self.invoke(run, request).await?;
        let value = result.output.to_value();
        let StageOutput::Reflection(reflection) = result.output else {
            return Err(unexpected_output(run.stage));
        };

        self.services.twin.set(run.task_id, keys::REFLECTION, value.clone()).await?;
        self.services
            .twin
            .add_to_history(
                run.task_id,
                keys::INTERACTION_HISTORY,
                json!({"role": "assistant", "content": reflection.summary}),
            )
            .await?;

        let event = self
            .event(run, run.stage, EventStatus::Completed, "Reflection recorded")
            .decision(result.decision_source)
            .data(value);
        self.record(run, event).await?;
        Ok(reflection)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn invoke(&self, run: &mut Run, request: StageRequest) -> Result<StageResult, PipelineError> {
        let component = self.stages.get(request.stage)?;
        match component.invoke(request).await {
            Ok(result) => {
                run.prompt = Some(result.prompt.clone());
                Ok(result)
            }
            Err(e) => {
                run.prompt = e.prompt().cloned();
                Err(e.into())
            }
        }
    }

    fn event(&self, run: &Run, stage: PipelineStage, status: EventStatus, message: impl Into<String>) -> NewWorkflowEvent {
        NewWorkflowEvent::new(run.workflow_id, stage, EVENT_SOURCE, status, message)
            .prompt(run.prompt.as_ref())
            .plan(run.plan.as_ref().map(|p| p.id))
            .duration_ms(run.elapsed_ms())
    }

    async fn record(&self, run: &mut Run, event: NewWorkflowEvent) -> Result<WorkflowEvent, PipelineError> {
        let event = self
            .services
            .events
            .emit(event.task(run.task_id).parent(run.last_event))
            .await?;
        run.last_event = Some(event.id);
        metrics::histogram!("aard_stage_duration_seconds", "stage" => event.stage.as_str())
            .record(run.stage_started.elapsed().as_secs_f64());
        Ok(event)
    }

    async fn step_agent(&self, run: &Run, step: &PlanStep) -> Result<RegistryEntry, PipelineError> {
        let name = match step.agent.as_deref() {
            Some(name) => name.to_string(),
            None => run
                .routed
                .first()
                .map(|e| e.name.clone())
                .ok_or_else(|| PipelineError::RegistryNotFound(format!("no agent routed for step {}", step.index)))?,
        };
        self.services.registry.require_active(&name).await
    }

    async fn load_task(&self, task_id: TaskId) -> Result<Task, PipelineError> {
        self.services
            .tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Task {}", task_id)))
    }

    async fn set_status(&self, task_id: TaskId, status: TaskStatus) -> Result<(), PipelineError> {
        let mut task = self.load_task(task_id).await?;
        task.transition(status).map_err(task_error)?;
        self.services.tasks.save(&task).await?;
        Ok(())
    }

    async fn locate(&self, workflow_id: WorkflowId) -> Result<(Task, WorkflowEvent), PipelineError> {
        let last = self
            .services
            .events
            .last_event(workflow_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Workflow {}", workflow_id)))?;
        let task_id = last
            .task_id
            .ok_or_else(|| PipelineError::InvalidState(format!("Workflow {} has no task", workflow_id)))?;
        let task = self.load_task(task_id).await?;
        Ok((task, last))
    }

    fn register(&self, workflow_id: WorkflowId) -> Result<CancellationToken, PipelineError> {
        let mut running = self.running.lock();
        if running.contains_key(&workflow_id) {
            return Err(PipelineError::InvalidState(format!(
                "Workflow {} is already running",
                workflow_id
            )));
        }
        let token = self.background.token().child_token();
        running.insert(workflow_id, token.clone());
        Ok(token)
    }

    fn release(&self, workflow_id: WorkflowId) {
        self.running.lock().remove(&workflow_id);
    }
}

fn expect_verdict(stage: PipelineStage, result: &StageResult) -> Result<Verdict, PipelineError> {
    match &result.output {
        StageOutput::Verdict(verdict) => Ok(verdict.clone()),
        _ => Err(unexpected_output(stage)),
    }
}

fn unexpected_output(stage: PipelineStage) -> PipelineError {
    PipelineError::MalformedOutput(format!("{} produced an output of the wrong kind", stage))
}

fn task_error(err: TaskError) -> PipelineError {
    PipelineError::InvalidState(err.to_string())
}

fn plan_error(err: PlanError) -> PipelineError {
    PipelineError::InvalidState(err.to_string())
}

/// Event type and decision source of the event that records `failure`
fn failure_kind(failure: &PipelineError) -> (&'static str, DecisionSource) {
    match failure {
        PipelineError::Validation {
            stage: PipelineStage::ValidatorB,
            ..
        } => (event_types::PLAN_REJECTED, DecisionSource::Llm),
        PipelineError::Validation { .. } => (event_types::SEMANTIC_REJECTED, DecisionSource::Llm),
        PipelineError::ExecutionBlocked { .. } => (event_types::EXECUTION_BLOCKED, DecisionSource::ErrorPath),
        PipelineError::ApprovalRejected { .. } => (event_types::APPROVAL_REJECTED, DecisionSource::Human),
        PipelineError::Cancelled => (event_types::WORKFLOW_CANCELLED, DecisionSource::Human),
        _ => (event_types::STAGE_FAILED, DecisionSource::ErrorPath),
    }
}
