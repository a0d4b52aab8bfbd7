// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures: scripted stage components and an in-memory orchestrator

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use aard_core::application::background::BackgroundTasks;
use aard_core::application::llm_gateway::LlmGateway;
use aard_core::application::orchestrator::{PipelineOrchestrator, PipelineServices};
use aard_core::application::repository_factory::Repositories;
use aard_core::application::stages::{PipelineStages, StageComponent};
use aard_core::domain::config::{LLMSelection, PipelineConfig};
use aard_core::domain::events::{DecisionSource, PipelineStage, WorkflowEvent, WorkflowId};
use aard_core::domain::prompt::{PromptId, PromptRef};
use aard_core::domain::registry::{CapabilityDescriptor, EntryKind};
use aard_core::domain::stage::{StageError, StageOutput, StageRequest, StageResult};
use aard_core::domain::task::AutonomyLevel;
use aard_core::infrastructure::event_bus::EventBus;
use aard_core::infrastructure::llm::ProviderRegistry;

/// Replays queued outputs for one stage; the last output repeats
pub struct Scripted {
    stage: PipelineStage,
    outputs: Mutex<VecDeque<Value>>,
    delay: Option<Duration>,
    pub requests: Mutex<Vec<StageRequest>>,
}

impl Scripted {
    pub fn new(stage: PipelineStage, outputs: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            stage,
            outputs: Mutex::new(outputs.into()),
            delay: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Stage that sleeps before answering, to keep a workflow in flight
    pub fn stalled(stage: PipelineStage, delay: Duration, output: Value) -> Arc<Self> {
        Arc::new(Self {
            stage,
            outputs: Mutex::new(vec![output].into()),
            delay: Some(delay),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_output(&self) -> Value {
        let mut outputs = self.outputs.lock();
        if outputs.len() > 1 {
            outputs.pop_front().unwrap_or(Value::Null)
        } else {
            outputs.front().cloned().unwrap_or(Value::Null)
        }
    }
}

#[async_trait]
impl StageComponent for Scripted {
    fn stage(&self) -> PipelineStage {
        self.stage
    }

    async fn invoke(&self, request: StageRequest) -> Result<StageResult, StageError> {
        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let output = StageOutput::parse(self.stage, self.next_output()).map_err(|e| StageError::MalformedOutput {
            stage: self.stage,
            prompt: prompt_ref(self.stage),
            attempts: 1,
            message: e.to_string(),
        })?;
        Ok(StageResult {
            output,
            prompt: prompt_ref(self.stage),
            decision_source: DecisionSource::Llm,
            attempts: 1,
            model: "scripted".to_string(),
        })
    }
}

fn prompt_ref(stage: PipelineStage) -> PromptRef {
    PromptRef {
        component_role: stage.component_role(),
        prompt_id: PromptId(uuid::Uuid::nil()),
        version: 1,
    }
}

/// Outputs that carry a request through every stage unchanged
pub fn happy_outputs() -> HashMap<PipelineStage, Vec<Value>> {
    HashMap::from([
        (
            PipelineStage::Interpretation,
            vec![json!({"intent": "schedule_meeting", "summary": "Book a room", "required_capabilities": ["calendar"]})],
        ),
        (PipelineStage::ValidatorA, vec![json!({"status": "approved"})]),
        (PipelineStage::Routing, vec![json!({"agents": ["calendar"], "rationale": "calendar books rooms"})]),
        (
            PipelineStage::Planning,
            vec![json!({"goal": "Book a room", "steps": ["find a free room", "reserve it"]})],
        ),
        (PipelineStage::ValidatorB, vec![json!({"status": "approved"})]),
        (PipelineStage::Execution, vec![json!({"success": true, "output": "ok"})]),
        (PipelineStage::Reflection, vec![json!({"summary": "Room booked", "lessons": ["fridays are busy"]})]),
    ])
}

pub struct Harness {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub stages: HashMap<PipelineStage, Arc<Scripted>>,
    pub background: BackgroundTasks,
}

impl Harness {
    pub fn stage(&self, stage: PipelineStage) -> &Arc<Scripted> {
        &self.stages[&stage]
    }

    pub async fn events(&self, workflow_id: WorkflowId) -> Vec<WorkflowEvent> {
        self.orchestrator
            .services()
            .events
            .events_for(workflow_id)
            .await
            .unwrap()
    }

    /// Poll until `condition` holds on the workflow's events
    pub async fn wait_for_events(
        &self,
        workflow_id: WorkflowId,
        condition: impl Fn(&[WorkflowEvent]) -> bool,
    ) -> Vec<WorkflowEvent> {
        for _ in 0..200 {
            let events = self.events(workflow_id).await;
            if condition(&events) {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("workflow {} never reached the expected state", workflow_id);
    }
}

pub struct HarnessBuilder {
    config: PipelineConfig,
    outputs: HashMap<PipelineStage, Vec<Value>>,
    stalled: Option<(PipelineStage, Duration)>,
    tools: Vec<&'static str>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig {
                default_autonomy: AutonomyLevel::Autonomous,
                ..PipelineConfig::default()
            },
            outputs: happy_outputs(),
            stalled: None,
            tools: vec!["calendar"],
        }
    }

    pub fn config(mut self, edit: impl FnOnce(&mut PipelineConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn outputs(mut self, stage: PipelineStage, outputs: Vec<Value>) -> Self {
        self.outputs.insert(stage, outputs);
        self
    }

    pub fn stall(mut self, stage: PipelineStage, delay: Duration) -> Self {
        self.stalled = Some((stage, delay));
        self
    }

    pub fn tools(mut self, tools: Vec<&'static str>) -> Self {
        self.tools = tools;
        self
    }

    pub async fn build(self) -> Harness {
        let repositories = Repositories::in_memory();
        let services = PipelineServices::new(&repositories, Arc::new(EventBus::with_default_capacity()));
        let gateway = Arc::new(LlmGateway::new(Arc::new(ProviderRegistry::empty()), &LLMSelection::default()));

        for name in &self.tools {
            services
                .registry
                .register(CapabilityDescriptor {
                    name: name.to_string(),
                    kind: EntryKind::Tool,
                    role: Default::default(),
                    description: format!("{} tool", name),
                    capabilities: vec![name.to_string()],
                    system_prompt: None,
                    activate: true,
                })
                .await
                .unwrap();
        }

        let mut stages = PipelineStages::standard(services.prompts.clone(), gateway, &self.config);
        let mut scripted = HashMap::new();
        for (stage, outputs) in self.outputs {
            let component = match self.stalled {
                Some((stalled, delay)) if stalled == stage => Scripted::stalled(stage, delay, outputs[0].clone()),
                _ => Scripted::new(stage, outputs),
            };
            stages = stages.with(component.clone());
            scripted.insert(stage, component);
        }

        let background = BackgroundTasks::new();
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            stages,
            services,
            self.config,
            background.clone(),
        ));
        Harness {
            orchestrator,
            stages: scripted,
            background,
        }
    }
}
