// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Prompt-driven stages end to end
//!
//! Runs the standard LLM stages against a canned provider and checks that every
//! decision event records the prompt version that produced it, that experiment
//! and agent assignments take precedence over global ones, and that missing
//! assignments fail the workflow instead of falling back to built-in text.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

use aard_core::application::background::BackgroundTasks;
use aard_core::application::llm_gateway::LlmGateway;
use aard_core::application::orchestrator::{PipelineOrchestrator, PipelineServices, WorkflowRequest, WorkflowStatus};
use aard_core::application::repository_factory::Repositories;
use aard_core::application::stages::PipelineStages;
use aard_core::domain::config::{LLMSelection, PipelineConfig};
use aard_core::domain::events::PipelineStage;
use aard_core::domain::llm::{
    FinishReason, GenerationOptions, GenerationResponse, LLMError, LLMProvider, TokenUsage,
};
use aard_core::domain::pipeline::codes;
use aard_core::domain::prompt::{AssignmentScope, NewPrompt, Prompt};
use aard_core::domain::registry::{CapabilityDescriptor, EntryId, EntryKind};
use aard_core::domain::task::AutonomyLevel;
use aard_core::infrastructure::event_bus::EventBus;
use aard_core::infrastructure::llm::ProviderRegistry;

/// Answers with the canned payload of the stage named in the system prompt
struct CannedModel {
    system_prompts: Mutex<Vec<String>>,
}

impl CannedModel {
    fn payload(stage: PipelineStage) -> Value {
        match stage {
            PipelineStage::Interpretation => {
                json!({"intent": "schedule_meeting", "required_capabilities": ["calendar"]})
            }
            PipelineStage::ValidatorA | PipelineStage::ValidatorB => json!({"status": "approved"}),
            PipelineStage::Routing => json!({"agents": ["calendar"]}),
            PipelineStage::Planning => json!({"goal": "Book a room", "steps": ["reserve room 4"]}),
            PipelineStage::Execution => json!({"success": true, "output": {"room": 4}}),
            PipelineStage::Reflection => json!({"summary": "Room 4 booked"}),
        }
    }
}

#[async_trait]
impl LLMProvider for CannedModel {
    async fn generate(
        &self,
        system_prompt: &str,
        _content: &str,
        _options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError> {
        self.system_prompts.lock().push(system_prompt.to_string());
        let stage = PipelineStage::ALL
            .into_iter()
            .find(|s| system_prompt.contains(&format!("stage={};", s.as_str())))
            .ok_or_else(|| LLMError::Provider("prompt names no stage".to_string()))?;
        Ok(GenerationResponse {
            // Models wrap JSON in prose often enough
            text: format!("Here you go:\n```json\n{}\n```", Self::payload(stage)),
            usage: TokenUsage::default(),
            provider: "canned".to_string(),
            model: "canned-1".to_string(),
            finish_reason: FinishReason::Stop,
        })
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        Ok(())
    }
}

struct Fixture {
    orchestrator: Arc<PipelineOrchestrator>,
    model: Arc<CannedModel>,
    calendar: EntryId,
}

async fn fixture() -> Fixture {
    let config = PipelineConfig {
        default_autonomy: AutonomyLevel::Autonomous,
        ..PipelineConfig::default()
    };
    let model = Arc::new(CannedModel {
        system_prompts: Mutex::new(Vec::new()),
    });
    let providers = Arc::new(ProviderRegistry::from_provider(
        "canned",
        model.clone(),
        &[config.model_alias.as_str()],
    ));
    let gateway = Arc::new(LlmGateway::new(providers, &LLMSelection::default()));

    let repositories = Repositories::in_memory();
    let services = PipelineServices::new(&repositories, Arc::new(EventBus::with_default_capacity()));
    let calendar = services
        .registry
        .register(CapabilityDescriptor {
            name: "calendar".to_string(),
            kind: EntryKind::Tool,
            role: Default::default(),
            description: "Room bookings".to_string(),
            capabilities: vec!["calendar".to_string()],
            system_prompt: None,
            activate: true,
        })
        .await
        .unwrap();

    let stages = PipelineStages::standard(services.prompts.clone(), gateway, &config);
    let orchestrator = Arc::new(PipelineOrchestrator::new(stages, services, config, BackgroundTasks::new()));
    Fixture {
        orchestrator,
        model,
        calendar,
    }
}

impl Fixture {
    async fn register(&self, stage: PipelineStage, text: &str) -> Prompt {
        self.orchestrator
            .services()
            .prompts
            .register_prompt(NewPrompt {
                name: format!("{}-prompt", stage.as_str()),
                component_role: stage.component_role(),
                text: format!("stage={}; {}", stage.as_str(), text),
                created_by: Some("tests".to_string()),
            })
            .await
            .unwrap()
    }

    async fn assign(&self, stage: PipelineStage, scope: AssignmentScope, prompt: &Prompt) {
        self.orchestrator
            .services()
            .prompts
            .assign(stage.component_role(), scope, prompt.id, prompt.version, None)
            .await
            .unwrap();
    }

    /// One global prompt per stage
    async fn seed(&self) -> Vec<Prompt> {
        let mut prompts = Vec::new();
        for stage in PipelineStage::ALL {
            let prompt = self.register(stage, "Handle: {{request}}").await;
            self.assign(stage, AssignmentScope::Global, &prompt).await;
            prompts.push(prompt);
        }
        prompts
    }
}

#[tokio::test]
async fn test_missing_assignment_fails_workflow() {
    let fixture = fixture().await;
    let report = fixture
        .orchestrator
        .start(WorkflowRequest::new("Book a room"))
        .await
        .unwrap();

    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(report.reason_code.as_deref(), Some(codes::PROMPT_RESOLUTION_ERROR));
    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].stage, PipelineStage::Interpretation);
    assert!(fixture.model.system_prompts.lock().is_empty());
}

#[tokio::test]
async fn test_every_decision_event_records_its_prompt() {
    let fixture = fixture().await;
    let prompts = fixture.seed().await;

    let report = fixture
        .orchestrator
        .start(WorkflowRequest::new("Book a room for the offsite"))
        .await
        .unwrap();
    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(report.events.len(), 7);

    for (event, prompt) in report.events.iter().zip(&prompts) {
        assert_eq!(event.component_role.as_ref(), Some(&prompt.component_role));
        assert_eq!(event.prompt_id, Some(prompt.id));
        assert_eq!(event.prompt_version, Some(1));
    }

    // Templates are rendered with the request before reaching the model
    let system_prompts = fixture.model.system_prompts.lock().clone();
    assert_eq!(system_prompts.len(), 7);
    assert!(system_prompts
        .iter()
        .all(|p| p.ends_with("Handle: Book a room for the offsite")));
}

#[tokio::test]
async fn test_experiment_assignment_overrides_global() {
    let fixture = fixture().await;
    let prompts = fixture.seed().await;

    let candidate = fixture.register(PipelineStage::Planning, "Plan carefully: {{request}}").await;
    assert_eq!(candidate.id, prompts[3].id);
    assert_eq!(candidate.version, 2);
    fixture
        .assign(
            PipelineStage::Planning,
            AssignmentScope::Experiment("exp-b".to_string()),
            &candidate,
        )
        .await;

    let control = fixture
        .orchestrator
        .start(WorkflowRequest::new("Book a room"))
        .await
        .unwrap();
    let planning = control
        .events
        .iter()
        .find(|e| e.stage == PipelineStage::Planning)
        .unwrap();
    assert_eq!(planning.prompt_version, Some(1));

    let treated = fixture
        .orchestrator
        .start(WorkflowRequest::new("Book a room").experiment("exp-b"))
        .await
        .unwrap();
    let planning = treated
        .events
        .iter()
        .find(|e| e.stage == PipelineStage::Planning)
        .unwrap();
    assert_eq!(planning.prompt_version, Some(2));

    // Other stages keep the global prompt inside the experiment
    let routing = treated
        .events
        .iter()
        .find(|e| e.stage == PipelineStage::Routing)
        .unwrap();
    assert_eq!(routing.prompt_version, Some(1));
}

#[tokio::test]
async fn test_agent_assignment_applies_to_its_steps() {
    let fixture = fixture().await;
    fixture.seed().await;

    let specialised = fixture
        .register(PipelineStage::Execution, "You run the calendar tool: {{request}}")
        .await;
    fixture
        .assign(
            PipelineStage::Execution,
            AssignmentScope::Agent(fixture.calendar),
            &specialised,
        )
        .await;

    let report = fixture
        .orchestrator
        .start(WorkflowRequest::new("Book a room"))
        .await
        .unwrap();
    assert_eq!(report.status, WorkflowStatus::Completed);

    let execution = report
        .events
        .iter()
        .find(|e| e.stage == PipelineStage::Execution)
        .unwrap();
    assert_eq!(execution.prompt_version, Some(2));
    assert_eq!(execution.tool_id, Some(fixture.calendar));

    let resolved = fixture
        .orchestrator
        .services()
        .prompts
        .resolve(&PipelineStage::Execution.component_role(), None, None)
        .await
        .unwrap();
    assert_eq!(resolved.version, 1);
    assert_eq!(resolved.scope, AssignmentScope::Global);
}
