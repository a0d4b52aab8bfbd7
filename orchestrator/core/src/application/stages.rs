// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Stage Components - Application Layer
//!
//! Every pipeline stage is a [`StageComponent`]. The standard implementation,
//! [`LlmStage`], does the same four things for each stage:
//!
//! 1. resolve the prompt assigned to its component role (agent/experiment scoped)
//! 2. render it with the request variables
//! 3. call the LLM gateway with the rendered prompt and the request content
//! 4. extract JSON (fenced or bare) and parse it into the stage's typed output
//!
//! Unparseable output is retried with the same prompt up to `stage_attempts`
//! times before the stage fails with `MALFORMED_OUTPUT`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::application::llm_gateway::LlmGateway;
use crate::application::prompt_resolver::PromptResolver;
use crate::domain::config::PipelineConfig;
use crate::domain::events::{DecisionSource, PipelineStage};
use crate::domain::prompt::ComponentRole;
use crate::domain::stage::{StageError, StageOutput, StageRequest, StageResult};
use crate::infrastructure::prompt_template_engine::PromptTemplateEngine;

#[async_trait]
pub trait StageComponent: Send + Sync {
    fn stage(&self) -> PipelineStage;

    fn component_role(&self) -> ComponentRole {
        self.stage().component_role()
    }

    async fn invoke(&self, request: StageRequest) -> Result<StageResult, StageError>;
}

pub struct LlmStage {
    stage: PipelineStage,
    resolver: Arc<PromptResolver>,
    gateway: Arc<LlmGateway>,
    templates: Arc<PromptTemplateEngine>,
    model_alias: String,
    max_attempts: u32,
}

impl LlmStage {
    pub fn new(
        stage: PipelineStage,
        resolver: Arc<PromptResolver>,
        gateway: Arc<LlmGateway>,
        templates: Arc<PromptTemplateEngine>,
        model_alias: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            stage,
            resolver,
            gateway,
            templates,
            model_alias: model_alias.into(),
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl StageComponent for LlmStage {
    fn stage(&self) -> PipelineStage {
        self.stage
    }

    async fn invoke(&self, request: StageRequest) -> Result<StageResult, StageError> {
        let role = self.component_role();
        let resolved = self
            .resolver
            .resolve(&role, request.agent_id, request.experiment_id.as_deref())
            .await
            .map_err(|e| StageError::PromptResolution(e.to_string()))?;
        let prompt = resolved.reference();

        let system_prompt = self
            .templates
            .render(&resolved.text, &request.variables)
            .map_err(|e| {
                StageError::PromptResolution(format!(
                    "Prompt {} v{} for '{}' failed to render: {:#}",
                    prompt.prompt_id, prompt.version, role, e
                ))
            })?;

        let mut last_problem = String::new();
        for attempt in 1..=self.max_attempts {
            let response = self
                .gateway
                .complete(&self.model_alias, &system_prompt, &request.content)
                .await
                .map_err(|e| StageError::LlmUnavailable {
                    prompt: prompt.clone(),
                    attempts: e.attempts,
                    message: e.source.to_string(),
                })?;

            let parsed = extract_json(&response.text)
                .ok_or_else(|| "no JSON object found in model output".to_string())
                .and_then(|payload| StageOutput::parse(self.stage, payload).map_err(|e| e.to_string()));

            match parsed {
                Ok(output) => {
                    debug!(
                        workflow_id = %request.workflow_id,
                        stage = %self.stage,
                        prompt_id = %prompt.prompt_id,
                        prompt_version = prompt.version,
                        attempt,
                        model = %response.model,
                        "Stage output parsed"
                    );
                    return Ok(StageResult {
                        output,
                        prompt,
                        decision_source: DecisionSource::Llm,
                        attempts: attempt,
                        model: response.model,
                    });
                }
                Err(problem) => {
                    warn!(
                        workflow_id = %request.workflow_id,
                        stage = %self.stage,
                        attempt,
                        error = %problem,
                        "Malformed stage output"
                    );
                    last_problem = problem;
                }
            }
        }

        Err(StageError::MalformedOutput {
            stage: self.stage,
            prompt,
            attempts: self.max_attempts,
            message: last_problem,
        })
    }
}

/// The component for each pipeline stage
#[derive(Clone)]
pub struct PipelineStages {
    components: HashMap<PipelineStage, Arc<dyn StageComponent>>,
}

impl PipelineStages {
    /// One [`LlmStage`] per stage, with model aliases taken from `config`
    pub fn standard(resolver: Arc<PromptResolver>, gateway: Arc<LlmGateway>, config: &PipelineConfig) -> Self {
        let templates = Arc::new(PromptTemplateEngine::new());
        let components = PipelineStage::ALL
            .into_iter()
            .map(|stage| {
                let component: Arc<dyn StageComponent> = Arc::new(LlmStage::new(
                    stage,
                    resolver.clone(),
                    gateway.clone(),
                    templates.clone(),
                    config.model_for(stage),
                    config.stage_attempts,
                ));
                (stage, component)
            })
            .collect();
        Self { components }
    }

    /// Replace the component serving `component.stage()`
    pub fn with(mut self, component: Arc<dyn StageComponent>) -> Self {
        self.components.insert(component.stage(), component);
        self
    }

    pub fn get(&self, stage: PipelineStage) -> Result<&Arc<dyn StageComponent>, StageError> {
        self.components
            .get(&stage)
            .ok_or_else(|| StageError::PromptResolution(format!("No component registered for stage {}", stage)))
    }
}

/// Pull a JSON value out of model text
///
/// Accepts a ```` ```json ```` fence, a bare fence, the whole text, or the
/// outermost `{...}` span, in that order.
pub fn extract_json(text: &str) -> Option<Value> {
    for marker in ["```json", "```"] {
        if let Some(start) = text.find(marker) {
            let content_start = start + marker.len();
            if let Some(end_offset) = text[content_start..].find("```") {
                let fenced = text[content_start..content_start + end_offset].trim();
                if let Ok(value) = serde_json::from_str(fenced) {
                    return Some(value);
                }
            }
        }
    }

    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::LLMSelection;
    use crate::domain::events::WorkflowId;
    use crate::domain::llm::{FinishReason, GenerationOptions, GenerationResponse, LLMError, LLMProvider, TokenUsage};
    use crate::domain::prompt::{AssignmentScope, NewPrompt};
    use crate::domain::stage::VerdictStatus;
    use crate::domain::task::TaskId;
    use crate::infrastructure::llm::ProviderRegistry;
    use crate::infrastructure::repositories::InMemoryPromptRepository;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(
            extract_json("Sure!\n```json\n{\"status\": \"approved\"}\n```"),
            Some(json!({"status": "approved"}))
        );
        assert_eq!(extract_json("```\n{\"a\": 1}\n```"), Some(json!({"a": 1})));
        assert_eq!(extract_json("  {\"a\": 2}  "), Some(json!({"a": 2})));
        assert_eq!(
            extract_json("The verdict is {\"status\": \"rejected\"} as discussed."),
            Some(json!({"status": "rejected"}))
        );
        assert_eq!(extract_json("no json here"), None);
    }

    struct Recording {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LLMProvider for Recording {
        async fn generate(
            &self,
            system_prompt: &str,
            _content: &str,
            _options: &GenerationOptions,
        ) -> Result<GenerationResponse, LLMError> {
            self.prompts.lock().push(system_prompt.to_string());
            let text = self.replies.lock().pop_front().unwrap_or_default();
            Ok(GenerationResponse {
                text,
                usage: TokenUsage::default(),
                provider: "recording".into(),
                model: "test-model".into(),
                finish_reason: FinishReason::Stop,
            })
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            Ok(())
        }
    }

    async fn validator(replies: &[&str], assign: bool) -> (LlmStage, Arc<Recording>) {
        let provider = Arc::new(Recording {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        });
        let registry = ProviderRegistry::from_provider("recording", provider.clone(), &["default"]);
        let gateway = Arc::new(LlmGateway::new(Arc::new(registry), &LLMSelection::default()));
        let resolver = Arc::new(PromptResolver::new(Arc::new(InMemoryPromptRepository::new())));

        if assign {
            let prompt = resolver
                .register_prompt(NewPrompt {
                    name: "validator-a".into(),
                    component_role: ComponentRole::semantic_validator(),
                    text: "Validate: {{request}}".into(),
                    created_by: None,
                })
                .await
                .unwrap();
            resolver
                .assign(ComponentRole::semantic_validator(), AssignmentScope::Global, prompt.id, 1, None)
                .await
                .unwrap();
        }

        let stage = LlmStage::new(
            PipelineStage::ValidatorA,
            resolver,
            gateway,
            Arc::new(PromptTemplateEngine::new()),
            "default",
            2,
        );
        (stage, provider)
    }

    fn request() -> StageRequest {
        StageRequest::new(WorkflowId::new(), TaskId::new(), PipelineStage::ValidatorA, "check it")
            .var("request", json!("book room 4"))
    }

    #[tokio::test]
    async fn test_renders_prompt_and_parses_verdict() {
        let (stage, provider) = validator(&[r#"{"status": "approved"}"#], true).await;
        let result = stage.invoke(request()).await.unwrap();

        assert!(matches!(result.output, StageOutput::Verdict(ref v) if v.status == VerdictStatus::Approved));
        assert_eq!(result.prompt.version, 1);
        assert_eq!(result.attempts, 1);
        assert_eq!(provider.prompts.lock()[0], "Validate: book room 4");
    }

    #[tokio::test]
    async fn test_malformed_output_retried_with_same_prompt() {
        let (stage, provider) = validator(&["I think it's fine", r#"{"status": "approved"}"#], true).await;
        let result = stage.invoke(request()).await.unwrap();

        assert_eq!(result.attempts, 2);
        let prompts = provider.prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], prompts[1]);
    }

    #[tokio::test]
    async fn test_malformed_output_exhausts_attempts() {
        let (stage, _) = validator(&["nope", r#"{"status": "maybe"}"#], true).await;
        let err = stage.invoke(request()).await.unwrap_err();
        assert!(matches!(err, StageError::MalformedOutput { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_missing_prompt_assignment() {
        let (stage, provider) = validator(&[], false).await;
        let err = stage.invoke(request()).await.unwrap_err();
        assert!(matches!(err, StageError::PromptResolution(_)));
        assert!(provider.prompts.lock().is_empty());
    }
}
