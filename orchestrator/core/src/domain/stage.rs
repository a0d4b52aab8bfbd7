// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Stage Contract
//!
//! Every LLM-backed stage is a function of `(input, resolved prompt, context)`
//! producing a typed [`StageOutput`]. The orchestrator only branches on these
//! typed outputs; raw model text never leaves the stage component.
//!
//! | Stage | Output |
//! |-------|--------|
//! | interpretation | [`Interpretation`] |
//! | validator_a / validator_b | [`Verdict`] |
//! | routing | [`RoutingDecision`] |
//! | planning | [`PlanDraft`] |
//! | execution (per step) | [`StepOutcome`] |
//! | reflection | [`Reflection`] |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::events::{DecisionSource, PipelineStage, WorkflowId};
use crate::domain::plan::PlanDraft;
use crate::domain::prompt::PromptRef;
use crate::domain::registry::EntryId;
use crate::domain::task::TaskId;

#[derive(Debug, Clone)]
pub struct StageRequest {
    pub workflow_id: WorkflowId,
    pub task_id: TaskId,
    pub stage: PipelineStage,
    /// Registry agent the stage runs on behalf of (agent-scoped prompts)
    pub agent_id: Option<EntryId>,
    pub experiment_id: Option<String>,
    /// Template variables for the system prompt
    pub variables: Map<String, Value>,
    /// Task-specific content sent alongside the system prompt
    pub content: String,
}

impl StageRequest {
    pub fn new(workflow_id: WorkflowId, task_id: TaskId, stage: PipelineStage, content: impl Into<String>) -> Self {
        Self {
            workflow_id,
            task_id,
            stage,
            agent_id: None,
            experiment_id: None,
            variables: Map::new(),
            content: content.into(),
        }
    }

    pub fn agent(mut self, agent_id: Option<EntryId>) -> Self {
        self.agent_id = agent_id;
        self
    }

    pub fn experiment(mut self, experiment_id: Option<String>) -> Self {
        self.experiment_id = experiment_id;
        self
    }

    pub fn var(mut self, key: &str, value: Value) -> Self {
        self.variables.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    pub intent: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub entities: Value,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    #[serde(alias = "approve", alias = "valid")]
    Approved,
    #[serde(alias = "needs_clarification", alias = "clarify")]
    ClarificationRequired,
    #[serde(alias = "reject", alias = "invalid")]
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl Verdict {
    pub fn approved() -> Self {
        Self {
            status: VerdictStatus::Approved,
            questions: Vec::new(),
            reasons: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Registry names the router wants to involve
    #[serde(default)]
    pub agents: Vec<String>,
    /// Capability to fall back on when none of the named agents is active
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub summary: String,
    #[serde(default)]
    pub lessons: Vec<String>,
    #[serde(default)]
    pub success: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StageOutput {
    Interpretation(Interpretation),
    Verdict(Verdict),
    Routing(RoutingDecision),
    Plan(PlanDraft),
    Step(StepOutcome),
    Reflection(Reflection),
}

impl StageOutput {
    /// Parse the JSON payload a stage's model produced
    pub fn parse(stage: PipelineStage, payload: Value) -> Result<Self, serde_json::Error> {
        Ok(match stage {
            PipelineStage::Interpretation => StageOutput::Interpretation(serde_json::from_value(payload)?),
            PipelineStage::ValidatorA | PipelineStage::ValidatorB => {
                StageOutput::Verdict(serde_json::from_value(payload)?)
            }
            PipelineStage::Routing => StageOutput::Routing(serde_json::from_value(payload)?),
            PipelineStage::Planning => StageOutput::Plan(serde_json::from_value(payload)?),
            PipelineStage::Execution => StageOutput::Step(serde_json::from_value(payload)?),
            PipelineStage::Reflection => StageOutput::Reflection(serde_json::from_value(payload)?),
        })
    }

    pub fn to_value(&self) -> Value {
        let inner = match self {
            StageOutput::Interpretation(v) => serde_json::to_value(v),
            StageOutput::Verdict(v) => serde_json::to_value(v),
            StageOutput::Routing(v) => serde_json::to_value(v),
            StageOutput::Plan(v) => serde_json::to_value(v),
            StageOutput::Step(v) => serde_json::to_value(v),
            StageOutput::Reflection(v) => serde_json::to_value(v),
        };
        inner.unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone)]
pub struct StageResult {
    pub output: StageOutput,
    pub prompt: PromptRef,
    pub decision_source: DecisionSource,
    /// Attempts consumed, including the successful one
    pub attempts: u32,
    pub model: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    PromptResolution(String),

    #[error("LLM unavailable after {attempts} attempt(s): {message}")]
    LlmUnavailable {
        prompt: PromptRef,
        attempts: u32,
        message: String,
    },

    #[error("Malformed {stage} output after {attempts} attempt(s): {message}")]
    MalformedOutput {
        stage: PipelineStage,
        prompt: PromptRef,
        attempts: u32,
        message: String,
    },

    #[error("Stage cancelled")]
    Cancelled,
}

impl StageError {
    pub fn prompt(&self) -> Option<&PromptRef> {
        match self {
            StageError::LlmUnavailable { prompt, .. } | StageError::MalformedOutput { prompt, .. } => Some(prompt),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verdict_aliases() {
        let v: Verdict = serde_json::from_value(json!({"status": "needs_clarification", "questions": ["which room?"]})).unwrap();
        assert_eq!(v.status, VerdictStatus::ClarificationRequired);
        let v: Verdict = serde_json::from_value(json!({"status": "reject", "reasons": ["unsafe"]})).unwrap();
        assert_eq!(v.status, VerdictStatus::Rejected);
    }

    #[test]
    fn test_parse_by_stage() {
        let out = StageOutput::parse(PipelineStage::Routing, json!({"agents": ["calendar"]})).unwrap();
        assert!(matches!(out, StageOutput::Routing(ref r) if r.agents == vec!["calendar".to_string()]));

        assert!(StageOutput::parse(PipelineStage::ValidatorB, json!({"verdict": "ok"})).is_err());
        assert!(StageOutput::parse(PipelineStage::Reflection, json!({"summary": "done"})).is_ok());
    }
}
