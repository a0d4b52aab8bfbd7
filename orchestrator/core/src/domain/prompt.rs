// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Prompts and Prompt Assignments
//!
//! Every decision-making component resolves its system prompt at call time through
//! a [`PromptAssignment`]. Assignments bind a [`ComponentRole`] within an
//! [`AssignmentScope`] to one exact `(prompt_id, version)`.
//!
//! ## Resolution precedence
//!
//! | Order | Scope | Applies when |
//! |-------|-------|--------------|
//! | 1 | `Agent(id)` | the stage runs on behalf of a registry agent |
//! | 2 | `Experiment(name)` | the request carries an experiment id |
//! | 3 | `Global` | always |
//!
//! At most one assignment is active per `(component_role, scope)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::registry::EntryId;

/// Identity of a named prompt; versions share the id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptId(pub Uuid);

impl PromptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PromptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PromptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentId(pub Uuid);

impl AssignmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssignmentId {
    fn default() -> Self {
        Self::new()
    }
}

/// Logical identity used to pick a prompt
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentRole(String);

impl ComponentRole {
    pub const INTERPRETATION: &'static str = "interpretation";
    pub const SEMANTIC_VALIDATOR: &'static str = "semantic_validator";
    pub const DECISION_ROUTER: &'static str = "decision_router";
    pub const PLANNER: &'static str = "planner";
    pub const EXECUTION_VALIDATOR: &'static str = "execution_validator";
    pub const EXECUTOR: &'static str = "executor";
    pub const REFLECTION: &'static str = "reflection";

    /// Roles that never carry a prompt
    pub const INFRASTRUCTURE: [&'static str; 3] = ["orchestrator", "sandbox", "registry"];

    pub fn new(role: impl Into<String>) -> Self {
        Self(role.into())
    }

    pub fn interpretation() -> Self {
        Self::new(Self::INTERPRETATION)
    }

    pub fn semantic_validator() -> Self {
        Self::new(Self::SEMANTIC_VALIDATOR)
    }

    pub fn decision_router() -> Self {
        Self::new(Self::DECISION_ROUTER)
    }

    pub fn planner() -> Self {
        Self::new(Self::PLANNER)
    }

    pub fn execution_validator() -> Self {
        Self::new(Self::EXECUTION_VALIDATOR)
    }

    pub fn executor() -> Self {
        Self::new(Self::EXECUTOR)
    }

    pub fn reflection() -> Self {
        Self::new(Self::REFLECTION)
    }

    pub fn orchestrator() -> Self {
        Self::new("orchestrator")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_decision_making(&self) -> bool {
        !Self::INFRASTRUCTURE.contains(&self.0.as_str())
    }
}

impl std::fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentRole {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AssignmentScope {
    Global,
    Experiment(String),
    Agent(EntryId),
}

impl AssignmentScope {
    /// Scopes to consult, most specific first
    pub fn precedence(agent_id: Option<EntryId>, experiment_id: Option<&str>) -> Vec<AssignmentScope> {
        let mut chain = Vec::with_capacity(3);
        if let Some(agent) = agent_id {
            chain.push(AssignmentScope::Agent(agent));
        }
        if let Some(experiment) = experiment_id {
            chain.push(AssignmentScope::Experiment(experiment.to_string()));
        }
        chain.push(AssignmentScope::Global);
        chain
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AssignmentScope::Global => "global",
            AssignmentScope::Experiment(_) => "experiment",
            AssignmentScope::Agent(_) => "agent",
        }
    }

    /// Scope value as stored in a column (empty for global)
    pub fn key(&self) -> String {
        match self {
            AssignmentScope::Global => String::new(),
            AssignmentScope::Experiment(name) => name.clone(),
            AssignmentScope::Agent(id) => id.to_string(),
        }
    }

    pub fn from_parts(kind: &str, key: &str) -> Option<Self> {
        match kind {
            "global" => Some(AssignmentScope::Global),
            "experiment" => Some(AssignmentScope::Experiment(key.to_string())),
            "agent" => Uuid::parse_str(key).ok().map(|id| AssignmentScope::Agent(EntryId(id))),
            _ => None,
        }
    }
}

impl std::fmt::Display for AssignmentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentScope::Global => f.write_str("global"),
            other => write!(f, "{}:{}", other.kind(), other.key()),
        }
    }
}

/// One immutable version of a named prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: PromptId,
    pub name: String,
    pub version: u32,
    pub component_role: ComponentRole,
    pub text: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPrompt {
    pub name: String,
    pub component_role: ComponentRole,
    pub text: String,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptAssignment {
    pub id: AssignmentId,
    pub component_role: ComponentRole,
    pub scope: AssignmentScope,
    pub prompt_id: PromptId,
    pub version: u32,
    pub active: bool,
    pub assigned_by: Option<String>,
    pub assigned_at: DateTime<Utc>,
    pub superseded_at: Option<DateTime<Utc>>,
}

impl PromptAssignment {
    pub fn new(
        component_role: ComponentRole,
        scope: AssignmentScope,
        prompt_id: PromptId,
        version: u32,
        assigned_by: Option<String>,
    ) -> Self {
        Self {
            id: AssignmentId::new(),
            component_role,
            scope,
            prompt_id,
            version,
            active: true,
            assigned_by,
            assigned_at: Utc::now(),
            superseded_at: None,
        }
    }

    pub fn supersede(&mut self, at: DateTime<Utc>) {
        self.active = false;
        self.superseded_at = Some(at);
    }
}

/// Prompt reference carried on events and stage results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRef {
    pub component_role: ComponentRole,
    pub prompt_id: PromptId,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrompt {
    pub text: String,
    pub prompt_id: PromptId,
    pub version: u32,
    pub component_role: ComponentRole,
    pub scope: AssignmentScope,
}

impl ResolvedPrompt {
    pub fn reference(&self) -> PromptRef {
        PromptRef {
            component_role: self.component_role.clone(),
            prompt_id: self.prompt_id,
            version: self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        let agent = EntryId::new();
        assert_eq!(
            AssignmentScope::precedence(Some(agent), Some("exp-7")),
            vec![
                AssignmentScope::Agent(agent),
                AssignmentScope::Experiment("exp-7".into()),
                AssignmentScope::Global,
            ]
        );
        assert_eq!(AssignmentScope::precedence(None, None), vec![AssignmentScope::Global]);
    }

    #[test]
    fn test_infrastructure_roles_are_not_decision_making() {
        for role in ComponentRole::INFRASTRUCTURE {
            assert!(!ComponentRole::new(role).is_decision_making());
        }
        assert!(ComponentRole::planner().is_decision_making());
    }

    #[test]
    fn test_scope_parts_round_trip() {
        let agent = AssignmentScope::Agent(EntryId::new());
        assert_eq!(AssignmentScope::from_parts(agent.kind(), &agent.key()), Some(agent));
        assert_eq!(AssignmentScope::from_parts("global", ""), Some(AssignmentScope::Global));
        assert_eq!(AssignmentScope::from_parts("agent", "not-a-uuid"), None);
    }
}
