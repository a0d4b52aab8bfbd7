// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Prompt Resolver - Application Layer
//!
//! Looks up which prompt version a decision-making component uses, and manages
//! the versioned prompt catalog and its scoped assignments.
//!
//! Resolution walks the scopes from most to least specific:
//! agent -> experiment -> global. Infrastructure roles (`orchestrator`,
//! `sandbox`, `registry`) never resolve a prompt.

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::pipeline::PipelineError;
use crate::domain::prompt::{
    AssignmentScope, ComponentRole, NewPrompt, Prompt, PromptAssignment, PromptId, ResolvedPrompt,
};
use crate::domain::registry::EntryId;
use crate::domain::repository::PromptRepository;
use crate::infrastructure::prompt_template_engine::PromptTemplateEngine;

pub struct PromptResolver {
    repository: Arc<dyn PromptRepository>,
    templates: PromptTemplateEngine,
}

impl PromptResolver {
    pub fn new(repository: Arc<dyn PromptRepository>) -> Self {
        Self {
            repository,
            templates: PromptTemplateEngine::new(),
        }
    }

    pub async fn resolve(
        &self,
        role: &ComponentRole,
        agent_id: Option<EntryId>,
        experiment_id: Option<&str>,
    ) -> Result<ResolvedPrompt, PipelineError> {
        ensure_decision_making(role)?;

        for scope in AssignmentScope::precedence(agent_id, experiment_id) {
            let Some(assignment) = self.repository.active_assignment(role, &scope).await? else {
                continue;
            };

            let prompt = self
                .repository
                .find_prompt(assignment.prompt_id, assignment.version)
                .await?
                .ok_or_else(|| {
                    PipelineError::PromptResolution(format!(
                        "Assignment for '{}' ({}) references missing prompt {} v{}",
                        role, scope, assignment.prompt_id, assignment.version
                    ))
                })?;

            debug!(
                component_role = %role,
                scope = %scope,
                prompt_id = %prompt.id,
                version = prompt.version,
                "Resolved prompt"
            );

            return Ok(ResolvedPrompt {
                text: prompt.text,
                prompt_id: prompt.id,
                version: prompt.version,
                component_role: role.clone(),
                scope,
            });
        }

        Err(PipelineError::PromptResolution(format!(
            "No active prompt assignment for component role '{}'",
            role
        )))
    }

    /// Make `(prompt_id, version)` the active prompt for `role` at `scope`
    pub async fn assign(
        &self,
        role: ComponentRole,
        scope: AssignmentScope,
        prompt_id: PromptId,
        version: u32,
        assigned_by: Option<String>,
    ) -> Result<PromptAssignment, PipelineError> {
        ensure_decision_making(&role)?;

        let prompt = self
            .repository
            .find_prompt(prompt_id, version)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Prompt {} v{}", prompt_id, version)))?;

        if prompt.component_role != role {
            return Err(PipelineError::InvalidState(format!(
                "Prompt '{}' is written for '{}', not '{}'",
                prompt.name, prompt.component_role, role
            )));
        }

        let assignment = PromptAssignment::new(role, scope, prompt_id, version, assigned_by);
        let superseded = self.repository.activate_assignment(&assignment).await?;

        info!(
            component_role = %assignment.component_role,
            scope = %assignment.scope,
            prompt = %prompt.name,
            version,
            superseded = ?superseded.as_ref().map(|a| a.version),
            "Prompt assignment activated"
        );

        Ok(assignment)
    }

    /// Store the next version of a named prompt
    pub async fn register_prompt(&self, prompt: NewPrompt) -> Result<Prompt, PipelineError> {
        ensure_decision_making(&prompt.component_role)?;
        if prompt.name.trim().is_empty() {
            return Err(PipelineError::InvalidState("Prompt name must not be empty".to_string()));
        }
        self.templates
            .validate_template(&prompt.text)
            .map_err(|e| PipelineError::InvalidState(format!("{:#}", e)))?;

        let created = self.repository.create_prompt_version(prompt).await?;
        info!(
            prompt = %created.name,
            prompt_id = %created.id,
            version = created.version,
            component_role = %created.component_role,
            "Prompt version registered"
        );
        Ok(created)
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>, PipelineError> {
        Ok(self.repository.list_prompts().await?)
    }

    pub async fn list_assignments(&self, role: Option<&ComponentRole>) -> Result<Vec<PromptAssignment>, PipelineError> {
        Ok(self.repository.list_assignments(role).await?)
    }
}

fn ensure_decision_making(role: &ComponentRole) -> Result<(), PipelineError> {
    if role.is_decision_making() {
        Ok(())
    } else {
        Err(PipelineError::PromptResolution(format!(
            "Component role '{}' is infrastructure and carries no prompt",
            role
        )))
    }
}
