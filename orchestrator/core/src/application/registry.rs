// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capability Registry - Application Layer
//!
//! Authoritative catalog of agents, tools and capabilities. Routing and
//! planning only ever reference entries returned by [`CapabilityRegistry::require_active`]
//! or an `active_only` listing; an entry that is not in the catalog cannot be
//! invoked.
//!
//! One instance is created at bootstrap and shared by `Arc`.

use std::sync::Arc;

use tracing::info;

use crate::domain::pipeline::PipelineError;
use crate::domain::registry::{CapabilityDescriptor, CapabilityFilter, EntryError, EntryId, RegistryEntry};
use crate::domain::repository::{RegistryRepository, RepositoryError};

pub struct CapabilityRegistry {
    repository: Arc<dyn RegistryRepository>,
}

impl CapabilityRegistry {
    pub fn new(repository: Arc<dyn RegistryRepository>) -> Self {
        Self { repository }
    }

    pub async fn register(&self, descriptor: CapabilityDescriptor) -> Result<EntryId, PipelineError> {
        let entry = RegistryEntry::from_descriptor(descriptor).map_err(entry_error)?;
        self.repository.insert(&entry).await.map_err(|e| match e {
            RepositoryError::Conflict(_) => PipelineError::RegistryConflict(entry.name.clone()),
            other => other.into(),
        })?;

        info!(
            entry_id = %entry.id,
            name = %entry.name,
            kind = entry.kind.as_str(),
            status = entry.status.as_str(),
            "Registry entry registered"
        );
        Ok(entry.id)
    }

    /// Any entry by name, deprecated ones included
    pub async fn lookup(&self, name: &str) -> Result<Option<RegistryEntry>, PipelineError> {
        Ok(self.repository.find_by_name(name).await?)
    }

    pub async fn get(&self, id: EntryId) -> Result<Option<RegistryEntry>, PipelineError> {
        Ok(self.repository.find_by_id(id).await?)
    }

    pub async fn list(&self, filter: &CapabilityFilter) -> Result<Vec<RegistryEntry>, PipelineError> {
        Ok(self
            .repository
            .list_all()
            .await?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect())
    }

    /// The entry by name, only if it may be selected for work
    pub async fn require_active(&self, name: &str) -> Result<RegistryEntry, PipelineError> {
        match self.lookup(name).await? {
            Some(entry) if entry.is_selectable() => Ok(entry),
            Some(entry) => Err(PipelineError::RegistryNotFound(format!(
                "'{}' is {}",
                entry.name, entry.status
            ))),
            None => Err(PipelineError::RegistryNotFound(name.to_string())),
        }
    }

    pub async fn activate(&self, name: &str) -> Result<RegistryEntry, PipelineError> {
        self.transition(name, RegistryEntry::activate).await
    }

    pub async fn deprecate(&self, name: &str) -> Result<RegistryEntry, PipelineError> {
        self.transition(name, RegistryEntry::deprecate).await
    }

    async fn transition(
        &self,
        name: &str,
        apply: fn(&mut RegistryEntry) -> Result<(), EntryError>,
    ) -> Result<RegistryEntry, PipelineError> {
        let mut entry = self
            .lookup(name)
            .await?
            .ok_or_else(|| PipelineError::RegistryNotFound(name.to_string()))?;

        apply(&mut entry).map_err(entry_error)?;
        self.repository.update(&entry).await?;

        info!(entry_id = %entry.id, name = %entry.name, status = entry.status.as_str(), "Registry entry updated");
        Ok(entry)
    }
}

fn entry_error(err: EntryError) -> PipelineError {
    PipelineError::InvalidState(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prompt::PromptId;
    use crate::domain::registry::{EntryKind, EntryRole, EntryStatus};
    use crate::infrastructure::repositories::InMemoryRegistryRepository;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new(Arc::new(InMemoryRegistryRepository::new()))
    }

    fn agent(name: &str, capabilities: &[&str], activate: bool) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: name.to_string(),
            kind: EntryKind::Agent,
            role: EntryRole::DecisionMaking,
            description: format!("{} agent", name),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            system_prompt: Some(PromptId::new()),
            activate,
        }
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts_and_keeps_first() {
        let registry = registry();
        let first = registry.register(agent("scheduler", &["calendar"], true)).await.unwrap();

        let err = registry.register(agent("scheduler", &["email"], true)).await.unwrap_err();
        assert_eq!(err.code(), "REGISTRY_CONFLICT");

        let stored = registry.lookup("scheduler").await.unwrap().unwrap();
        assert_eq!(stored.id, first);
        assert_eq!(stored.capabilities, vec!["calendar".to_string()]);
    }

    #[tokio::test]
    async fn test_decision_agent_requires_prompt_infrastructure_exempt() {
        let registry = registry();
        let mut no_prompt = agent("planner-bot", &[], true);
        no_prompt.system_prompt = None;
        assert_eq!(registry.register(no_prompt).await.unwrap_err().code(), "INVALID_STATE");

        let sandbox = CapabilityDescriptor {
            name: "sandbox".into(),
            kind: EntryKind::Agent,
            role: EntryRole::Infrastructure,
            description: String::new(),
            capabilities: vec![],
            system_prompt: None,
            activate: true,
        };
        assert!(registry.register(sandbox).await.is_ok());
    }

    #[tokio::test]
    async fn test_lifecycle_and_active_selection() {
        let registry = registry();
        registry.register(agent("mailer", &["email"], false)).await.unwrap();

        assert_eq!(registry.require_active("mailer").await.unwrap_err().code(), "REGISTRY_NOT_FOUND");
        registry.activate("mailer").await.unwrap();
        assert!(registry.require_active("mailer").await.is_ok());

        let deprecated = registry.deprecate("mailer").await.unwrap();
        assert_eq!(deprecated.status, EntryStatus::Deprecated);
        assert!(registry.lookup("mailer").await.unwrap().is_some());
        assert!(registry
            .list(&CapabilityFilter::active().with_capability("email"))
            .await
            .unwrap()
            .is_empty());

        // deprecated -> active is not a lifecycle edge
        assert_eq!(registry.activate("mailer").await.unwrap_err().code(), "INVALID_STATE");
    }

    #[tokio::test]
    async fn test_unknown_name() {
        let err = registry().require_active("ghost").await.unwrap_err();
        assert!(matches!(err, PipelineError::RegistryNotFound(name) if name == "ghost"));
    }
}
