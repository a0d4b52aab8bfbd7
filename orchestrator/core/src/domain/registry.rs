// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registry entries: agents, tools and capabilities.
//!
//! Names are unique across the catalog. Lifecycle is `draft -> active -> deprecated`;
//! deprecated entries stay readable for audit but are never selected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::prompt::PromptId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Agent,
    Tool,
    Capability,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Agent => "agent",
            EntryKind::Tool => "tool",
            EntryKind::Capability => "capability",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(EntryKind::Agent),
            "tool" => Some(EntryKind::Tool),
            "capability" => Some(EntryKind::Capability),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRole {
    /// Acts on LLM output; must carry a system prompt
    #[default]
    DecisionMaking,
    /// Orchestrator, sandbox, registry: no prompt
    Infrastructure,
}

impl EntryRole {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryRole::DecisionMaking => "decision_making",
            EntryRole::Infrastructure => "infrastructure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "decision_making" => Some(EntryRole::DecisionMaking),
            "infrastructure" => Some(EntryRole::Infrastructure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Draft,
    Active,
    Deprecated,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Draft => "draft",
            EntryStatus::Active => "active",
            EntryStatus::Deprecated => "deprecated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(EntryStatus::Draft),
            "active" => Some(EntryStatus::Active),
            "deprecated" => Some(EntryStatus::Deprecated),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub role: EntryRole,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<PromptId>,
    /// Register directly as active instead of draft
    #[serde(default)]
    pub activate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: EntryId,
    pub name: String,
    pub kind: EntryKind,
    pub role: EntryRole,
    pub status: EntryStatus,
    pub description: String,
    pub capabilities: Vec<String>,
    pub system_prompt: Option<PromptId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    #[error("Registry name must not be empty")]
    EmptyName,

    #[error("Decision-making {kind} '{name}' requires a system prompt")]
    MissingPrompt { name: String, kind: &'static str },

    #[error("'{name}' cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: EntryStatus,
        to: EntryStatus,
    },
}

impl RegistryEntry {
    pub fn from_descriptor(descriptor: CapabilityDescriptor) -> Result<Self, EntryError> {
        let name = descriptor.name.trim().to_string();
        if name.is_empty() {
            return Err(EntryError::EmptyName);
        }
        if descriptor.role == EntryRole::DecisionMaking
            && descriptor.kind == EntryKind::Agent
            && descriptor.system_prompt.is_none()
        {
            return Err(EntryError::MissingPrompt {
                name,
                kind: descriptor.kind.as_str(),
            });
        }

        let now = Utc::now();
        Ok(Self {
            id: EntryId::new(),
            name,
            kind: descriptor.kind,
            role: descriptor.role,
            status: if descriptor.activate {
                EntryStatus::Active
            } else {
                EntryStatus::Draft
            },
            description: descriptor.description,
            capabilities: descriptor.capabilities,
            system_prompt: descriptor.system_prompt,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn activate(&mut self) -> Result<(), EntryError> {
        self.move_to(EntryStatus::Active, EntryStatus::Draft)
    }

    pub fn deprecate(&mut self) -> Result<(), EntryError> {
        self.move_to(EntryStatus::Deprecated, EntryStatus::Active)
    }

    pub fn is_selectable(&self) -> bool {
        self.status == EntryStatus::Active
    }

    pub fn provides(&self, capability: &str) -> bool {
        self.name == capability || self.capabilities.iter().any(|c| c == capability)
    }

    fn move_to(&mut self, to: EntryStatus, from: EntryStatus) -> Result<(), EntryError> {
        if self.status != from {
            return Err(EntryError::InvalidTransition {
                name: self.name.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Query for `list`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityFilter {
    pub kind: Option<EntryKind>,
    pub capability: Option<String>,
    pub status: Option<EntryStatus>,
    /// Only entries eligible for selection (`active`)
    #[serde(default)]
    pub active_only: bool,
}

impl CapabilityFilter {
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Default::default()
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn matches(&self, entry: &RegistryEntry) -> bool {
        if self.active_only && !entry.is_selectable() {
            return false;
        }
        if let Some(kind) = self.kind {
            if entry.kind != kind {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(capability) = &self.capability {
            if !entry.provides(capability) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: name.to_string(),
            kind: EntryKind::Tool,
            role: EntryRole::DecisionMaking,
            description: String::new(),
            capabilities: vec!["search".into()],
            system_prompt: None,
            activate: false,
        }
    }

    #[test]
    fn test_decision_agent_needs_prompt() {
        let mut d = tool("planner-bot");
        d.kind = EntryKind::Agent;
        assert!(matches!(
            RegistryEntry::from_descriptor(d.clone()),
            Err(EntryError::MissingPrompt { .. })
        ));

        d.role = EntryRole::Infrastructure;
        assert!(RegistryEntry::from_descriptor(d).is_ok());
    }

    #[test]
    fn test_lifecycle_is_forward_only() {
        let mut entry = RegistryEntry::from_descriptor(tool("web-search")).unwrap();
        assert_eq!(entry.status, EntryStatus::Draft);
        assert!(entry.deprecate().is_err());
        entry.activate().unwrap();
        entry.deprecate().unwrap();
        assert!(entry.activate().is_err());
        assert!(!entry.is_selectable());
    }

    #[test]
    fn test_filter() {
        let mut entry = RegistryEntry::from_descriptor(tool("web-search")).unwrap();
        let filter = CapabilityFilter::active().with_capability("search");
        assert!(!filter.matches(&entry));
        entry.activate().unwrap();
        assert!(filter.matches(&entry));
        assert!(!CapabilityFilter::active().with_capability("email").matches(&entry));
    }
}
