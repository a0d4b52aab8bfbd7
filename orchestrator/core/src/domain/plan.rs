// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Plan hypotheses
//!
//! A plan is a proposal, never an instruction: it only becomes actionable once
//! validator_b (and, depending on autonomy, a human) approves it. Re-planning
//! creates version `n + 1` and supersedes the previous draft; older versions stay
//! queryable and are mirrored into `context.historical_todos`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanId(pub Uuid);

impl PlanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Approved,
    Rejected,
    Superseded,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Draft => "draft",
            PlanStatus::Approved => "approved",
            PlanStatus::Rejected => "rejected",
            PlanStatus::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PlanStatus::Draft),
            "approved" => Some(PlanStatus::Approved),
            "rejected" => Some(PlanStatus::Rejected),
            "superseded" => Some(PlanStatus::Superseded),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: usize,
    pub description: String,
    /// Registry name of the agent/tool expected to carry out the step
    pub agent: Option<String>,
}

/// A step as the planner emits it: either bare text or an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepDraft {
    Text(String),
    Detailed {
        description: String,
        #[serde(default, alias = "tool")]
        agent: Option<String>,
    },
}

/// Planner output before it is versioned and stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDraft {
    pub goal: String,
    #[serde(default)]
    pub strategy: String,
    pub steps: Vec<StepDraft>,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("Plan {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: PlanId,
        from: PlanStatus,
        to: PlanStatus,
    },

    #[error("Plan has no steps")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanHypothesis {
    pub id: PlanId,
    pub task_id: TaskId,
    pub version: u32,
    pub goal: String,
    pub strategy: String,
    pub steps: Vec<PlanStep>,
    pub alternatives: Vec<String>,
    pub status: PlanStatus,
    pub rejection_reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlanHypothesis {
    pub fn from_draft(task_id: TaskId, version: u32, draft: PlanDraft) -> Result<Self, PlanError> {
        if draft.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        let steps = draft
            .steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| match step {
                StepDraft::Text(description) => PlanStep {
                    index,
                    description,
                    agent: None,
                },
                StepDraft::Detailed { description, agent } => PlanStep {
                    index,
                    description,
                    agent,
                },
            })
            .collect();

        let now = Utc::now();
        Ok(Self {
            id: PlanId::new(),
            task_id,
            version,
            goal: draft.goal,
            strategy: draft.strategy,
            steps,
            alternatives: draft.alternatives,
            status: PlanStatus::Draft,
            rejection_reasons: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn approve(&mut self) -> Result<(), PlanError> {
        self.move_to(PlanStatus::Approved, &[PlanStatus::Draft])
    }

    pub fn reject(&mut self, reasons: Vec<String>) -> Result<(), PlanError> {
        self.move_to(PlanStatus::Rejected, &[PlanStatus::Draft, PlanStatus::Approved])?;
        self.rejection_reasons = reasons;
        Ok(())
    }

    pub fn supersede(&mut self) -> Result<(), PlanError> {
        self.move_to(PlanStatus::Superseded, &[PlanStatus::Draft, PlanStatus::Approved])
    }

    fn move_to(&mut self, to: PlanStatus, allowed_from: &[PlanStatus]) -> Result<(), PlanError> {
        if !allowed_from.contains(&self.status) {
            return Err(PlanError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Compact form stored under `context.plan` and `context.historical_todos`
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "plan_id": self.id.to_string(),
            "version": self.version,
            "goal": self.goal,
            "strategy": self.strategy,
            "steps": self.steps,
            "alternatives": self.alternatives,
            "status": self.status.as_str(),
            "rejection_reasons": self.rejection_reasons,
            "is_hypothesis": true,
        })
    }
}

/// The most recent approved plan of a task
pub fn authoritative(plans: &[PlanHypothesis]) -> Option<&PlanHypothesis> {
    plans
        .iter()
        .filter(|p| p.status == PlanStatus::Approved)
        .max_by_key(|p| p.version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> PlanDraft {
        serde_json::from_value(serde_json::json!({
            "goal": "reserve a room",
            "steps": ["check availability", {"description": "book", "tool": "calendar"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_draft_accepts_mixed_steps() {
        let plan = PlanHypothesis::from_draft(TaskId::new(), 1, draft()).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].agent, None);
        assert_eq!(plan.steps[1].agent.as_deref(), Some("calendar"));
        assert_eq!(plan.steps[1].index, 1);
        assert_eq!(plan.status, PlanStatus::Draft);
    }

    #[test]
    fn test_empty_plan_rejected() {
        let mut d = draft();
        d.steps.clear();
        assert_eq!(PlanHypothesis::from_draft(TaskId::new(), 1, d).unwrap_err(), PlanError::Empty);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut plan = PlanHypothesis::from_draft(TaskId::new(), 1, draft()).unwrap();
        plan.reject(vec!["too vague".into()]).unwrap();
        assert!(plan.approve().is_err());
        assert!(plan.supersede().is_err());
        assert_eq!(plan.rejection_reasons, vec!["too vague".to_string()]);
    }

    #[test]
    fn test_authoritative_is_latest_approved() {
        let task = TaskId::new();
        let mut v1 = PlanHypothesis::from_draft(task, 1, draft()).unwrap();
        v1.approve().unwrap();
        let mut v2 = PlanHypothesis::from_draft(task, 2, draft()).unwrap();
        v2.approve().unwrap();
        let v3 = PlanHypothesis::from_draft(task, 3, draft()).unwrap();

        let plans = vec![v1, v2.clone(), v3];
        assert_eq!(authoritative(&plans).map(|p| p.id), Some(v2.id));
    }
}
