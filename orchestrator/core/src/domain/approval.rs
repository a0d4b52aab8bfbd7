// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Human approval requests gating plan execution or capability creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::events::WorkflowId;
use crate::domain::plan::PlanId;
use crate::domain::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub Uuid);

impl ApprovalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ApprovalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    PlanExecution,
    CapabilityCreation,
}

impl ApprovalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalKind::PlanExecution => "plan_execution",
            ApprovalKind::CapabilityCreation => "capability_creation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan_execution" => Some(ApprovalKind::PlanExecution),
            "capability_creation" => Some(ApprovalKind::CapabilityCreation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Approval {id} is already {status:?}")]
pub struct AlreadyResolved {
    pub id: ApprovalId,
    pub status: ApprovalStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub kind: ApprovalKind,
    pub workflow_id: Option<WorkflowId>,
    pub task_id: Option<TaskId>,
    pub plan_id: Option<PlanId>,
    pub summary: String,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub comment: Option<String>,
}

impl ApprovalRequest {
    pub fn new(kind: ApprovalKind, summary: impl Into<String>) -> Self {
        Self {
            id: ApprovalId::new(),
            kind,
            workflow_id: None,
            task_id: None,
            plan_id: None,
            summary: summary.into(),
            status: ApprovalStatus::Pending,
            requested_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            comment: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn approve(&mut self, actor: impl Into<String>, comment: Option<String>) -> Result<(), AlreadyResolved> {
        self.resolve(ApprovalStatus::Approved, actor.into(), comment)
    }

    pub fn reject(&mut self, actor: impl Into<String>, reason: Option<String>) -> Result<(), AlreadyResolved> {
        self.resolve(ApprovalStatus::Rejected, actor.into(), reason)
    }

    fn resolve(&mut self, status: ApprovalStatus, actor: String, comment: Option<String>) -> Result<(), AlreadyResolved> {
        if !self.is_pending() {
            return Err(AlreadyResolved {
                id: self.id,
                status: self.status,
            });
        }
        self.status = status;
        self.resolved_by = Some(actor);
        self.resolved_at = Some(Utc::now());
        self.comment = comment;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_request_is_immutable() {
        let mut req = ApprovalRequest::new(ApprovalKind::PlanExecution, "run plan v1");
        req.approve("ops", Some("looks fine".into())).unwrap();

        let err = req.reject("ops", None).unwrap_err();
        assert_eq!(err.status, ApprovalStatus::Approved);
        assert_eq!(req.comment.as_deref(), Some("looks fine"));
        assert_eq!(req.resolved_by.as_deref(), Some("ops"));
    }
}
