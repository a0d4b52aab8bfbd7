// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Approval Service - human-in-the-loop gates
//!
//! Persists `ApprovalRequest`s, lets the pipeline wait on a decision with a
//! timeout, and accepts approve/reject actions from the API. Resolution is a
//! compare-and-swap on the stored request, so a request resolves exactly once
//! even when an operator and the timeout race.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::domain::approval::{ApprovalId, ApprovalKind, ApprovalRequest, ApprovalStatus};
use crate::domain::events::WorkflowId;
use crate::domain::pipeline::PipelineError;
use crate::domain::plan::PlanId;
use crate::domain::repository::ApprovalRepository;
use crate::domain::task::TaskId;
use crate::infrastructure::event_bus::EventBus;

/// Actor recorded when a request expires
pub const TIMEOUT_ACTOR: &str = "aard-timeout";

/// Outcome observed by a waiting workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved {
        actor: Option<String>,
        comment: Option<String>,
    },
    Rejected {
        actor: Option<String>,
        reason: Option<String>,
    },
    TimedOut,
}

impl ApprovalDecision {
    fn from_request(request: &ApprovalRequest) -> Option<Self> {
        match request.status {
            ApprovalStatus::Pending => None,
            ApprovalStatus::Approved => Some(ApprovalDecision::Approved {
                actor: request.resolved_by.clone(),
                comment: request.comment.clone(),
            }),
            ApprovalStatus::Rejected if request.resolved_by.as_deref() == Some(TIMEOUT_ACTOR) => {
                Some(ApprovalDecision::TimedOut)
            }
            ApprovalStatus::Rejected => Some(ApprovalDecision::Rejected {
                actor: request.resolved_by.clone(),
                reason: request.comment.clone(),
            }),
        }
    }
}

pub struct ApprovalService {
    repository: Arc<dyn ApprovalRepository>,
    event_bus: Arc<EventBus>,
    waiters: Mutex<HashMap<ApprovalId, Vec<oneshot::Sender<ApprovalRequest>>>>,
}

impl ApprovalService {
    pub fn new(repository: Arc<dyn ApprovalRepository>, event_bus: Arc<EventBus>) -> Self {
        Self {
            repository,
            event_bus,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Open a pending request
    pub async fn request(
        &self,
        kind: ApprovalKind,
        workflow_id: Option<WorkflowId>,
        task_id: Option<TaskId>,
        plan_id: Option<PlanId>,
        summary: impl Into<String>,
    ) -> Result<ApprovalRequest, PipelineError> {
        let mut request = ApprovalRequest::new(kind, summary);
        request.workflow_id = workflow_id;
        request.task_id = task_id;
        request.plan_id = plan_id;

        self.repository.insert(&request).await?;
        info!(
            approval_id = %request.id,
            kind = kind.as_str(),
            workflow_id = ?workflow_id.map(|w| w.to_string()),
            "Approval requested"
        );
        self.event_bus.publish_approval_requested(request.clone());
        Ok(request)
    }

    /// Wait until the request is resolved or `timeout` elapses
    ///
    /// On timeout the stored request is rejected by [`TIMEOUT_ACTOR`], unless an
    /// operator resolved it first, in which case that decision is returned.
    pub async fn await_decision(&self, id: ApprovalId, timeout: Duration) -> Result<ApprovalDecision, PipelineError> {
        // Register before reading so a resolution in between is not missed
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().entry(id).or_default().push(tx);

        let stored = self.find(id).await?;
        if let Some(decision) = ApprovalDecision::from_request(&stored) {
            self.waiters.lock().remove(&id);
            return Ok(decision);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resolved)) => Ok(ApprovalDecision::from_request(&resolved).unwrap_or(ApprovalDecision::TimedOut)),
            Ok(Err(_)) | Err(_) => {
                self.waiters.lock().remove(&id);
                self.expire(id).await
            }
        }
    }

    pub async fn approve(
        &self,
        id: ApprovalId,
        actor: impl Into<String>,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, PipelineError> {
        let mut request = self.find(id).await?;
        request
            .approve(actor, comment)
            .map_err(|e| PipelineError::InvalidState(e.to_string()))?;
        self.resolve(request).await
    }

    pub async fn reject(
        &self,
        id: ApprovalId,
        actor: impl Into<String>,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, PipelineError> {
        let mut request = self.find(id).await?;
        request
            .reject(actor, reason)
            .map_err(|e| PipelineError::InvalidState(e.to_string()))?;
        self.resolve(request).await
    }

    pub async fn get(&self, id: ApprovalId) -> Result<Option<ApprovalRequest>, PipelineError> {
        Ok(self.repository.find_by_id(id).await?)
    }

    pub async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, PipelineError> {
        Ok(self.repository.list_pending().await?)
    }

    async fn find(&self, id: ApprovalId) -> Result<ApprovalRequest, PipelineError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Approval {}", id)))
    }

    async fn resolve(&self, request: ApprovalRequest) -> Result<ApprovalRequest, PipelineError> {
        if !self.repository.update_if_pending(&request).await? {
            return Err(PipelineError::InvalidState(format!(
                "Approval {} is already resolved",
                request.id
            )));
        }

        info!(
            approval_id = %request.id,
            status = request.status.as_str(),
            resolved_by = ?request.resolved_by,
            "Approval resolved"
        );

        let waiters = self.waiters.lock().remove(&request.id).unwrap_or_default();
        for waiter in waiters {
            // Receiver gone means the workflow stopped waiting
            let _ = waiter.send(request.clone());
        }
        self.event_bus.publish_approval_resolved(request.clone());
        Ok(request)
    }

    async fn expire(&self, id: ApprovalId) -> Result<ApprovalDecision, PipelineError> {
        let mut request = self.find(id).await?;
        if request.is_pending()
            && request
                .reject(TIMEOUT_ACTOR, Some("approval timed out".to_string()))
                .is_ok()
        {
            match self.resolve(request).await {
                Ok(_) => {
                    warn!(approval_id = %id, "Approval request timed out");
                    return Ok(ApprovalDecision::TimedOut);
                }
                Err(PipelineError::InvalidState(_)) => {}
                Err(e) => return Err(e),
            }
        }

        // Resolved concurrently by an operator
        let stored = self.find(id).await?;
        Ok(ApprovalDecision::from_request(&stored).unwrap_or(ApprovalDecision::TimedOut))
    }
}
