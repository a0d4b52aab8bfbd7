// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy shared by the pipeline and its services.
//!
//! Each variant has a stable [`PipelineError::code`] that is recorded as the
//! `reason_code` of the failed event and returned by the API.

use std::time::Duration;

use crate::domain::approval::ApprovalId;
use crate::domain::context::ContextError;
use crate::domain::events::PipelineStage;
use crate::domain::repository::RepositoryError;
use crate::domain::stage::StageError;

pub mod codes {
    pub const PROMPT_RESOLUTION_ERROR: &str = "PROMPT_RESOLUTION_ERROR";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const REGISTRY_CONFLICT: &str = "REGISTRY_CONFLICT";
    pub const REGISTRY_NOT_FOUND: &str = "REGISTRY_NOT_FOUND";
    pub const EXECUTION_FAILURE: &str = "EXECUTION_FAILURE";
    pub const EXECUTION_BLOCKED: &str = "EXECUTION_BLOCKED";
    pub const LLM_UNAVAILABLE: &str = "LLM_UNAVAILABLE";
    pub const MALFORMED_OUTPUT: &str = "MALFORMED_OUTPUT";
    pub const APPROVAL_REJECTED: &str = "APPROVAL_REJECTED";
    pub const APPROVAL_TIMEOUT: &str = "APPROVAL_TIMEOUT";
    pub const WORKFLOW_CANCELLED: &str = "WORKFLOW_CANCELLED";
    pub const WORKFLOW_TIMEOUT: &str = "WORKFLOW_TIMEOUT";
    pub const PERSISTENCE_ERROR: &str = "PERSISTENCE_ERROR";
    pub const INVALID_STATE: &str = "INVALID_STATE";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    /// Non-error reason attached to suspension events
    pub const CLARIFICATION_REQUIRED: &str = "CLARIFICATION_REQUIRED";
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("Prompt resolution failed: {0}")]
    PromptResolution(String),

    #[error("{stage} rejected the request: {}", .reasons.join("; "))]
    Validation {
        stage: PipelineStage,
        reasons: Vec<String>,
    },

    #[error("Invalid context update: {0}")]
    Context(#[from] ContextError),

    #[error("Registry entry '{0}' already exists")]
    RegistryConflict(String),

    #[error("Registry entry not found or not active: {0}")]
    RegistryNotFound(String),

    #[error("Step {step} failed: {message}")]
    ExecutionFailure { step: usize, message: String },

    #[error("Execution blocked after {replans} re-plan(s): {}", .reasons.join("; "))]
    ExecutionBlocked { replans: u32, reasons: Vec<String> },

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Malformed stage output: {0}")]
    MalformedOutput(String),

    #[error("Approval {approval_id} rejected{}", .reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    ApprovalRejected {
        approval_id: ApprovalId,
        reason: Option<String>,
    },

    #[error("Approval {0} timed out")]
    ApprovalTimeout(ApprovalId),

    #[error("Workflow cancelled")]
    Cancelled,

    #[error("Workflow exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::PromptResolution(_) => codes::PROMPT_RESOLUTION_ERROR,
            PipelineError::Validation { .. } | PipelineError::Context(_) => codes::VALIDATION_ERROR,
            PipelineError::RegistryConflict(_) => codes::REGISTRY_CONFLICT,
            PipelineError::RegistryNotFound(_) => codes::REGISTRY_NOT_FOUND,
            PipelineError::ExecutionFailure { .. } => codes::EXECUTION_FAILURE,
            PipelineError::ExecutionBlocked { .. } => codes::EXECUTION_BLOCKED,
            PipelineError::LlmUnavailable(_) => codes::LLM_UNAVAILABLE,
            PipelineError::MalformedOutput(_) => codes::MALFORMED_OUTPUT,
            PipelineError::ApprovalRejected { .. } => codes::APPROVAL_REJECTED,
            PipelineError::ApprovalTimeout(_) => codes::APPROVAL_TIMEOUT,
            PipelineError::Cancelled => codes::WORKFLOW_CANCELLED,
            PipelineError::Timeout(_) => codes::WORKFLOW_TIMEOUT,
            PipelineError::Persistence(_) => codes::PERSISTENCE_ERROR,
            PipelineError::InvalidState(_) => codes::INVALID_STATE,
            PipelineError::NotFound(_) => codes::NOT_FOUND,
        }
    }

    /// Failures that end the workflow as `cancelled` rather than `failed`
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled | PipelineError::ApprovalRejected { .. })
    }
}

impl From<RepositoryError> for PipelineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            // Registry inserts map their own conflicts to `RegistryConflict`
            RepositoryError::Conflict(what) => PipelineError::InvalidState(format!("Conflicting write: {}", what)),
            RepositoryError::NotFound(what) => PipelineError::NotFound(what),
            RepositoryError::Context(e) => PipelineError::Context(e),
            other => PipelineError::Persistence(other.to_string()),
        }
    }
}

impl From<StageError> for PipelineError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::PromptResolution(msg) => PipelineError::PromptResolution(msg),
            StageError::LlmUnavailable { .. } => PipelineError::LlmUnavailable(err.to_string()),
            StageError::MalformedOutput { .. } => PipelineError::MalformedOutput(err.to_string()),
            StageError::Cancelled => PipelineError::Cancelled,
        }
    }
}
