// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod approvals;
pub mod background;
pub mod digital_twin;
pub mod event_emitter;
pub mod llm_gateway;
pub mod orchestrator;
pub mod prompt_resolver;
pub mod registry;
pub mod repository_factory;
pub mod stages;

// Re-export the entry points for convenience
pub use orchestrator::{PipelineOrchestrator, PipelineServices, WorkflowReport, WorkflowRequest, WorkflowStatus};
pub use repository_factory::{create_repositories, Repositories};
pub use stages::{LlmStage, PipelineStages, StageComponent};
