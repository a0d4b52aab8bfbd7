// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: entities, value objects, repository contracts and the error
//! taxonomy of the decision pipeline. No I/O happens here.

pub mod approval;
pub mod config;
pub mod context;
pub mod events;
pub mod llm;
pub mod pipeline;
pub mod plan;
pub mod prompt;
pub mod registry;
pub mod repository;
pub mod stage;
pub mod task;
