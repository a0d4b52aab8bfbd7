// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # AARD orchestrator core
//!
//! Human-in-the-loop decision pipeline: a fixed sequence of LLM-backed stages
//! (interpretation, semantic validation, routing, planning, execution validation,
//! execution, reflection) with versioned prompt assignment, a per-task Digital
//! Twin document and an append-only workflow event graph.
//!
//! # Architecture
//!
//! - `domain` - entities, repository traits, error taxonomy, configuration schema
//! - `application` - services and the pipeline orchestrator
//! - `infrastructure` - event bus, LLM adapters, template engine, repositories
//! - `presentation` - REST + WebSocket API

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
