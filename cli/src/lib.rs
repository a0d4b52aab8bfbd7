// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AARD CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Server wiring, HTTP client and sub-command handlers for the `aard` binary

pub mod commands;
pub mod daemon;
pub mod logging;
