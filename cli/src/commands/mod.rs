// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the AARD CLI

pub mod approvals;
pub mod config;
pub mod prompts;
pub mod registry;
pub mod request;

pub use self::approvals::ApprovalCommand;
pub use self::config::ConfigCommand;
pub use self::prompts::PromptCommand;
pub use self::registry::RegistryCommand;
pub use self::request::RequestArgs;
