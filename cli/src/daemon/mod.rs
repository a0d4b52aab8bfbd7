// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server process and the HTTP client the other commands use to reach it

pub mod client;
pub mod server;

pub use client::DaemonClient;
