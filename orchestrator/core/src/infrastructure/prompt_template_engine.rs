// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Prompt Template Engine
//!
//! Renders assigned system prompts with Handlebars before they are sent to the
//! model.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Substitute stage variables into a resolved prompt text
//! - **Integration:** `PromptResolver` text -> `LlmStage` -> LLM gateway
//!
//! # Variables provided by the pipeline
//!
//! - `{{request}}` - the original user request
//! - `{{context}}` - the task's Digital Twin document (JSON)
//! - `{{registry}}` - active registry entries (names + capabilities)
//! - `{{feedback}}` - rejection reasons from a previous validator_b round
//! - `{{step}}` - the plan step being executed (execution stage)
//!
//! Missing variables render as empty strings.

use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde_json::{Map, Value};

// ============================================================================
// Template Engine
// ============================================================================

pub struct PromptTemplateEngine {
    handlebars: Handlebars<'static>,
}

impl PromptTemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Prompts are plain text, never HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper("json", Box::new(json_helper));
        Self { handlebars }
    }

    pub fn render(&self, template: &str, variables: &Map<String, Value>) -> Result<String> {
        self.handlebars
            .render_template(template, variables)
            .context("Failed to render prompt template")
    }

    /// Validate template syntax without rendering
    pub fn validate_template(&self, template: &str) -> Result<()> {
        handlebars::Template::compile(template)
            .map(|_| ())
            .context("Invalid Handlebars template syntax")
    }
}

impl Default for PromptTemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// `{{json value}}` renders any value as compact JSON
fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let rendered = h
        .param(0)
        .map(|p| p.value().to_string())
        .unwrap_or_default();
    out.write(&rendered)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
