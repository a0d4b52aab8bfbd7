// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! LLM provider interface (anti-corruption layer)
//!
//! Stage components never talk to a model server directly. They hand a resolved
//! system prompt plus task-specific content to an [`LLMProvider`]; vendor adapters
//! live in `infrastructure::llm`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Produce a completion for `content` under `system_prompt`
    async fn generate(
        &self,
        system_prompt: &str,
        content: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError>;

    async fn health_check(&self) -> Result<(), LLMError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,
    /// 0.0 = deterministic
    pub temperature: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
    /// Ask the server for a JSON object where supported
    pub json_mode: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(2048),
            temperature: Some(0.2),
            stop_sequences: None,
            json_mode: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub usage: TokenUsage,
    /// Provider name (e.g. "ollama")
    pub provider: String,
    pub model: String,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl LLMError {
    /// Whether the same request may succeed on another attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::Network(_) | LLMError::RateLimit | LLMError::Provider(_) | LLMError::Timeout(_)
        )
    }
}
