// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Ollama LLM Provider Adapter
//
// Anti-Corruption Layer for Ollama local models (chat endpoint).
// Supports air-gapped deployments with local LLMs.

use crate::domain::llm::{FinishReason, GenerationOptions, GenerationResponse, LLMError, LLMProvider, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub struct OllamaAdapter {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaReply,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    eval_count: Option<u32>,
    prompt_eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaReply {
    content: String,
}

impl OllamaAdapter {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
        }
    }
}

#[async_trait]
impl LLMProvider for OllamaAdapter {
    async fn generate(
        &self,
        system_prompt: &str,
        content: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages: vec![
                OllamaMessage {
                    role: "system",
                    content: system_prompt,
                },
                OllamaMessage {
                    role: "user",
                    content,
                },
            ],
            stream: false,
            format: options.json_mode.then_some("json"),
            options: Some(OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens.map(|t| t as i32),
                stop: options.stop_sequences.clone(),
            }),
        };

        let url = format!("{}/api/chat", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                404 => LLMError::ModelNotFound(self.model.clone()),
                429 => LLMError::RateLimit,
                _ => LLMError::Provider(format!("HTTP {}: {}", status, error_text)),
            });
        }

        let reply: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Provider(format!("Failed to parse response: {}", e)))?;

        let prompt_tokens = reply.prompt_eval_count.unwrap_or(0);
        let completion_tokens = reply.eval_count.unwrap_or(0);
        let finish_reason = match reply.done_reason.as_deref() {
            Some("length") => FinishReason::Length,
            _ if reply.done => FinishReason::Stop,
            _ => FinishReason::Length,
        };

        Ok(GenerationResponse {
            text: reply.message.content,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            provider: "ollama".to_string(),
            model: self.model.clone(),
            finish_reason,
        })
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        // Listing models proves the server is up
        let url = format!("{}/api/tags", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LLMError::Network(format!("HTTP {}", response.status())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_sends_system_and_user_messages() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "llama3.2",
                "format": "json",
                "messages": [
                    {"role": "system", "content": "You interpret requests."},
                    {"role": "user", "content": "book room 4"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":{"role":"assistant","content":"{\"intent\":\"booking\"}"},"done":true,"prompt_eval_count":12,"eval_count":5}"#)
            .create_async()
            .await;

        let adapter = OllamaAdapter::new(server.url(), "llama3.2".to_string());
        let response = adapter
            .generate("You interpret requests.", "book room 4", &GenerationOptions::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.text, "{\"intent\":\"booking\"}");
        assert_eq!(response.usage.total_tokens, 17);
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn test_missing_model_maps_to_model_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(404)
            .create_async()
            .await;

        let adapter = OllamaAdapter::new(server.url(), "ghost".to_string());
        let err = adapter
            .generate("s", "c", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::ModelNotFound(m) if m == "ghost"));
    }
}
