// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM Provider Registry - Model Alias Resolution and Provider Management
//
// Builds provider adapters from configuration and resolves model aliases to
// them. Retry, timeout and pooling policy is applied one level up by the
// application's LLM gateway.

use crate::domain::config::{AardConfigSpec, LLMProviderConfig, ModelConfig};
use crate::domain::llm::{LLMError, LLMProvider};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::ollama::OllamaAdapter;
use super::openai::OpenAIAdapter;

pub struct ProviderRegistry {
    /// Default adapter of each provider (its first model)
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    /// alias -> (provider_name, adapter bound to the alias's model)
    alias_map: HashMap<String, (String, Arc<dyn LLMProvider>)>,
    default_provider: Option<String>,
    fallback_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn from_config(config: &AardConfigSpec) -> anyhow::Result<Self> {
        let mut registry = Self::empty();
        registry.default_provider = config.llm_selection.default_provider.clone();
        registry.fallback_provider = config.llm_selection.fallback_provider.clone();

        info!("Initializing LLM provider registry");

        for provider_config in &config.llm_providers {
            if !provider_config.enabled {
                info!("Provider '{}' disabled, skipping", provider_config.name);
                continue;
            }

            if let Err(e) = registry.add_provider(provider_config) {
                warn!("Failed to initialize provider '{}': {}", provider_config.name, e);
            }
        }

        if registry.providers.is_empty() {
            warn!("No LLM providers configured - every LLM-backed stage will fail");
        }

        Ok(registry)
    }

    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
            alias_map: HashMap::new(),
            default_provider: None,
            fallback_provider: None,
        }
    }

    /// Register a provider instance under `name` for the given aliases
    pub fn insert(&mut self, name: &str, provider: Arc<dyn LLMProvider>, aliases: &[String]) {
        for alias in aliases {
            self.alias_map
                .insert(alias.clone(), (name.to_string(), provider.clone()));
        }
        self.providers.insert(name.to_string(), provider);
    }

    /// One adapter per configured model, so each alias reaches its own model
    fn add_provider(&mut self, config: &LLMProviderConfig) -> anyhow::Result<()> {
        let Some(first) = config.models.first() else {
            anyhow::bail!("No models configured");
        };
        let api_key = Self::resolve_api_key(&config.api_key)?;

        let mut adapters = Vec::with_capacity(config.models.len());
        for model_config in &config.models {
            adapters.push((model_config, Self::create_provider(config, &api_key, model_config)?));
        }

        for (model_config, adapter) in adapters {
            info!(
                "Mapping alias '{}' -> {} ({})",
                model_config.alias, model_config.model, config.name
            );
            if model_config.alias == first.alias {
                self.providers.insert(config.name.clone(), adapter.clone());
            }
            self.alias_map
                .insert(model_config.alias.clone(), (config.name.clone(), adapter));
        }
        Ok(())
    }

    /// Single-provider registry answering `aliases`
    pub fn from_provider(name: &str, provider: Arc<dyn LLMProvider>, aliases: &[&str]) -> Self {
        let mut registry = Self::empty();
        let aliases: Vec<String> = aliases.iter().map(|a| a.to_string()).collect();
        registry.insert(name, provider, &aliases);
        registry
    }

    pub fn with_fallback(mut self, provider_name: impl Into<String>) -> Self {
        self.fallback_provider = Some(provider_name.into());
        self
    }

    fn create_provider(
        config: &LLMProviderConfig,
        api_key: &str,
        model_config: &ModelConfig,
    ) -> anyhow::Result<Arc<dyn LLMProvider>> {
        let api_key = api_key.to_string();
        let model = model_config.model.clone();

        let provider: Arc<dyn LLMProvider> = match config.provider_type.as_str() {
            "openai" => Arc::new(OpenAIAdapter::new(config.endpoint.clone(), api_key, model)),
            "openai-compatible" => Arc::new(
                OpenAIAdapter::new(config.endpoint.clone(), api_key, model).named("openai-compatible"),
            ),
            "ollama" => Arc::new(OllamaAdapter::new(config.endpoint.clone(), model)),
            _ => anyhow::bail!("Unsupported provider type: {}", config.provider_type),
        };

        Ok(provider)
    }

    /// Supports "env:VAR_NAME" indirection
    fn resolve_api_key(key: &Option<String>) -> anyhow::Result<String> {
        match key {
            Some(k) => match k.strip_prefix("env:") {
                Some(var_name) => std::env::var(var_name)
                    .map_err(|_| anyhow::anyhow!("Environment variable not set: {}", var_name)),
                None => Ok(k.clone()),
            },
            // Local providers without auth
            None => Ok(String::new()),
        }
    }

    /// Adapter answering `alias`; unknown aliases fall back to the default provider's first model
    pub fn resolve(&self, alias: &str) -> Result<(String, Arc<dyn LLMProvider>), LLMError> {
        if let Some((provider_name, provider)) = self.alias_map.get(alias) {
            return Ok((provider_name.clone(), provider.clone()));
        }

        let provider_name = self
            .default_provider
            .as_ref()
            .ok_or_else(|| LLMError::ModelNotFound(format!("Model alias '{}' not found", alias)))?;

        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| LLMError::Provider(format!("Provider '{}' not found", provider_name)))?;

        Ok((provider_name.clone(), provider.clone()))
    }

    pub fn fallback(&self) -> Option<(String, Arc<dyn LLMProvider>)> {
        let name = self.fallback_provider.as_ref()?;
        self.providers.get(name).map(|p| (name.clone(), p.clone()))
    }

    pub async fn health_check_all(&self) -> HashMap<String, Result<(), LLMError>> {
        let mut results = HashMap::new();
        for (name, provider) in &self.providers {
            results.insert(name.clone(), provider.health_check().await);
        }
        results
    }

    pub fn available_aliases(&self) -> Vec<String> {
        self.alias_map.keys().cloned().collect()
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.alias_map.contains_key(alias)
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::ModelConfig;

    fn ollama(name: &str, alias: &str) -> LLMProviderConfig {
        LLMProviderConfig {
            name: name.to_string(),
            provider_type: "ollama".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            api_key: None,
            enabled: true,
            models: vec![ModelConfig {
                alias: alias.to_string(),
                model: "llama3.2".to_string(),
                context_window: 8192,
            }],
        }
    }

    #[test]
    fn test_registry_creation() {
        let mut spec = AardConfigSpec::default();
        spec.llm_providers.push(ollama("local", "default"));
        let mut disabled = ollama("off", "fast");
        disabled.enabled = false;
        spec.llm_providers.push(disabled);

        let registry = ProviderRegistry::from_config(&spec).unwrap();
        assert!(registry.has_alias("default"));
        assert!(!registry.has_alias("fast"));
        assert_eq!(registry.provider_count(), 1);
        assert_eq!(registry.resolve("default").unwrap().0, "local");
    }

    #[test]
    fn test_unknown_alias_uses_default_provider() {
        let mut spec = AardConfigSpec::default();
        spec.llm_providers.push(ollama("local", "default"));
        spec.llm_selection.default_provider = Some("local".into());

        let registry = ProviderRegistry::from_config(&spec).unwrap();
        assert_eq!(registry.resolve("smart").unwrap().0, "local");
    }

    #[test]
    fn test_unknown_alias_without_default_fails() {
        let registry = ProviderRegistry::empty();
        assert!(matches!(registry.resolve("default"), Err(LLMError::ModelNotFound(_))));
    }

    #[test]
    fn test_unsupported_type_is_skipped() {
        let mut spec = AardConfigSpec::default();
        let mut bad = ollama("weird", "default");
        bad.provider_type = "carrier-pigeon".into();
        spec.llm_providers.push(bad);

        let registry = ProviderRegistry::from_config(&spec).unwrap();
        assert_eq!(registry.provider_count(), 0);
    }

    #[tokio::test]
    async fn test_each_alias_calls_its_own_model() {
        let mut server = mockito::Server::new_async().await;
        let reply = r#"{"message":{"role":"assistant","content":"ok"},"done":true}"#;
        let small = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"model": "small-model"})))
            .with_status(200)
            .with_body(reply)
            .expect(0)
            .create_async()
            .await;
        let big = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"model": "big-model"})))
            .with_status(200)
            .with_body(reply)
            .expect(1)
            .create_async()
            .await;

        let mut config = ollama("local", "fast");
        config.endpoint = server.url();
        config.models[0].model = "small-model".to_string();
        config.models.push(ModelConfig {
            alias: "large".to_string(),
            model: "big-model".to_string(),
            context_window: 32768,
        });
        let mut spec = AardConfigSpec::default();
        spec.llm_providers.push(config);

        let registry = ProviderRegistry::from_config(&spec).unwrap();
        assert_eq!(registry.provider_count(), 1);
        let (name, provider) = registry.resolve("large").unwrap();
        assert_eq!(name, "local");
        provider
            .generate("s", "c", &crate::domain::llm::GenerationOptions::default())
            .await
            .unwrap();

        big.assert_async().await;
        small.assert_async().await;
    }
}
