// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// AARD Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing:
// - Node identity
// - LLM providers and model aliases (BYOLLM)
// - Provider selection, retry and pool sizing
// - Pipeline bounds (re-plan limit, stage attempts, timeouts, autonomy)
// - Storage backend, network and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::events::PipelineStage;
use crate::domain::task::AutonomyLevel;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "AardConfig";

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AardConfigManifest {
    /// Must be "100monkeys.ai/v1"
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Must be "AardConfig"
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: AardConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AardConfigSpec {
    #[serde(default)]
    pub node: NodeIdentity,

    #[serde(default)]
    pub llm_providers: Vec<LLMProviderConfig>,

    #[serde(default)]
    pub llm_selection: LLMSelection,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            region: None,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMProviderConfig {
    /// Unique provider name (e.g. "ollama-local")
    pub name: String,

    /// "ollama", "openai" or "openai-compatible"
    #[serde(rename = "type")]
    pub provider_type: String,

    pub endpoint: String,

    /// Supports "env:VAR_NAME" indirection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Alias referenced by the pipeline (e.g. "default", "fast")
    pub alias: String,

    /// Model identifier on the provider API
    pub model: String,

    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMSelection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Size of the shared LLM request pool; excess callers queue
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Planning re-entries allowed after validator_b rejections
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,

    /// Attempts per stage when the LLM output is unusable
    #[serde(default = "default_stage_attempts")]
    pub stage_attempts: u32,

    #[serde(default = "default_workflow_timeout", with = "humantime_serde")]
    pub workflow_timeout: Duration,

    #[serde(default = "default_approval_timeout", with = "humantime_serde")]
    pub approval_timeout: Duration,

    #[serde(default)]
    pub default_autonomy: AutonomyLevel,

    #[serde(default = "default_true")]
    pub replan_on_execution_failure: bool,

    #[serde(default = "default_model_alias")]
    pub model_alias: String,

    /// Per-stage model alias overrides
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub stage_models: HashMap<PipelineStage, String>,
}

impl PipelineConfig {
    pub fn model_for(&self, stage: PipelineStage) -> &str {
        self.stage_models
            .get(&stage)
            .map(String::as_str)
            .unwrap_or(self.model_alias.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_heartbeat", with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

fn default_true() -> bool {
    true
}

fn default_context_window() -> u32 {
    8192
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_max_concurrent_requests() -> usize {
    4
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_replans() -> u32 {
    3
}

fn default_stage_attempts() -> u32 {
    2
}

fn default_workflow_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_approval_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_model_alias() -> String {
    "default".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_heartbeat() -> Duration {
    Duration::from_secs(60)
}

impl Default for LLMSelection {
    fn default() -> Self {
        Self {
            default_provider: None,
            fallback_provider: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_replans: default_max_replans(),
            stage_attempts: default_stage_attempts(),
            workflow_timeout: default_workflow_timeout(),
            approval_timeout: default_approval_timeout(),
            default_autonomy: AutonomyLevel::default(),
            replan_on_execution_failure: true,
            model_alias: default_model_alias(),
            stage_models: HashMap::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::InMemory,
            connection_string: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_interval: default_heartbeat(),
        }
    }
}

impl Default for AardConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "aard-node".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: AardConfigSpec::default(),
        }
    }
}

impl AardConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. AARD_CONFIG_PATH environment variable
    /// 2. ./aard-config.yaml (working directory)
    /// 3. ~/.aard/config.yaml (user home)
    /// 4. /etc/aard/config.yaml (system, Unix) or C:\ProgramData\Aard\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AARD_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./aard-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".aard").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/aard/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Aard\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("AARD_DATABASE_URL").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: AARD_DATABASE_URL (postgres backend)");
            self.spec.storage.backend = StorageBackendKind::Postgres;
            self.spec.storage.connection_string = Some(url);
        }

        if let Some(val) = lookup("AARD_MAX_REPLANS") {
            match val.parse::<u32>() {
                Ok(n) => {
                    tracing::info!("Environment override: AARD_MAX_REPLANS={}", n);
                    self.spec.pipeline.max_replans = n;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for AARD_MAX_REPLANS: '{}'. Expected an integer. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Some(addr) = lookup("AARD_BIND_ADDRESS").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: AARD_BIND_ADDRESS={}", addr);
            self.spec.network.bind_address = addr;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        for provider in &self.spec.llm_providers {
            if provider.name.is_empty() {
                anyhow::bail!("LLM provider name cannot be empty");
            }

            if provider.endpoint.is_empty() {
                anyhow::bail!("LLM provider endpoint cannot be empty for: {}", provider.name);
            }

            if provider.models.is_empty() {
                anyhow::bail!("LLM provider must have at least one model: {}", provider.name);
            }

            for model in &provider.models {
                if model.alias.is_empty() {
                    anyhow::bail!("Model alias cannot be empty in provider: {}", provider.name);
                }
                if model.model.is_empty() {
                    anyhow::bail!("Model identifier cannot be empty for alias: {}", model.alias);
                }
            }
        }

        let selection = &self.spec.llm_selection;
        for (label, name) in [
            ("Default", &selection.default_provider),
            ("Fallback", &selection.fallback_provider),
        ] {
            if let Some(name) = name {
                if !self.spec.llm_providers.iter().any(|p| &p.name == name) {
                    anyhow::bail!("{} provider '{}' not found in llm_providers", label, name);
                }
            }
        }

        if selection.max_concurrent_requests == 0 {
            anyhow::bail!("llm_selection.max_concurrent_requests must be at least 1");
        }

        let pipeline = &self.spec.pipeline;
        if pipeline.max_replans == 0 {
            anyhow::bail!("pipeline.max_replans must be at least 1");
        }
        if pipeline.stage_attempts == 0 {
            anyhow::bail!("pipeline.stage_attempts must be at least 1");
        }

        if self.spec.storage.backend == StorageBackendKind::Postgres
            && self
                .spec
                .storage
                .connection_string
                .as_deref()
                .map_or(true, str::is_empty)
        {
            anyhow::bail!("storage.connection_string is required for the postgres backend");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = AardConfigManifest::default();
        assert_eq!(manifest.api_version, "100monkeys.ai/v1");
        assert_eq!(manifest.kind, "AardConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.pipeline.max_replans, 3);
        assert_eq!(manifest.spec.pipeline.stage_attempts, 2);
        assert_eq!(manifest.spec.llm_selection.request_timeout, Duration::from_secs(60));
        assert_eq!(manifest.spec.network.port, 8000);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_yaml_with_humantime() {
        let yaml = r#"
apiVersion: 100monkeys.ai/v1
kind: AardConfig
metadata:
  name: lab
spec:
  llm_providers:
    - name: local
      type: ollama
      endpoint: http://localhost:11434
      models:
        - alias: default
          model: llama3.2:latest
  llm_selection:
    request_timeout: 2m
  pipeline:
    workflow_timeout: 10m
    default_autonomy: autonomous
    stage_models:
      planning: smart
"#;
        let manifest = AardConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.llm_selection.request_timeout, Duration::from_secs(120));
        assert_eq!(manifest.spec.pipeline.workflow_timeout, Duration::from_secs(600));
        assert_eq!(manifest.spec.pipeline.default_autonomy, AutonomyLevel::Autonomous);
        assert_eq!(manifest.spec.pipeline.model_for(PipelineStage::Planning), "smart");
        assert_eq!(manifest.spec.pipeline.model_for(PipelineStage::Routing), "default");
        assert_eq!(manifest.spec.llm_providers[0].models[0].context_window, 8192);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aard-config.yaml");

        let mut manifest = AardConfigManifest::default();
        manifest.metadata.name = "roundtrip".to_string();
        manifest.spec.pipeline.max_replans = 5;
        manifest.to_yaml_file(&path).unwrap();

        let loaded = AardConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "roundtrip");
        assert_eq!(loaded.spec.pipeline.max_replans, 5);
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AardConfigManifest::load_or_default(Some(dir.path().join("nope.yaml"))).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("AARD_DATABASE_URL", "postgres://aard@localhost/aard"),
            ("AARD_MAX_REPLANS", "7"),
            ("AARD_BIND_ADDRESS", "0.0.0.0"),
        ]);
        let mut manifest = AardConfigManifest::default();
        manifest.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(manifest.spec.storage.backend, StorageBackendKind::Postgres);
        assert_eq!(
            manifest.spec.storage.connection_string.as_deref(),
            Some("postgres://aard@localhost/aard")
        );
        assert_eq!(manifest.spec.pipeline.max_replans, 7);
        assert_eq!(manifest.spec.network.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_invalid_replan_override_ignored() {
        let mut manifest = AardConfigManifest::default();
        manifest.apply_overrides_from(|k| (k == "AARD_MAX_REPLANS").then(|| "many".to_string()));
        assert_eq!(manifest.spec.pipeline.max_replans, 3);
    }

    #[test]
    fn test_validation() {
        let mut manifest = AardConfigManifest::default();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.pipeline.max_replans = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.pipeline.max_replans = 3;

        manifest.spec.storage.backend = StorageBackendKind::Postgres;
        assert!(manifest.validate().is_err());
        manifest.spec.storage.backend = StorageBackendKind::InMemory;

        manifest.spec.llm_selection.fallback_provider = Some("missing".to_string());
        assert!(manifest.validate().is_err());
        manifest.spec.llm_selection.fallback_provider = None;

        manifest.spec.llm_providers.push(LLMProviderConfig {
            name: "invalid".to_string(),
            provider_type: "openai".to_string(),
            endpoint: "https://api.openai.com".to_string(),
            api_key: None,
            enabled: true,
            models: vec![],
        });
        assert!(manifest.validate().is_err());
    }
}
