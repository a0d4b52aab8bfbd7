// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use aard_core::domain::config::{AardConfigManifest, LLMProviderConfig, ModelConfig};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./aard-config.yaml)
        #[arg(short, long, default_value = "./aard-config.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output } => generate(output),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = AardConfigManifest::load_or_default(config_override.clone()).context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. AARD_CONFIG_PATH: {}",
            std::env::var("AARD_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./aard-config.yaml");
        println!("  4. ~/.aard/config.yaml");
        println!("  5. /etc/aard/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node Identity:".bold());
    println!("  ID: {}", spec.node.id);
    if let Some(region) = &spec.node.region {
        println!("  Region: {}", region);
    }
    println!();

    println!("{}", "LLM Providers:".bold());
    for provider in &spec.llm_providers {
        let state = if provider.enabled { "".normal() } else { " (disabled)".dimmed() };
        println!("  {} ({}){}", provider.name.bold(), provider.provider_type, state);
        println!("    Endpoint: {}", provider.endpoint);
        for model in &provider.models {
            println!("      - {} → {}", model.alias, model.model);
        }
    }
    println!(
        "  Default provider: {}",
        spec.llm_selection.default_provider.as_deref().unwrap_or("(none)")
    );
    if let Some(fallback) = &spec.llm_selection.fallback_provider {
        println!("  Fallback provider: {}", fallback);
    }
    println!();

    println!("{}", "Pipeline:".bold());
    println!("  Max replans: {}", spec.pipeline.max_replans);
    println!("  Default autonomy: {}", spec.pipeline.default_autonomy.as_str());
    println!("  Model alias: {}", spec.pipeline.model_alias);
    println!("  Workflow timeout: {:?}", spec.pipeline.workflow_timeout);
    println!("  Approval timeout: {:?}", spec.pipeline.approval_timeout);
    println!();

    println!("{}", "Storage:".bold());
    println!("  Backend: {:?}", spec.storage.backend);
    println!();

    println!("{}", "Network:".bold());
    println!("  API: {}:{}", spec.network.bind_address, spec.network.port);
    if spec.observability.metrics.enabled {
        println!("  Metrics: {}:{}", spec.network.bind_address, spec.observability.metrics.port);
    }

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = AardConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: PathBuf) -> Result<()> {
    sample_manifest().to_yaml_file(&output)?;
    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );
    Ok(())
}

/// Defaults plus one local Ollama provider
fn sample_manifest() -> AardConfigManifest {
    let mut manifest = AardConfigManifest::default();
    manifest.spec.llm_providers.push(LLMProviderConfig {
        name: "local".to_string(),
        provider_type: "ollama".to_string(),
        endpoint: "http://localhost:11434".to_string(),
        api_key: None,
        enabled: true,
        models: vec![ModelConfig {
            alias: manifest.spec.pipeline.model_alias.clone(),
            model: "llama3.2".to_string(),
            context_window: 8192,
        }],
    });
    manifest.spec.llm_selection.default_provider = Some("local".to_string());
    manifest
}
