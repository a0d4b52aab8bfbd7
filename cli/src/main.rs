// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AARD CLI
//!
//! The `aard` binary runs the decision pipeline server and talks to it.
//!
//! ## Commands
//!
//! - `aard serve` - Run the HTTP/WebSocket API with the configured storage and LLM providers
//! - `aard request|resume|cancel|events` - Submit requests and follow their workflows
//! - `aard approvals list|approve|reject` - Resolve plan approval gates
//! - `aard registry list|register|activate|deprecate` - Manage the capability catalog
//! - `aard prompts list|register|assign|resolve` - Manage versioned prompts
//! - `aard config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use aard_core::domain::config::AardConfigManifest;
use aard_orchestrator::commands::{
    self, ApprovalCommand, ConfigCommand, PromptCommand, RegistryCommand, RequestArgs,
};
use aard_orchestrator::daemon::{self, DaemonClient};
use aard_orchestrator::logging::init_logging;

/// AARD - human-in-the-loop LLM decision pipeline
#[derive(Parser)]
#[command(name = "aard")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "AARD_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Server host used by client commands
    #[arg(long, global = true, env = "AARD_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port used by client commands
    #[arg(long, global = true, env = "AARD_PORT", default_value = "8000")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AARD_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server
    #[command(name = "serve")]
    Serve,

    /// Submit a natural-language request
    #[command(name = "request")]
    Request(RequestArgs),

    /// Answer the clarification questions of a suspended workflow
    #[command(name = "resume")]
    Resume {
        #[arg(value_name = "WORKFLOW_ID")]
        workflow_id: String,

        #[arg(value_name = "ANSWER")]
        answer: String,
    },

    /// Cancel a running or suspended workflow
    #[command(name = "cancel")]
    Cancel {
        #[arg(value_name = "WORKFLOW_ID")]
        workflow_id: String,
    },

    /// Show workflow events
    #[command(name = "events")]
    Events {
        /// Only events of this workflow
        #[arg(short, long, value_name = "WORKFLOW_ID")]
        workflow: Option<String>,

        /// Number of recent events when no workflow is given
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Plan approval gates
    #[command(name = "approvals")]
    Approvals {
        #[command(subcommand)]
        command: ApprovalCommand,
    },

    /// Capability registry
    #[command(name = "registry")]
    Registry {
        #[command(subcommand)]
        command: RegistryCommand,
    },

    /// Versioned prompts and assignments
    #[command(name = "prompts")]
    Prompts {
        #[command(subcommand)]
        command: PromptCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        eprintln!("{}", "No command specified. Use --help for usage.".yellow());
        std::process::exit(1);
    };

    if let Commands::Serve = command {
        let config = AardConfigManifest::load_or_default(cli.config).context("Failed to load configuration")?;
        let logging = &config.spec.observability.logging;
        init_logging(cli.log_level.as_deref().unwrap_or(&logging.level), &logging.format)?;
        return daemon::server::serve(config).await;
    }

    init_logging(cli.log_level.as_deref().unwrap_or("warn"), "text")?;

    if let Commands::Config { command } = command {
        return commands::config::handle_command(command, cli.config).await;
    }

    let client = DaemonClient::new(&cli.host, cli.port)?;
    match command {
        Commands::Request(args) => commands::request::submit(&client, args).await,
        Commands::Resume { workflow_id, answer } => commands::request::resume(&client, &workflow_id, &answer).await,
        Commands::Cancel { workflow_id } => commands::request::cancel(&client, &workflow_id).await,
        Commands::Events { workflow, limit, json } => {
            commands::request::events(&client, workflow.as_deref(), limit, json).await
        }
        Commands::Approvals { command } => commands::approvals::handle_command(command, &client).await,
        Commands::Registry { command } => commands::registry::handle_command(command, &client).await,
        Commands::Prompts { command } => commands::prompts::handle_command(command, &client).await,
        Commands::Serve | Commands::Config { .. } => Ok(()),
    }
}
