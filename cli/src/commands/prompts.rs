// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Prompt management commands
//!
//! Commands: list, register, assign, resolve

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use uuid::Uuid;

use aard_core::domain::prompt::AssignmentScope;
use aard_core::domain::registry::EntryId;

use crate::daemon::DaemonClient;

#[derive(Subcommand)]
pub enum PromptCommand {
    /// List every prompt version
    List,

    /// Register a new version of a named prompt
    Register {
        #[arg(long)]
        name: String,

        /// Component role the prompt is written for
        #[arg(long)]
        role: String,

        /// File holding the prompt text
        #[arg(long, value_name = "FILE")]
        file: PathBuf,

        #[arg(long)]
        created_by: Option<String>,
    },

    /// Point a role (optionally scoped) at a prompt version
    Assign {
        #[arg(long)]
        role: String,

        #[arg(long, value_name = "PROMPT_ID")]
        prompt_id: Uuid,

        #[arg(long)]
        version: u32,

        /// Scope to one registered agent
        #[arg(long, value_name = "ENTRY_ID", conflicts_with = "experiment")]
        agent: Option<Uuid>,

        /// Scope to one experiment
        #[arg(long, value_name = "EXPERIMENT_ID")]
        experiment: Option<String>,

        #[arg(long)]
        assigned_by: Option<String>,
    },

    /// Show which prompt a role resolves to
    Resolve {
        #[arg(long)]
        role: String,

        #[arg(long, value_name = "ENTRY_ID")]
        agent_id: Option<Uuid>,

        #[arg(long, value_name = "EXPERIMENT_ID")]
        experiment: Option<String>,
    },
}

pub async fn handle_command(command: PromptCommand, client: &DaemonClient) -> Result<()> {
    match command {
        PromptCommand::List => list(client).await,
        PromptCommand::Register {
            name,
            role,
            file,
            created_by,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read prompt file: {:?}", file))?;
            let prompt = client
                .register_prompt(&name, &role, &text, created_by.as_deref())
                .await?;
            println!(
                "{}",
                format!("✓ Registered {} v{} ({})", prompt.name, prompt.version, prompt.id).green()
            );
            Ok(())
        }
        PromptCommand::Assign {
            role,
            prompt_id,
            version,
            agent,
            experiment,
            assigned_by,
        } => {
            let scope = scope_from(agent, experiment);
            let assignment = client
                .assign_prompt(&role, &scope, &prompt_id.to_string(), version, assigned_by.as_deref())
                .await?;
            println!(
                "{}",
                format!(
                    "✓ {} [{}] -> {} v{}",
                    assignment.component_role, assignment.scope, assignment.prompt_id, assignment.version
                )
                .green()
            );
            Ok(())
        }
        PromptCommand::Resolve {
            role,
            agent_id,
            experiment,
        } => {
            let agent_id = agent_id.map(|id| id.to_string());
            let resolved = client
                .resolve_prompt(&role, agent_id.as_deref(), experiment.as_deref())
                .await?;
            println!(
                "{} [{}] -> {} v{}",
                resolved.component_role.to_string().bold(),
                resolved.scope,
                resolved.prompt_id,
                resolved.version
            );
            println!();
            println!("{}", resolved.text);
            Ok(())
        }
    }
}

fn scope_from(agent: Option<Uuid>, experiment: Option<String>) -> AssignmentScope {
    match (agent, experiment) {
        (Some(agent), _) => AssignmentScope::Agent(EntryId(agent)),
        (None, Some(experiment)) => AssignmentScope::Experiment(experiment),
        (None, None) => AssignmentScope::Global,
    }
}

async fn list(client: &DaemonClient) -> Result<()> {
    let prompts = client.list_prompts().await?;
    if prompts.is_empty() {
        println!("{}", "No prompts registered".dimmed());
        return Ok(());
    }
    for prompt in &prompts {
        println!(
            "  {} v{} ({}) {}",
            prompt.name.bold(),
            prompt.version,
            prompt.component_role,
            prompt.id.to_string().dimmed()
        );
    }
    Ok(())
}
