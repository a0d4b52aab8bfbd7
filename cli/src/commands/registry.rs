// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Capability registry commands
//!
//! Commands: list, register, activate, deprecate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use aard_core::domain::registry::{CapabilityDescriptor, CapabilityFilter, EntryKind, EntryStatus};

use crate::daemon::DaemonClient;

#[derive(Subcommand)]
pub enum RegistryCommand {
    /// List registry entries
    List {
        /// Only entries declaring this capability
        #[arg(long)]
        capability: Option<String>,

        /// agent, tool or capability
        #[arg(long, value_parser = parse_kind)]
        kind: Option<EntryKind>,

        /// Only active entries
        #[arg(long)]
        active: bool,
    },

    /// Register an entry from a YAML or JSON descriptor
    Register {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Make an entry selectable
    Activate {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Retire an entry from selection
    Deprecate {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

fn parse_kind(s: &str) -> Result<EntryKind, String> {
    EntryKind::parse(s).ok_or_else(|| format!("unknown entry kind '{}' (agent, tool, capability)", s))
}

pub async fn handle_command(command: RegistryCommand, client: &DaemonClient) -> Result<()> {
    match command {
        RegistryCommand::List { capability, kind, active } => {
            let filter = CapabilityFilter {
                kind,
                capability,
                status: None,
                active_only: active,
            };
            list(client, &filter).await
        }
        RegistryCommand::Register { file } => {
            let descriptor = read_descriptor(&file)?;
            println!("Registering {} {}", descriptor.kind.as_str(), descriptor.name.bold());
            let id = client.register(&descriptor).await?;
            println!("{}", format!("✓ Registered: {}", id).green());
            Ok(())
        }
        RegistryCommand::Activate { name } => {
            let entry = client.set_entry_status(&name, true).await?;
            println!("{}", format!("✓ {} is {}", entry.name, entry.status).green());
            Ok(())
        }
        RegistryCommand::Deprecate { name } => {
            let entry = client.set_entry_status(&name, false).await?;
            println!("{}", format!("✓ {} is {}", entry.name, entry.status).yellow());
            Ok(())
        }
    }
}

async fn list(client: &DaemonClient, filter: &CapabilityFilter) -> Result<()> {
    let entries = client.list_registry(filter).await?;
    if entries.is_empty() {
        println!("{}", "No registry entries".dimmed());
        return Ok(());
    }

    for entry in &entries {
        let status = match entry.status {
            EntryStatus::Active => entry.status.as_str().green(),
            EntryStatus::Deprecated => entry.status.as_str().red(),
            _ => entry.status.as_str().yellow(),
        };
        println!(
            "  {} {} [{}] {}",
            entry.name.bold(),
            entry.kind.as_str(),
            status,
            entry.id.to_string().dimmed()
        );
        if !entry.description.is_empty() {
            println!("    {}", entry.description);
        }
        if !entry.capabilities.is_empty() {
            println!("    Capabilities: {}", entry.capabilities.join(", "));
        }
    }
    Ok(())
}

/// Descriptor from a `.json` file, or YAML for anything else
pub fn read_descriptor(path: &Path) -> Result<CapabilityDescriptor> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read descriptor: {:?}", path))?;
    let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
    if is_json {
        serde_json::from_str(&content).context("Failed to parse descriptor JSON")
    } else {
        serde_yaml::from_str(&content).context("Failed to parse descriptor YAML")
    }
}
