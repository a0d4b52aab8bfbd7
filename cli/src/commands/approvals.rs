// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Approval gate commands
//!
//! Commands: list, approve, reject

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use crate::daemon::DaemonClient;

#[derive(Subcommand)]
pub enum ApprovalCommand {
    /// List pending approval requests
    List,

    /// Approve a pending request
    Approve {
        #[arg(value_name = "APPROVAL_ID")]
        id: String,

        /// Operator recorded on the decision
        #[arg(long, default_value = "operator")]
        actor: String,

        #[arg(long)]
        comment: Option<String>,
    },

    /// Reject a pending request
    Reject {
        #[arg(value_name = "APPROVAL_ID")]
        id: String,

        /// Operator recorded on the decision
        #[arg(long, default_value = "operator")]
        actor: String,

        #[arg(long)]
        reason: Option<String>,
    },
}

pub async fn handle_command(command: ApprovalCommand, client: &DaemonClient) -> Result<()> {
    match command {
        ApprovalCommand::List => list(client).await,
        ApprovalCommand::Approve { id, actor, comment } => {
            let resolved = client.approve(&id, &actor, comment.as_deref()).await?;
            println!("{}", format!("✓ Approval {} approved by {}", resolved.id, actor).green());
            Ok(())
        }
        ApprovalCommand::Reject { id, actor, reason } => {
            let resolved = client.reject(&id, &actor, reason.as_deref()).await?;
            println!("{}", format!("✓ Approval {} rejected by {}", resolved.id, actor).yellow());
            Ok(())
        }
    }
}

async fn list(client: &DaemonClient) -> Result<()> {
    let pending = client.pending_approvals().await?;
    if pending.is_empty() {
        println!("{}", "No pending approvals".dimmed());
        return Ok(());
    }

    println!("{}", "Pending approvals:".bold());
    for request in &pending {
        println!("  {} {}", request.id.to_string().bold(), request.kind.as_str());
        println!("    {}", request.summary);
        if let Some(workflow_id) = &request.workflow_id {
            println!("    Workflow: {}", workflow_id);
        }
        if let Some(plan_id) = &request.plan_id {
            println!("    Plan: {}", plan_id);
        }
        println!("    Requested: {}", request.requested_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}
