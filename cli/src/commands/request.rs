// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow commands
//!
//! Commands: request, resume, cancel, events

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use aard_core::application::orchestrator::{WorkflowReport, WorkflowRequest, WorkflowStatus};
use aard_core::domain::events::{EventStatus, WorkflowEvent};
use aard_core::domain::task::AutonomyLevel;

use crate::daemon::client::Submission;
use crate::daemon::DaemonClient;

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Natural-language request
    #[arg(value_name = "REQUEST")]
    pub request: String,

    /// manual, supervised or autonomous (default: server configuration)
    #[arg(short, long, value_parser = parse_autonomy)]
    pub autonomy: Option<AutonomyLevel>,

    /// Experiment whose prompt assignments apply
    #[arg(short, long, value_name = "EXPERIMENT_ID")]
    pub experiment: Option<String>,

    /// Recorded as the task creator
    #[arg(long, value_name = "ACTOR")]
    pub created_by: Option<String>,

    /// Block until the workflow stops and print its report
    #[arg(short, long)]
    pub wait: bool,
}

fn parse_autonomy(s: &str) -> Result<AutonomyLevel, String> {
    AutonomyLevel::parse(s)
        .ok_or_else(|| format!("unknown autonomy level '{}' (manual, supervised, autonomous)", s))
}

impl RequestArgs {
    fn into_request(self) -> WorkflowRequest {
        let mut request = WorkflowRequest::new(self.request);
        if let Some(autonomy) = self.autonomy {
            request = request.autonomy(autonomy);
        }
        if let Some(experiment) = self.experiment {
            request = request.experiment(experiment);
        }
        if let Some(actor) = self.created_by {
            request = request.created_by(actor);
        }
        request
    }
}

pub async fn submit(client: &DaemonClient, args: RequestArgs) -> Result<()> {
    let wait = args.wait;
    let request = args.into_request();
    if request.request.trim().is_empty() {
        anyhow::bail!("Request must not be empty");
    }

    match client.submit(&request, wait).await? {
        Submission::Accepted(workflow_id) => {
            println!("{}", format!("✓ Workflow started: {}", workflow_id).green());
            println!("  Follow with: aard events --workflow {}", workflow_id);
        }
        Submission::Finished(report) => print_report(&report),
    }
    Ok(())
}

pub async fn resume(client: &DaemonClient, workflow_id: &str, answer: &str) -> Result<()> {
    let report = client
        .resume(workflow_id, answer)
        .await
        .with_context(|| format!("Failed to resume workflow {}", workflow_id))?;
    print_report(&report);
    Ok(())
}

pub async fn cancel(client: &DaemonClient, workflow_id: &str) -> Result<()> {
    client.cancel(workflow_id).await?;
    println!("{}", format!("✓ Workflow {} cancelled", workflow_id).green());
    Ok(())
}

pub async fn events(client: &DaemonClient, workflow_id: Option<&str>, limit: usize, json: bool) -> Result<()> {
    let events = client.events(workflow_id, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("{}", "No events".dimmed());
        return Ok(());
    }
    for event in &events {
        print_event(event);
    }
    Ok(())
}

pub fn print_report(report: &WorkflowReport) {
    println!("Workflow {}", report.workflow_id.to_string().bold());
    println!("  Task: {}", report.task_id);
    println!("  Status: {}", format_status(report.status));
    if let Some(code) = &report.reason_code {
        println!("  Reason: {}", code.red());
    }
    if let Some(error) = &report.error {
        println!("  Error: {}", error);
    }
    if let (Some(plan), Some(version)) = (&report.plan_id, report.plan_version) {
        println!("  Plan: {} (v{}, {} replans)", plan, version, report.replans);
    }
    if !report.questions.is_empty() {
        println!();
        println!("{}", "Clarification needed:".bold());
        for question in &report.questions {
            println!("  - {}", question);
        }
        println!(
            "  Answer with: aard resume {} \"<answer>\"",
            report.workflow_id
        );
    }
    if let Some(reflection) = &report.reflection {
        println!();
        println!("{}", "Reflection:".bold());
        println!("  {}", reflection.summary);
        for lesson in &reflection.lessons {
            println!("  - {}", lesson);
        }
    }
    println!();
    println!("{}", "Events:".bold());
    for event in &report.events {
        print_event(event);
    }
}

pub fn print_event(event: &WorkflowEvent) {
    let status = match event.status {
        EventStatus::Completed => event.status.as_str().green(),
        EventStatus::Failed => event.status.as_str().red(),
        _ => event.status.as_str().yellow(),
    };
    let reason = event
        .reason_code
        .as_deref()
        .map(|code| format!(" [{}]", code))
        .unwrap_or_default();
    println!(
        "  {} {:>3} {:<18} {:<22} {}{} ({})",
        event.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
        event.sequence,
        event.stage.as_str(),
        event.event_type,
        status,
        reason,
        event.decision_source.as_str(),
    );
}

fn format_status(status: WorkflowStatus) -> colored::ColoredString {
    match status {
        WorkflowStatus::Completed => status.as_str().green(),
        WorkflowStatus::AwaitingClarification => status.as_str().yellow(),
        WorkflowStatus::Failed => status.as_str().red(),
        WorkflowStatus::Cancelled => status.as_str().dimmed(),
    }
}
