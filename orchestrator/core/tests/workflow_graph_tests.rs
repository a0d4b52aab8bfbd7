// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow graph reconstruction and live event delivery

mod common;

use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;

use aard_core::application::orchestrator::{WorkflowRequest, WorkflowStatus};
use aard_core::domain::events::{EntityType, EventStatus, NewWorkflowEvent, PipelineStage, WorkflowId};

use common::HarnessBuilder;

#[tokio::test]
async fn test_completed_workflow_graph_is_a_single_chain() {
    let harness = HarnessBuilder::new().build().await;
    let report = harness
        .orchestrator
        .start(WorkflowRequest::new("Book a meeting room"))
        .await
        .unwrap();

    let graph = harness
        .orchestrator
        .services()
        .events
        .get_workflow(report.workflow_id)
        .await
        .unwrap();

    assert_eq!(graph.events.len(), 7);
    assert_eq!(graph.roots, vec![graph.events[0].id]);
    assert_eq!(graph.stages(), PipelineStage::ALL.to_vec());
    for pair in graph.events.windows(2) {
        assert_eq!(graph.children_of(pair[0].id), &[pair[1].id]);
        assert_eq!(graph.parent_of(pair[1].id).map(|e| e.id), Some(pair[0].id));
    }
    assert!(graph.children_of(graph.events[6].id).is_empty());

    let types: HashSet<EntityType> = graph.entities.iter().map(|e| e.entity_type).collect();
    assert_eq!(
        types,
        HashSet::from([EntityType::Task, EntityType::Plan, EntityType::Tool])
    );
    let tool = graph
        .entities
        .iter()
        .find(|e| e.entity_type == EntityType::Tool)
        .unwrap();
    assert_eq!(tool.name, "calendar");
    assert_eq!(tool.status, "active");
    let task = graph
        .entities
        .iter()
        .find(|e| e.entity_type == EntityType::Task)
        .unwrap();
    assert_eq!(task.status, "completed");
}

#[tokio::test]
async fn test_replans_show_up_in_stage_counts() {
    let harness = HarnessBuilder::new()
        .outputs(
            PipelineStage::ValidatorB,
            vec![
                json!({"status": "rejected", "reasons": ["too vague"]}),
                json!({"status": "approved"}),
            ],
        )
        .build()
        .await;
    let report = harness
        .orchestrator
        .start(WorkflowRequest::new("Book a meeting room"))
        .await
        .unwrap();

    let graph = harness
        .orchestrator
        .services()
        .events
        .get_workflow(report.workflow_id)
        .await
        .unwrap();
    let counts = graph.stage_counts();
    assert_eq!(counts[&PipelineStage::Planning], 2);
    assert_eq!(counts[&PipelineStage::ValidatorB], 2);
    assert_eq!(counts[&PipelineStage::Execution], 1);

    // Both plan versions are referenced entities
    let plans = graph
        .entities
        .iter()
        .filter(|e| e.entity_type == EntityType::Plan)
        .count();
    assert_eq!(plans, 2);
}

#[tokio::test]
async fn test_workflows_do_not_share_events() {
    let harness = HarnessBuilder::new().build().await;
    let first = harness
        .orchestrator
        .start(WorkflowRequest::new("Book a meeting room"))
        .await
        .unwrap();
    let second = harness
        .orchestrator
        .start(WorkflowRequest::new("Book another meeting room"))
        .await
        .unwrap();
    assert_ne!(first.workflow_id, second.workflow_id);
    assert_ne!(first.task_id, second.task_id);

    let events = &harness.orchestrator.services().events;
    let first_events = events.events_for(first.workflow_id).await.unwrap();
    assert!(first_events.iter().all(|e| e.workflow_id == first.workflow_id));
    assert_eq!(first_events.len(), 7);

    let recent = events.recent(3).await.unwrap();
    assert_eq!(recent.len(), 3);
    assert!(recent.iter().all(|e| e.workflow_id == second.workflow_id));

    let unknown = events.get_workflow(WorkflowId::new()).await.unwrap();
    assert!(unknown.events.is_empty());
    assert!(unknown.roots.is_empty());
}

#[tokio::test]
async fn test_foreign_parent_is_rendered_as_root() {
    let harness = HarnessBuilder::new().build().await;
    let report = harness
        .orchestrator
        .start(WorkflowRequest::new("Book a meeting room"))
        .await
        .unwrap();

    let other = WorkflowId::new();
    let foreign = NewWorkflowEvent::new(
        other,
        PipelineStage::Interpretation,
        "test",
        EventStatus::Completed,
        "borrowed parent",
    )
    .parent(Some(report.events[0].id));

    let events = &harness.orchestrator.services().events;
    let stored = events.emit(foreign).await.unwrap();

    let graph = events.get_workflow(other).await.unwrap();
    assert_eq!(graph.roots, vec![stored.id]);

    // The original workflow's graph is untouched
    let original = events.get_workflow(report.workflow_id).await.unwrap();
    assert_eq!(original.events.len(), 7);
    assert_eq!(original.children_of(report.events[0].id), &[report.events[1].id]);
}

#[tokio::test]
async fn test_subscriber_receives_resumed_events_in_order() {
    let harness = HarnessBuilder::new()
        .outputs(
            PipelineStage::ValidatorA,
            vec![
                json!({"status": "clarification_required", "questions": ["Which day?"]}),
                json!({"status": "approved"}),
            ],
        )
        .build()
        .await;

    let suspended = harness
        .orchestrator
        .start(WorkflowRequest::new("Book a meeting room"))
        .await
        .unwrap();
    assert_eq!(suspended.status, WorkflowStatus::AwaitingClarification);

    let mut receiver = harness.orchestrator.services().events.subscribe(suspended.workflow_id);
    let resumed = harness
        .orchestrator
        .resume(suspended.workflow_id, "Tuesday")
        .await
        .unwrap();
    assert_eq!(resumed.status, WorkflowStatus::Completed);

    let mut delivered = Vec::new();
    for _ in 0..6 {
        let event = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        delivered.push(event);
    }

    let stages: Vec<PipelineStage> = delivered.iter().map(|e| e.stage).collect();
    assert_eq!(stages, PipelineStage::ALL[1..].to_vec());
    let sequences: Vec<u64> = delivered.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![3, 4, 5, 6, 7, 8]);
}
