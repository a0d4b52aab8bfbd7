// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::approval::ApprovalId;
use crate::domain::events::{DecisionSource, EventId, EventStatus, PipelineStage, WorkflowEvent, WorkflowId};
use crate::domain::plan::PlanId;
use crate::domain::prompt::{ComponentRole, PromptId};
use crate::domain::registry::EntryId;
use crate::domain::repository::{RepositoryError, WorkflowEventRepository};
use crate::domain::task::TaskId;

pub struct PostgresWorkflowEventRepository {
    pool: PgPool,
}

impl PostgresWorkflowEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn event_from_row(row: &PgRow) -> Result<WorkflowEvent, RepositoryError> {
    let stage: String = row.try_get("stage")?;
    let status: String = row.try_get("status")?;
    let decision: String = row.try_get("decision_source")?;
    let sequence: i64 = row.try_get("sequence")?;

    Ok(WorkflowEvent {
        id: EventId(row.try_get("id")?),
        workflow_id: WorkflowId(row.try_get("workflow_id")?),
        sequence: sequence as u64,
        event_type: row.try_get("event_type")?,
        event_source: row.try_get("event_source")?,
        stage: stage
            .parse::<PipelineStage>()
            .map_err(|_| RepositoryError::Serialization(format!("Unknown stage: {}", stage)))?,
        status: EventStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Serialization(format!("Unknown event status: {}", status)))?,
        message: row.try_get("message")?,
        event_data: row.try_get("event_data")?,
        metadata: row.try_get("metadata")?,
        component_role: row.try_get::<Option<String>, _>("component_role")?.map(ComponentRole::new),
        prompt_id: row.try_get::<Option<Uuid>, _>("prompt_id")?.map(PromptId),
        prompt_version: row.try_get::<Option<i32>, _>("prompt_version")?.map(|v| v as u32),
        decision_source: DecisionSource::parse(&decision)
            .ok_or_else(|| RepositoryError::Serialization(format!("Unknown decision source: {}", decision)))?,
        reason_code: row.try_get("reason_code")?,
        task_id: row.try_get::<Option<Uuid>, _>("task_id")?.map(TaskId),
        plan_id: row.try_get::<Option<Uuid>, _>("plan_id")?.map(PlanId),
        tool_id: row.try_get::<Option<Uuid>, _>("tool_id")?.map(EntryId),
        approval_id: row.try_get::<Option<Uuid>, _>("approval_id")?.map(ApprovalId),
        parent_event_id: row.try_get::<Option<Uuid>, _>("parent_event_id")?.map(EventId),
        timestamp: row.try_get("timestamp")?,
        duration_ms: row.try_get::<Option<i64>, _>("duration_ms")?.map(|d| d as u64),
    })
}

#[async_trait]
impl WorkflowEventRepository for PostgresWorkflowEventRepository {
    async fn append(&self, event: &WorkflowEvent) -> Result<(), RepositoryError> {
        // Plain INSERT: an existing id or (workflow_id, sequence) is a conflict, never an update
        sqlx::query(
            r#"
            INSERT INTO workflow_events (
                id, workflow_id, sequence, event_type, event_source, stage, status,
                message, event_data, metadata, component_role, prompt_id, prompt_version,
                decision_source, reason_code, task_id, plan_id, tool_id, approval_id,
                parent_event_id, timestamp, duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(event.id.0)
        .bind(event.workflow_id.0)
        .bind(event.sequence as i64)
        .bind(&event.event_type)
        .bind(&event.event_source)
        .bind(event.stage.as_str())
        .bind(event.status.as_str())
        .bind(&event.message)
        .bind(&event.event_data)
        .bind(&event.metadata)
        .bind(event.component_role.as_ref().map(|r| r.as_str().to_string()))
        .bind(event.prompt_id.map(|id| id.0))
        .bind(event.prompt_version.map(|v| v as i32))
        .bind(event.decision_source.as_str())
        .bind(&event.reason_code)
        .bind(event.task_id.map(|id| id.0))
        .bind(event.plan_id.map(|id| id.0))
        .bind(event.tool_id.map(|id| id.0))
        .bind(event.approval_id.map(|id| id.0))
        .bind(event.parent_event_id.map(|id| id.0))
        .bind(event.timestamp)
        .bind(event.duration_ms.map(|d| d as i64))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: EventId) -> Result<Option<WorkflowEvent>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_events WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn list_for_workflow(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowEvent>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_events WHERE workflow_id = $1 ORDER BY timestamp ASC, sequence ASC")
            .bind(workflow_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn last_for_workflow(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowEvent>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM workflow_events WHERE workflow_id = $1 ORDER BY timestamp DESC, sequence DESC LIMIT 1",
        )
        .bind(workflow_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<WorkflowEvent>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_events ORDER BY timestamp DESC, sequence DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }
}
