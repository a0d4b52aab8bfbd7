// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::approval::{ApprovalId, ApprovalKind, ApprovalRequest, ApprovalStatus};
use crate::domain::events::WorkflowId;
use crate::domain::plan::PlanId;
use crate::domain::repository::{ApprovalRepository, RepositoryError};
use crate::domain::task::TaskId;

pub struct PostgresApprovalRepository {
    pool: PgPool,
}

impl PostgresApprovalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn request_from_row(row: &PgRow) -> Result<ApprovalRequest, RepositoryError> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;

    Ok(ApprovalRequest {
        id: ApprovalId(row.try_get("id")?),
        kind: ApprovalKind::parse(&kind)
            .ok_or_else(|| RepositoryError::Serialization(format!("Unknown approval kind: {}", kind)))?,
        workflow_id: row.try_get::<Option<Uuid>, _>("workflow_id")?.map(WorkflowId),
        task_id: row.try_get::<Option<Uuid>, _>("task_id")?.map(TaskId),
        plan_id: row.try_get::<Option<Uuid>, _>("plan_id")?.map(PlanId),
        summary: row.try_get("summary")?,
        status: ApprovalStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Serialization(format!("Unknown approval status: {}", status)))?,
        requested_at: row.try_get("requested_at")?,
        resolved_at: row.try_get("resolved_at")?,
        resolved_by: row.try_get("resolved_by")?,
        comment: row.try_get("comment")?,
    })
}

#[async_trait]
impl ApprovalRepository for PostgresApprovalRepository {
    async fn insert(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO approval_requests (
                id, kind, workflow_id, task_id, plan_id, summary, status,
                requested_at, resolved_at, resolved_by, comment
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(request.id.0)
        .bind(request.kind.as_str())
        .bind(request.workflow_id.map(|id| id.0))
        .bind(request.task_id.map(|id| id.0))
        .bind(request.plan_id.map(|id| id.0))
        .bind(&request.summary)
        .bind(request.status.as_str())
        .bind(request.requested_at)
        .bind(request.resolved_at)
        .bind(&request.resolved_by)
        .bind(&request.comment)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: ApprovalId) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM approval_requests WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM approval_requests WHERE status = 'pending' ORDER BY requested_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(request_from_row).collect()
    }

    async fn update_if_pending(&self, request: &ApprovalRequest) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE approval_requests
            SET status = $2, resolved_at = $3, resolved_by = $4, comment = $5
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(request.id.0)
        .bind(request.status.as_str())
        .bind(request.resolved_at)
        .bind(&request.resolved_by)
        .bind(&request.comment)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM approval_requests WHERE id = $1")
            .bind(request.id.0)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound(format!("Approval {}", request.id)))
        }
    }
}
