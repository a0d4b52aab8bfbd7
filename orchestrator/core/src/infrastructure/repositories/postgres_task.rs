// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Task and Plan Repositories
//!
//! `tasks` rows carry the Digital Twin document in a JSONB `context` column.
//! [`TaskRepository::apply_context`] locks the row (`SELECT ... FOR UPDATE`),
//! applies the mutation in Rust and writes the document back in the same
//! transaction, so concurrent merges never lose each other's keys.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::context::{ContextMutation, TaskContext};
use crate::domain::events::WorkflowId;
use crate::domain::plan::{PlanHypothesis, PlanId, PlanStatus, PlanStep};
use crate::domain::repository::{PlanRepository, RepositoryError, TaskRepository};
use crate::domain::task::{Actor, AutonomyLevel, CheckpointId, Task, TaskError, TaskId, TaskPriority, TaskStatus};

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TASK_COLUMNS: &str = "id, description, status, priority, created_by, created_by_role, approved_by, \
    approved_by_role, autonomy_level, parent_task_id, workflow_id, current_plan_id, current_checkpoint_id, \
    context, created_at, updated_at";

fn actor(name: Option<String>, role: Option<String>) -> Option<Actor> {
    name.map(|name| Actor { name, role })
}

fn task_from_row(row: &PgRow) -> Result<Task, RepositoryError> {
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    let autonomy: String = row.try_get("autonomy_level")?;
    let context: Option<serde_json::Value> = row.try_get("context")?;
    let context: Option<TaskContext> = context.map(serde_json::from_value).transpose()?;

    let mut task = Task::new(
        row.try_get::<String, _>("description")?,
        AutonomyLevel::parse(&autonomy)
            .ok_or_else(|| RepositoryError::Serialization(format!("Unknown autonomy level: {}", autonomy)))?,
    );
    task.id = TaskId(row.try_get("id")?);
    task.status = TaskStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Serialization(format!("Unknown task status: {}", status)))?;
    task.priority = TaskPriority::parse(&priority).unwrap_or_default();
    task.created_by = actor(row.try_get("created_by")?, row.try_get("created_by_role")?);
    task.approved_by = actor(row.try_get("approved_by")?, row.try_get("approved_by_role")?);
    task.parent_task_id = row.try_get::<Option<uuid::Uuid>, _>("parent_task_id")?.map(TaskId);
    task.workflow_id = row.try_get::<Option<uuid::Uuid>, _>("workflow_id")?.map(WorkflowId);
    task.current_plan_id = row.try_get::<Option<uuid::Uuid>, _>("current_plan_id")?.map(PlanId);
    task.current_checkpoint_id = row
        .try_get::<Option<uuid::Uuid>, _>("current_checkpoint_id")?
        .map(CheckpointId);
    task.created_at = row.try_get("created_at")?;
    task.updated_at = row.try_get("updated_at")?;
    Ok(task.with_stored_context(context))
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn save(&self, task: &Task) -> Result<(), RepositoryError> {
        let context = task.context().map(serde_json::to_value).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, description, status, priority, created_by, created_by_role,
                approved_by, approved_by_role, autonomy_level, parent_task_id,
                workflow_id, current_plan_id, current_checkpoint_id, context,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                description = EXCLUDED.description,
                status = EXCLUDED.status,
                priority = EXCLUDED.priority,
                approved_by = EXCLUDED.approved_by,
                approved_by_role = EXCLUDED.approved_by_role,
                autonomy_level = EXCLUDED.autonomy_level,
                workflow_id = EXCLUDED.workflow_id,
                current_plan_id = EXCLUDED.current_plan_id,
                current_checkpoint_id = EXCLUDED.current_checkpoint_id,
                context = COALESCE(tasks.context, EXCLUDED.context),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(task.id.0)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(task.created_by.as_ref().map(|a| a.name.clone()))
        .bind(task.created_by.as_ref().and_then(|a| a.role.clone()))
        .bind(task.approved_by.as_ref().map(|a| a.name.clone()))
        .bind(task.approved_by.as_ref().and_then(|a| a.role.clone()))
        .bind(task.autonomy_level.as_str())
        .bind(task.parent_task_id.map(|id| id.0))
        .bind(task.workflow_id.map(|id| id.0))
        .bind(task.current_plan_id.map(|id| id.0))
        .bind(task.current_checkpoint_id.map(|id| id.0))
        .bind(context)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save task: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Task>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks ORDER BY created_at DESC LIMIT $1",
            TASK_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn apply_context(&self, id: TaskId, mutation: ContextMutation) -> Result<TaskContext, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE id = $1 FOR UPDATE", TASK_COLUMNS))
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("Task {}", id)))?;

        let mut task = task_from_row(&row)?;
        let context = task
            .apply_context(mutation)
            .map_err(|e| match e {
                TaskError::Context(c) => RepositoryError::Context(c),
                other => RepositoryError::Unknown(other.to_string()),
            })?
            .clone();

        sqlx::query("UPDATE tasks SET context = $2, updated_at = $3 WHERE id = $1")
            .bind(id.0)
            .bind(serde_json::to_value(&context)?)
            .bind(task.updated_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(context)
    }
}

pub struct PostgresPlanRepository {
    pool: PgPool,
}

impl PostgresPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn plan_from_row(row: &PgRow) -> Result<PlanHypothesis, RepositoryError> {
    let status: String = row.try_get("status")?;
    let steps: Vec<PlanStep> = serde_json::from_value(row.try_get("steps")?)?;
    let alternatives: Vec<String> = serde_json::from_value(row.try_get("alternatives")?)?;
    let rejection_reasons: Vec<String> = serde_json::from_value(row.try_get("rejection_reasons")?)?;
    let version: i32 = row.try_get("version")?;

    Ok(PlanHypothesis {
        id: PlanId(row.try_get("id")?),
        task_id: TaskId(row.try_get("task_id")?),
        version: version as u32,
        goal: row.try_get("goal")?,
        strategy: row.try_get("strategy")?,
        steps,
        alternatives,
        status: PlanStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Serialization(format!("Unknown plan status: {}", status)))?,
        rejection_reasons,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn save(&self, plan: &PlanHypothesis) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO plans (
                id, task_id, version, goal, strategy, steps, alternatives,
                status, rejection_reasons, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                rejection_reasons = EXCLUDED.rejection_reasons,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(plan.id.0)
        .bind(plan.task_id.0)
        .bind(plan.version as i32)
        .bind(&plan.goal)
        .bind(&plan.strategy)
        .bind(serde_json::to_value(&plan.steps)?)
        .bind(serde_json::to_value(&plan.alternatives)?)
        .bind(plan.status.as_str())
        .bind(serde_json::to_value(&plan.rejection_reasons)?)
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save plan: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: PlanId) -> Result<Option<PlanHypothesis>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM plans WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(plan_from_row).transpose()
    }

    async fn list_for_task(&self, task_id: TaskId) -> Result<Vec<PlanHypothesis>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM plans WHERE task_id = $1 ORDER BY version ASC")
            .bind(task_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(plan_from_row).collect()
    }
}
