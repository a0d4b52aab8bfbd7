// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Prompt Repository
//!
//! Prompt versions are immutable rows keyed by `(id, version)`. Assignments are
//! activated in a transaction that first deactivates the current active row for
//! the same `(component_role, scope_kind, scope_key)`; the partial unique index
//! `uq_prompt_assignments_active` backs the "one active assignment" rule.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::prompt::{
    AssignmentId, AssignmentScope, ComponentRole, NewPrompt, Prompt, PromptAssignment, PromptId,
};
use crate::domain::repository::{PromptRepository, RepositoryError};

pub struct PostgresPromptRepository {
    pool: PgPool,
}

impl PostgresPromptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn prompt_from_row(row: &PgRow) -> Result<Prompt, RepositoryError> {
    let version: i32 = row.try_get("version")?;
    Ok(Prompt {
        id: PromptId(row.try_get("id")?),
        name: row.try_get("name")?,
        version: version as u32,
        component_role: ComponentRole::new(row.try_get::<String, _>("component_role")?),
        text: row.try_get("text")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn assignment_from_row(row: &PgRow) -> Result<PromptAssignment, RepositoryError> {
    let scope_kind: String = row.try_get("scope_kind")?;
    let scope_key: String = row.try_get("scope_key")?;
    let version: i32 = row.try_get("version")?;

    Ok(PromptAssignment {
        id: AssignmentId(row.try_get("id")?),
        component_role: ComponentRole::new(row.try_get::<String, _>("component_role")?),
        scope: AssignmentScope::from_parts(&scope_kind, &scope_key)
            .ok_or_else(|| RepositoryError::Serialization(format!("Invalid scope {}:{}", scope_kind, scope_key)))?,
        prompt_id: PromptId(row.try_get("prompt_id")?),
        version: version as u32,
        active: row.try_get("active")?,
        assigned_by: row.try_get("assigned_by")?,
        assigned_at: row.try_get("assigned_at")?,
        superseded_at: row.try_get("superseded_at")?,
    })
}

#[async_trait]
impl PromptRepository for PostgresPromptRepository {
    async fn create_prompt_version(&self, prompt: NewPrompt) -> Result<Prompt, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let latest = sqlx::query(
            "SELECT id, version FROM prompts WHERE name = $1 ORDER BY version DESC LIMIT 1 FOR UPDATE",
        )
        .bind(&prompt.name)
        .fetch_optional(&mut *tx)
        .await?;

        let (id, version) = match latest {
            Some(row) => (PromptId(row.try_get("id")?), row.try_get::<i32, _>("version")? as u32 + 1),
            None => (PromptId::new(), 1),
        };

        let created = Prompt {
            id,
            name: prompt.name,
            version,
            component_role: prompt.component_role,
            text: prompt.text,
            created_by: prompt.created_by,
            created_at: Utc::now(),
        };

        // Two first versions racing on a new name collide on UNIQUE (name, version)
        sqlx::query(
            r#"
            INSERT INTO prompts (id, version, name, component_role, text, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(created.id.0)
        .bind(created.version as i32)
        .bind(&created.name)
        .bind(created.component_role.as_str())
        .bind(&created.text)
        .bind(&created.created_by)
        .bind(created.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn find_prompt(&self, id: PromptId, version: u32) -> Result<Option<Prompt>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM prompts WHERE id = $1 AND version = $2")
            .bind(id.0)
            .bind(version as i32)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(prompt_from_row).transpose()
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM prompts ORDER BY name ASC, version ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(prompt_from_row).collect()
    }

    async fn active_assignment(
        &self,
        role: &ComponentRole,
        scope: &AssignmentScope,
    ) -> Result<Option<PromptAssignment>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM prompt_assignments
            WHERE component_role = $1 AND scope_kind = $2 AND scope_key = $3 AND active
            "#,
        )
        .bind(role.as_str())
        .bind(scope.kind())
        .bind(scope.key())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(assignment_from_row).transpose()
    }

    async fn activate_assignment(
        &self,
        assignment: &PromptAssignment,
    ) -> Result<Option<PromptAssignment>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let superseded = sqlx::query(
            r#"
            UPDATE prompt_assignments
            SET active = FALSE, superseded_at = $4
            WHERE component_role = $1 AND scope_kind = $2 AND scope_key = $3 AND active
            RETURNING *
            "#,
        )
        .bind(assignment.component_role.as_str())
        .bind(assignment.scope.kind())
        .bind(assignment.scope.key())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        let superseded = superseded.as_ref().map(assignment_from_row).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO prompt_assignments (
                id, component_role, scope_kind, scope_key, prompt_id, version,
                active, assigned_by, assigned_at, superseded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8, NULL)
            "#,
        )
        .bind(assignment.id.0)
        .bind(assignment.component_role.as_str())
        .bind(assignment.scope.kind())
        .bind(assignment.scope.key())
        .bind(assignment.prompt_id.0)
        .bind(assignment.version as i32)
        .bind(&assignment.assigned_by)
        .bind(assignment.assigned_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(superseded)
    }

    async fn list_assignments(&self, role: Option<&ComponentRole>) -> Result<Vec<PromptAssignment>, RepositoryError> {
        let rows = match role {
            Some(role) => {
                sqlx::query("SELECT * FROM prompt_assignments WHERE component_role = $1 ORDER BY assigned_at ASC")
                    .bind(role.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM prompt_assignments ORDER BY assigned_at ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(assignment_from_row).collect()
    }
}
