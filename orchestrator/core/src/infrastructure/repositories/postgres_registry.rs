// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::prompt::PromptId;
use crate::domain::registry::{EntryId, EntryKind, EntryRole, EntryStatus, RegistryEntry};
use crate::domain::repository::{RegistryRepository, RepositoryError};

pub struct PostgresRegistryRepository {
    pool: PgPool,
}

impl PostgresRegistryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &PgRow) -> Result<RegistryEntry, RepositoryError> {
    let kind: String = row.try_get("kind")?;
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;

    Ok(RegistryEntry {
        id: EntryId(row.try_get("id")?),
        name: row.try_get("name")?,
        kind: EntryKind::parse(&kind)
            .ok_or_else(|| RepositoryError::Serialization(format!("Unknown entry kind: {}", kind)))?,
        role: EntryRole::parse(&role)
            .ok_or_else(|| RepositoryError::Serialization(format!("Unknown entry role: {}", role)))?,
        status: EntryStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Serialization(format!("Unknown entry status: {}", status)))?,
        description: row.try_get("description")?,
        capabilities: serde_json::from_value(row.try_get("capabilities")?)?,
        system_prompt: row.try_get::<Option<Uuid>, _>("system_prompt")?.map(PromptId),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl RegistryRepository for PostgresRegistryRepository {
    async fn insert(&self, entry: &RegistryEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO registry_entries (
                id, name, kind, role, status, description, capabilities,
                system_prompt, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id.0)
        .bind(&entry.name)
        .bind(entry.kind.as_str())
        .bind(entry.role.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.description)
        .bind(serde_json::to_value(&entry.capabilities)?)
        .bind(entry.system_prompt.map(|id| id.0))
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match RepositoryError::from(e) {
            RepositoryError::Conflict(_) => RepositoryError::Conflict(entry.name.clone()),
            other => other,
        })?;

        Ok(())
    }

    async fn update(&self, entry: &RegistryEntry) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE registry_entries
            SET status = $2, description = $3, capabilities = $4, system_prompt = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(entry.id.0)
        .bind(entry.status.as_str())
        .bind(&entry.description)
        .bind(serde_json::to_value(&entry.capabilities)?)
        .bind(entry.system_prompt.map(|id| id.0))
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Registry entry {}", entry.name)));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: EntryId) -> Result<Option<RegistryEntry>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM registry_entries WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<RegistryEntry>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM registry_entries WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<RegistryEntry>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM registry_entries ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }
}
