// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on storage backend configuration.
//! Keeps the domain layer free of infrastructure dependencies: the domain defines
//! the traits, infrastructure provides the implementations, and this factory is the
//! only place that picks between them.

use std::sync::Arc;

use sqlx::PgPool;

use crate::domain::config::{StorageBackendKind, StorageConfig};
use crate::domain::repository::{
    ApprovalRepository, PlanRepository, PostgresConfig, PromptRepository, RegistryRepository, StorageBackend,
    TaskRepository, WorkflowEventRepository,
};
use crate::infrastructure::repositories::{
    InMemoryApprovalRepository, InMemoryPlanRepository, InMemoryPromptRepository, InMemoryRegistryRepository,
    InMemoryTaskRepository, InMemoryWorkflowEventRepository, PostgresApprovalRepository, PostgresPlanRepository,
    PostgresPromptRepository, PostgresRegistryRepository, PostgresTaskRepository, PostgresWorkflowEventRepository,
};

/// Translate the configured storage section into a backend selection
pub fn storage_backend(config: &StorageConfig) -> anyhow::Result<StorageBackend> {
    match config.backend {
        StorageBackendKind::InMemory => Ok(StorageBackend::InMemory),
        StorageBackendKind::Postgres => {
            let connection_string = config
                .connection_string
                .clone()
                .ok_or_else(|| anyhow::anyhow!("storage.connection_string is required for the postgres backend"))?;
            Ok(StorageBackend::PostgreSQL(PostgresConfig {
                connection_string,
                max_connections: config.max_connections,
            }))
        }
    }
}

/// One handle per aggregate repository
#[derive(Clone)]
pub struct Repositories {
    pub tasks: Arc<dyn TaskRepository>,
    pub plans: Arc<dyn PlanRepository>,
    pub events: Arc<dyn WorkflowEventRepository>,
    pub prompts: Arc<dyn PromptRepository>,
    pub registry: Arc<dyn RegistryRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            tasks: Arc::new(InMemoryTaskRepository::new()),
            plans: Arc::new(InMemoryPlanRepository::new()),
            events: Arc::new(InMemoryWorkflowEventRepository::new()),
            prompts: Arc::new(InMemoryPromptRepository::new()),
            registry: Arc::new(InMemoryRegistryRepository::new()),
            approvals: Arc::new(InMemoryApprovalRepository::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            tasks: Arc::new(PostgresTaskRepository::new(pool.clone())),
            plans: Arc::new(PostgresPlanRepository::new(pool.clone())),
            events: Arc::new(PostgresWorkflowEventRepository::new(pool.clone())),
            prompts: Arc::new(PostgresPromptRepository::new(pool.clone())),
            registry: Arc::new(PostgresRegistryRepository::new(pool.clone())),
            approvals: Arc::new(PostgresApprovalRepository::new(pool)),
        }
    }
}

/// Creates every repository for the configured backend
///
/// The PostgreSQL backend needs the pool opened by the caller.
pub fn create_repositories(backend: &StorageBackend, pool: Option<PgPool>) -> anyhow::Result<Repositories> {
    match (backend, pool) {
        (StorageBackend::InMemory, _) => Ok(Repositories::in_memory()),
        (StorageBackend::PostgreSQL(_), Some(pool)) => Ok(Repositories::postgres(pool)),
        (StorageBackend::PostgreSQL(_), None) => {
            anyhow::bail!("PostgreSQL storage backend selected but no connection pool was provided")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_backend_requires_connection_string() {
        let config = StorageConfig {
            backend: StorageBackendKind::Postgres,
            connection_string: None,
            max_connections: 5,
        };
        assert!(storage_backend(&config).is_err());

        let config = StorageConfig {
            connection_string: Some("postgres://localhost/aard".into()),
            ..config
        };
        assert!(matches!(
            storage_backend(&config).unwrap(),
            StorageBackend::PostgreSQL(PostgresConfig { max_connections: 5, .. })
        ));
    }

    #[test]
    fn test_postgres_backend_without_pool_fails() {
        let backend = StorageBackend::PostgreSQL(PostgresConfig {
            connection_string: "postgres://localhost/aard".into(),
            max_connections: 1,
        });
        assert!(create_repositories(&backend, None).is_err());
        assert!(create_repositories(&StorageBackend::InMemory, None).is_ok());
    }
}
