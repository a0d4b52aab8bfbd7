// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! API server wiring
//!
//! Builds repositories, providers, the LLM gateway and the orchestrator from
//! the loaded configuration, then serves `aard_core::presentation::api` until
//! Ctrl+C/SIGTERM and drains background work.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use aard_core::{
    application::{
        background::{BackgroundTasks, HeartbeatMonitor},
        llm_gateway::LlmGateway,
        orchestrator::{PipelineOrchestrator, PipelineServices},
        repository_factory::{create_repositories, storage_backend, Repositories},
        stages::PipelineStages,
    },
    domain::{
        config::{AardConfigManifest, AardConfigSpec, StorageConfig},
        repository::StorageBackend,
    },
    infrastructure::{db::Database, event_bus::EventBus, llm::ProviderRegistry},
    presentation::api,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub async fn serve(config: AardConfigManifest) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    let spec = &config.spec;
    info!(node_id = %spec.node.id, "AARD server starting");

    if spec.observability.metrics.enabled {
        let addr: SocketAddr = format!("{}:{}", spec.network.bind_address, spec.observability.metrics.port)
            .parse()
            .context("Invalid metrics listen address")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus exporter listening on {}", addr);
    }

    let background = BackgroundTasks::new();
    let repositories = open_repositories(&spec.storage).await?;
    let providers = Arc::new(ProviderRegistry::from_config(spec).context("Failed to initialize LLM providers")?);
    let orchestrator = build_orchestrator(spec, repositories, providers.clone(), background.clone());

    if spec.maintenance.enabled {
        HeartbeatMonitor::new(providers, spec.maintenance.heartbeat_interval).start(&background);
    }

    let addr = format!("{}:{}", spec.network.bind_address, spec.network.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("AARD API listening on {}", addr);

    axum::serve(listener, api::app(orchestrator))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if !background.shutdown(SHUTDOWN_GRACE).await {
        warn!("Some workflows were still running at shutdown");
    }
    info!("AARD server stopped");
    Ok(())
}

/// Repositories for the configured backend, migrating PostgreSQL first
pub async fn open_repositories(storage: &StorageConfig) -> Result<Repositories> {
    let backend = storage_backend(storage)?;
    let pool = match &backend {
        StorageBackend::PostgreSQL(pg) => {
            let db = Database::new(&pg.connection_string, pg.max_connections).await?;
            db.migrate().await?;
            info!(max_connections = pg.max_connections, "Using PostgreSQL storage");
            Some(db.get_pool().clone())
        }
        StorageBackend::InMemory => {
            warn!("Using in-memory storage; workflows are lost on restart");
            None
        }
    };
    create_repositories(&backend, pool)
}

pub fn build_orchestrator(
    spec: &AardConfigSpec,
    repositories: Repositories,
    providers: Arc<ProviderRegistry>,
    background: BackgroundTasks,
) -> Arc<PipelineOrchestrator> {
    let services = PipelineServices::new(&repositories, Arc::new(EventBus::with_default_capacity()));
    let gateway = Arc::new(LlmGateway::new(providers, &spec.llm_selection));
    let stages = PipelineStages::standard(services.prompts.clone(), gateway, &spec.pipeline);
    Arc::new(PipelineOrchestrator::new(stages, services, spec.pipeline.clone(), background))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_repositories_and_wiring() {
        let spec = AardConfigSpec::default();
        let repositories = open_repositories(&spec.storage).await.unwrap();
        let orchestrator = build_orchestrator(
            &spec,
            repositories,
            Arc::new(ProviderRegistry::empty()),
            BackgroundTasks::new(),
        );
        assert_eq!(orchestrator.config().max_replans, 3);
    }
}
