// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Background Tasks - Application Layer
//!
//! Every detached task (submitted workflows, the provider heartbeat) is spawned
//! through [`BackgroundTasks`], so shutdown can cancel and drain them instead of
//! abandoning them mid-flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::infrastructure::llm::ProviderRegistry;

#[derive(Clone)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Root token; cancelled by [`BackgroundTasks::shutdown`]
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "Spawning tracked background task");
        self.tracker.spawn(task);
    }

    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel every task and wait up to `grace` for them to finish
    ///
    /// Returns `false` when tasks were still running at the deadline.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!(running = self.tracker.len(), "Shutting down background tasks");
        self.shutdown.cancel();
        self.tracker.close();

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!("Background tasks drained");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    grace_ms = grace.as_millis() as u64,
                    "Background tasks still running after grace period"
                );
                false
            }
        }
    }
}

/// Periodic health check of every configured LLM provider
pub struct HeartbeatMonitor {
    providers: Arc<ProviderRegistry>,
    interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(providers: Arc<ProviderRegistry>, interval: Duration) -> Self {
        Self { providers, interval }
    }

    pub fn start(self, tasks: &BackgroundTasks) {
        let token = tasks.token();
        tasks.spawn("llm-heartbeat", async move { self.run(token).await });
    }

    async fn run(&self, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Starting LLM heartbeat monitor");
        let mut tick = interval(self.interval);

        loop {
            tokio::select! {
                _ = tick.tick() => self.beat().await,
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping heartbeat monitor");
                    break;
                }
            }
        }
    }

    async fn beat(&self) {
        for (name, result) in self.providers.health_check_all().await {
            match result {
                Ok(()) => {
                    metrics::gauge!("aard_llm_provider_up", "provider" => name.clone()).set(1.0);
                    debug!(provider = %name, "LLM provider healthy");
                }
                Err(e) => {
                    metrics::gauge!("aard_llm_provider_up", "provider" => name.clone()).set(0.0);
                    warn!(provider = %name, error = %e, "LLM provider health check failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::{GenerationOptions, GenerationResponse, LLMError, LLMProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_shutdown_cancels_and_drains() {
        let tasks = BackgroundTasks::new();
        for _ in 0..3 {
            let token = tasks.token();
            tasks.spawn("waiter", async move { token.cancelled().await });
        }
        assert_eq!(tasks.len(), 3);

        assert!(tasks.shutdown(Duration::from_secs(1)).await);
        assert!(tasks.is_empty());
        assert!(tasks.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_reports_stragglers() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("stubborn", tokio::time::sleep(Duration::from_secs(5)));
        assert!(!tasks.shutdown(Duration::from_millis(10)).await);
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl LLMProvider for Counting {
        async fn generate(&self, _: &str, _: &str, _: &GenerationOptions) -> Result<GenerationResponse, LLMError> {
            Err(LLMError::Provider("unused".into()))
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_heartbeat_checks_providers_until_shutdown() {
        let provider = Arc::new(Counting(AtomicUsize::new(0)));
        let registry = Arc::new(ProviderRegistry::from_provider("local", provider.clone(), &["default"]));
        let tasks = BackgroundTasks::new();

        HeartbeatMonitor::new(registry, Duration::from_millis(5)).start(&tasks);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(tasks.shutdown(Duration::from_secs(1)).await);

        let seen = provider.0.load(Ordering::SeqCst);
        assert!(seen >= 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(provider.0.load(Ordering::SeqCst), seen);
    }
}
