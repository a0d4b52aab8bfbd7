// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! LLM Gateway - Application Layer
//!
//! Wraps the provider registry with the call policy every stage shares:
//!
//! - a semaphore of `max_concurrent_requests` permits (callers queue, never fail, when the pool is busy)
//! - a `request_timeout` around each attempt, covering both the wait for a permit and the provider call
//! - `max_retries` retries of transient failures with exponential backoff from `retry_delay_ms`
//! - the fallback provider, when configured, serves the last attempt

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::domain::config::LLMSelection;
use crate::domain::llm::{GenerationOptions, GenerationResponse, LLMError, LLMProvider};
use crate::infrastructure::llm::ProviderRegistry;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, thiserror::Error)]
#[error("{source} (after {attempts} attempt(s))")]
pub struct GatewayError {
    pub attempts: u32,
    pub source: LLMError,
}

pub struct LlmGateway {
    providers: Arc<ProviderRegistry>,
    permits: Arc<Semaphore>,
    max_retries: u32,
    retry_delay: Duration,
    request_timeout: Duration,
    options: GenerationOptions,
}

impl LlmGateway {
    pub fn new(providers: Arc<ProviderRegistry>, selection: &LLMSelection) -> Self {
        let capacity = selection.max_concurrent_requests.max(1);
        metrics::gauge!("aard_llm_pool_available_permits").set(capacity as f64);
        Self {
            providers,
            permits: Arc::new(Semaphore::new(capacity)),
            max_retries: selection.max_retries,
            retry_delay: Duration::from_millis(selection.retry_delay_ms),
            request_timeout: selection.request_timeout,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn complete(
        &self,
        alias: &str,
        system_prompt: &str,
        content: &str,
    ) -> Result<GenerationResponse, GatewayError> {
        let fallback = self.providers.fallback();
        let primary = match self.providers.resolve(alias) {
            Ok(primary) => primary,
            Err(e) => fallback.clone().ok_or(GatewayError { attempts: 0, source: e })?,
        };

        let total_attempts = self.max_retries + 1;
        let mut last_error = LLMError::Provider("no attempt made".to_string());

        for attempt in 1..=total_attempts {
            let (name, provider) = match &fallback {
                Some(fb) if attempt == total_attempts && attempt > 1 && fb.0 != primary.0 => fb.clone(),
                _ => primary.clone(),
            };

            match self.attempt(provider.as_ref(), system_prompt, content).await {
                Ok(response) => {
                    metrics::counter!("aard_llm_requests_total", "outcome" => "success").increment(1);
                    debug!(alias, provider = %name, attempt, "LLM request succeeded");
                    return Ok(response);
                }
                Err(e) if e.is_transient() && attempt < total_attempts => {
                    metrics::counter!("aard_llm_requests_total", "outcome" => "retry").increment(1);
                    let delay = self.backoff(attempt);
                    warn!(alias, provider = %name, attempt, error = %e, delay_ms = delay.as_millis() as u64, "Transient LLM failure, retrying");
                    tokio::time::sleep(delay).await;
                    last_error = e;
                }
                Err(e) => {
                    metrics::counter!("aard_llm_requests_total", "outcome" => "failure").increment(1);
                    warn!(alias, provider = %name, attempt, error = %e, "LLM request failed");
                    return Err(GatewayError { attempts: attempt, source: e });
                }
            }
        }

        Err(GatewayError {
            attempts: total_attempts,
            source: last_error,
        })
    }

    async fn attempt(
        &self,
        provider: &dyn LLMProvider,
        system_prompt: &str,
        content: &str,
    ) -> Result<GenerationResponse, LLMError> {
        let started = Instant::now();
        let call = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| LLMError::Provider("LLM pool closed".to_string()))?;
            metrics::gauge!("aard_llm_pool_available_permits").set(self.permits.available_permits() as f64);
            provider.generate(system_prompt, content, &self.options).await
        };
        // Queue wait counts against the attempt's timeout.
        let result = tokio::time::timeout(self.request_timeout, call)
            .await
            .unwrap_or(Err(LLMError::Timeout(self.request_timeout)));

        metrics::histogram!("aard_llm_request_duration_seconds").record(started.elapsed().as_secs_f64());
        metrics::gauge!("aard_llm_pool_available_permits").set(self.permits.available_permits() as f64);
        result
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::{FinishReason, TokenUsage};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        name: &'static str,
        script: Mutex<VecDeque<Result<(), LLMError>>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl Flaky {
        fn new(name: &'static str, script: Vec<Result<(), LLMError>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl LLMProvider for Flaky {
        async fn generate(&self, _: &str, _: &str, _: &GenerationOptions) -> Result<GenerationResponse, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let step = self.script.lock().pop_front().unwrap_or(Ok(()));
            step.map(|_| GenerationResponse {
                text: format!("{{\"from\": \"{}\"}}", self.name),
                usage: TokenUsage::default(),
                provider: self.name.to_string(),
                model: "test".to_string(),
                finish_reason: FinishReason::Stop,
            })
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            Ok(())
        }
    }

    fn selection(max_retries: u32, concurrency: usize, timeout: Duration) -> LLMSelection {
        LLMSelection {
            max_retries,
            retry_delay_ms: 1,
            max_concurrent_requests: concurrency,
            request_timeout: timeout,
            ..LLMSelection::default()
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let provider = Flaky::new("primary", vec![Err(LLMError::RateLimit), Err(LLMError::Network("reset".into()))]);
        let registry = ProviderRegistry::from_provider("primary", provider.clone(), &["default"]);
        let gateway = LlmGateway::new(Arc::new(registry), &selection(3, 2, Duration::from_secs(5)));

        let response = gateway.complete("default", "sys", "hi").await.unwrap();
        assert_eq!(response.provider, "primary");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_failure_is_not_retried() {
        let provider = Flaky::new("primary", vec![Err(LLMError::Authentication("bad key".into()))]);
        let registry = ProviderRegistry::from_provider("primary", provider.clone(), &["default"]);
        let gateway = LlmGateway::new(Arc::new(registry), &selection(3, 2, Duration::from_secs(5)));

        let err = gateway.complete("default", "sys", "hi").await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(matches!(err.source, LLMError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_fallback_serves_last_attempt() {
        let primary = Flaky::new("primary", vec![Err(LLMError::RateLimit); 5]);
        let backup = Flaky::new("backup", vec![]);
        let mut registry = ProviderRegistry::from_provider("primary", primary.clone(), &["default"]);
        registry.insert("backup", backup.clone(), &[]);
        let gateway = LlmGateway::new(
            Arc::new(registry.with_fallback("backup")),
            &selection(2, 2, Duration::from_secs(5)),
        );

        let response = gateway.complete("default", "sys", "hi").await.unwrap();
        assert_eq!(response.provider, "backup");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
        assert_eq!(backup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_exhausts_retries() {
        let provider = Flaky::slow("primary", Duration::from_millis(200));
        let registry = ProviderRegistry::from_provider("primary", provider, &["default"]);
        let gateway = LlmGateway::new(Arc::new(registry), &selection(1, 1, Duration::from_millis(10)));

        let err = gateway.complete("default", "sys", "hi").await.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(matches!(err.source, LLMError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let provider = Flaky::slow("primary", Duration::from_millis(20));
        let registry = ProviderRegistry::from_provider("primary", provider.clone(), &["default"]);
        let gateway = Arc::new(LlmGateway::new(Arc::new(registry), &selection(0, 2, Duration::from_secs(5))));

        let calls: Vec<_> = (0..6)
            .map(|_| {
                let gateway = gateway.clone();
                tokio::spawn(async move { gateway.complete("default", "sys", "hi").await })
            })
            .collect();
        for call in calls {
            assert!(call.await.unwrap().is_ok());
        }

        assert_eq!(provider.calls.load(Ordering::SeqCst), 6);
        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gateway.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_queue_wait_counts_against_timeout() {
        let provider = Flaky::slow("primary", Duration::from_millis(150));
        let registry = ProviderRegistry::from_provider("primary", provider.clone(), &["default"]);
        let gateway = LlmGateway::new(Arc::new(registry), &selection(0, 1, Duration::from_millis(200)));

        let (first, second) = tokio::join!(
            gateway.complete("default", "sys", "first"),
            gateway.complete("default", "sys", "second"),
        );

        assert!(first.is_ok());
        let err = second.unwrap_err();
        assert!(matches!(err.source, LLMError::Timeout(_)));
        assert_eq!(gateway.available_permits(), 1);
    }
}
