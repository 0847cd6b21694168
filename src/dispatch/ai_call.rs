//! Text-backend invocation with credential rotation and bounded retry.
//!
//! One user command triggers at most `keys + 1` backend attempts: 429s and
//! daily-quota hits rotate to the next credential, transient server errors
//! get a single backoff retry, everything else surfaces immediately. The
//! circuit breaker wraps every attempt.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{ProviderError, Result, SakaiError};
use crate::limits::CircuitBreaker;
use crate::metrics::Metrics;
use crate::providers::{ChatRequest, KeyPool, TextProvider};

const TRANSIENT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Chat-completion client used by every AI command path.
pub struct AiClient {
    provider: Arc<dyn TextProvider>,
    /// Secondary backend consulted when the primary path is exhausted.
    fallback: Option<Arc<dyn TextProvider>>,
    keypool: Arc<KeyPool>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<Metrics>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AiClient {
    pub fn new(
        provider: Arc<dyn TextProvider>,
        keypool: Arc<KeyPool>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<Metrics>,
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            provider,
            fallback: None,
            keypool,
            breaker,
            metrics,
            model: model.to_string(),
            max_tokens,
            temperature,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn TextProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Key-pool health snapshot for `/status`.
    pub fn key_reports(&self) -> Vec<crate::providers::KeyReport> {
        self.keypool.report()
    }

    /// Run one completion through the primary provider, rotating credentials
    /// on provider-side limits. Falls back to the secondary provider only
    /// when every primary attempt is spent.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest::new(&self.model, system, user)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature);

        match self.complete_primary(&request).await {
            Ok(text) => Ok(text),
            Err(primary_err) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        error = %primary_err,
                        fallback = fallback.name(),
                        "Primary AI path failed; trying fallback provider"
                    );
                    let key = self.keypool.current().ok_or_else(all_keys_exhausted)?;
                    self.metrics.record_provider_call();
                    fallback.complete(&request, &key).await.map_err(|e| {
                        self.metrics.record_provider_failure();
                        e
                    })
                }
                None => Err(primary_err),
            },
        }
    }

    async fn complete_primary(&self, request: &ChatRequest) -> Result<String> {
        let max_attempts = self.keypool.len() + 1;
        let mut transient_retried = false;

        for attempt in 1..=max_attempts {
            let key = self.keypool.current().ok_or_else(all_keys_exhausted)?;
            self.metrics.record_provider_call();

            let result = self
                .breaker
                .call(|| self.provider.complete(request, &key))
                .await;

            match result {
                Ok(text) => {
                    self.keypool.mark_success();
                    return Ok(text);
                }
                Err(SakaiError::Provider(ProviderError::RateLimit(msg))) => {
                    self.metrics.record_provider_failure();
                    info!(attempt, "Provider rate limited; rotating key");
                    if !self.keypool.mark_transient_failure(true) {
                        return Err(SakaiError::Provider(ProviderError::RateLimit(msg)));
                    }
                }
                Err(SakaiError::Provider(ProviderError::QuotaExhausted(msg))) => {
                    self.metrics.record_provider_failure();
                    warn!(attempt, "Provider daily quota exhausted; rotating key");
                    if !self.keypool.mark_day_exhausted() {
                        return Err(SakaiError::Provider(ProviderError::QuotaExhausted(msg)));
                    }
                }
                Err(err @ SakaiError::Provider(ProviderError::ServerError(_)))
                | Err(err @ SakaiError::Provider(ProviderError::Timeout(_))) => {
                    self.metrics.record_provider_failure();
                    self.keypool.mark_transient_failure(false);
                    if transient_retried {
                        return Err(err);
                    }
                    transient_retried = true;
                    warn!(attempt, error = %err, "Transient backend failure; retrying once");
                    tokio::time::sleep(TRANSIENT_RETRY_DELAY).await;
                }
                Err(err) => {
                    if matches!(err, SakaiError::Provider(_)) {
                        self.metrics.record_provider_failure();
                        self.keypool.mark_transient_failure(false);
                    }
                    return Err(err);
                }
            }
        }

        Err(all_keys_exhausted())
    }
}

fn all_keys_exhausted() -> SakaiError {
    SakaiError::Provider(ProviderError::QuotaExhausted(
        "all API keys are currently exhausted".into(),
    ))
}
