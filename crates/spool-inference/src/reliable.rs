use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use spool_core::error::InferenceError;
use spool_core::provider::{InferenceProvider, InferenceRequest, InferenceStream};

/// Configuration for the ReliableProvider retry behavior.
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Wraps an InferenceProvider with retry logic.
///
/// - Retries retryable call-level errors with exponential backoff
/// - Respects `retry_after` hints from rate limit responses
/// - Errors surfaced mid-stream are never retried: once chunks have
///   flowed, the turn is committed and the caller owns recovery
pub struct ReliableProvider<P: InferenceProvider> {
    inner: P,
    config: ReliableConfig,
    total_retries: AtomicU64,
}

impl<P: InferenceProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    fn backoff_delay(&self, attempt: u32, error: &InferenceError) -> Duration {
        if let Some(hint) = error.suggested_delay() {
            return hint.min(self.config.max_delay);
        }
        let exp = self.config.base_delay.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.config.max_delay)
    }
}

#[async_trait]
impl<P: InferenceProvider> InferenceProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn stream(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceStream, InferenceError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.stream(request).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.backoff_delay(attempt, &e);
                    attempt += 1;
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt = attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying inference call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
