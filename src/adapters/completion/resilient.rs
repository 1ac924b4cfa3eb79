//! Rate limiting and retry around any completion client.

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::domain::errors::CompletionError;
use crate::domain::models::{Message, RateLimitConfig, RetryConfig};
use crate::domain::ports::CompletionClient;

/// Wraps a client with a token-bucket limiter and exponential-backoff retry
/// of transient failures (transport errors, 429, 5xx).
///
/// Empty responses and configuration errors are returned immediately.
pub struct ResilientCompletionClient {
    inner: Arc<dyn CompletionClient>,
    limiter: DefaultDirectRateLimiter,
    retry: RetryConfig,
}

impl ResilientCompletionClient {
    pub fn new(
        inner: Arc<dyn CompletionClient>,
        rate_limit: &RateLimitConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            inner,
            limiter: RateLimiter::direct(quota(rate_limit)),
            retry,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.retry.initial_backoff_ms),
            max_interval: Duration::from_millis(self.retry.max_backoff_ms),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

fn quota(config: &RateLimitConfig) -> Quota {
    let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);
    let period = if config.requests_per_second > 0.0 {
        Duration::from_secs_f64(1.0 / config.requests_per_second)
    } else {
        Duration::from_secs(1)
    };
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst)
}

#[async_trait]
impl CompletionClient for ResilientCompletionClient {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError> {
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let inner = &self.inner;
        let limiter = &self.limiter;
        let max_retries = self.retry.max_retries;

        backoff::future::retry(self.backoff(), move || async move {
            limiter.until_ready().await;
            let attempt = attempts.fetch_add(1, Ordering::Relaxed);
            match inner.complete(messages).await {
                Ok(text) => Ok(text),
                Err(err) if err.is_transient() && attempt < max_retries => {
                    warn!(
                        backend = inner.name(),
                        attempt = attempt + 1,
                        error = %err,
                        "Transient completion failure, retrying"
                    );
                    Err(backoff::Error::transient(err))
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::completion::ScriptedCompletionClient;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    fn unlimited() -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: 1000.0,
            burst_size: 100,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let inner = Arc::new(ScriptedCompletionClient::with_results([
            Err(CompletionError::Api {
                status: 503,
                body: String::new(),
            }),
            Err(CompletionError::Http("reset".into())),
            Ok("done".to_string()),
        ]));
        let client = ResilientCompletionClient::new(inner.clone(), &unlimited(), fast_retry(3));
        assert_eq!(client.complete(&[Message::user("q")]).await.unwrap(), "done");
        assert_eq!(inner.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_empty_response() {
        let inner = Arc::new(ScriptedCompletionClient::with_results([
            Err(CompletionError::EmptyResponse),
            Ok("unused".to_string()),
        ]));
        let client = ResilientCompletionClient::new(inner.clone(), &unlimited(), fast_retry(3));
        assert_eq!(
            client.complete(&[]).await.unwrap_err(),
            CompletionError::EmptyResponse
        );
        assert_eq!(inner.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let failures = (0..5).map(|_| {
            Err(CompletionError::Api {
                status: 429,
                body: String::new(),
            })
        });
        let inner = Arc::new(ScriptedCompletionClient::with_results(failures));
        let client = ResilientCompletionClient::new(inner.clone(), &unlimited(), fast_retry(2));
        assert!(client.complete(&[]).await.is_err());
        assert_eq!(inner.call_count().await, 3);
    }
}
