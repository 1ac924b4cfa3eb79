//! Completion client registry and factory.

use std::sync::Arc;
use tracing::debug;

use super::anthropic::AnthropicClient;
use super::gemini::GeminiClient;
use super::mock::ScriptedCompletionClient;
use super::openai_compat::OpenAiCompatibleClient;
use super::resilient::ResilientCompletionClient;
use crate::domain::errors::CompletionError;
use crate::domain::models::{Backend, LlmSettings, RateLimitConfig, RetryConfig};
use crate::domain::ports::{CompletionClient, CompletionClientFactory};

/// Builds completion clients by backend name, wrapping HTTP backends with
/// rate limiting and retry.
pub struct CompletionRegistry {
    rate_limit: RateLimitConfig,
    retry: RetryConfig,
}

impl CompletionRegistry {
    pub const fn new(rate_limit: RateLimitConfig, retry: RetryConfig) -> Self {
        Self { rate_limit, retry }
    }

    /// Build the bare client for a resolved backend.
    pub fn create_for_backend(
        &self,
        backend: Backend,
    ) -> Result<Arc<dyn CompletionClient>, CompletionError> {
        let client: Arc<dyn CompletionClient> = match backend {
            Backend::Mock => return Ok(Arc::new(ScriptedCompletionClient::dry_run())),
            Backend::Anthropic {
                endpoint,
                api_version,
            } => Arc::new(AnthropicClient::new(endpoint, api_version)?),
            Backend::OpenAiCompatible { endpoint, flavor } => {
                Arc::new(OpenAiCompatibleClient::new(endpoint, flavor)?)
            }
            Backend::Gemini { endpoint } => Arc::new(GeminiClient::new(endpoint)?),
        };
        Ok(Arc::new(ResilientCompletionClient::new(
            client,
            &self.rate_limit,
            self.retry.clone(),
        )))
    }
}

impl Default for CompletionRegistry {
    fn default() -> Self {
        Self::new(RateLimitConfig::default(), RetryConfig::default())
    }
}

impl CompletionClientFactory for CompletionRegistry {
    fn create(&self, settings: &LlmSettings) -> Result<Arc<dyn CompletionClient>, CompletionError> {
        let backend = settings.resolve()?;
        debug!(backend = backend.kind().as_str(), model = %settings.model, "Creating completion client");
        self.create_for_backend(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_backend_is_configuration_error() {
        let registry = CompletionRegistry::default();
        let err = registry
            .create(&LlmSettings::new("cohere", "command"))
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_mock_backend_needs_no_credentials() {
        let registry = CompletionRegistry::default();
        let client = registry.create(&LlmSettings::new("mock", "")).unwrap();
        assert_eq!(client.name(), "mock");
    }

    #[test]
    fn test_http_backends_are_wrapped() {
        let registry = CompletionRegistry::default();
        let mut settings = LlmSettings::new("anthropic", "claude-test");
        settings.api_key = Some("k".into());
        let client = registry.create(&settings).unwrap();
        assert_eq!(client.name(), "anthropic");
    }
}
