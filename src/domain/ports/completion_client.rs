//! Completion client port - interface for text-generation backends.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::errors::CompletionError;
use crate::domain::models::{LlmSettings, Message};

/// A text-completion backend.
///
/// Exactly one call per model turn; no streaming contract.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Backend name, for logging.
    fn name(&self) -> &'static str;

    /// Send the transcript and return the generated text.
    ///
    /// An empty reply is reported as `CompletionError::EmptyResponse`, never
    /// as `Ok("")`.
    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError>;
}

/// Builds completion clients from configuration.
pub trait CompletionClientFactory: Send + Sync {
    /// Resolve `settings` and build a client for it.
    fn create(&self, settings: &LlmSettings) -> Result<Arc<dyn CompletionClient>, CompletionError>;
}
