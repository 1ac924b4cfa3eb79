//! Scripted completion client for testing and dry runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::errors::CompletionError;
use crate::domain::models::Message;
use crate::domain::ports::CompletionClient;

/// Reply served by the `mock` backend once its script runs out.
///
/// Contains a one-item hypothesis list for orientation and a report block
/// for trial workers, so a dry run terminates on the first turn.
pub const DRY_RUN_REPLY: &str = r#"[{"type": "dry_run", "description": "mock backend: no analysis performed"}]
<report>
CONFIRMED: no
CONFIDENCE: low
EXPLANATION: mock completion backend performs no analysis
</report>"#;

/// Completion client that replays a fixed script of replies.
///
/// Every received transcript is recorded so tests can assert on what the
/// caller sent.
pub struct ScriptedCompletionClient {
    script: Mutex<VecDeque<Result<String, CompletionError>>>,
    fallback: Option<String>,
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl ScriptedCompletionClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, CompletionError>>,
    {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            fallback: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Serve `reply` forever once the script is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub fn dry_run() -> Self {
        Self::new(Vec::<String>::new()).with_fallback(DRY_RUN_REPLY)
    }

    /// Transcripts received so far.
    pub async fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError> {
        self.calls.lock().await.push(messages.to_vec());
        let next = self.script.lock().await.pop_front();
        match next {
            Some(Ok(reply)) if reply.trim().is_empty() => Err(CompletionError::EmptyResponse),
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or(CompletionError::EmptyResponse),
        }
    }
}
