//! OpenAI-compatible chat completions backend (OpenAI, OpenRouter).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::http::{build_client, non_empty, send_json};
use crate::domain::errors::CompletionError;
use crate::domain::models::{Endpoint, Message, OpenAiFlavor};
use crate::domain::ports::CompletionClient;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [Message],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Completion client for `POST {base}/chat/completions`.
pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: Endpoint,
    flavor: OpenAiFlavor,
}

impl OpenAiCompatibleClient {
    pub fn new(endpoint: Endpoint, flavor: OpenAiFlavor) -> Result<Self, CompletionError> {
        Ok(Self {
            client: build_client(endpoint.timeout)?,
            endpoint,
            flavor,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleClient {
    fn name(&self) -> &'static str {
        match self.flavor {
            OpenAiFlavor::OpenRouter => "openrouter",
            OpenAiFlavor::OpenAi => "openai",
        }
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError> {
        let body = ChatRequest {
            model: &self.endpoint.model,
            max_tokens: self.endpoint.max_tokens,
            messages,
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.endpoint.base_url))
            .bearer_auth(&self.endpoint.api_key)
            .json(&body);
        if self.flavor == OpenAiFlavor::OpenRouter {
            request = request.header("X-Title", "sleuth");
        }

        let response: ChatResponse = send_json(request).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        non_empty(text)
    }
}
