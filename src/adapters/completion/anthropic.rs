//! Anthropic Messages API backend.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

use super::http::{build_client, non_empty, send_json};
use crate::domain::errors::CompletionError;
use crate::domain::models::{Endpoint, Message};
use crate::domain::ports::CompletionClient;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [Message],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// Completion client for `POST /v1/messages`.
pub struct AnthropicClient {
    client: Client,
    endpoint: Endpoint,
    api_version: String,
}

impl AnthropicClient {
    pub fn new(endpoint: Endpoint, api_version: impl Into<String>) -> Result<Self, CompletionError> {
        Ok(Self {
            client: build_client(endpoint.timeout)?,
            endpoint,
            api_version: api_version.into(),
        })
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError> {
        let body = MessagesRequest {
            model: &self.endpoint.model,
            max_tokens: self.endpoint.max_tokens,
            messages,
        };

        let response: MessagesResponse = send_json(
            self.client
                .post(format!("{}/v1/messages", self.endpoint.base_url))
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-api-key", &self.endpoint.api_key)
                .header("anthropic-version", &self.api_version)
                .json(&body),
        )
        .await?;

        let text = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");
        non_empty(text)
    }
}
