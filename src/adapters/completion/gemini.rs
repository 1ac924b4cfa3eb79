//! Google Gemini `generateContent` backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::http::{build_client, non_empty, send_json};
use crate::domain::errors::CompletionError;
use crate::domain::models::{Endpoint, Message, Role};
use crate::domain::ports::CompletionClient;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

pub struct GeminiClient {
    client: Client,
    endpoint: Endpoint,
}

impl GeminiClient {
    pub fn new(endpoint: Endpoint) -> Result<Self, CompletionError> {
        Ok(Self {
            client: build_client(endpoint.timeout)?,
            endpoint,
        })
    }
}

#[async_trait]
impl CompletionClient for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError> {
        let body = GenerateRequest {
            contents: messages
                .iter()
                .map(|m| Content {
                    role: Some(
                        match m.role {
                            Role::User => "user",
                            Role::Assistant => "model",
                        }
                        .to_string(),
                    ),
                    parts: vec![Part {
                        text: Some(m.content.clone()),
                    }],
                })
                .collect(),
            generation_config: GenerationConfig {
                max_output_tokens: self.endpoint.max_tokens,
            },
        };

        let response: GenerateResponse = send_json(
            self.client
                .post(format!(
                    "{}/models/{}:generateContent",
                    self.endpoint.base_url, self.endpoint.model
                ))
                .header("x-goog-api-key", &self.endpoint.api_key)
                .json(&body),
        )
        .await?;

        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        non_empty(text)
    }
}
