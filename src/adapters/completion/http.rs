//! Helpers shared by the HTTP completion backends.

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::domain::errors::CompletionError;
use crate::infrastructure::logging::redact;

/// Upper bound on error bodies carried in `CompletionError::Api`.
const MAX_ERROR_BODY: usize = 2048;

pub fn build_client(timeout: Duration) -> Result<Client, CompletionError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CompletionError::Http(format!("failed to build HTTP client: {e}")))
}

/// Send a request and decode a JSON body, mapping failures to `CompletionError`.
pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, CompletionError> {
    let response = request
        .send()
        .await
        .map_err(|e| CompletionError::Http(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let mut body = response.text().await.unwrap_or_default();
        body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
        return Err(CompletionError::Api {
            status: status.as_u16(),
            body: redact(&body),
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| CompletionError::Decode(e.to_string()))
}

/// Reject blank generations.
pub fn non_empty(text: String) -> Result<String, CompletionError> {
    if text.trim().is_empty() {
        Err(CompletionError::EmptyResponse)
    } else {
        Ok(text)
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0)
}
