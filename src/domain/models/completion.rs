//! Completion transcripts and backend selection.
//!
//! `LlmSettings` is the string-keyed shape found in configuration files.
//! `Backend` is the typed form it resolves into right before a client is
//! built, carrying one settings record per backend kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::domain::errors::CompletionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered conversation a worker or the supervisor sends to the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Backend selection as written in configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LlmSettings {
    /// anthropic, openrouter, openai, gemini or mock
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default)]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Falls back to the provider's environment variable when unset
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "anthropic".to_string()
}

const fn default_max_tokens() -> u32 {
    4096
}

const fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: String::new(),
            max_tokens: default_max_tokens(),
            api_key: None,
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl LlmSettings {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    /// Resolve into a typed backend, reading credentials from the environment.
    pub fn resolve(&self) -> Result<Backend, CompletionError> {
        let kind = BackendKind::parse(&self.provider)?;
        if kind == BackendKind::Mock {
            return Ok(Backend::Mock);
        }
        if self.model.trim().is_empty() {
            return Err(CompletionError::MissingModel(kind.as_str().to_string()));
        }

        let api_key = self
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(kind.credential_env()).ok())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CompletionError::MissingCredential {
                backend: kind.as_str().to_string(),
                env_var: kind.credential_env().to_string(),
            })?;

        let endpoint = Endpoint {
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| kind.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            timeout: Duration::from_secs(self.request_timeout_secs),
        };

        Ok(match kind {
            BackendKind::Anthropic => Backend::Anthropic {
                endpoint,
                api_version: ANTHROPIC_API_VERSION.to_string(),
            },
            BackendKind::OpenRouter => Backend::OpenAiCompatible {
                endpoint,
                flavor: OpenAiFlavor::OpenRouter,
            },
            BackendKind::OpenAi => Backend::OpenAiCompatible {
                endpoint,
                flavor: OpenAiFlavor::OpenAi,
            },
            BackendKind::Gemini => Backend::Gemini { endpoint },
            BackendKind::Mock => Backend::Mock,
        })
    }
}

const ANTHROPIC_API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Anthropic,
    OpenRouter,
    OpenAi,
    Gemini,
    Mock,
}

impl BackendKind {
    pub fn parse(name: &str) -> Result<Self, CompletionError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openrouter" => Ok(Self::OpenRouter),
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            "mock" => Ok(Self::Mock),
            other => Err(CompletionError::UnsupportedBackend(other.to_string())),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Mock => "mock",
        }
    }

    pub const fn credential_env(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::Mock => "",
        }
    }

    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::Mock => "",
        }
    }
}

/// Connection details shared by every HTTP backend.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAiFlavor {
    OpenRouter,
    OpenAi,
}

/// A resolved completion backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Anthropic {
        endpoint: Endpoint,
        api_version: String,
    },
    OpenAiCompatible {
        endpoint: Endpoint,
        flavor: OpenAiFlavor,
    },
    Gemini {
        endpoint: Endpoint,
    },
    /// Scripted replies, for tests and dry runs
    Mock,
}

impl Backend {
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Anthropic { .. } => BackendKind::Anthropic,
            Self::OpenAiCompatible {
                flavor: OpenAiFlavor::OpenRouter,
                ..
            } => BackendKind::OpenRouter,
            Self::OpenAiCompatible {
                flavor: OpenAiFlavor::OpenAi,
                ..
            } => BackendKind::OpenAi,
            Self::Gemini { .. } => BackendKind::Gemini,
            Self::Mock => BackendKind::Mock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_backend() {
        let settings = LlmSettings::new("palm", "bison");
        assert_eq!(
            settings.resolve(),
            Err(CompletionError::UnsupportedBackend("palm".to_string()))
        );
    }

    #[test]
    fn test_missing_model() {
        let settings = LlmSettings::new("anthropic", "  ");
        assert!(matches!(
            settings.resolve(),
            Err(CompletionError::MissingModel(_))
        ));
    }

    #[test]
    fn test_missing_credential_names_env_var() {
        temp_env::with_var_unset("OPENROUTER_API_KEY", || {
            let settings = LlmSettings::new("openrouter", "some/model");
            match settings.resolve() {
                Err(CompletionError::MissingCredential { backend, env_var }) => {
                    assert_eq!(backend, "openrouter");
                    assert_eq!(env_var, "OPENROUTER_API_KEY");
                }
                other => panic!("expected MissingCredential, got {other:?}"),
            }
        });
    }

    #[test]
    fn test_credential_from_environment() {
        temp_env::with_var("GEMINI_API_KEY", Some("g-key"), || {
            let backend = LlmSettings::new("Gemini", "gemini-pro").resolve().unwrap();
            match backend {
                Backend::Gemini { endpoint } => {
                    assert_eq!(endpoint.api_key, "g-key");
                    assert_eq!(endpoint.base_url, BackendKind::Gemini.default_base_url());
                }
                other => panic!("unexpected backend {other:?}"),
            }
        });
    }

    #[test]
    fn test_explicit_key_and_base_url_win() {
        temp_env::with_var("OPENAI_API_KEY", Some("env-key"), || {
            let mut settings = LlmSettings::new("openai", "gpt-4o");
            settings.api_key = Some("cfg-key".into());
            settings.base_url = Some("http://localhost:8080/v1/".into());
            let backend = settings.resolve().unwrap();
            assert_eq!(backend.kind(), BackendKind::OpenAi);
            match backend {
                Backend::OpenAiCompatible { endpoint, .. } => {
                    assert_eq!(endpoint.api_key, "cfg-key");
                    assert_eq!(endpoint.base_url, "http://localhost:8080/v1");
                }
                other => panic!("unexpected backend {other:?}"),
            }
        });
    }

    #[test]
    fn test_debug_redacts_keys() {
        let mut settings = LlmSettings::new("anthropic", "m");
        settings.api_key = Some("sk-ant-secret".into());
        assert!(!format!("{settings:?}").contains("sk-ant-secret"));
    }

    #[test]
    fn test_transcript_order() {
        let mut t = Transcript::new();
        t.push_user("hello");
        t.push_assistant("hi");
        assert_eq!(t.len(), 2);
        assert_eq!(t.last().map(|m| m.role), Some(Role::Assistant));
    }
}
