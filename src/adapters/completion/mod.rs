//! Text-completion backends.

pub mod anthropic;
pub mod gemini;
mod http;
pub mod mock;
pub mod openai_compat;
pub mod registry;
pub mod resilient;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use mock::{ScriptedCompletionClient, DRY_RUN_REPLY};
pub use openai_compat::OpenAiCompatibleClient;
pub use registry::CompletionRegistry;
pub use resilient::ResilientCompletionClient;
