//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - stderr output, pretty or JSON
//! - JSON file output with daily rotation and retention cleanup
//! - Credential redaction for transcripts and error bodies

pub mod logger;
pub mod redact;

pub use logger::LoggerImpl;
pub use redact::redact;
