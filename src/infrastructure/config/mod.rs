//! Configuration management
//!
//! Hierarchical configuration loading using figment:
//! defaults, project YAML, local overrides, then `SLEUTH_*` environment variables.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
