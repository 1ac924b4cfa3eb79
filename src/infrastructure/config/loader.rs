use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::BackendKind;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_iterations: {0}. Must be between 1 and 20")]
    InvalidMaxIterations(u32),

    #[error("Invalid max_trials_per_iteration: {0}. Must be between 1 and 16")]
    InvalidMaxTrials(usize),

    #[error("Invalid trial timeout: {0}s. Must be at least 1 second")]
    InvalidTrialTimeout(u64),

    #[error("Unsupported {role} provider: {provider}")]
    UnsupportedProvider { role: &'static str, provider: String },

    #[error("Invalid rate limit: {0}. Must be positive")]
    InvalidRateLimit(f64),

    #[error("Invalid burst_size: {0}. Must be at least 1")]
    InvalidBurstSize(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Data root cannot be empty")]
    EmptyDataRoot,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .sleuth/config.yaml (project config)
    /// 3. .sleuth/local.yaml (project local overrides, optional)
    /// 4. Environment variables (SLEUTH_* prefix, `__` separates nested keys)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("SLEUTH_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".sleuth/config.yaml"))
            .merge(Yaml::file(".sleuth/local.yaml"))
            .merge(Env::prefixed("SLEUTH_").split("__"))
    }

    /// Validate configuration after loading
    ///
    /// Credentials are not checked here: a missing key surfaces when a
    /// session starts, as a configuration error on that session.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.data_root.trim().is_empty() {
            return Err(ConfigError::EmptyDataRoot);
        }

        if !(1..=20).contains(&config.supervisor.max_iterations) {
            return Err(ConfigError::InvalidMaxIterations(
                config.supervisor.max_iterations,
            ));
        }

        if !(1..=16).contains(&config.supervisor.max_trials_per_iteration) {
            return Err(ConfigError::InvalidMaxTrials(
                config.supervisor.max_trials_per_iteration,
            ));
        }

        if config.trial.timeout_secs == 0 {
            return Err(ConfigError::InvalidTrialTimeout(config.trial.timeout_secs));
        }

        for (role, settings) in [
            ("supervisor", &config.supervisor_llm),
            ("worker", &config.worker_llm),
        ] {
            if BackendKind::parse(&settings.provider).is_err() {
                return Err(ConfigError::UnsupportedProvider {
                    role,
                    provider: settings.provider.clone(),
                });
            }
        }

        if config.rate_limit.requests_per_second <= 0.0 {
            return Err(ConfigError::InvalidRateLimit(
                config.rate_limit.requests_per_second,
            ));
        }

        if config.rate_limit.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize(config.rate_limit.burst_size));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}
