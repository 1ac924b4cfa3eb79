use serde::{Deserialize, Serialize};

use super::completion::LlmSettings;

/// Main configuration structure for sleuth
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Root directory for the memory bank and worktrees
    #[serde(default = "default_data_root")]
    pub data_root: String,

    /// Macro-cycle budgets
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Trial worker budgets and isolation
    #[serde(default)]
    pub trial: TrialConfig,

    /// Backend used for orientation
    #[serde(default)]
    pub supervisor_llm: LlmSettings,

    /// Backend used by trial workers
    #[serde(default)]
    pub worker_llm: LlmSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_data_root() -> String {
    ".sleuth".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            supervisor: SupervisorConfig::default(),
            trial: TrialConfig::default(),
            supervisor_llm: LlmSettings::default(),
            worker_llm: LlmSettings::default(),
            logging: LoggingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Iterations before giving up with "no solution found"
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Upper bound on hypotheses tested per iteration
    #[serde(default = "default_max_trials_per_iteration")]
    pub max_trials_per_iteration: usize,
}

const fn default_max_iterations() -> u32 {
    3
}

const fn default_max_trials_per_iteration() -> usize {
    3
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_trials_per_iteration: default_max_trials_per_iteration(),
        }
    }
}

/// How trial workers are isolated from each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// One OS process per trial
    Process,
    /// One tokio task per trial
    Task,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrialConfig {
    /// Wall-clock ceiling per trial worker
    #[serde(default = "default_trial_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between model turns
    #[serde(default = "default_turn_delay_ms")]
    pub turn_delay_ms: u64,

    /// Extra time a worker gets past its ceiling before it is reaped
    #[serde(default = "default_reap_grace_secs")]
    pub reap_grace_secs: u64,

    #[serde(default = "default_isolation")]
    pub isolation: IsolationMode,

    /// Binary re-executed for process isolation; defaults to the running executable
    #[serde(default)]
    pub worker_binary: Option<String>,
}

const fn default_trial_timeout_secs() -> u64 {
    900
}

const fn default_turn_delay_ms() -> u64 {
    1000
}

const fn default_reap_grace_secs() -> u64 {
    10
}

const fn default_isolation() -> IsolationMode {
    IsolationMode::Process
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_trial_timeout_secs(),
            turn_delay_ms: default_turn_delay_ms(),
            reap_grace_secs: default_reap_grace_secs(),
            isolation: default_isolation(),
            worker_binary: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rotated log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Number of days to retain logs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            retention_days: default_retention_days(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Requests per second allowed
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Burst size for token bucket
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

const fn default_requests_per_second() -> f64 {
    2.0
}

const fn default_burst_size() -> u32 {
    5
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}
