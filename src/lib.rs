//! Sleuth - multi-agent root-cause investigation
//!
//! A supervisor runs an observe/orient/decide/act/evaluate cycle over a
//! reported defect. Each iteration it asks a language model for hypotheses,
//! tests every hypothesis in an isolated trial worker on its own git branch,
//! and aggregates the workers' reports into one ranked decision.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Adapters** (`adapters`): completion backends, capabilities, storage,
//!   workspaces and worker launchers
//! - **Service Layer** (`services`): supervisor, trial worker, aggregator and
//!   the session query surface
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use sleuth::{ConfigLoader, InvestigationRequest, InvestigationService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = InvestigationService::local(ConfigLoader::load()?, None)?;
//!     let id = service
//!         .start(InvestigationRequest::new("TypeError: x is undefined", "."))
//!         .await?;
//!     let session = service.wait(&id).await?;
//!     println!("{}", session.status);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{CompletionError, DomainError, DomainResult};
pub use domain::models::{
    AggregatedResult, Config, Hypothesis, InvestigationRequest, ScenarioConfig, ScenarioResult,
    Session, SessionStatus,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Aggregator, InvestigationService, SessionStore, Supervisor, TrialWorker};
