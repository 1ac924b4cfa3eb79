//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that infrastructure adapters must implement:
//! - CompletionClient: text-generation backends
//! - CapabilityBroker: version-control and file/command operations
//! - ReportStore / ObservationStore: the per-session memory bank
//! - WorkspaceProvisioner: isolated branch workspaces
//! - WorkerLauncher: isolated trial worker execution

pub mod capability_broker;
pub mod completion_client;
pub mod storage;
pub mod worker_launcher;
pub mod workspace;

pub use capability_broker::{CapabilityBroker, CapabilityConnection};
pub use completion_client::{CompletionClient, CompletionClientFactory};
pub use storage::{ObservationStore, ProgressLog, ReportStore};
pub use worker_launcher::WorkerLauncher;
pub use workspace::WorkspaceProvisioner;
