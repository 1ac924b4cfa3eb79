//! Services: the investigation engine's business logic.
//!
//! - `supervisor`: the observe/orient/decide/act/evaluate macro-cycle
//! - `trial_worker`: one hypothesis tested to a single report
//! - `aggregator`: reports combined into one decision
//! - `session_store`: session and agent state
//! - `investigation_service`: start, status, cancel and observe

pub mod aggregator;
pub mod investigation_service;
pub mod reply_parser;
pub mod session_store;
pub mod supervisor;
pub mod task_launcher;
pub mod trial_worker;

pub use aggregator::Aggregator;
pub use investigation_service::{InvestigationService, ServiceComponents};
pub use reply_parser::{apply_report, parse_reply, Directive, Reply};
pub use session_store::SessionStore;
pub use supervisor::{Supervisor, SupervisorDeps, SupervisorSettings, SUPERVISOR_AGENT};
pub use task_launcher::TaskWorkerLauncher;
pub use trial_worker::TrialWorker;
