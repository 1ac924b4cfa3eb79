//! Capability adapters: version control, files and shell commands.

pub mod broker;
pub mod filesystem;
pub mod git;
pub mod processes;

pub use broker::{LocalCapabilityBroker, LocalConnection};
pub use filesystem::FileSystemCapability;
pub use processes::ProcessTable;
