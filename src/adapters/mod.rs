//! Adapters for the systems an investigation touches: model backends,
//! capability servers, git worktrees, worker processes and the memory bank.

pub mod capabilities;
pub mod completion;
pub mod launchers;
pub mod storage;
pub mod workspace;
