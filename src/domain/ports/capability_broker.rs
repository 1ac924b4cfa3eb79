//! Capability broker port - scoped access to version-control and
//! file/command operations.

use async_trait::async_trait;
use std::path::Path;

use crate::domain::errors::CapabilityError;
use crate::domain::models::CapabilityRequest;

/// Opens capability connections for a workspace.
///
/// The broker holds no per-worker state; every worker owns the connection it
/// opened and must close it on every exit path.
#[async_trait]
pub trait CapabilityBroker: Send + Sync {
    async fn open(&self, workspace: &Path) -> Result<Box<dyn CapabilityConnection>, CapabilityError>;
}

/// A live connection to both capability sets, bound to one workspace.
#[async_trait]
pub trait CapabilityConnection: Send + Sync {
    /// Run one operation and return its text output.
    async fn invoke(&mut self, request: &CapabilityRequest) -> Result<String, CapabilityError>;

    /// Release everything the connection holds. Idempotent.
    async fn close(&mut self);
}
