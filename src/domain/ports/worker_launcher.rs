//! Worker launcher port - runs one trial worker in isolation.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::models::{ScenarioConfig, WorkerExit};

/// Runs a trial worker to completion and reports how it ended.
///
/// The worker writes its own report; the launcher only guarantees that the
/// worker is gone when `launch` returns, reaping it after its wall-clock
/// budget plus a grace period or when `cancel` fires.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, config: &ScenarioConfig, cancel: CancellationToken) -> WorkerExit;
}
