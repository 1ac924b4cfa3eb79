//! Trial workers as tokio tasks in the supervisor's process.
//!
//! Isolation is weaker than with worker processes: a task shares the
//! address space, but a panic is contained by its `JoinHandle`. An overrunning
//! task is cancelled first and only aborted if it does not unwind in time.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use super::trial_worker::TrialWorker;
use crate::domain::errors::DomainResult;
use crate::domain::models::{ScenarioConfig, ScenarioResult, WorkerExit};
use crate::domain::ports::WorkerLauncher;

pub struct TaskWorkerLauncher {
    worker: Arc<TrialWorker>,
    reap_grace: Duration,
}

impl TaskWorkerLauncher {
    pub fn new(worker: Arc<TrialWorker>, reap_grace: Duration) -> Self {
        Self { worker, reap_grace }
    }
}

/// Time an overrunning trial gets to restore its workspace and close its
/// connection once its token is cancelled.
const UNWIND_GRACE: Duration = Duration::from_secs(5);

#[async_trait]
impl WorkerLauncher for TaskWorkerLauncher {
    #[instrument(skip(self, config, cancel), fields(scenario_id = %config.id))]
    async fn launch(&self, config: &ScenarioConfig, cancel: CancellationToken) -> WorkerExit {
        let worker = Arc::clone(&self.worker);
        let task_config = config.clone();
        let trial_cancel = cancel.child_token();
        let token = trial_cancel.clone();
        let mut handle = tokio::spawn(async move { worker.run(&task_config, &token).await });

        match tokio::time::timeout(config.timeout() + self.reap_grace, &mut handle).await {
            Ok(joined) => exit_of(joined),
            Err(_) => {
                warn!("Trial task overran its budget, cancelling");
                trial_cancel.cancel();
                if tokio::time::timeout(UNWIND_GRACE, &mut handle).await.is_err() {
                    warn!("Trial task did not unwind, aborting");
                    handle.abort();
                }
                WorkerExit::TimedOut
            }
        }
    }
}

fn exit_of(joined: Result<DomainResult<ScenarioResult>, JoinError>) -> WorkerExit {
    match joined {
        Ok(Ok(result)) => WorkerExit::Exited {
            code: result.termination.exit_code(),
        },
        Ok(Err(e)) => WorkerExit::Crashed(e.to_string()),
        Err(join) if join.is_panic() => WorkerExit::Crashed("trial task panicked".to_string()),
        Err(join) => WorkerExit::Crashed(join.to_string()),
    }
}
