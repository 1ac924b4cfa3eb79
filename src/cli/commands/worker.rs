//! Hidden worker command: one trial worker in its own process.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::adapters::capabilities::LocalCapabilityBroker;
use crate::adapters::completion::CompletionRegistry;
use crate::adapters::storage::{FileReportStore, JsonlObservationStore};
use crate::domain::models::{Config, ScenarioConfig, ScenarioResult, Termination};
use crate::domain::ports::{CompletionClientFactory, ReportStore};
use crate::services::TrialWorker;

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Scenario config written by the supervisor
    #[arg(long)]
    pub config: PathBuf,
}

async fn read_scenario(path: &Path) -> Result<ScenarioConfig> {
    let body = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read scenario config {}", path.display()))?;
    serde_json::from_slice(&body)
        .with_context(|| format!("Invalid scenario config {}", path.display()))
}

/// Cancel `token` on SIGTERM or Ctrl-C.
fn cancel_on_signal(token: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::spawn(async move {
            tokio::select! {
                _ = terminate.recv() => info!("Received SIGTERM"),
                _ = tokio::signal::ctrl_c() => info!("Received interrupt"),
            }
            token.cancel();
        });
    }
    #[cfg(not(unix))]
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        token.cancel();
    });
    Ok(())
}

/// Run the trial and return the process exit code.
pub async fn execute(args: WorkerArgs, config: Config) -> Result<i32> {
    let scenario = read_scenario(&args.config).await?;
    let reports = Arc::new(FileReportStore::new(&scenario.data_root));

    let registry = CompletionRegistry::new(config.rate_limit.clone(), config.retry.clone());
    let completion = match registry.create(&config.worker_llm) {
        Ok(client) => client,
        Err(e) => {
            error!(scenario_id = %scenario.id, error = %e, "Worker backend is not usable");
            let result = ScenarioResult::failed(
                &scenario,
                Termination::CompletionFailed,
                format!("completion backend unavailable: {e}"),
            );
            reports
                .write(&scenario.scope(), &result)
                .await
                .context("Failed to write failure report")?;
            return Ok(Termination::CompletionFailed.exit_code());
        }
    };

    let worker = TrialWorker::new(
        completion,
        Arc::new(LocalCapabilityBroker::new()),
        reports,
        Arc::new(JsonlObservationStore::new(&scenario.data_root)),
        Duration::from_millis(config.trial.turn_delay_ms),
    );

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone())?;

    let result = worker
        .run(&scenario, &cancel)
        .await
        .context("Trial worker failed to persist its report")?;
    info!(
        scenario_id = %scenario.id,
        success = result.success,
        confidence = result.confidence,
        termination = %result.termination,
        "Trial worker finished"
    );
    Ok(result.termination.exit_code())
}
