//! Trial workers as sibling OS processes.
//!
//! The launcher writes the scenario config to the memory bank and re-executes
//! the `sleuth` binary with the hidden `worker` subcommand. The child's stderr
//! and stdout are forwarded line by line at debug level. A child that overruns
//! its own timeout by the reap grace, or whose session is cancelled, gets
//! SIGTERM and then SIGKILL.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::storage::scenario_file;
use crate::domain::models::{ScenarioConfig, WorkerExit};
use crate::domain::ports::WorkerLauncher;

/// Time a terminated worker gets to restore its workspace and exit.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ProcessWorkerLauncher {
    binary: PathBuf,
    reap_grace: Duration,
    config_file: Option<PathBuf>,
}

impl ProcessWorkerLauncher {
    pub fn new(binary: impl Into<PathBuf>, reap_grace: Duration) -> Self {
        Self {
            binary: binary.into(),
            reap_grace,
            config_file: None,
        }
    }

    /// Pass an explicit configuration file on to every worker.
    #[must_use]
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Launcher that re-executes the running binary.
    pub fn current_exe(reap_grace: Duration) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, reap_grace))
    }

    async fn write_config(config: &ScenarioConfig) -> Result<PathBuf, String> {
        let path = scenario_file(&config.data_root, &config.scope(), &config.id)
            .map_err(|e| e.to_string())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(config).map_err(|e| e.to_string())?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
        Ok(path)
    }

    fn forward<R>(stream: R, scenario_id: String, stream_name: &'static str)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(scenario_id = %scenario_id, stream = stream_name, "{line}");
            }
        });
    }
}

#[async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    #[instrument(skip(self, config, cancel), fields(scenario_id = %config.id))]
    async fn launch(&self, config: &ScenarioConfig, cancel: CancellationToken) -> WorkerExit {
        let config_path = match Self::write_config(config).await {
            Ok(path) => path,
            Err(e) => return WorkerExit::Crashed(e),
        };

        let mut cmd = Command::new(&self.binary);
        if let Some(file) = &self.config_file {
            cmd.arg("--config-file").arg(file);
        }
        cmd.arg("worker")
            .arg("--config")
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return WorkerExit::Crashed(format!(
                    "failed to spawn {}: {e}",
                    self.binary.display()
                ))
            }
        };
        info!(pid = ?child.id(), branch = %config.branch_name, "Trial worker started");

        if let Some(stdout) = child.stdout.take() {
            Self::forward(stdout, config.id.clone(), "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            Self::forward(stderr, config.id.clone(), "stderr");
        }

        let deadline = config.timeout() + self.reap_grace;
        tokio::select! {
            status = child.wait() => match status {
                Ok(status) => exit_of(status),
                Err(e) => WorkerExit::Crashed(format!("failed to wait for worker: {e}")),
            },
            () = tokio::time::sleep(deadline) => {
                warn!(deadline = ?deadline, "Trial worker overran its budget, reaping");
                terminate(&mut child).await;
                WorkerExit::TimedOut
            }
            () = cancel.cancelled() => {
                info!("Session cancelled, terminating trial worker");
                terminate(&mut child).await;
                WorkerExit::Cancelled
            }
        }
    }
}

fn exit_of(status: ExitStatus) -> WorkerExit {
    if let Some(code) = status.code() {
        return WorkerExit::Exited { code };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return WorkerExit::Crashed(format!("terminated by signal {signal}"));
        }
    }
    WorkerExit::Crashed("terminated without an exit code".to_string())
}

/// SIGTERM, then SIGKILL once the grace period runs out.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
            if kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok()
            {
                return;
            }
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill trial worker");
    }
}
