//! Shell commands started by a trial, including ones that outlive their timeout.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::errors::CapabilityError;

/// Output kept per command; older output is dropped.
const MAX_BUFFERED_OUTPUT: usize = 64 * 1024;

/// Time a terminated command gets to exit before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

const READER_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct OutputBuffer {
    text: String,
    read_offset: usize,
}

impl OutputBuffer {
    fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
        if self.text.len() > MAX_BUFFERED_OUTPUT {
            let mut cut = self.text.len() - MAX_BUFFERED_OUTPUT;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
            self.read_offset = self.read_offset.saturating_sub(cut);
        }
    }

    fn take_unread(&mut self) -> String {
        let unread = self.text[self.read_offset..].to_string();
        self.read_offset = self.text.len();
        unread
    }
}

struct RunningCommand {
    command: String,
    child: Child,
    output: Arc<Mutex<OutputBuffer>>,
    readers: Vec<JoinHandle<()>>,
}

impl RunningCommand {
    /// Wait briefly for the output readers; a grandchild may still hold the pipes.
    async fn drain_readers(&mut self) {
        for mut reader in self.readers.drain(..) {
            if tokio::time::timeout(READER_DRAIN, &mut reader).await.is_err() {
                reader.abort();
            }
        }
    }
}

/// Commands a connection has started, keyed by pid.
pub struct ProcessTable {
    workspace: PathBuf,
    background: HashMap<u32, RunningCommand>,
}

impl ProcessTable {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            background: HashMap::new(),
        }
    }

    /// Run `command` through `sh -c`. If it is still running after
    /// `timeout_ms` it keeps running in the background and its pid is returned.
    pub async fn execute(&mut self, command: &str, timeout_ms: u64) -> Result<String, CapabilityError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0)
            .spawn()?;

        let output = Arc::new(Mutex::new(OutputBuffer::default()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Arc::clone(&output)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Arc::clone(&output)));
        }

        let mut running = RunningCommand {
            command: command.to_string(),
            child,
            output,
            readers,
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), running.child.wait()).await {
            Ok(status) => {
                let status = status?;
                running.drain_readers().await;
                let text = running.output.lock().await.take_unread();
                Ok(format!(
                    "exit code: {}\n{text}",
                    status
                        .code()
                        .map_or_else(|| "signal".to_string(), |c| c.to_string())
                ))
            }
            Err(_) => {
                let pid = running.child.id().ok_or_else(|| {
                    CapabilityError::Io("command exited without a pid".to_string())
                })?;
                let text = running.output.lock().await.take_unread();
                debug!(pid, command, "Command moved to background");
                self.background.insert(pid, running);
                Ok(format!(
                    "Command still running after {timeout_ms}ms (pid {pid}). \
                     Use read_output to fetch new output or force_terminate to stop it.\n{text}"
                ))
            }
        }
    }

    /// New output of a background command, and its exit code once it finished.
    pub async fn read_output(&mut self, pid: u32) -> Result<String, CapabilityError> {
        let running = self
            .background
            .get_mut(&pid)
            .ok_or(CapabilityError::UnknownProcess(pid))?;

        if let Some(status) = running.child.try_wait()? {
            running.drain_readers().await;
            let text = running.output.lock().await.take_unread();
            self.background.remove(&pid);
            return Ok(format!(
                "process {pid} exited with code {}\n{text}",
                status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string())
            ));
        }

        let text = running.output.lock().await.take_unread();
        Ok(format!("process {pid} still running\n{text}"))
    }

    pub async fn force_terminate(&mut self, pid: u32) -> Result<String, CapabilityError> {
        let mut running = self
            .background
            .remove(&pid)
            .ok_or(CapabilityError::UnknownProcess(pid))?;
        terminate(&mut running).await;
        Ok(format!("terminated process {pid} ({})", running.command))
    }

    /// Stop every background command.
    pub async fn shutdown(&mut self) {
        for (pid, mut running) in self.background.drain() {
            debug!(pid, command = %running.command, "Stopping background command");
            terminate(&mut running).await;
        }
    }

    pub fn background_pids(&self) -> Vec<u32> {
        self.background.keys().copied().collect()
    }
}

fn spawn_reader<R>(stream: R, output: Arc<Mutex<OutputBuffer>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            output.lock().await.push_line(&line);
        }
    })
}

/// SIGTERM to the command's process group, then SIGKILL if it does not exit in time.
async fn terminate(running: &mut RunningCommand) {
    if let Some(pid) = running.child.id().and_then(|id| i32::try_from(id).ok()) {
        if let Err(e) = signal::killpg(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!(pid, error = %e, "Failed to send SIGTERM");
        }
        if tokio::time::timeout(TERMINATE_GRACE, running.child.wait())
            .await
            .is_ok()
        {
            running.drain_readers().await;
            return;
        }
    }
    if let Some(pid) = running.child.id().and_then(|id| i32::try_from(id).ok()) {
        let _ = signal::killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
    if let Err(e) = running.child.kill().await {
        warn!(command = %running.command, error = %e, "Failed to kill command");
    }
    running.drain_readers().await;
}
