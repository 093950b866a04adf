//! Agents as child processes.

use super::{ExecutionBackend, ExecutionHandle, LaunchRequest, OutputBuffer, RunState};
use async_trait::async_trait;
use evo_core::{BackendSettings, ExecutionFailure};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// How long `read_output` waits for the pipes to drain after exit
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const TERMINATE_POLL: Duration = Duration::from_millis(50);

/// Runs each agent as `command [args..]` inside `work_dir/<agent id>`.
///
/// The agent finds its identity and configuration in the environment:
/// `EVO_AGENT_ID`, `EVO_AGENT_KIND`, `EVO_AGENT_CONFIG` (path of a JSON
/// file with the plain config values) and, when leased, `EVO_RESOURCE_TOKEN`.
#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    settings: BackendSettings,
}

impl SubprocessBackend {
    #[must_use]
    pub fn new(settings: BackendSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ExecutionBackend for SubprocessBackend {
    async fn launch(
        &self,
        request: LaunchRequest,
    ) -> Result<Arc<dyn ExecutionHandle>, ExecutionFailure> {
        let argv = self.settings.command_for(&request.kind);
        let Some((program, args)) = argv.split_first() else {
            return Err(ExecutionFailure::Spawn(format!(
                "empty command line for kind `{}`",
                request.kind
            )));
        };

        let work_dir = self.settings.work_dir.join(request.agent_id.to_string());
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| ExecutionFailure::Spawn(format!("{}: {e}", work_dir.display())))?;
        let config_path = work_dir.join("config.json");
        let config_json = serde_json::to_vec_pretty(&request.config.to_plain_json())
            .map_err(|e| ExecutionFailure::Backend(e.to_string()))?;
        tokio::fs::write(&config_path, config_json)
            .await
            .map_err(|e| ExecutionFailure::Spawn(format!("{}: {e}", config_path.display())))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&work_dir)
            .envs(&self.settings.env)
            .env("EVO_AGENT_ID", request.agent_id.to_string())
            .env("EVO_AGENT_KIND", &request.kind)
            .env("EVO_AGENT_CONFIG", &config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = &request.token {
            cmd.env("EVO_RESOURCE_TOKEN", token.as_str());
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ExecutionFailure::Spawn(format!("{program}: {e}")))?;
        let pid = child.id();
        tracing::info!(agent_id = %request.agent_id, pid, program = %program,
            token = ?request.token.as_ref().map(evo_core::TokenId::as_str), "agent process started");

        let output = Arc::new(OutputBuffer::new(self.settings.output_buffer_lines));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(pump(stdout, Arc::clone(&output), ""));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(pump(stderr, Arc::clone(&output), "[stderr] "));
        }

        Ok(Arc::new(ProcessHandle {
            child: Mutex::new(child),
            pid,
            started: Instant::now(),
            timeout: request.timeout,
            finished: Mutex::new(None),
            output,
            readers: tokio::sync::Mutex::new(readers),
        }))
    }

    fn name(&self) -> &'static str {
        "subprocess"
    }
}

fn pump<R>(stream: R, sink: Arc<OutputBuffer>, prefix: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            sink.push(format!("{prefix}{line}"));
        }
    })
}

struct ProcessHandle {
    child: Mutex<Child>,
    pid: Option<u32>,
    started: Instant,
    timeout: Duration,
    /// Sticky once set, so a timed-out run never reads back as a plain kill
    finished: Mutex<Option<RunState>>,
    output: Arc<OutputBuffer>,
    readers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessHandle {
    fn try_wait(&self) -> Result<Option<RunState>, ExecutionFailure> {
        if let Some(state) = *self.finished.lock() {
            return Ok(Some(state));
        }
        let status = self
            .child
            .lock()
            .try_wait()
            .map_err(|e| ExecutionFailure::Backend(format!("wait failed: {e}")))?;
        let state = status.map(|s| s.code().map_or(RunState::Killed, RunState::Exited));
        if let Some(state) = state {
            *self.finished.lock() = Some(state);
        }
        Ok(state)
    }

    fn force_kill(&self, as_state: RunState) {
        if let Err(e) = self.child.lock().start_kill() {
            tracing::debug!(pid = self.pid, error = %e, "kill on exited process");
        }
        self.finished.lock().get_or_insert(as_state);
    }

    async fn request_stop(&self) {
        let Some(pid) = self.pid else { return };
        if !cfg!(unix) {
            return;
        }
        match Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) if status.success() => tracing::debug!(pid, "sent SIGTERM"),
            Ok(status) => tracing::debug!(pid, %status, "SIGTERM not delivered"),
            Err(e) => tracing::warn!(pid, error = %e, "could not run kill"),
        }
    }
}

#[async_trait]
impl ExecutionHandle for ProcessHandle {
    async fn poll(&self) -> Result<RunState, ExecutionFailure> {
        if let Some(state) = self.try_wait()? {
            return Ok(state);
        }
        if self.started.elapsed() >= self.timeout {
            tracing::warn!(pid = self.pid, timeout = ?self.timeout, "agent process timed out");
            self.force_kill(RunState::TimedOut);
            return Ok(RunState::TimedOut);
        }
        Ok(RunState::Running)
    }

    async fn terminate(&self, grace: Duration) -> Result<(), ExecutionFailure> {
        if self.try_wait()?.is_some() {
            return Ok(());
        }
        self.request_stop().await;
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.try_wait()?.is_some() {
                *self.finished.lock() = Some(RunState::Killed);
                return Ok(());
            }
            tokio::time::sleep(TERMINATE_POLL).await;
        }
        tracing::info!(pid = self.pid, "grace period over, killing agent process");
        self.force_kill(RunState::Killed);
        Ok(())
    }

    async fn read_output(&self, tail: usize) -> String {
        if matches!(self.try_wait(), Ok(Some(_))) {
            let mut readers = self.readers.lock().await;
            for reader in readers.drain(..) {
                let abort = reader.abort_handle();
                if tokio::time::timeout(DRAIN_TIMEOUT, reader).await.is_err() {
                    abort.abort();
                }
            }
        }
        self.output.tail(tail)
    }
}
