//! In-process backend with scripted behaviour per agent kind.

use crate::backend::{ExecutionBackend, ExecutionHandle, LaunchRequest, OutputBuffer, RunState};
use async_trait::async_trait;
use evo_core::{ConfigTree, ExecutionFailure};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a scripted run does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Print a result line and exit 0
    Succeed,
    /// Exit with this code
    Exit(i32),
    /// Never finish on its own
    Hang,
    /// Exit 0 without a result line
    Garbage,
    /// Fail at launch
    RefuseLaunch,
    /// Panic the first time it is polled after finishing
    PanicOnPoll,
}

#[derive(Debug, Default)]
struct Counters {
    live: AtomicUsize,
    peak: AtomicUsize,
    launched: AtomicUsize,
}

/// Backend for tests and the simulator.
///
/// Behaviour is picked by agent kind (default [`Script::Succeed`]). A run
/// lasts `duration_ms` from its config, or the backend default; a
/// successful run reports `reasoning_steps` and `token_cost` read from the
/// config as well.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    scripts: HashMap<String, Script>,
    default_duration: Duration,
    code: String,
    counters: Arc<Counters>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            default_duration: Duration::from_millis(10),
            code: "echo evolved".to_string(),
            counters: Arc::new(Counters::default()),
        }
    }

    #[must_use]
    pub fn with_script(mut self, kind: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(kind.into(), script);
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.default_duration = duration;
        self
    }

    /// Code reported by successful runs
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Runs currently in flight
    #[must_use]
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Most runs ever in flight at once
    #[must_use]
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn launched(&self) -> usize {
        self.counters.launched.load(Ordering::SeqCst)
    }

    fn result_line(&self, config: &ConfigTree) -> String {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let number = |key: &str| config.numeric(key).map(|v| v.max(0.0).round() as u64);
        serde_json::json!({
            "code": self.code,
            "reasoning_steps": number("reasoning_steps").unwrap_or(10),
            "token_cost": number("token_cost").unwrap_or(1_000),
            "artifacts": [],
        })
        .to_string()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn launch(
        &self,
        request: LaunchRequest,
    ) -> Result<Arc<dyn ExecutionHandle>, ExecutionFailure> {
        let script = self
            .scripts
            .get(&request.kind)
            .cloned()
            .unwrap_or(Script::Succeed);
        if script == Script::RefuseLaunch {
            return Err(ExecutionFailure::Backend(format!(
                "scripted launch refusal for kind `{}`",
                request.kind
            )));
        }

        let output = OutputBuffer::new(64);
        output.push(format!("[scripted] agent {} ({})", request.agent_id, request.kind));
        match script {
            Script::Succeed | Script::PanicOnPoll => output.push(self.result_line(&request.config)),
            Script::Garbage => output.push("this is not a result"),
            Script::Exit(code) => output.push(format!("[stderr] exiting with {code}")),
            Script::Hang | Script::RefuseLaunch => {}
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let duration = request
            .config
            .numeric("duration_ms")
            .map_or(self.default_duration, |ms| Duration::from_millis(ms.max(0.0) as u64));

        self.counters.launched.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);

        Ok(Arc::new(ScriptedHandle {
            script,
            started: Instant::now(),
            duration,
            timeout: request.timeout,
            stopped: AtomicBool::new(false),
            released: AtomicBool::new(false),
            output,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedHandle {
    script: Script,
    started: Instant,
    duration: Duration,
    timeout: Duration,
    stopped: AtomicBool,
    released: AtomicBool,
    output: OutputBuffer,
    counters: Arc<Counters>,
}

impl ScriptedHandle {
    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ExecutionHandle for ScriptedHandle {
    async fn poll(&self) -> Result<RunState, ExecutionFailure> {
        if self.stopped.load(Ordering::SeqCst) {
            self.release();
            return Ok(RunState::Killed);
        }
        let elapsed = self.started.elapsed();
        let finishes = self.script != Script::Hang && self.duration < self.timeout;
        if !finishes {
            if elapsed >= self.timeout {
                self.release();
                return Ok(RunState::TimedOut);
            }
            return Ok(RunState::Running);
        }
        if elapsed < self.duration {
            return Ok(RunState::Running);
        }
        self.release();
        match self.script {
            Script::Exit(code) => Ok(RunState::Exited(code)),
            Script::PanicOnPoll => panic!("scripted agent panicked while being polled"),
            _ => Ok(RunState::Exited(0)),
        }
    }

    async fn terminate(&self, _grace: Duration) -> Result<(), ExecutionFailure> {
        self.stopped.store(true, Ordering::SeqCst);
        self.release();
        Ok(())
    }

    async fn read_output(&self, tail: usize) -> String {
        self.output.tail(tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evo_core::{AgentId, AgentOutput, NumericParam};

    fn request(kind: &str, config: ConfigTree) -> LaunchRequest {
        LaunchRequest {
            agent_id: AgentId::new(),
            kind: kind.to_string(),
            config,
            token: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn success_reports_config_driven_output() {
        let backend = ScriptedBackend::new().with_duration(Duration::ZERO);
        let config = ConfigTree::new()
            .with_numeric("reasoning_steps", NumericParam::new(7.0))
            .with_numeric("token_cost", NumericParam::new(250.0));
        let handle = backend.launch(request("any", config)).await.unwrap();
        assert_eq!(handle.poll().await.unwrap(), RunState::Exited(0));
        let output = AgentOutput::parse_stdout(&handle.read_output(10).await).unwrap();
        assert_eq!(output.reasoning_steps, Some(7));
        assert_eq!(output.token_cost, Some(250));
        assert_eq!(backend.live(), 0);
        assert_eq!(backend.peak(), 1);
    }

    #[tokio::test]
    async fn hang_times_out_and_terminate_kills() {
        let backend = ScriptedBackend::new().with_script("stuck", Script::Hang);
        let mut req = request("stuck", ConfigTree::new());
        req.timeout = Duration::from_millis(20);
        let handle = backend.launch(req).await.unwrap();
        assert_eq!(handle.poll().await.unwrap(), RunState::Running);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(handle.poll().await.unwrap(), RunState::TimedOut);

        let other = backend.launch(request("stuck", ConfigTree::new())).await.unwrap();
        other.terminate(Duration::ZERO).await.unwrap();
        assert_eq!(other.poll().await.unwrap(), RunState::Killed);
        assert_eq!(backend.live(), 0);
    }

    #[tokio::test]
    async fn refuse_launch_is_a_backend_failure() {
        let backend = ScriptedBackend::new().with_script("nope", Script::RefuseLaunch);
        let err = backend
            .launch(request("nope", ConfigTree::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExecutionFailure::Backend(_)));
        assert_eq!(backend.launched(), 0);
    }
}
