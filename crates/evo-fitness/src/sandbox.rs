//! Isolated execution of candidate code.
//!
//! Each run gets a fresh temporary directory, an environment reduced to
//! `PATH`, closed stdin and a hard wall-clock limit. The child is killed on
//! timeout and on drop.

use evo_core::{FitnessSettings, SyntaxCheck};
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Result of running candidate code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxOutcome {
    Success,
    /// `None` when the process was ended by a signal
    NonZeroExit(Option<i32>),
    TimedOut,
    SpawnFailed(String),
}

impl SandboxOutcome {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, SandboxOutcome::Success)
    }
}

#[derive(Debug, Clone)]
pub struct CodeSandbox {
    interpreter: String,
    interpreter_args: Vec<String>,
    timeout: Duration,
}

impl CodeSandbox {
    #[must_use]
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            interpreter_args: Vec::new(),
            timeout,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &FitnessSettings) -> Self {
        Self {
            interpreter: settings.interpreter.clone(),
            interpreter_args: settings.interpreter_args.clone(),
            timeout: Duration::from_secs(settings.sandbox_timeout_secs),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn source_name(&self) -> &'static str {
        if self.interpreter.contains("python") {
            "candidate.py"
        } else {
            "candidate"
        }
    }

    /// Execute the code with the interpreter.
    pub async fn run(&self, code: &str) -> SandboxOutcome {
        self.run_with(&self.interpreter_args, code).await
    }

    /// Syntax-check the code without judging its behaviour.
    pub async fn check_syntax(&self, code: &str, check: &SyntaxCheck) -> bool {
        match check {
            SyntaxCheck::Delimiters => delimiters_balanced(code),
            SyntaxCheck::Command { args } => self.run_with(args, code).await.is_success(),
        }
    }

    async fn run_with(&self, args: &[String], code: &str) -> SandboxOutcome {
        let dir = match tempfile::Builder::new().prefix("evo-sandbox-").tempdir() {
            Ok(dir) => dir,
            Err(e) => return SandboxOutcome::SpawnFailed(format!("temp dir: {e}")),
        };
        let source = dir.path().join(self.source_name());
        if let Err(e) = tokio::fs::write(&source, code).await {
            return SandboxOutcome::SpawnFailed(format!("writing source: {e}"));
        }
        self.spawn_and_wait(args, &source, dir.path()).await
    }

    async fn spawn_and_wait(&self, args: &[String], source: &Path, cwd: &Path) -> SandboxOutcome {
        let mut cmd = Command::new(&self.interpreter);
        cmd.args(args)
            .arg(source)
            .current_dir(cwd)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".into()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(interpreter = %self.interpreter, error = %e, "sandbox spawn failed");
                return SandboxOutcome::SpawnFailed(e.to_string());
            }
        };

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => SandboxOutcome::Success,
            Ok(Ok(status)) => SandboxOutcome::NonZeroExit(status.code()),
            Ok(Err(e)) => SandboxOutcome::SpawnFailed(e.to_string()),
            Err(_) => {
                tracing::debug!(timeout = ?self.timeout, "sandbox run timed out");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill timed-out sandbox child");
                }
                SandboxOutcome::TimedOut
            }
        }
    }
}

/// Quote-aware bracket balance check, used when no interpreter check is configured.
#[must_use]
pub fn delimiters_balanced(code: &str) -> bool {
    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in code.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(open) {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty() && quote.is_none()
}
