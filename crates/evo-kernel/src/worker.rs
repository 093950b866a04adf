//! Worker pool
//!
//! `W` long-lived tasks pull agent ids off the experiment queue. For each
//! one a worker leases a resource token (in constrained mode), launches the
//! run, polls it to completion, scores successful output and settles the
//! record. A worker that panics mid-run fails that agent and keeps serving.

use crate::backend::{ExecutionHandle, LaunchRequest, RunState};
use crate::orchestrator::{Orchestrator, FINISHED_COUNTER, LINEAGE_FAILURE_COUNTER};
use crate::resource::ResourceLease;
use evo_core::{AgentId, AgentOutput, AgentStatus, ExecutionFailure};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Running worker tasks
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(ctx: Arc<Orchestrator>, count: usize) -> Self {
        let handles = (0..count)
            .map(|worker| {
                let ctx = Arc::clone(&ctx);
                let shutdown = ctx.shutdown.subscribe();
                tokio::spawn(worker_loop(ctx, worker, shutdown))
            })
            .collect();
        tracing::info!(workers = count, "worker pool started");
        Self { handles }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub(crate) async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task ended abnormally");
            }
        }
    }
}

async fn worker_loop(ctx: Arc<Orchestrator>, worker: usize, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!(worker, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let id = tokio::select! {
            _ = shutdown.changed() => break,
            next = ctx.queue.pop() => match next {
                Some(id) => id,
                None => break,
            },
        };
        if ctx.status_of(id) != Some(AgentStatus::Queued) {
            tracing::debug!(worker, agent_id = %id, "skipping agent that is no longer queued");
            continue;
        }

        let lease = if ctx.settings.resource_constrained {
            tokio::select! {
                _ = shutdown.changed() => break,
                lease = ctx.resources.acquire() => match lease {
                    Some(lease) => Some(lease),
                    None => break,
                },
            }
        } else {
            None
        };

        let run = AssertUnwindSafe(ctx.run_agent(worker, id, lease)).catch_unwind();
        if run.await.is_err() {
            tracing::error!(worker, agent_id = %id, "agent supervision panicked");
            ctx.running.remove(&id);
            ctx.settle_failure(
                id,
                ExecutionFailure::Backend("agent supervision panicked".to_string()),
            )
            .await;
        }
    }
    tracing::debug!(worker, "worker stopped");
}

impl Orchestrator {
    /// Launch, supervise and settle one agent. The lease lives until this
    /// returns (or unwinds).
    async fn run_agent(&self, worker: usize, id: AgentId, lease: Option<ResourceLease>) {
        let token = lease.as_ref().map(|l| l.token().clone());
        let request = {
            let mut records = self.records.write();
            let Some(record) = records.get_mut(&id) else {
                return;
            };
            if let Err(e) = record.mark_running(token.clone()) {
                tracing::debug!(worker, agent_id = %id, error = %e, "agent not startable");
                return;
            }
            LaunchRequest {
                agent_id: id,
                kind: record.kind.clone(),
                config: record.config.clone(),
                token,
                timeout: self.settings.execution_timeout(),
            }
        };
        tracing::info!(worker, agent_id = %id, kind = %request.kind,
            token = ?request.token.as_ref().map(evo_core::TokenId::as_str), "agent running");

        let handle = match self.backend.launch(request).await {
            Ok(handle) => handle,
            Err(failure) => {
                tracing::warn!(worker, agent_id = %id, error = %failure, "agent launch failed");
                self.settle_failure(id, failure).await;
                return;
            }
        };
        self.running.insert(id, Arc::clone(&handle));

        // A terminate that landed before the handle was registered could not
        // reach the run.
        if self.status_of(id) == Some(AgentStatus::Terminated) {
            if let Err(e) = handle.terminate(self.settings.grace_period()).await {
                tracing::warn!(agent_id = %id, error = %e, "failed to stop terminated agent");
            }
            self.running.remove(&id);
            return;
        }

        let state = self.supervise(handle.as_ref()).await;
        self.running.remove(&id);
        let transcript = handle
            .read_output(self.settings.backend.output_buffer_lines)
            .await;
        self.transcripts.insert(id, transcript.clone());

        let outcome = match state {
            Ok(RunState::Exited(0)) => AgentOutput::parse_stdout(&transcript),
            Ok(RunState::Exited(code)) => Err(ExecutionFailure::NonZeroExit(code)),
            Ok(RunState::TimedOut) => {
                Err(ExecutionFailure::Timeout(self.settings.execution_timeout()))
            }
            Ok(RunState::Killed | RunState::Running) => Err(ExecutionFailure::Killed),
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok(output) => {
                if self.status_of(id) != Some(AgentStatus::Running) {
                    tracing::debug!(agent_id = %id, "result of terminated agent discarded");
                    return;
                }
                let report = self.evaluator.evaluate(&output).await;
                tracing::info!(worker, agent_id = %id, fitness = report.total,
                    syntax = report.syntax, execution = report.execution,
                    security = report.security, "agent scored");
                self.settle_success(id, report.total, output).await;
            }
            Err(failure) => {
                tracing::info!(worker, agent_id = %id, error = %failure, "agent run failed");
                self.settle_failure(id, failure).await;
            }
        }
    }

    async fn supervise(&self, handle: &dyn ExecutionHandle) -> Result<RunState, ExecutionFailure> {
        let mut ticker = tokio::time::interval(self.settings.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match handle.poll().await? {
                RunState::Running => continue,
                finished => return Ok(finished),
            }
        }
    }

    /// `running -> completed`, then lineage for the agent and its solution
    async fn settle_success(&self, id: AgentId, fitness: f64, output: AgentOutput) {
        let updated = {
            let mut records = self.records.write();
            let Some(record) = records.get_mut(&id) else {
                return;
            };
            if let Err(e) = record.complete(fitness, output.artifacts.clone()) {
                tracing::debug!(agent_id = %id, error = %e, "completion discarded");
                return;
            }
            record.clone()
        };
        metrics::counter!(FINISHED_COUNTER, "status" => AgentStatus::Completed.as_str())
            .increment(1);
        self.persist_agent(&updated).await;
        if let Err(e) = self.lineage.record_solution(&updated, &output).await {
            metrics::counter!(LINEAGE_FAILURE_COUNTER).increment(1);
            tracing::warn!(agent_id = %id, error = %e, "solution lineage write failed");
        }
        self.notify_finished();
    }

    /// `running -> failed`; a record that already finished is left alone
    pub(crate) async fn settle_failure(&self, id: AgentId, failure: ExecutionFailure) {
        let updated = {
            let mut records = self.records.write();
            let Some(record) = records.get_mut(&id) else {
                return;
            };
            if let Err(e) = record.fail(&failure) {
                tracing::debug!(agent_id = %id, error = %e, "failure discarded");
                return;
            }
            record.clone()
        };
        metrics::counter!(FINISHED_COUNTER, "status" => AgentStatus::Failed.as_str()).increment(1);
        self.persist_agent(&updated).await;
        self.notify_finished();
    }
}
