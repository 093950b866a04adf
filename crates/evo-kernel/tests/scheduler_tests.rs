//! Scheduler Tests
//!
//! Queue, worker pool, resource pool and lifecycle behaviour of the
//! orchestrator, driven through the scripted backend.

use evo_core::{AgentId, AgentStatus, ConfigError, EvoError, KindTemplate, SubmitRequest};
use evo_kernel::prelude::*;
use evo_kernel::test_harness::{Script, ScriptedBackend};
use evo_test_utils::{fast_settings, sample_config, scripted_config, wait_until, TestRig};
use std::time::Duration;

const SETTLE: Duration = Duration::from_secs(10);

fn all_terminal(orchestrator: &Orchestrator) -> bool {
    orchestrator
        .list(ListFilter::default())
        .iter()
        .all(|r| r.is_terminal())
}

async fn submit(orchestrator: &Orchestrator, kind: &str, duration_ms: u32) -> AgentId {
    orchestrator
        .submit(SubmitRequest::new(kind, scripted_config(10, 500, duration_ms)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_concurrency_bounded_by_tokens() {
    let rig = TestRig::start(fast_settings(4, Some(2)), ScriptedBackend::new());
    for _ in 0..8 {
        submit(&rig.orchestrator, "ok", 20).await;
    }
    assert!(wait_until(SETTLE, || all_terminal(&rig.orchestrator)).await);

    assert!(rig.backend.peak() <= 2, "peak {}", rig.backend.peak());
    assert!(rig.orchestrator.resources().peak() <= 2);
    assert_eq!(rig.orchestrator.resources().in_use(), 0);
    assert_eq!(rig.orchestrator.resources().available(), 2);

    let completed = rig
        .orchestrator
        .list(ListFilter::default().status(AgentStatus::Completed));
    assert_eq!(completed.len(), 8);
    assert!(completed.iter().all(|r| r.resource_token().is_some()));
    assert!(completed.iter().all(|r| r.fitness() == Some(0.5)));
}

#[tokio::test]
async fn test_concurrency_bounded_by_workers_when_unconstrained() {
    let rig = TestRig::start(fast_settings(2, None), ScriptedBackend::new());
    for _ in 0..6 {
        submit(&rig.orchestrator, "ok", 15).await;
    }
    assert!(wait_until(SETTLE, || all_terminal(&rig.orchestrator)).await);

    assert!(rig.backend.peak() <= 2);
    assert_eq!(rig.orchestrator.resources().peak(), 0);
    assert!(rig
        .orchestrator
        .list(ListFilter::default())
        .iter()
        .all(|r| r.resource_token().is_none()));
}

#[tokio::test]
async fn test_missing_kind_is_rejected_before_queueing() {
    let err = SubmitRequest::from_json(&serde_json::json!({ "config": { "lr": 0.1 } }))
        .unwrap_err();
    assert_eq!(err, ConfigError::MissingField("kind".to_string()));

    let mut settings = fast_settings(1, Some(1));
    settings.kinds.insert(
        "nanogpt".to_string(),
        KindTemplate {
            description: "small transformer".to_string(),
            required_keys: vec!["lr".to_string()],
        },
    );
    let rig = TestRig::start(settings, ScriptedBackend::new());
    let before = rig.orchestrator.queue().len();

    let unknown = rig
        .orchestrator
        .submit(SubmitRequest::new("mystery", sample_config()))
        .await;
    assert!(matches!(
        unknown,
        Err(EvoError::Config(ConfigError::UnknownKind(_)))
    ));
    let missing_key = rig
        .orchestrator
        .submit(SubmitRequest::new("nanogpt", evo_core::ConfigTree::new()))
        .await;
    assert!(matches!(missing_key, Err(EvoError::Config(_))));

    assert_eq!(rig.orchestrator.queue().len(), before);
    assert_eq!(rig.orchestrator.statistics().total, 0);
    assert_eq!(rig.orchestrator.resources().available(), 1);
}

#[tokio::test]
async fn test_lease_released_whatever_the_outcome() {
    let backend = ScriptedBackend::new()
        .with_script("exit", Script::Exit(3))
        .with_script("garbage", Script::Garbage)
        .with_script("refuse", Script::RefuseLaunch)
        .with_script("panic", Script::PanicOnPoll);
    let rig = TestRig::start(fast_settings(2, Some(1)), backend);

    let exit = submit(&rig.orchestrator, "exit", 1).await;
    let garbage = submit(&rig.orchestrator, "garbage", 1).await;
    let refuse = submit(&rig.orchestrator, "refuse", 1).await;
    let panic = submit(&rig.orchestrator, "panic", 1).await;
    let ok = submit(&rig.orchestrator, "ok", 1).await;
    assert!(wait_until(SETTLE, || all_terminal(&rig.orchestrator)).await);

    for id in [exit, garbage, refuse, panic] {
        let record = rig.orchestrator.get(id).unwrap();
        assert_eq!(record.status(), AgentStatus::Failed, "{id}");
        assert_eq!(record.fitness(), None);
        assert!(record.failure().is_some());
    }
    assert_eq!(
        rig.orchestrator.get(exit).unwrap().failure(),
        Some("agent exited with code 3")
    );
    assert!(rig
        .orchestrator
        .get(garbage)
        .unwrap()
        .failure()
        .is_some_and(|f| f.contains("could not be parsed")));

    assert_eq!(rig.orchestrator.get(ok).unwrap().status(), AgentStatus::Completed);
    assert_eq!(rig.orchestrator.resources().in_use(), 0);
    assert_eq!(rig.orchestrator.resources().available(), 1);
}

#[tokio::test]
async fn test_terminate_completed_agent_is_noop() {
    let rig = TestRig::start(fast_settings(1, None), ScriptedBackend::new());
    let id = submit(&rig.orchestrator, "ok", 1).await;
    assert!(wait_until(SETTLE, || all_terminal(&rig.orchestrator)).await);

    let before = rig.orchestrator.get(id).unwrap();
    assert!(!rig.orchestrator.terminate(id).await.unwrap());
    let after = rig.orchestrator.get(id).unwrap();
    assert_eq!(after.status(), AgentStatus::Completed);
    assert_eq!(after.fitness(), before.fitness());
    assert_eq!(after.ended_at(), before.ended_at());
}

#[tokio::test]
async fn test_terminate_queued_agent_is_never_launched() {
    let backend = ScriptedBackend::new().with_script("hang", Script::Hang);
    let rig = TestRig::start(fast_settings(1, Some(1)), backend);

    let running = submit(&rig.orchestrator, "hang", 1).await;
    let queued = submit(&rig.orchestrator, "ok", 1).await;
    assert!(
        wait_until(SETTLE, || {
            rig.orchestrator.get(running).unwrap().status() == AgentStatus::Running
        })
        .await
    );
    assert_eq!(rig.orchestrator.get(queued).unwrap().status(), AgentStatus::Queued);

    assert!(rig.orchestrator.terminate(queued).await.unwrap());
    assert!(!rig.orchestrator.queue().snapshot().contains(&queued));
    assert!(rig.orchestrator.terminate(running).await.unwrap());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.backend.launched(), 1);
    assert_eq!(rig.backend.live(), 0);
    for id in [running, queued] {
        assert_eq!(
            rig.orchestrator.get(id).unwrap().status(),
            AgentStatus::Terminated
        );
    }
    assert_eq!(rig.orchestrator.resources().in_use(), 0);
}

#[tokio::test]
async fn test_terminated_run_stays_terminated() {
    let backend = ScriptedBackend::new().with_script("hang", Script::Hang);
    let rig = TestRig::start(fast_settings(1, None), backend);
    let id = submit(&rig.orchestrator, "hang", 1).await;
    assert!(
        wait_until(SETTLE, || rig.backend.live() == 1).await,
        "run never started"
    );

    assert!(rig.orchestrator.terminate(id).await.unwrap());
    // The worker observes the killed handle after this; it must not
    // overwrite the terminal status.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let record = rig.orchestrator.get(id).unwrap();
    assert_eq!(record.status(), AgentStatus::Terminated);
    assert_eq!(record.fitness(), None);
    assert_eq!(rig.orchestrator.statistics().terminated, 1);
}

#[tokio::test]
async fn test_scripted_timeout_fails_the_agent() {
    let backend = ScriptedBackend::new().with_script("hang", Script::Hang);
    let mut settings = fast_settings(1, Some(1));
    settings.execution_timeout_secs = 1;
    let rig = TestRig::start(settings, backend);

    let id = submit(&rig.orchestrator, "hang", 1).await;
    assert!(wait_until(SETTLE, || all_terminal(&rig.orchestrator)).await);
    let record = rig.orchestrator.get(id).unwrap();
    assert_eq!(record.status(), AgentStatus::Failed);
    assert_eq!(
        record.failure(),
        Some("agent exceeded its wall-clock limit of 1s")
    );
    assert_eq!(rig.orchestrator.resources().in_use(), 0);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let rig = TestRig::start(fast_settings(1, None), ScriptedBackend::new());
    let ghost = AgentId::new();
    assert!(matches!(rig.orchestrator.get(ghost), Err(EvoError::NotFound(id)) if id == ghost));
    assert!(matches!(
        rig.orchestrator.terminate(ghost).await,
        Err(EvoError::NotFound(_))
    ));
    assert!(matches!(
        rig.orchestrator.logs(ghost, 10).await,
        Err(EvoError::NotFound(_))
    ));
    assert!(matches!(
        rig.orchestrator.lineage(ghost, 3).await,
        Err(EvoError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_logs_and_statistics() {
    let backend = ScriptedBackend::new().with_script("exit", Script::Exit(1));
    let rig = TestRig::start(fast_settings(2, None), backend);
    let ok = submit(&rig.orchestrator, "ok", 1).await;
    let bad = submit(&rig.orchestrator, "exit", 1).await;
    assert!(wait_until(SETTLE, || all_terminal(&rig.orchestrator)).await);

    let last = rig.orchestrator.logs(ok, 1).await.unwrap();
    assert!(last.starts_with('{'), "{last}");
    assert!(rig
        .orchestrator
        .logs(bad, 10)
        .await
        .unwrap()
        .contains("exiting with 1"));

    let stats = rig.orchestrator.statistics();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.best_fitness, Some(0.5));
    assert_eq!(stats.average_fitness, Some(0.5));
    assert_eq!(stats.max_generation, 0);
    assert_eq!(stats.queue_depth, 0);

    assert_eq!(
        rig.orchestrator
            .list(ListFilter::default().status(AgentStatus::Failed))
            .len(),
        1
    );
    assert_eq!(rig.orchestrator.list(ListFilter::default().generation(1)).len(), 0);
}

#[tokio::test]
async fn test_shutdown_terminates_and_rejects() {
    let backend = ScriptedBackend::new().with_script("hang", Script::Hang);
    let rig = TestRig::start(fast_settings(2, Some(2)), backend);
    let a = submit(&rig.orchestrator, "hang", 1).await;
    let b = submit(&rig.orchestrator, "hang", 1).await;
    let c = submit(&rig.orchestrator, "hang", 1).await;
    assert!(wait_until(SETTLE, || rig.backend.live() == 2).await);

    rig.orchestrator.shutdown().await;
    for id in [a, b, c] {
        assert_eq!(
            rig.orchestrator.get(id).unwrap().status(),
            AgentStatus::Terminated
        );
    }
    assert_eq!(rig.backend.live(), 0);
    assert!(matches!(
        rig.orchestrator
            .submit(SubmitRequest::new("ok", sample_config()))
            .await,
        Err(EvoError::ShutDown)
    ));
}

#[tokio::test]
async fn test_snapshot_export_and_import() {
    let backend = ScriptedBackend::new().with_script("hang", Script::Hang);
    let rig = TestRig::start(fast_settings(1, None), backend);
    let done = submit(&rig.orchestrator, "ok", 1).await;
    assert!(wait_until(SETTLE, || all_terminal(&rig.orchestrator)).await);
    let stuck = submit(&rig.orchestrator, "hang", 1).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.jsonl");
    assert_eq!(rig.orchestrator.export_records(&path).unwrap(), 2);
    rig.orchestrator.shutdown().await;

    let fresh = TestRig::start(fast_settings(1, None), ScriptedBackend::new());
    assert_eq!(fresh.orchestrator.import_records(&path).unwrap(), 2);
    assert_eq!(fresh.orchestrator.import_records(&path).unwrap(), 0);
    let restored = fresh.orchestrator.get(done).unwrap();
    assert_eq!(restored.status(), AgentStatus::Completed);
    assert_eq!(restored.fitness(), Some(0.5));
    assert_eq!(
        fresh.orchestrator.get(stuck).unwrap().status(),
        AgentStatus::Terminated
    );
}

#[tokio::test]
async fn test_import_rejects_inconsistent_records() {
    let good = evo_test_utils::completed_record(0.7);
    let failed = evo_test_utils::failed_record(&evo_core::ExecutionFailure::NonZeroExit(1));
    let mut tampered: serde_json::Value =
        serde_json::from_str(&evo_core::schema::encode_record(&failed).unwrap()).unwrap();
    tampered["record"]["fitness"] = serde_json::json!(0.9);
    tampered["record"]["generation"] = serde_json::json!(3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.jsonl");
    std::fs::write(
        &path,
        format!(
            "{}\n{}\n",
            evo_core::schema::encode_record(&good).unwrap(),
            tampered
        ),
    )
    .unwrap();

    let rig = TestRig::start(fast_settings(1, None), ScriptedBackend::new());
    let err = rig.orchestrator.import_records(&path).unwrap_err();
    assert!(
        matches!(err, EvoError::Schema(evo_core::SchemaError::InvalidRecord { .. })),
        "{err}"
    );
    assert!(rig.orchestrator.get(good.id).is_err());
    assert!(rig.orchestrator.get(failed.id).is_err());
}
