//! Run Watcher Integration Tests
//!
//! Drives `RunWatcherActor` against a scripted in-memory source: first-load
//! framing, stopping at a final status, retries by task path and failed
//! loads or refreshes.
//!
//! Run:
//!   cargo test -p run-graph --test run_watcher_test

use async_trait::async_trait;
use serde_json::json;
use shared_types::{ExecutionState, JobGraph, RunResponse, RunView};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use run_graph::layout::{GraphBuilder, LayeredLayoutEngine};
use run_graph::{
    spawn_run_watcher, ClientError, Pipeline, RetryCommand, RunRef, RunSnapshot, RunSource,
    RunWatcherMsg, WatcherError,
};

const WAIT: Duration = Duration::from_secs(5);
const SLOW_POLL: Duration = Duration::from_secs(3600);

// ============================================================================
// Fixtures
// ============================================================================

fn run_snapshot(status: &str, b_state: &str) -> RunSnapshot {
    let run: RunResponse = serde_json::from_value(json!({
        "id": "run-1",
        "status": status,
        "tasks": [
            {"id": "a-1", "task_id": "A", "state": "success"},
            {"id": "c-1", "task_id": "C", "type": "subflow", "state": b_state,
             "subflow_instance_id": "sf-1",
             "dependencies": [{"task_id": "A", "instance_id": "a-1"}]}
        ],
        "subflows": [
            {"id": "sf-1", "status": status,
             "tasks": [{"id": "b-1", "task_id": "B", "state": b_state}]}
        ]
    }))
    .unwrap();
    RunSnapshot::Run(run)
}

fn job_snapshot(status: &str) -> RunSnapshot {
    let job: JobGraph = serde_json::from_value(json!({
        "id": "job-1", "task_type": "JOB", "kind": "NightBatch", "status": status,
        "children": [
            {"id": "t-1", "task_type": "TASK", "kind": "Extract", "status": status}
        ]
    }))
    .unwrap();
    RunSnapshot::Job(job)
}

/// Replays `script` one fetch at a time and repeats its last step forever.
/// `None` steps fail with a 503.
struct ScriptedSource {
    script: Mutex<Vec<Option<RunSnapshot>>>,
    fetches: AtomicUsize,
    retries: Mutex<Vec<(RunRef, RetryCommand)>>,
}

impl ScriptedSource {
    fn new(script: Vec<Option<RunSnapshot>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            fetches: AtomicUsize::new(0),
            retries: Mutex::new(Vec::new()),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn retries(&self) -> Vec<(RunRef, RetryCommand)> {
        self.retries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunSource for ScriptedSource {
    async fn fetch(&self, _run: &RunRef) -> Result<RunSnapshot, ClientError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap();
        let step = script.get(n).or_else(|| script.last()).cloned().flatten();
        step.ok_or_else(|| ClientError::Api {
            status: 503,
            detail: "backend unavailable".to_string(),
        })
    }

    async fn retry(&self, run: &RunRef, command: &RetryCommand) -> Result<(), ClientError> {
        self.retries
            .lock()
            .unwrap()
            .push((run.clone(), command.clone()));
        Ok(())
    }
}

fn pipeline() -> Pipeline {
    Pipeline::new(Arc::new(LayeredLayoutEngine::new()), GraphBuilder::default())
}

async fn wait_for<F>(updates: &mut watch::Receiver<RunView>, done: F) -> RunView
where
    F: Fn(&RunView) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            {
                let view = updates.borrow_and_update();
                if done(&view) {
                    return view.clone();
                }
            }
            updates.changed().await.expect("watcher dropped its sender");
        }
    })
    .await
    .expect("timed out waiting for view")
}

async fn wait_until<F: Fn() -> bool>(done: F) {
    tokio::time::timeout(WAIT, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

// ============================================================================
// Initial load
// ============================================================================

#[tokio::test]
async fn test_first_view_requests_fit() {
    let source = ScriptedSource::new(vec![Some(run_snapshot("RUNNING", "running"))]);
    let (watcher, handle, mut updates) = spawn_run_watcher(
        RunRef::Run("run-1".to_string()),
        source.clone(),
        pipeline(),
        SLOW_POLL,
    )
    .await
    .unwrap();

    let first = wait_for(&mut updates, |v| v.graph.is_some()).await;
    assert!(first.fit_view);
    assert!(first.live);
    assert!(!first.loading);
    assert_eq!(first.graph.unwrap().nodes.len(), 3);

    let view = ractor::call!(watcher, |reply| RunWatcherMsg::GetView { reply }).unwrap();
    assert!(!view.fit_view);
    assert!(view.graph.is_some());

    // A manual refresh publishes again without reframing.
    watcher.cast(RunWatcherMsg::Poll).unwrap();
    wait_until(|| source.fetches() >= 2).await;
    let refreshed = wait_for(&mut updates, |v| !v.fit_view).await;
    assert!(refreshed.graph.is_some());

    watcher.stop(None);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_remount_reframes() {
    let source = ScriptedSource::new(vec![Some(run_snapshot("RUNNING", "running"))]);
    let (watcher, handle, mut updates) = spawn_run_watcher(
        RunRef::Run("run-1".to_string()),
        source.clone(),
        pipeline(),
        SLOW_POLL,
    )
    .await
    .unwrap();
    wait_for(&mut updates, |v| v.fit_view).await;
    watcher.cast(RunWatcherMsg::Poll).unwrap();
    wait_for(&mut updates, |v| v.graph.is_some() && !v.fit_view).await;

    watcher.cast(RunWatcherMsg::Remount).unwrap();
    let reframed = wait_for(&mut updates, |v| v.fit_view).await;
    assert!(reframed.graph.is_some());
    assert!(!reframed.loading);
    assert_eq!(source.fetches(), 3);

    watcher.stop(None);
    handle.await.unwrap();
}

// ============================================================================
// Polling lifecycle
// ============================================================================

#[tokio::test]
async fn test_polling_stops_at_final_status() {
    let source = ScriptedSource::new(vec![
        Some(run_snapshot("RUNNING", "running")),
        Some(run_snapshot("SUCCESS", "success")),
    ]);
    let (watcher, handle, mut updates) = spawn_run_watcher(
        RunRef::Run("run-1".to_string()),
        source.clone(),
        pipeline(),
        Duration::from_millis(20),
    )
    .await
    .unwrap();

    let done = wait_for(&mut updates, |v| !v.live && v.graph.is_some()).await;
    let graph = done.graph.unwrap();
    assert_eq!(graph.status, Some(ExecutionState::Success));
    let b = graph.node("b-1").unwrap();
    assert_eq!(
        b.data.task.as_ref().unwrap().state,
        ExecutionState::Success
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = source.fetches();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(source.fetches(), settled, "no polls after a final status");

    watcher.stop(None);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_failed_first_load_reports_error_and_recovers() {
    let source = ScriptedSource::new(vec![None, Some(run_snapshot("RUNNING", "running"))]);
    let (watcher, handle, mut updates) = spawn_run_watcher(
        RunRef::Run("run-1".to_string()),
        source.clone(),
        pipeline(),
        SLOW_POLL,
    )
    .await
    .unwrap();

    let failed = wait_for(&mut updates, |v| v.error.is_some()).await;
    assert!(failed.graph.is_none());
    assert!(!failed.loading);
    assert!(failed.live, "polling continues after a failed first load");
    assert!(failed.error.unwrap().contains("503"));

    watcher.cast(RunWatcherMsg::Poll).unwrap();
    let recovered = wait_for(&mut updates, |v| v.graph.is_some()).await;
    assert!(recovered.fit_view);
    assert!(recovered.error.is_none());
    assert!(recovered.live);
    assert_eq!(source.fetches(), 2);

    watcher.stop(None);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_failed_refresh_keeps_graph() {
    let source = ScriptedSource::new(vec![Some(run_snapshot("RUNNING", "running")), None]);
    let (watcher, handle, mut updates) = spawn_run_watcher(
        RunRef::Run("run-1".to_string()),
        source.clone(),
        pipeline(),
        SLOW_POLL,
    )
    .await
    .unwrap();
    wait_for(&mut updates, |v| v.graph.is_some()).await;

    watcher.cast(RunWatcherMsg::Poll).unwrap();
    let failed = wait_for(&mut updates, |v| v.error.is_some()).await;
    assert!(failed.error.unwrap().contains("503"));
    assert_eq!(failed.graph.unwrap().nodes.len(), 3);
    assert!(failed.live);

    watcher.stop(None);
    handle.await.unwrap();
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_retry_uses_task_path_and_resumes_polling() {
    let source = ScriptedSource::new(vec![Some(run_snapshot("FAILED", "failed"))]);
    let (watcher, handle, mut updates) = spawn_run_watcher(
        RunRef::Run("run-1".to_string()),
        source.clone(),
        pipeline(),
        Duration::from_millis(20),
    )
    .await
    .unwrap();
    wait_for(&mut updates, |v| !v.live && v.graph.is_some()).await;
    let before = source.fetches();

    let result = ractor::call!(watcher, |reply| RunWatcherMsg::Retry {
        task_id: "b-1".to_string(),
        reset_downstream: true,
        reply,
    })
    .unwrap();
    assert!(result.is_ok());

    let retries = source.retries();
    assert_eq!(retries.len(), 1);
    let (run, command) = &retries[0];
    assert_eq!(run, &RunRef::Run("run-1".to_string()));
    assert_eq!(command.task_path, "C>>B");
    assert_eq!(command.task_id, "b-1");
    assert!(command.reset_downstream);

    wait_until(|| source.fetches() > before).await;

    watcher.stop(None);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_retry_job_task() {
    let source = ScriptedSource::new(vec![Some(job_snapshot("FAILED"))]);
    let (watcher, handle, mut updates) = spawn_run_watcher(
        RunRef::Job("job-1".to_string()),
        source.clone(),
        pipeline(),
        SLOW_POLL,
    )
    .await
    .unwrap();
    wait_for(&mut updates, |v| v.graph.is_some()).await;

    let result = ractor::call!(watcher, |reply| RunWatcherMsg::Retry {
        task_id: "t-1".to_string(),
        reset_downstream: false,
        reply,
    })
    .unwrap();
    assert!(result.is_ok());
    let retries = source.retries();
    assert_eq!(retries[0].0, RunRef::Job("job-1".to_string()));
    assert_eq!(retries[0].1.task_path, "Extract");

    watcher.stop(None);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_retry_unknown_task_rejected() {
    let source = ScriptedSource::new(vec![Some(run_snapshot("RUNNING", "running"))]);
    let (watcher, handle, mut updates) = spawn_run_watcher(
        RunRef::Run("run-1".to_string()),
        source.clone(),
        pipeline(),
        SLOW_POLL,
    )
    .await
    .unwrap();
    wait_for(&mut updates, |v| v.graph.is_some()).await;

    let result = ractor::call!(watcher, |reply| RunWatcherMsg::Retry {
        task_id: "nope".to_string(),
        reset_downstream: false,
        reply,
    })
    .unwrap();
    assert!(matches!(result, Err(WatcherError::UnknownTask(id)) if id == "nope"));
    assert!(source.retries().is_empty());

    watcher.stop(None);
    handle.await.unwrap();
}
