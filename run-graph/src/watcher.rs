//! RunWatcherActor - keeps the rendered graph of one live run up to date.
//!
//! A ticker casts `Poll` every interval. Each poll takes a snapshot ticket,
//! fetches and renders in a background task, and reports back with
//! `SnapshotComputed`; the reconciler decides whether the result is still
//! current. Polling stops once the run reports a final status and resumes
//! after a retry. Every change is published on a `watch` channel.

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::{ExecutionState, RenderGraph, RunView};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api_client::ClientError;
use crate::paths::resolve_paths;
use crate::pipeline::{Pipeline, PipelineError};
use crate::reconcile::{Reconciler, Reconciliation, SnapshotSeq};
use crate::source::{RetryCommand, RunRef, RunSource};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("Fetching run failed: {0}")]
    Fetch(#[from] ClientError),

    #[error("Rendering run failed: {0}")]
    Render(#[from] PipelineError),

    #[error("Retry failed: {0}")]
    Retry(ClientError),

    #[error("Task not found in current run: {0}")]
    UnknownTask(String),

    #[error("Watcher spawn failed: {0}")]
    Spawn(String),
}

/// Result of one fetch-and-render cycle.
#[derive(Debug)]
pub struct ComputedSnapshot {
    pub graph: RenderGraph,
    /// Task instance id → task path
    pub paths: HashMap<String, String>,
    pub status: ExecutionState,
}

#[derive(Debug)]
pub enum RunWatcherMsg {
    /// Fetch and render a fresh snapshot.
    Poll,
    /// Background computation finished.
    SnapshotComputed {
        seq: SnapshotSeq,
        outcome: Result<ComputedSnapshot, WatcherError>,
    },
    GetView {
        reply: RpcReplyPort<RunView>,
    },
    /// Retry one task, then refresh without resetting the view.
    Retry {
        task_id: String,
        reset_downstream: bool,
        reply: RpcReplyPort<Result<(), WatcherError>>,
    },
    /// Drop the rendered graph and lay the run out again from scratch.
    Remount,
}

pub struct RunWatcherArguments {
    pub run: RunRef,
    pub source: Arc<dyn RunSource>,
    pub pipeline: Pipeline,
    pub poll_interval: Duration,
    pub updates: watch::Sender<RunView>,
}

pub struct RunWatcherState {
    run: RunRef,
    source: Arc<dyn RunSource>,
    pipeline: Pipeline,
    poll_interval: Duration,
    updates: watch::Sender<RunView>,
    reconciler: Reconciler,
    paths: HashMap<String, String>,
    ticker: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
pub struct RunWatcherActor;

#[async_trait]
impl Actor for RunWatcherActor {
    type Msg = RunWatcherMsg;
    type State = RunWatcherState;
    type Arguments = RunWatcherArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let poll_interval = args.poll_interval.max(MIN_POLL_INTERVAL);
        tracing::info!(
            run = %args.run,
            engine = args.pipeline.engine().name(),
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Starting run watcher"
        );
        Ok(RunWatcherState {
            run: args.run,
            source: args.source,
            pipeline: args.pipeline,
            poll_interval,
            updates: args.updates,
            reconciler: Reconciler::new(),
            paths: HashMap::new(),
            ticker: Some(start_ticker(myself, poll_interval)),
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        tracing::info!(run = %state.run, "Run watcher stopped");
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RunWatcherMsg::Poll => {
                self.poll(myself, state);
            }
            RunWatcherMsg::SnapshotComputed { seq, outcome } => {
                self.settle(seq, outcome, state);
            }
            RunWatcherMsg::GetView { reply } => {
                let _ = reply.send(current_view(state, false));
            }
            RunWatcherMsg::Retry {
                task_id,
                reset_downstream,
                reply,
            } => {
                let result = self.retry(&myself, state, task_id, reset_downstream).await;
                let _ = reply.send(result);
            }
            RunWatcherMsg::Remount => {
                tracing::info!(run = %state.run, "Remounting run graph");
                state.reconciler.reset();
                publish(state, false);
                self.poll(myself, state);
            }
        }
        Ok(())
    }
}

impl RunWatcherActor {
    fn poll(&self, myself: ActorRef<RunWatcherMsg>, state: &mut RunWatcherState) {
        let seq = state.reconciler.begin();
        if state.reconciler.is_loading() {
            publish(state, false);
        }

        let source = state.source.clone();
        let pipeline = state.pipeline.clone();
        let run = state.run.clone();
        tokio::spawn(async move {
            let outcome = compute_snapshot(source.as_ref(), &pipeline, &run).await;
            let _ = myself.cast(RunWatcherMsg::SnapshotComputed { seq, outcome });
        });
    }

    fn settle(
        &self,
        seq: SnapshotSeq,
        outcome: Result<ComputedSnapshot, WatcherError>,
        state: &mut RunWatcherState,
    ) {
        let snapshot = match outcome {
            Ok(snapshot) => snapshot,
            Err(err) => {
                state.reconciler.fail(seq, &err);
                publish(state, false);
                return;
            }
        };

        let status = snapshot.status;
        let fit_view = match state.reconciler.apply(seq, snapshot.graph) {
            Reconciliation::Stale => return,
            Reconciliation::Adopted { fit_view } => fit_view,
            Reconciliation::Refreshed { .. } | Reconciliation::Empty => false,
        };
        state.paths = snapshot.paths;

        if status.is_final() {
            if let Some(ticker) = state.ticker.take() {
                ticker.abort();
                tracing::info!(run = %state.run, status = %status, "Run finished; polling stopped");
            }
        }
        publish(state, fit_view);
    }

    async fn retry(
        &self,
        myself: &ActorRef<RunWatcherMsg>,
        state: &mut RunWatcherState,
        task_id: String,
        reset_downstream: bool,
    ) -> Result<(), WatcherError> {
        let task_path = state
            .paths
            .get(&task_id)
            .cloned()
            .ok_or_else(|| WatcherError::UnknownTask(task_id.clone()))?;
        let command = RetryCommand {
            task_id,
            task_path,
            reset_downstream,
        };
        state
            .source
            .retry(&state.run, &command)
            .await
            .map_err(WatcherError::Retry)?;

        if state.ticker.is_none() {
            state.ticker = Some(start_ticker(myself.clone(), state.poll_interval));
            tracing::info!(run = %state.run, "Polling resumed after retry");
        } else {
            let _ = myself.cast(RunWatcherMsg::Poll);
        }
        Ok(())
    }
}

/// Fetch, normalize and render one snapshot.
pub async fn compute_snapshot(
    source: &dyn RunSource,
    pipeline: &Pipeline,
    run: &RunRef,
) -> Result<ComputedSnapshot, WatcherError> {
    let snapshot = source.fetch(run).await?;
    let tree = snapshot.to_tree();
    let graph = pipeline.render(&tree).await?;
    Ok(ComputedSnapshot {
        graph,
        paths: resolve_paths(&tree),
        status: tree.status(),
    })
}

/// The interval fires immediately, so the first poll happens right away.
fn start_ticker(myself: ActorRef<RunWatcherMsg>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if myself.cast(RunWatcherMsg::Poll).is_err() {
                break;
            }
        }
    })
}

fn current_view(state: &RunWatcherState, fit_view: bool) -> RunView {
    RunView {
        graph: state.reconciler.graph().cloned(),
        loading: state.reconciler.is_loading(),
        fit_view,
        error: state.reconciler.last_error().map(str::to_string),
        live: state.ticker.is_some(),
    }
}

fn publish(state: &RunWatcherState, fit_view: bool) {
    state.updates.send_replace(current_view(state, fit_view));
}

/// Spawn a watcher for `run` and return the receiving end of its updates.
pub async fn spawn_run_watcher(
    run: RunRef,
    source: Arc<dyn RunSource>,
    pipeline: Pipeline,
    poll_interval: Duration,
) -> Result<(ActorRef<RunWatcherMsg>, JoinHandle<()>, watch::Receiver<RunView>), WatcherError> {
    let (updates, receiver) = watch::channel(RunView::default());
    let (actor, handle) = Actor::spawn(
        None,
        RunWatcherActor,
        RunWatcherArguments {
            run,
            source,
            pipeline,
            poll_interval,
            updates,
        },
    )
    .await
    .map_err(|e| WatcherError::Spawn(e.to_string()))?;
    Ok((actor, handle, receiver))
}
