//! Run Graph - hierarchical task-graph layout for batch execution runs.
//!
//! A backend run (flat tasks plus subflows, or a recursive job) is normalized
//! into a [`domain::RunTree`], turned into a hierarchical layout graph,
//! positioned by a [`layout::LayoutEngine`], flattened into absolute renderer
//! nodes and edges, and reconciled against what is already on screen.

pub mod api_client;
pub mod config;
pub mod domain;
pub mod layout;
pub mod paths;
pub mod pipeline;
pub mod reconcile;
pub mod source;
pub mod watcher;

pub use api_client::{ClientError, RunApiClient};
pub use config::Config;
pub use domain::RunTree;
pub use pipeline::{compute_render_graph, Pipeline, PipelineError};
pub use reconcile::{Reconciler, Reconciliation, SnapshotSeq};
pub use source::{RetryCommand, RunRef, RunSnapshot, RunSource};
pub use watcher::{spawn_run_watcher, RunWatcherActor, RunWatcherMsg, WatcherError};
