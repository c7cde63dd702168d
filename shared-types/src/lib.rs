//! Shared types between the batch backend and the run graph UI
//!
//! These types are used by both:
//! - the run graph engine (native Rust)
//! - the renderer (TypeScript, via ts-rs bindings)
//!
//! Serializable with serde for JSON over HTTP

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Execution State
// ============================================================================

/// Lifecycle state of a task, subflow, job or run.
///
/// The backend reports these in mixed case (`"success"` for run tasks,
/// `"SUCCESS"` for jobs); [`ExecutionState::parse`] accepts both.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "run_graph.ts")]
pub enum ExecutionState {
    Scheduled,
    Running,
    Success,
    Failed,
    Skipped,
    Canceled,
    ReadyToRetry,
}

impl ExecutionState {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "scheduled" | "pending" | "queued" => Some(Self::Scheduled),
            "running" | "started" => Some(Self::Running),
            "success" | "succeeded" | "completed" => Some(Self::Success),
            "failed" | "error" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            "canceled" | "cancelled" => Some(Self::Canceled),
            "ready_to_retry" => Some(Self::ReadyToRetry),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Canceled => "canceled",
            Self::ReadyToRetry => "ready_to_retry",
        }
    }

    /// Terminal states: the run will not change again without a retry.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Skipped | Self::Canceled
        )
    }

    /// Combine child states into the state of their container.
    ///
    /// Precedence: ready-to-retry, failed, running; then all-skipped,
    /// all-success; anything else is still scheduled.
    pub fn aggregate<I>(states: I) -> Self
    where
        I: IntoIterator<Item = ExecutionState>,
    {
        let states: Vec<ExecutionState> = states.into_iter().collect();
        if states.is_empty() {
            return Self::Scheduled;
        }
        if states.contains(&Self::ReadyToRetry) {
            return Self::ReadyToRetry;
        }
        if states.contains(&Self::Failed) {
            return Self::Failed;
        }
        if states.contains(&Self::Running) {
            return Self::Running;
        }
        if states.iter().all(|s| *s == Self::Skipped) {
            return Self::Skipped;
        }
        if states.iter().all(|s| *s == Self::Success) {
            return Self::Success;
        }
        if states.iter().all(|s| *s == Self::Canceled) {
            return Self::Canceled;
        }
        Self::Scheduled
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-state task counts for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "run_graph.ts")]
pub struct TaskStatistics {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub scheduled: u32,
    #[serde(default)]
    pub running: u32,
    #[serde(default)]
    pub success: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub skipped: u32,
    #[serde(default)]
    pub canceled: u32,
}

impl TaskStatistics {
    pub fn from_states<I>(states: I) -> Self
    where
        I: IntoIterator<Item = ExecutionState>,
    {
        let mut stats = Self::default();
        for state in states {
            stats.total += 1;
            match state {
                ExecutionState::Scheduled | ExecutionState::ReadyToRetry => stats.scheduled += 1,
                ExecutionState::Running => stats.running += 1,
                ExecutionState::Success => stats.success += 1,
                ExecutionState::Failed => stats.failed += 1,
                ExecutionState::Skipped => stats.skipped += 1,
                ExecutionState::Canceled => stats.canceled += 1,
            }
        }
        stats
    }

    /// Share of tasks that reached success, failure or skip, in percent.
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.success + self.failed + self.skipped) / f64::from(self.total) * 100.0
    }
}

// ============================================================================
// Backend Records: flat run shape (tasks + subflows)
// ============================================================================

/// Dependency of a run task on an upstream task instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunDependency {
    /// Logical id of the upstream task
    pub task_id: String,
    /// Instance id of the upstream task
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunTask {
    /// Globally unique instance id
    pub id: String,
    /// Stable task definition id, reused across runs
    pub task_id: String,
    #[serde(default)]
    pub task_name: Option<String>,
    /// "task" or "subflow"
    #[serde(rename = "type", default = "default_run_task_type")]
    pub task_type: String,
    pub state: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub try_number: u32,
    #[serde(default)]
    pub subflow_instance_id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<RunDependency>,
}

fn default_run_task_type() -> String {
    "task".to_string()
}

impl RunTask {
    pub fn is_subflow(&self) -> bool {
        self.task_type.eq_ignore_ascii_case("subflow") && self.subflow_instance_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubflowRecord {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub tasks: Vec<RunTask>,
    #[serde(default)]
    pub subflows: Vec<SubflowRecord>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

/// GET /api/night-batch/runs/{run_id}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResponse {
    pub id: String,
    #[serde(default)]
    pub flow_id: String,
    pub status: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub tasks: Vec<RunTask>,
    #[serde(default)]
    pub subflows: Vec<SubflowRecord>,
    #[serde(default)]
    pub task_statistics: Option<TaskStatistics>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub id: String,
    #[serde(default)]
    pub flow_id: String,
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub task_statistics: Option<TaskStatistics>,
}

/// GET /api/night-batch/runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunListResponse {
    pub runs: Vec<RunSummary>,
    pub total: u64,
}

// ============================================================================
// Backend Records: recursive job shape
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobDependency {
    /// Instance id of the downstream task
    pub task_id: String,
    /// Instance id of the upstream task
    pub upstream_task_id: String,
}

/// A node of the recursive job tree. The job itself uses the same record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobTask {
    pub id: String,
    /// "TASK" or "JOB"
    pub task_type: String,
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<JobDependency>,
    #[serde(default)]
    pub children: Vec<JobTask>,
}

pub type JobGraph = JobTask;

impl JobTask {
    pub fn is_job(&self) -> bool {
        self.task_type.eq_ignore_ascii_case("job") && !self.children.is_empty()
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }
}

// ============================================================================
// Retry Command
// ============================================================================

/// POST /api/night-batch/runs/{run_id}/retry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "run_graph.ts")]
pub struct TaskRetryRequest {
    /// Task path as produced by the path resolver (`parent>>child`)
    pub task_path: String,
    pub reset_downstream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "run_graph.ts")]
pub struct TaskRetryResponse {
    pub run_id: String,
    pub task_path: String,
    pub message: String,
}

/// POST /api/jobs/{job_id}/retries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRetryRequest {
    pub task_id: String,
}

/// Error body returned by the backend on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiErrorBody {
    pub detail: String,
}

// ============================================================================
// Renderer Graph
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "run_graph.ts")]
pub struct XyPosition {
    pub x: f64,
    pub y: f64,
}

impl XyPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl std::ops::Add for XyPosition {
    type Output = XyPosition;

    fn add(self, rhs: XyPosition) -> XyPosition {
        XyPosition::new(self.x + rhs.x, self.y + rhs.y)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "run_graph.ts")]
pub enum RenderNodeKind {
    Task,
    Subflow,
}

/// Domain payload of one task as the renderer shows it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "run_graph.ts")]
pub struct TaskView {
    pub id: String,
    pub logical_id: String,
    pub name: Option<String>,
    pub kind: String,
    pub state: ExecutionState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[ts(type = "unknown")]
    pub output: serde_json::Value,
    pub try_number: u32,
    /// Set when this task spawned a nested subflow/job
    pub container_id: Option<String>,
}

impl TaskView {
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "run_graph.ts")]
pub struct NodeData {
    pub label: String,
    pub run_id: String,
    pub task_path: Option<String>,
    pub task: Option<TaskView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "run_graph.ts")]
pub struct RenderNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RenderNodeKind,
    /// Absolute position on the canvas
    pub position: XyPosition,
    pub data: NodeData,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub z_index: i32,
    pub selectable: bool,
    pub draggable: bool,
    /// Enclosing subflow node, if any
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "run_graph.ts")]
pub struct RenderEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Routed polyline in absolute coordinates; empty when the layout gave no route
    pub points: Vec<XyPosition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "run_graph.ts")]
pub struct RenderGraph {
    pub run_id: String,
    pub status: Option<ExecutionState>,
    pub nodes: Vec<RenderNode>,
    pub edges: Vec<RenderEdge>,
    pub statistics: TaskStatistics,
}

impl RenderGraph {
    pub fn node(&self, id: &str) -> Option<&RenderNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// What a watched run currently shows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "run_graph.ts")]
pub struct RunView {
    pub graph: Option<RenderGraph>,
    /// First load in progress; never set while a graph is shown
    pub loading: bool,
    /// Frame the graph; set on the single update that first shows it
    pub fit_view: bool,
    pub error: Option<String>,
    /// Still polling for changes
    pub live: bool,
}

// ============================================================================
// Constants
// ============================================================================

pub const RUNS_BASE_PATH: &str = "/api/night-batch/runs";
pub const JOBS_BASE_PATH: &str = "/api/jobs";

/// Separator between ancestor and child logical ids in a task path.
pub const TASK_PATH_SEPARATOR: &str = ">>";

// ============================================================================
// Tests
// ============================================================================
