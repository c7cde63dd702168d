//! Unified execution tree.
//!
//! Both backend shapes (flat run with subflows, recursive job) are normalized
//! into a [`RunTree`]: an arena of tasks and scopes indexed by position. Scope 0
//! is the run itself; every other scope is a container (subflow or nested job)
//! that is normally anchored by the task which spawned it.

use chrono::{DateTime, Utc};
use shared_types::{ExecutionState, TaskStatistics, TaskView};
use std::collections::HashMap;

pub mod reader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskIdx(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeIdx(usize);

pub const ROOT_SCOPE: ScopeIdx = ScopeIdx(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Instance id of the upstream task
    pub upstream_id: String,
    pub upstream_logical_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub logical_id: String,
    pub name: Option<String>,
    pub kind: String,
    pub state: ExecutionState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub output: serde_json::Value,
    pub try_number: u32,
    pub dependencies: Vec<Dependency>,
    /// Container id as reported by the backend, resolved or not
    pub container_ref: Option<String>,
    pub scope: ScopeIdx,
    container: Option<ScopeIdx>,
}

impl Task {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.logical_id)
    }

    /// Expanded container spawned by this task, if the reference resolved.
    pub fn container(&self) -> Option<ScopeIdx> {
        self.container
    }
}

/// Input for [`RunTree::add_task`]; scope and container links are assigned by the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub id: String,
    pub logical_id: String,
    pub name: Option<String>,
    pub kind: String,
    pub state: ExecutionState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub output: serde_json::Value,
    pub try_number: u32,
    pub dependencies: Vec<Dependency>,
    pub container_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub id: String,
    pub status: ExecutionState,
    pub tasks: Vec<TaskIdx>,
    pub anchor: Option<TaskIdx>,
    pub parent: Option<ScopeIdx>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunTree {
    tasks: Vec<Task>,
    scopes: Vec<Scope>,
    task_index: HashMap<String, TaskIdx>,
    scope_index: HashMap<String, ScopeIdx>,
    /// Counts as reported by the backend, when it sent any
    reported_statistics: Option<TaskStatistics>,
}

impl RunTree {
    pub fn new(run_id: impl Into<String>, status: ExecutionState) -> Self {
        let run_id = run_id.into();
        let mut scope_index = HashMap::new();
        scope_index.insert(run_id.clone(), ROOT_SCOPE);
        Self {
            tasks: Vec::new(),
            scopes: vec![Scope {
                id: run_id,
                status,
                tasks: Vec::new(),
                anchor: None,
                parent: None,
            }],
            task_index: HashMap::new(),
            scope_index,
            reported_statistics: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.scopes[ROOT_SCOPE.0].id
    }

    pub fn status(&self) -> ExecutionState {
        self.scopes[ROOT_SCOPE.0].status
    }

    pub fn root(&self) -> &Scope {
        &self.scopes[ROOT_SCOPE.0]
    }

    pub fn scope(&self, idx: ScopeIdx) -> &Scope {
        &self.scopes[idx.0]
    }

    pub fn task(&self, idx: TaskIdx) -> &Task {
        &self.tasks[idx.0]
    }

    pub fn task_idx(&self, id: &str) -> Option<TaskIdx> {
        self.task_index.get(id).copied()
    }

    pub fn task_by_id(&self, id: &str) -> Option<&Task> {
        self.task_idx(id).map(|idx| self.task(idx))
    }

    pub fn scope_idx(&self, id: &str) -> Option<ScopeIdx> {
        self.scope_index.get(id).copied()
    }

    pub fn tasks(&self) -> impl Iterator<Item = (TaskIdx, &Task)> {
        self.tasks.iter().enumerate().map(|(i, t)| (TaskIdx(i), t))
    }

    pub fn scopes(&self) -> impl Iterator<Item = (ScopeIdx, &Scope)> {
        self.scopes.iter().enumerate().map(|(i, s)| (ScopeIdx(i), s))
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Scope chain from the root down to `scope`, inclusive. `None` when the
    /// scope is not reachable from the run (unanchored container).
    pub fn scope_chain(&self, scope: ScopeIdx) -> Option<Vec<ScopeIdx>> {
        let mut chain = vec![scope];
        let mut current = scope;
        while let Some(parent) = self.scopes[current.0].parent {
            if chain.len() > self.scopes.len() {
                return None;
            }
            chain.push(parent);
            current = parent;
        }
        if current != ROOT_SCOPE {
            return None;
        }
        chain.reverse();
        Some(chain)
    }

    /// The task of `scope` through which `task` is visible there: the task
    /// itself, or the anchor of the container holding it at that level.
    pub fn ancestor_in_scope(&self, task: TaskIdx, scope: ScopeIdx) -> Option<TaskIdx> {
        let mut current = task;
        for _ in 0..=self.scopes.len() {
            let t = self.task(current);
            if t.scope == scope {
                return Some(current);
            }
            current = self.scope(t.scope).anchor?;
        }
        None
    }

    /// Leaf tasks: tasks that did not expand into a container.
    pub fn leaf_tasks(&self) -> impl Iterator<Item = (TaskIdx, &Task)> {
        self.tasks().filter(|(_, t)| t.container.is_none())
    }

    /// Counted from leaf task states.
    pub fn statistics(&self) -> TaskStatistics {
        TaskStatistics::from_states(self.leaf_tasks().map(|(_, t)| t.state))
    }

    pub fn reported_statistics(&self) -> Option<&TaskStatistics> {
        self.reported_statistics.as_ref()
    }

    /// Backend counts when present, otherwise counted from the tree.
    pub fn effective_statistics(&self) -> TaskStatistics {
        self.reported_statistics
            .clone()
            .unwrap_or_else(|| self.statistics())
    }

    pub fn task_view(&self, idx: TaskIdx) -> TaskView {
        let task = self.task(idx);
        TaskView {
            id: task.id.clone(),
            logical_id: task.logical_id.clone(),
            name: task.name.clone(),
            kind: task.kind.clone(),
            state: task.state,
            started_at: task.started_at,
            finished_at: task.finished_at,
            error: task.error.clone(),
            output: task.output.clone(),
            try_number: task.try_number,
            container_id: task.container.map(|s| self.scope(s).id.clone()),
        }
    }

    pub(crate) fn add_scope(
        &mut self,
        id: impl Into<String>,
        status: ExecutionState,
        parent: Option<ScopeIdx>,
    ) -> ScopeIdx {
        let id = id.into();
        let idx = ScopeIdx(self.scopes.len());
        self.scope_index.entry(id.clone()).or_insert(idx);
        self.scopes.push(Scope {
            id,
            status,
            tasks: Vec::new(),
            anchor: None,
            parent,
        });
        idx
    }

    /// Append a task to `scope`. Returns `None` for a duplicate id; the first
    /// occurrence wins.
    pub(crate) fn add_task(&mut self, scope: ScopeIdx, new: NewTask) -> Option<TaskIdx> {
        if self.task_index.contains_key(&new.id) {
            tracing::warn!(task_id = %new.id, "Duplicate task id in run; keeping first occurrence");
            return None;
        }
        let idx = TaskIdx(self.tasks.len());
        self.task_index.insert(new.id.clone(), idx);
        self.tasks.push(Task {
            id: new.id,
            logical_id: new.logical_id,
            name: new.name,
            kind: new.kind,
            state: new.state,
            started_at: new.started_at,
            finished_at: new.finished_at,
            error: new.error,
            output: new.output,
            try_number: new.try_number,
            dependencies: new.dependencies,
            container_ref: new.container_ref,
            scope,
            container: None,
        });
        self.scopes[scope.0].tasks.push(idx);
        Some(idx)
    }

    pub(crate) fn anchor(&mut self, task: TaskIdx, scope: ScopeIdx) {
        self.tasks[task.0].container = Some(scope);
        let parent = self.tasks[task.0].scope;
        let target = &mut self.scopes[scope.0];
        target.anchor = Some(task);
        target.parent = Some(parent);
    }

    pub(crate) fn add_dependency(&mut self, task: TaskIdx, dependency: Dependency) {
        let deps = &mut self.tasks[task.0].dependencies;
        if !deps.contains(&dependency) {
            deps.push(dependency);
        }
    }

    pub(crate) fn set_scope_status(&mut self, scope: ScopeIdx, status: ExecutionState) {
        self.scopes[scope.0].status = status;
    }

    pub(crate) fn set_reported_statistics(&mut self, statistics: Option<TaskStatistics>) {
        self.reported_statistics = statistics;
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::task;
    use super::*;

    #[test]
    fn test_duplicate_task_ids_keep_first() {
        let mut tree = RunTree::new("run-1", ExecutionState::Running);
        assert!(tree.add_task(ROOT_SCOPE, task("a", "first")).is_some());
        assert!(tree.add_task(ROOT_SCOPE, task("a", "second")).is_none());
        assert_eq!(tree.task_by_id("a").unwrap().logical_id, "first");
        assert_eq!(tree.root().tasks.len(), 1);
    }

    #[test]
    fn test_scope_chain_and_ancestor_lookup() {
        let mut tree = RunTree::new("run-1", ExecutionState::Running);
        let anchor = tree.add_task(ROOT_SCOPE, task("sf-task", "load")).unwrap();
        let sf = tree.add_scope("sf-1", ExecutionState::Running, None);
        tree.anchor(anchor, sf);
        let inner = tree.add_task(sf, task("inner", "fetch")).unwrap();

        assert_eq!(tree.scope_chain(sf), Some(vec![ROOT_SCOPE, sf]));
        assert_eq!(tree.ancestor_in_scope(inner, ROOT_SCOPE), Some(anchor));
        assert_eq!(tree.ancestor_in_scope(inner, sf), Some(inner));
        assert_eq!(tree.task_view(anchor).container_id.as_deref(), Some("sf-1"));
    }

    #[test]
    fn test_unanchored_scope_is_unreachable() {
        let mut tree = RunTree::new("run-1", ExecutionState::Running);
        let orphan = tree.add_scope("sf-orphan", ExecutionState::Scheduled, None);
        assert_eq!(tree.scope_chain(orphan), None);
    }

    #[test]
    fn test_statistics_count_only_leaves() {
        let mut tree = RunTree::new("run-1", ExecutionState::Running);
        let anchor = tree.add_task(ROOT_SCOPE, task("sf-task", "load")).unwrap();
        let sf = tree.add_scope("sf-1", ExecutionState::Running, None);
        tree.anchor(anchor, sf);
        let mut done = task("inner", "fetch");
        done.state = ExecutionState::Success;
        tree.add_task(sf, done);

        let stats = tree.statistics();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.success, 1);
    }
}
