//! Backend record normalization.
//!
//! Live data can be momentarily inconsistent across backend writes, so the
//! reader never fails: unknown states, dangling container references, duplicate
//! ids and cyclic container references are logged and degraded instead.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use shared_types::{ExecutionState, JobGraph, JobTask, RunResponse, RunTask, SubflowRecord};
use std::collections::{HashMap, HashSet, VecDeque};

use super::{Dependency, NewTask, RunTree, ScopeIdx, ROOT_SCOPE};

/// Parse a backend state string, degrading unknown values to `Scheduled`.
pub fn parse_state(raw: &str, owner_id: &str) -> ExecutionState {
    ExecutionState::parse(raw).unwrap_or_else(|| {
        tracing::warn!(owner_id, state = raw, "Unknown execution state; treating as scheduled");
        ExecutionState::Scheduled
    })
}

/// Accepts RFC 3339 and naive ISO-8601 timestamps (assumed UTC).
pub fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .or_else(|| {
            tracing::debug!(timestamp = raw, "Unparseable timestamp ignored");
            None
        })
}

// ============================================================================
// Flat run shape
// ============================================================================

fn run_task(task: &RunTask) -> NewTask {
    NewTask {
        id: task.id.clone(),
        logical_id: task.task_id.clone(),
        name: task.task_name.clone().filter(|n| !n.is_empty()),
        kind: task.task_type.clone(),
        state: parse_state(&task.state, &task.id),
        started_at: parse_timestamp(task.started_at.as_deref()),
        finished_at: parse_timestamp(task.finished_at.as_deref()),
        error: task.error.clone(),
        output: task.output.clone(),
        try_number: task.try_number,
        dependencies: task
            .dependencies
            .iter()
            .map(|d| Dependency {
                upstream_id: d.instance_id.clone(),
                upstream_logical_id: Some(d.task_id.clone()),
            })
            .collect(),
        container_ref: task.subflow_instance_id.clone(),
    }
}

/// Collect every subflow, however deeply nested, keyed by id. Discovery
/// order is kept for the unanchored pass.
fn collect_subflows(roots: &[SubflowRecord]) -> (HashMap<&str, &SubflowRecord>, Vec<&str>) {
    let mut table = HashMap::new();
    let mut order = Vec::new();
    let mut stack: Vec<&SubflowRecord> = roots.iter().rev().collect();
    while let Some(subflow) = stack.pop() {
        if table.insert(subflow.id.as_str(), subflow).is_none() {
            order.push(subflow.id.as_str());
        }
        stack.extend(subflow.subflows.iter().rev());
    }
    (table, order)
}

pub fn read_run(run: &RunResponse) -> RunTree {
    let run_state = ExecutionState::parse(&run.status);
    let mut tree = RunTree::new(&run.id, run_state.unwrap_or(ExecutionState::Scheduled));
    let mut unresolved_status: Vec<ScopeIdx> = Vec::new();
    if run_state.is_none() {
        unresolved_status.push(ROOT_SCOPE);
    }

    let (subflows, discovery_order) = collect_subflows(&run.subflows);
    let mut visited: HashSet<&str> = HashSet::new();
    let mut worklist: VecDeque<(ScopeIdx, &[RunTask])> = VecDeque::new();
    worklist.push_back((ROOT_SCOPE, run.tasks.as_slice()));

    let mut pending_orphans = discovery_order.into_iter();
    loop {
        while let Some((scope, tasks)) = worklist.pop_front() {
            for task in tasks {
                let Some(idx) = tree.add_task(scope, run_task(task)) else {
                    continue;
                };
                if !task.is_subflow() {
                    continue;
                }
                let Some(subflow_id) = task.subflow_instance_id.as_deref() else {
                    continue;
                };
                let Some(&subflow) = subflows.get(subflow_id) else {
                    tracing::debug!(
                        task_id = %task.id,
                        subflow_id,
                        "Subflow reference has no matching record; rendering as leaf"
                    );
                    continue;
                };
                if !visited.insert(subflow_id) {
                    tracing::warn!(
                        task_id = %task.id,
                        subflow_id,
                        "Subflow already expanded elsewhere; rendering as leaf"
                    );
                    continue;
                }
                let nested = open_subflow_scope(&mut tree, subflow, Some(scope), &mut unresolved_status);
                tree.anchor(idx, nested);
                worklist.push_back((nested, subflow.tasks.as_slice()));
            }
        }

        // Subflows nobody anchors still get their tasks into the table so
        // they can be addressed, but they stay out of the rendered tree.
        let Some(orphan_id) = pending_orphans.find(|id| !visited.contains(id)) else {
            break;
        };
        visited.insert(orphan_id);
        let subflow = subflows[orphan_id];
        tracing::debug!(subflow_id = orphan_id, "Subflow is not anchored by any task");
        let scope = open_subflow_scope(&mut tree, subflow, None, &mut unresolved_status);
        worklist.push_back((scope, subflow.tasks.as_slice()));
    }

    resolve_aggregate_status(&mut tree, &unresolved_status);
    tree.set_reported_statistics(run.task_statistics.clone());
    tracing::debug!(run_id = %run.id, tasks = tree.task_count(), "Read flat run record");
    tree
}

fn open_subflow_scope(
    tree: &mut RunTree,
    subflow: &SubflowRecord,
    parent: Option<ScopeIdx>,
    unresolved_status: &mut Vec<ScopeIdx>,
) -> ScopeIdx {
    let status = ExecutionState::parse(&subflow.status);
    let scope = tree.add_scope(
        &subflow.id,
        status.unwrap_or(ExecutionState::Scheduled),
        parent,
    );
    if status.is_none() {
        unresolved_status.push(scope);
    }
    scope
}

// ============================================================================
// Recursive job shape
// ============================================================================

fn job_task(task: &JobTask) -> NewTask {
    NewTask {
        id: task.id.clone(),
        logical_id: task.label().to_string(),
        name: task.name.clone(),
        kind: task.kind.clone(),
        state: parse_state(&task.status, &task.id),
        started_at: parse_timestamp(task.started_at.as_deref()),
        finished_at: parse_timestamp(task.finished_at.as_deref()),
        error: task.error.clone(),
        output: serde_json::Value::Null,
        try_number: 0,
        dependencies: task
            .dependencies
            .iter()
            .filter(|d| {
                let own = d.task_id == task.id;
                if !own {
                    tracing::debug!(
                        task_id = %task.id,
                        downstream = %d.task_id,
                        "Dependency listed on a task it does not target"
                    );
                }
                own
            })
            .map(|d| Dependency {
                upstream_id: d.upstream_task_id.clone(),
                upstream_logical_id: None,
            })
            .collect(),
        container_ref: task.is_job().then(|| task.id.clone()),
    }
}

pub fn read_job(job: &JobGraph) -> RunTree {
    let job_state = ExecutionState::parse(&job.status);
    let mut tree = RunTree::new(&job.id, job_state.unwrap_or(ExecutionState::Scheduled));
    let mut unresolved_status: Vec<ScopeIdx> = Vec::new();
    if job_state.is_none() {
        unresolved_status.push(ROOT_SCOPE);
    }

    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(job.id.as_str());
    let mut worklist: VecDeque<(ScopeIdx, &[JobTask])> = VecDeque::new();
    worklist.push_back((ROOT_SCOPE, job.children.as_slice()));

    while let Some((scope, children)) = worklist.pop_front() {
        for child in children {
            let Some(idx) = tree.add_task(scope, job_task(child)) else {
                continue;
            };
            if !child.is_job() {
                continue;
            }
            if !visited.insert(child.id.as_str()) {
                tracing::warn!(job_id = %child.id, "Nested job already expanded; rendering as leaf");
                continue;
            }
            let status = ExecutionState::parse(&child.status);
            let nested = tree.add_scope(
                &child.id,
                status.unwrap_or(ExecutionState::Scheduled),
                Some(scope),
            );
            if status.is_none() {
                unresolved_status.push(nested);
            }
            tree.anchor(idx, nested);
            worklist.push_back((nested, child.children.as_slice()));
        }
    }

    // Dependencies declared on the job record itself target its children.
    for dep in &job.dependencies {
        match tree.task_idx(&dep.task_id) {
            Some(idx) => tree.add_dependency(
                idx,
                Dependency {
                    upstream_id: dep.upstream_task_id.clone(),
                    upstream_logical_id: None,
                },
            ),
            None => tracing::debug!(
                job_id = %job.id,
                downstream = %dep.task_id,
                "Job-level dependency targets unknown task"
            ),
        }
    }

    resolve_aggregate_status(&mut tree, &unresolved_status);
    tracing::debug!(job_id = %job.id, tasks = tree.task_count(), "Read recursive job record");
    tree
}

/// Scopes whose reported status was unknown take the aggregate of their tasks.
/// Deepest scopes were opened last, so walking in reverse settles children first.
fn resolve_aggregate_status(tree: &mut RunTree, unresolved: &[ScopeIdx]) {
    for scope in unresolved.iter().rev() {
        let states: Vec<ExecutionState> = tree
            .scope(*scope)
            .tasks
            .iter()
            .map(|t| {
                let task = tree.task(*t);
                task.container()
                    .map(|c| tree.scope(c).status)
                    .unwrap_or(task.state)
            })
            .collect();
        tree.set_scope_status(*scope, ExecutionState::aggregate(states));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat_run() -> RunResponse {
        serde_json::from_value(json!({
            "id": "run-1",
            "flow_id": "night_batch",
            "status": "RUNNING",
            "tasks": [
                {"id": "a-1", "task_id": "extract", "state": "success"},
                {"id": "b-1", "task_id": "pricing", "type": "subflow", "state": "running",
                 "subflow_instance_id": "sf-1",
                 "dependencies": [{"task_id": "extract", "instance_id": "a-1"}]}
            ],
            "subflows": [{
                "id": "sf-1",
                "status": "RUNNING",
                "tasks": [
                    {"id": "c-1", "task_id": "price", "state": "running"},
                    {"id": "d-1", "task_id": "library", "type": "subflow", "state": "scheduled",
                     "subflow_instance_id": "sf-2"}
                ],
                "subflows": [{
                    "id": "sf-2",
                    "status": "???",
                    "tasks": [{"id": "e-1", "task_id": "build", "state": "failed"}]
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_read_run_nests_subflows() {
        let tree = read_run(&flat_run());
        assert_eq!(tree.run_id(), "run-1");
        assert_eq!(tree.status(), ExecutionState::Running);
        assert_eq!(tree.task_count(), 5);

        let pricing = tree.task_by_id("b-1").unwrap();
        let sf1 = pricing.container().expect("pricing anchors sf-1");
        assert_eq!(tree.scope(sf1).id, "sf-1");
        assert_eq!(tree.scope(sf1).tasks.len(), 2);

        let build = tree.task_by_id("e-1").unwrap();
        let sf2 = tree.scope(build.scope);
        assert_eq!(sf2.id, "sf-2");
        assert_eq!(sf2.parent, Some(sf1));
        // unknown status aggregates from children
        assert_eq!(sf2.status, ExecutionState::Failed);
    }

    #[test]
    fn test_read_run_dependency_mapping() {
        let tree = read_run(&flat_run());
        let pricing = tree.task_by_id("b-1").unwrap();
        assert_eq!(pricing.dependencies[0].upstream_id, "a-1");
        assert_eq!(
            pricing.dependencies[0].upstream_logical_id.as_deref(),
            Some("extract")
        );
    }

    #[test]
    fn test_read_run_keeps_reported_statistics() {
        let tree = read_run(&flat_run());
        assert!(tree.reported_statistics().is_none());
        assert_eq!(tree.effective_statistics(), tree.statistics());

        let mut run = flat_run();
        run.task_statistics = serde_json::from_value(json!({"total": 10, "success": 5})).unwrap();
        let tree = read_run(&run);
        let reported = tree.effective_statistics();
        assert_eq!(reported.total, 10);
        assert_eq!(reported.success, 5);
        assert_eq!(tree.statistics().total, 3);
    }

    #[test]
    fn test_dangling_subflow_reference_degrades_to_leaf() {
        let run: RunResponse = serde_json::from_value(json!({
            "id": "run-2",
            "status": "RUNNING",
            "tasks": [{"id": "x", "task_id": "x", "type": "subflow", "state": "running",
                       "subflow_instance_id": "missing"}],
            "subflows": []
        }))
        .unwrap();
        let tree = read_run(&run);
        let x = tree.task_by_id("x").unwrap();
        assert!(x.container().is_none());
        assert_eq!(x.container_ref.as_deref(), Some("missing"));
    }

    #[test]
    fn test_cyclic_subflow_reference_is_not_expanded_twice() {
        let run: RunResponse = serde_json::from_value(json!({
            "id": "run-3",
            "status": "RUNNING",
            "tasks": [{"id": "outer", "task_id": "outer", "type": "subflow", "state": "running",
                       "subflow_instance_id": "sf-loop"}],
            "subflows": [{
                "id": "sf-loop",
                "status": "RUNNING",
                "tasks": [{"id": "inner", "task_id": "inner", "type": "subflow", "state": "running",
                           "subflow_instance_id": "sf-loop"}]
            }]
        }))
        .unwrap();
        let tree = read_run(&run);
        assert!(tree.task_by_id("outer").unwrap().container().is_some());
        assert!(tree.task_by_id("inner").unwrap().container().is_none());
    }

    #[test]
    fn test_unanchored_subflow_kept_out_of_tree() {
        let run: RunResponse = serde_json::from_value(json!({
            "id": "run-4",
            "status": "SUCCESS",
            "tasks": [{"id": "a", "task_id": "a", "state": "success"}],
            "subflows": [{
                "id": "sf-orphan",
                "status": "SUCCESS",
                "tasks": [{"id": "o", "task_id": "orphan_task", "state": "success"}]
            }]
        }))
        .unwrap();
        let tree = read_run(&run);
        let orphan = tree.task_by_id("o").unwrap();
        assert_eq!(tree.scope_chain(orphan.scope), None);
    }

    #[test]
    fn test_read_job_recursive_shape() {
        let job: JobGraph = serde_json::from_value(json!({
            "id": "job-1",
            "task_type": "JOB",
            "kind": "NightBatchJob",
            "name": "night",
            "status": "RUNNING",
            "children": [
                {"id": "t1", "task_type": "TASK", "kind": "Extract", "name": "extract",
                 "status": "SUCCESS"},
                {"id": "j1", "task_type": "JOB", "kind": "MultiPriceJob", "name": null,
                 "status": "RUNNING",
                 "dependencies": [{"task_id": "j1", "upstream_task_id": "t1"}],
                 "children": [
                    {"id": "t2", "task_type": "TASK", "kind": "Price", "name": "price",
                     "status": "RUNNING"}
                 ]}
            ],
            "dependencies": []
        }))
        .unwrap();
        let tree = read_job(&job);
        let nested = tree.task_by_id("j1").unwrap();
        assert_eq!(nested.logical_id, "MultiPriceJob");
        assert_eq!(nested.dependencies[0].upstream_id, "t1");
        let scope = nested.container().unwrap();
        assert_eq!(tree.scope(scope).id, "j1");
        assert_eq!(tree.task_by_id("t2").unwrap().scope, scope);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp(Some("2026-03-01T10:00:00Z")).is_some());
        assert!(parse_timestamp(Some("2026-03-01T10:00:00.123456")).is_some());
        assert!(parse_timestamp(Some("2026-03-01 10:00:00")).is_some());
        assert!(parse_timestamp(Some("yesterday")).is_none());
        assert!(parse_timestamp(None).is_none());
    }
}
