//! Task paths: `>>`-joined logical ids from the run down to a task.
//!
//! Paths depend only on structure, so they stay stable across polls of the
//! same run. They are what the retry endpoint uses to address a task.

use shared_types::TASK_PATH_SEPARATOR;
use std::collections::HashMap;

use crate::domain::{RunTree, ScopeIdx, ROOT_SCOPE};

/// Path of every task in the tree, keyed by task instance id.
///
/// Tasks of a container the run never anchors fall back to their bare
/// logical id.
pub fn resolve_paths(tree: &RunTree) -> HashMap<String, String> {
    let mut prefixes: HashMap<ScopeIdx, Option<String>> = HashMap::new();
    prefixes.insert(ROOT_SCOPE, None);

    let mut paths = HashMap::with_capacity(tree.task_count());
    for (_, task) in tree.tasks() {
        let prefix = scope_prefix(tree, task.scope, &mut prefixes);
        paths.insert(task.id.clone(), join(prefix.as_deref(), &task.logical_id));
    }
    paths
}

pub fn join(prefix: Option<&str>, logical_id: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}{TASK_PATH_SEPARATOR}{logical_id}"),
        None => logical_id.to_string(),
    }
}

/// Path of the anchor of `scope`, memoized. Walks up to the nearest resolved
/// scope first so resolution order never matters.
fn scope_prefix(
    tree: &RunTree,
    scope: ScopeIdx,
    memo: &mut HashMap<ScopeIdx, Option<String>>,
) -> Option<String> {
    if let Some(prefix) = memo.get(&scope) {
        return prefix.clone();
    }

    let mut pending = Vec::new();
    let mut current = scope;
    while !memo.contains_key(&current) && pending.len() <= tree.scope_count() {
        pending.push(current);
        match tree.scope(current).anchor {
            Some(anchor) => current = tree.task(anchor).scope,
            None => break,
        }
    }

    for &s in pending.iter().rev() {
        let prefix = tree.scope(s).anchor.map(|anchor| {
            let anchor = tree.task(anchor);
            let parent = memo.get(&anchor.scope).cloned().flatten();
            join(parent.as_deref(), &anchor.logical_id)
        });
        memo.insert(s, prefix);
    }
    memo.get(&scope).cloned().flatten()
}
