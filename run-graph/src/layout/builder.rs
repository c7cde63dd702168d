//! Run tree → hierarchical layout graph.

use std::collections::{HashMap, HashSet};

use super::graph::{LayoutEdge, LayoutGraph, LayoutNode};
use super::options::LayoutOptions;
use crate::domain::{RunTree, ScopeIdx, TaskIdx, ROOT_SCOPE};

pub const DEFAULT_TASK_WIDTH: f64 = 250.0;
pub const DEFAULT_TASK_HEIGHT: f64 = 56.0;
pub const DEFAULT_SUBFLOW_WIDTH: f64 = 200.0;
pub const DEFAULT_SUBFLOW_HEIGHT: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BuilderSettings {
    pub task_width: f64,
    pub task_height: f64,
    pub subflow_width: f64,
    pub subflow_height: f64,
    pub root_options: LayoutOptions,
    pub nested_options: LayoutOptions,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self::with_sizes(
            DEFAULT_TASK_WIDTH,
            DEFAULT_TASK_HEIGHT,
            DEFAULT_SUBFLOW_WIDTH,
            DEFAULT_SUBFLOW_HEIGHT,
        )
    }
}

impl BuilderSettings {
    pub fn with_sizes(
        task_width: f64,
        task_height: f64,
        subflow_width: f64,
        subflow_height: f64,
    ) -> Self {
        Self {
            task_width,
            task_height,
            subflow_width,
            subflow_height,
            root_options: LayoutOptions::root(),
            nested_options: LayoutOptions::nested(subflow_width, subflow_height),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    settings: BuilderSettings,
}

impl GraphBuilder {
    pub fn new(settings: BuilderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BuilderSettings {
        &self.settings
    }

    /// Build the layout input for `tree`. Deterministic: the same tree always
    /// yields the same node and edge ids in the same order.
    pub fn build(&self, tree: &RunTree) -> LayoutGraph {
        let order = post_order_scopes(tree);
        let mut edges = scope_edges(tree, &order);
        let mut built: HashMap<ScopeIdx, LayoutNode> = HashMap::new();
        let nested_options = self.settings.nested_options.to_elk();

        for &scope in &order {
            let children = self.child_nodes(tree, scope, &mut built);
            let scope_edges = edges.remove(&scope).unwrap_or_default();

            if scope == ROOT_SCOPE {
                let mut root = LayoutNode::new(tree.run_id());
                root.children = children;
                root.edges = scope_edges;
                root.layout_options = self.settings.root_options.to_elk();
                tracing::debug!(
                    run_id = %tree.run_id(),
                    nodes = root.descendant_count(),
                    "Built layout graph"
                );
                return LayoutGraph(root);
            }

            let Some(anchor) = tree.scope(scope).anchor else {
                continue;
            };
            let anchor = tree.task(anchor);
            let mut node = LayoutNode::new(&anchor.id)
                .with_label(anchor.label())
                .with_size(self.settings.subflow_width, self.settings.subflow_height);
            node.children = children;
            node.edges = scope_edges;
            node.layout_options = nested_options.clone();
            built.insert(scope, node);
        }

        // Post-order always ends at the root; reaching here means an empty order.
        let mut root = LayoutNode::new(tree.run_id());
        root.layout_options = self.settings.root_options.to_elk();
        LayoutGraph(root)
    }

    fn child_nodes(
        &self,
        tree: &RunTree,
        scope: ScopeIdx,
        built: &mut HashMap<ScopeIdx, LayoutNode>,
    ) -> Vec<LayoutNode> {
        tree.scope(scope)
            .tasks
            .iter()
            .map(|&idx| {
                let task = tree.task(idx);
                task.container()
                    .and_then(|c| built.remove(&c))
                    .unwrap_or_else(|| {
                        LayoutNode::new(&task.id)
                            .with_label(task.label())
                            .with_size(self.settings.task_width, self.settings.task_height)
                    })
            })
            .collect()
    }
}

/// Scopes reachable from the run, children before parents.
fn post_order_scopes(tree: &RunTree) -> Vec<ScopeIdx> {
    let mut order = Vec::new();
    let mut seen: HashSet<ScopeIdx> = HashSet::new();
    let mut stack = vec![(ROOT_SCOPE, false)];
    while let Some((scope, expanded)) = stack.pop() {
        if expanded {
            order.push(scope);
            continue;
        }
        if !seen.insert(scope) {
            continue;
        }
        stack.push((scope, true));
        for &task in tree.scope(scope).tasks.iter().rev() {
            if let Some(container) = tree.task(task).container() {
                stack.push((container, false));
            }
        }
    }
    order
}

fn edge_prefix(tree: &RunTree, scope: ScopeIdx) -> String {
    if scope == ROOT_SCOPE {
        "root".to_string()
    } else {
        format!("sf:{}", tree.scope(scope).id)
    }
}

/// Dependency edges grouped by the scope that owns them.
///
/// Direct siblings get an edge in their own scope. Endpoints at different
/// levels are replaced by their ancestors in the nearest common scope.
fn scope_edges(tree: &RunTree, order: &[ScopeIdx]) -> HashMap<ScopeIdx, Vec<LayoutEdge>> {
    let mut edges: HashMap<ScopeIdx, Vec<LayoutEdge>> = HashMap::new();
    let mut emitted: HashSet<String> = HashSet::new();

    for &scope in order {
        for &task_idx in &tree.scope(scope).tasks {
            let task = tree.task(task_idx);
            for dep in &task.dependencies {
                let Some(upstream_idx) = tree.task_idx(&dep.upstream_id) else {
                    tracing::debug!(
                        task_id = %task.id,
                        upstream_id = %dep.upstream_id,
                        "Dependency on unknown task skipped"
                    );
                    continue;
                };
                let Some((owner, source, target)) = place_edge(tree, upstream_idx, task_idx) else {
                    continue;
                };
                let source = &tree.task(source).id;
                let target = &tree.task(target).id;
                let id = format!("{}:{}->{}", edge_prefix(tree, owner), source, target);
                if emitted.insert(id.clone()) {
                    edges
                        .entry(owner)
                        .or_default()
                        .push(LayoutEdge::new(id, source.clone(), target.clone()));
                }
            }
        }
    }
    edges
}

fn place_edge(
    tree: &RunTree,
    upstream: TaskIdx,
    downstream: TaskIdx,
) -> Option<(ScopeIdx, TaskIdx, TaskIdx)> {
    let up_scope = tree.task(upstream).scope;
    let down_scope = tree.task(downstream).scope;
    if up_scope == down_scope {
        return (upstream != downstream).then_some((up_scope, upstream, downstream));
    }

    let up_chain = tree.scope_chain(up_scope)?;
    let down_chain = tree.scope_chain(down_scope)?;
    let common = up_chain
        .iter()
        .zip(down_chain.iter())
        .take_while(|(a, b)| a == b)
        .last()
        .map(|(a, _)| *a)?;
    let source = tree.ancestor_in_scope(upstream, common)?;
    let target = tree.ancestor_in_scope(downstream, common)?;
    if source == target {
        tracing::debug!(
            upstream = %tree.task(upstream).id,
            downstream = %tree.task(downstream).id,
            "Dependency collapses onto one container; no edge"
        );
        return None;
    }
    Some((common, source, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::{depends_on, task};
    use shared_types::ExecutionState;

    /// root: a -> sf(b) ; sf: c -> d ; d depends on a (cross level)
    fn nested_tree() -> RunTree {
        let mut tree = RunTree::new("run-1", ExecutionState::Running);
        tree.add_task(ROOT_SCOPE, task("a", "extract")).unwrap();
        let b = tree
            .add_task(ROOT_SCOPE, depends_on(task("b", "pricing"), &["a"]))
            .unwrap();
        let sf = tree.add_scope("sf-1", ExecutionState::Running, None);
        tree.anchor(b, sf);
        tree.add_task(sf, task("c", "price")).unwrap();
        tree.add_task(sf, depends_on(task("d", "publish"), &["c", "a", "ghost"]))
            .unwrap();
        tree
    }

    #[test]
    fn test_build_nests_container_children() {
        let graph = GraphBuilder::default().build(&nested_tree());
        let root = graph.root();
        assert_eq!(root.id, "run-1");
        assert_eq!(root.children.len(), 2);
        assert!(root.width.is_none());

        let container = &root.children[1];
        assert_eq!(container.id, "b");
        assert_eq!(container.label(), "pricing");
        assert_eq!(
            container.children.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["c", "d"]
        );
        assert_eq!(container.layout_options["elk.padding"], "[top=28,left=28,bottom=28,right=28]");
        assert_eq!(root.layout_options["elk.hierarchyHandling"], "INCLUDE_CHILDREN");
        assert_eq!(root.children[0].width, Some(DEFAULT_TASK_WIDTH));
    }

    #[test]
    fn test_edges_are_scoped_and_lifted() {
        let graph = GraphBuilder::default().build(&nested_tree());
        let root = graph.root();
        let root_ids: Vec<&str> = root.edges.iter().map(|e| e.id.as_str()).collect();
        // d -> a lifts to b -> a at the root and dedupes with the direct edge
        assert_eq!(root_ids, vec!["root:a->b"]);
        let nested_ids: Vec<&str> = root.children[1].edges.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(nested_ids, vec!["sf:sf-1:c->d"]);
    }

    #[test]
    fn test_build_is_idempotent() {
        let tree = nested_tree();
        let builder = GraphBuilder::default();
        assert_eq!(builder.build(&tree), builder.build(&tree));
    }

    #[test]
    fn test_deeply_nested_containers() {
        let mut tree = RunTree::new("run-deep", ExecutionState::Running);
        let mut scope = ROOT_SCOPE;
        for depth in 0..50 {
            let anchor = tree
                .add_task(scope, task(&format!("t{depth}"), &format!("level{depth}")))
                .unwrap();
            let nested = tree.add_scope(format!("sf{depth}"), ExecutionState::Running, None);
            tree.anchor(anchor, nested);
            scope = nested;
        }
        tree.add_task(scope, task("leaf", "leaf")).unwrap();

        let graph = GraphBuilder::default().build(&tree);
        let mut node = graph.root();
        let mut depth = 0;
        while let Some(child) = node.children.first() {
            node = child;
            depth += 1;
        }
        assert_eq!(node.id, "leaf");
        assert_eq!(depth, 51);
    }
}
