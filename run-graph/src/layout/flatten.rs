//! Positioned hierarchy → flat renderer node/edge lists.

use shared_types::{NodeData, RenderEdge, RenderNode, RenderNodeKind, XyPosition};

use super::graph::{LayoutEdge, LayoutNode, Point, PositionedGraph};

/// Containers sit below every task so they never cover one.
pub const CONTAINER_Z_INDEX: i32 = -10;
pub const TASK_Z_INDEX: i32 = 100;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatLayout {
    pub nodes: Vec<RenderNode>,
    pub edges: Vec<RenderEdge>,
}

/// Flatten in pre-order. The root is not emitted; its offset seeds the
/// absolute position of everything below it. Each level's edges are emitted
/// before its children are visited.
pub fn flatten(positioned: &PositionedGraph) -> FlatLayout {
    let root = positioned.root();
    let mut flat = FlatLayout::default();
    let mut stack: Vec<(&LayoutNode, XyPosition, Option<&str>)> =
        vec![(root, to_xy(root.offset()), None)];

    while let Some((node, absolute, parent_id)) = stack.pop() {
        let is_root = std::ptr::eq(node, root);
        if !is_root {
            flat.nodes.push(render_node(node, &root.id, absolute, parent_id));
        }
        for edge in &node.edges {
            push_edges(&mut flat.edges, edge, absolute);
        }

        let child_parent = if is_root { None } else { Some(node.id.as_str()) };
        for child in node.children.iter().rev() {
            stack.push((child, absolute + to_xy(child.offset()), child_parent));
        }
    }
    flat
}

fn to_xy(point: Point) -> XyPosition {
    XyPosition::new(point.x, point.y)
}

fn render_node(
    node: &LayoutNode,
    run_id: &str,
    absolute: XyPosition,
    parent_id: Option<&str>,
) -> RenderNode {
    let container = node.is_container();
    RenderNode {
        id: node.id.clone(),
        kind: if container {
            RenderNodeKind::Subflow
        } else {
            RenderNodeKind::Task
        },
        position: absolute,
        data: NodeData {
            label: node.label().to_string(),
            run_id: run_id.to_string(),
            task_path: None,
            task: None,
        },
        width: node.width,
        height: node.height,
        z_index: if container {
            CONTAINER_Z_INDEX
        } else {
            TASK_Z_INDEX
        },
        selectable: !container,
        draggable: false,
        parent_id: parent_id.map(str::to_string),
    }
}

/// One render edge per (source, target) pair. Hyperedges get `#n` suffixes.
fn push_edges(out: &mut Vec<RenderEdge>, edge: &LayoutEdge, origin: XyPosition) {
    let translate = |p: Point| origin + to_xy(p);
    let pairs: Vec<(&String, &String)> = edge
        .sources
        .iter()
        .flat_map(|s| edge.targets.iter().map(move |t| (s, t)))
        .collect();

    if let [(source, target)] = pairs.as_slice() {
        out.push(RenderEdge {
            id: edge.id.clone(),
            source: source.to_string(),
            target: target.to_string(),
            points: edge
                .sections
                .iter()
                .flat_map(|s| s.points())
                .map(translate)
                .collect(),
        });
        return;
    }

    for (n, (source, target)) in pairs.into_iter().enumerate() {
        out.push(RenderEdge {
            id: format!("{}#{}", edge.id, n),
            source: source.clone(),
            target: target.clone(),
            points: edge
                .sections
                .get(n)
                .map(|s| s.points().map(translate).collect())
                .unwrap_or_default(),
        });
    }
}
