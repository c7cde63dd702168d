//! Built-in layered layout.
//!
//! Every container is laid out on its own, children first, so a parent sees
//! the final size of each nested box. Within a container:
//! 1. nodes are assigned to layers by longest path from the sources; nodes the
//!    topological pass never reaches (on a cycle or downstream of one) go to
//!    one trailing layer,
//! 2. nodes keep their input order inside a layer, or are reordered by a few
//!    barycenter sweeps when input order is not requested,
//! 3. layers are stacked along the flow direction and centered across it,
//! 4. each edge gets one orthogonal section relative to its container.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};

use super::engine::{LayoutEngine, LayoutError};
use super::graph::{EdgeSection, LayoutGraph, LayoutNode, Point, PositionedGraph};
use super::options::{Algorithm, Direction, LayoutOptions};

const ORDERING_SWEEPS: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct LayeredLayoutEngine;

impl LayeredLayoutEngine {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous layout; the async trait method delegates here.
    pub fn compute(&self, graph: LayoutGraph) -> Result<PositionedGraph, LayoutError> {
        let mut slots = into_slots(graph.0)?;
        // Parents precede their children, so reverse order is bottom-up.
        for idx in (0..slots.len()).rev() {
            layout_container(&mut slots, idx)?;
        }
        let mut root = from_slots(slots)?;
        root.x = Some(0.0);
        root.y = Some(0.0);
        Ok(PositionedGraph(root))
    }
}

#[async_trait]
impl LayoutEngine for LayeredLayoutEngine {
    async fn layout(&self, graph: LayoutGraph) -> Result<PositionedGraph, LayoutError> {
        let nodes = graph.root().descendant_count();
        let positioned = self.compute(graph)?;
        tracing::debug!(engine = self.name(), nodes, "Layout computed");
        Ok(positioned)
    }

    fn name(&self) -> &'static str {
        "layered"
    }
}

struct Slot {
    node: LayoutNode,
    children: Vec<usize>,
    options: LayoutOptions,
}

fn into_slots(root: LayoutNode) -> Result<Vec<Slot>, LayoutError> {
    let mut slots: Vec<Slot> = Vec::new();
    let mut ids: HashSet<String> = HashSet::new();
    let mut stack: Vec<(LayoutNode, Option<usize>)> = vec![(root, None)];

    while let Some((mut node, parent)) = stack.pop() {
        if !ids.insert(node.id.clone()) {
            return Err(LayoutError::MalformedGraph(format!(
                "duplicate node id '{}'",
                node.id
            )));
        }
        for value in [node.width, node.height].into_iter().flatten() {
            if !value.is_finite() || value < 0.0 {
                return Err(LayoutError::MalformedGraph(format!(
                    "node '{}' has invalid size {value}",
                    node.id
                )));
            }
        }

        let own = LayoutOptions::from_elk(&node.layout_options);
        if let Some(Algorithm::Other(name)) = &own.algorithm {
            return Err(LayoutError::MalformedGraph(format!(
                "node '{}' requests unsupported algorithm '{name}'",
                node.id
            )));
        }
        let options = match parent {
            Some(p) => own.inherit(&slots[p].options),
            None => own,
        };

        let children = std::mem::take(&mut node.children);
        let idx = slots.len();
        slots.push(Slot {
            node,
            children: Vec::new(),
            options,
        });
        if let Some(p) = parent {
            slots[p].children.push(idx);
        }
        stack.extend(children.into_iter().rev().map(|child| (child, Some(idx))));
    }
    Ok(slots)
}

fn from_slots(slots: Vec<Slot>) -> Result<LayoutNode, LayoutError> {
    let mut built: Vec<Option<LayoutNode>> = (0..slots.len()).map(|_| None).collect();
    for (idx, slot) in slots.into_iter().enumerate().rev() {
        let mut node = slot.node;
        node.children = slot
            .children
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        built[idx] = Some(node);
    }
    built
        .first_mut()
        .and_then(Option::take)
        .ok_or_else(|| LayoutError::MalformedGraph("empty graph".to_string()))
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

impl Rect {
    fn center(&self) -> Point {
        Point::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

fn layout_container(slots: &mut [Slot], idx: usize) -> Result<(), LayoutError> {
    if slots[idx].children.is_empty() {
        return Ok(());
    }

    let slot = &slots[idx];
    let options = slot.options.clone();
    let sizes: Vec<(f64, f64)> = slot
        .children
        .iter()
        .map(|&c| {
            let node = &slots[c].node;
            (node.width.unwrap_or(0.0), node.height.unwrap_or(0.0))
        })
        .collect();
    let local: HashMap<&str, usize> = slot
        .children
        .iter()
        .enumerate()
        .map(|(i, &c)| (slots[c].node.id.as_str(), i))
        .collect();

    let mut links = Vec::with_capacity(slot.node.edges.len());
    for edge in &slot.node.edges {
        let (source, target) = match (edge.sources.as_slice(), edge.targets.as_slice()) {
            ([source], [target]) => (source, target),
            _ => {
                return Err(LayoutError::MalformedGraph(format!(
                    "edge '{}' must have exactly one source and one target",
                    edge.id
                )))
            }
        };
        let endpoint = |id: &String| {
            local.get(id.as_str()).copied().ok_or_else(|| {
                LayoutError::MalformedGraph(format!(
                    "edge '{}' endpoint '{}' is not a child of '{}'",
                    edge.id, id, slot.node.id
                ))
            })
        };
        links.push((endpoint(source)?, endpoint(target)?));
    }

    let count = sizes.len();
    let mut layers = group_layers(&assign_layers(count, &links));
    if !options.keeps_input_order() {
        reduce_crossings(&mut layers, count, &links);
    }
    let (positions, content) = place(&layers, &sizes, &options);

    let direction = options.effective_direction();
    let rects: Vec<Rect> = positions
        .iter()
        .zip(&sizes)
        .map(|(p, &(w, h))| Rect { x: p.x, y: p.y, w, h })
        .collect();
    let sections: Vec<EdgeSection> = links
        .iter()
        .map(|&(s, t)| route(rects[s], rects[t], direction))
        .collect();

    let children = slots[idx].children.clone();
    for (&child, position) in children.iter().zip(&positions) {
        slots[child].node.x = Some(position.x);
        slots[child].node.y = Some(position.y);
    }

    let padding = options.effective_padding();
    let (min_w, min_h) = options.minimum_size.unwrap_or((0.0, 0.0));
    let node = &mut slots[idx].node;
    node.width = Some((padding.left + content.0 + padding.right).max(min_w));
    node.height = Some((padding.top + content.1 + padding.bottom).max(min_h));
    for (edge, section) in node.edges.iter_mut().zip(sections) {
        edge.sections = vec![section];
    }
    Ok(())
}

/// Longest-path layer per node. Nodes left over by the topological pass, both
/// cycle members and anything reachable only through a cycle, share one layer
/// after all others.
fn assign_layers(count: usize, links: &[(usize, usize)]) -> Vec<usize> {
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut indegree = vec![0usize; count];
    for &(s, t) in links {
        if s != t {
            successors[s].push(t);
            indegree[t] += 1;
        }
    }

    let mut layer = vec![0usize; count];
    let mut done = vec![false; count];
    let mut queue: VecDeque<usize> = (0..count).filter(|&v| indegree[v] == 0).collect();
    while let Some(v) = queue.pop_front() {
        done[v] = true;
        for &w in &successors[v] {
            layer[w] = layer[w].max(layer[v] + 1);
            indegree[w] -= 1;
            if indegree[w] == 0 {
                queue.push_back(w);
            }
        }
    }

    let trailing = (0..count)
        .filter(|&v| done[v])
        .map(|v| layer[v] + 1)
        .max()
        .unwrap_or(0);
    for v in 0..count {
        if !done[v] {
            layer[v] = trailing;
        }
    }
    layer
}

fn group_layers(layer_of: &[usize]) -> Vec<Vec<usize>> {
    let depth = layer_of.iter().max().map_or(0, |m| m + 1);
    let mut layers = vec![Vec::new(); depth];
    for (v, &l) in layer_of.iter().enumerate() {
        layers[l].push(v);
    }
    layers
}

fn reduce_crossings(layers: &mut [Vec<usize>], count: usize, links: &[(usize, usize)]) {
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
    for &(s, t) in links {
        if s != t {
            successors[s].push(t);
            predecessors[t].push(s);
        }
    }

    let mut rank = vec![0.0; count];
    for layer in layers.iter() {
        refresh_rank(layer, &mut rank);
    }
    for _ in 0..ORDERING_SWEEPS {
        for l in 1..layers.len() {
            sort_by_barycenter(&mut layers[l], &predecessors, &mut rank);
        }
        for l in (0..layers.len().saturating_sub(1)).rev() {
            sort_by_barycenter(&mut layers[l], &successors, &mut rank);
        }
    }
}

fn refresh_rank(layer: &[usize], rank: &mut [f64]) {
    for (i, &v) in layer.iter().enumerate() {
        rank[v] = i as f64;
    }
}

fn sort_by_barycenter(layer: &mut Vec<usize>, neighbours: &[Vec<usize>], rank: &mut [f64]) {
    let mut keyed: Vec<(f64, usize)> = layer
        .iter()
        .map(|&v| {
            let adjacent = &neighbours[v];
            let key = if adjacent.is_empty() {
                rank[v]
            } else {
                adjacent.iter().map(|&u| rank[u]).sum::<f64>() / adjacent.len() as f64
            };
            (key, v)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    *layer = keyed.into_iter().map(|(_, v)| v).collect();
    refresh_rank(layer, rank);
}

/// Positions relative to the container (padding included) and the size of
/// the content area.
fn place(
    layers: &[Vec<usize>],
    sizes: &[(f64, f64)],
    options: &LayoutOptions,
) -> (Vec<Point>, (f64, f64)) {
    let direction = options.effective_direction();
    let horizontal = direction.is_horizontal();
    let node_spacing = options.effective_node_spacing();
    let layer_spacing = options.effective_layer_spacing();
    // (along the flow, across the flow)
    let axes = |(w, h): (f64, f64)| if horizontal { (w, h) } else { (h, w) };

    let extents: Vec<f64> = layers
        .iter()
        .map(|layer| layer.iter().map(|&v| axes(sizes[v]).0).fold(0.0, f64::max))
        .collect();
    let breadths: Vec<f64> = layers
        .iter()
        .map(|layer| {
            layer.iter().map(|&v| axes(sizes[v]).1).sum::<f64>()
                + node_spacing * layer.len().saturating_sub(1) as f64
        })
        .collect();
    let max_breadth = breadths.iter().copied().fold(0.0, f64::max);
    let total_length =
        extents.iter().sum::<f64>() + layer_spacing * layers.len().saturating_sub(1) as f64;

    let mut coords = vec![(0.0, 0.0); sizes.len()];
    let mut along = 0.0;
    for (l, layer) in layers.iter().enumerate() {
        let mut across = (max_breadth - breadths[l]) / 2.0;
        for &v in layer {
            let (length, breadth) = axes(sizes[v]);
            coords[v] = (along + (extents[l] - length) / 2.0, across);
            across += breadth + node_spacing;
        }
        along += extents[l] + layer_spacing;
    }
    if direction.is_reversed() {
        for (v, coord) in coords.iter_mut().enumerate() {
            coord.0 = total_length - coord.0 - axes(sizes[v]).0;
        }
    }

    let padding = options.effective_padding();
    let positions = coords
        .into_iter()
        .map(|(a, c)| {
            if horizontal {
                Point::new(padding.left + a, padding.top + c)
            } else {
                Point::new(padding.left + c, padding.top + a)
            }
        })
        .collect();
    let content = if horizontal {
        (total_length, max_breadth)
    } else {
        (max_breadth, total_length)
    };
    (positions, content)
}

fn route(source: Rect, target: Rect, direction: Direction) -> EdgeSection {
    let (sc, tc) = (source.center(), target.center());
    let (start, end) = match direction {
        Direction::Right => (
            Point::new(source.x + source.w, sc.y),
            Point::new(target.x, tc.y),
        ),
        Direction::Left => (
            Point::new(source.x, sc.y),
            Point::new(target.x + target.w, tc.y),
        ),
        Direction::Down => (
            Point::new(sc.x, source.y + source.h),
            Point::new(tc.x, target.y),
        ),
        Direction::Up => (
            Point::new(sc.x, source.y),
            Point::new(tc.x, target.y + target.h),
        ),
    };

    let bend_points = if direction.is_horizontal() && (start.y - end.y).abs() > f64::EPSILON {
        let mid = (start.x + end.x) / 2.0;
        vec![Point::new(mid, start.y), Point::new(mid, end.y)]
    } else if !direction.is_horizontal() && (start.x - end.x).abs() > f64::EPSILON {
        let mid = (start.y + end.y) / 2.0;
        vec![Point::new(start.x, mid), Point::new(end.x, mid)]
    } else {
        Vec::new()
    };

    EdgeSection {
        start_point: start,
        end_point: end,
        bend_points,
    }
}
