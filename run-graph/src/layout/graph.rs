//! Hierarchical layout graph, serialized in ELK JSON form.
//!
//! The same node type carries both the layout input (sizes, options) and the
//! positioned output (`x`/`y` relative to the parent, routed edge sections).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSection {
    pub start_point: Point,
    pub end_point: Point,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bend_points: Vec<Point>,
}

impl EdgeSection {
    /// Start, bends and end in order.
    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        std::iter::once(self.start_point)
            .chain(self.bend_points.iter().copied())
            .chain(std::iter::once(self.end_point))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutEdge {
    pub id: String,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<EdgeSection>,
}

impl LayoutEdge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sources: vec![source.into()],
            targets: vec![target.into()],
            sections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutLabel {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayoutNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<LayoutLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LayoutNode>,
    /// Edges between this node's immediate children
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<LayoutEdge>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub layout_options: BTreeMap<String, String>,
}

impl LayoutNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: Vec::new(),
            x: None,
            y: None,
            width: None,
            height: None,
            children: Vec::new(),
            edges: Vec::new(),
            layout_options: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, text: impl Into<String>) -> Self {
        self.labels.push(LayoutLabel { text: text.into() });
        self
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn label(&self) -> &str {
        self.labels
            .first()
            .map(|l| l.text.as_str())
            .unwrap_or(&self.id)
    }

    pub fn is_container(&self) -> bool {
        !self.children.is_empty()
    }

    /// Offset relative to the parent; missing coordinates count as zero.
    pub fn offset(&self) -> Point {
        Point::new(self.x.unwrap_or(0.0), self.y.unwrap_or(0.0))
    }

    /// Number of nodes below this one, at any depth.
    pub fn descendant_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&LayoutNode> = self.children.iter().collect();
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

/// Layout input: built from a run, not yet positioned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct LayoutGraph(pub LayoutNode);

/// Layout output: same shape as the input with coordinates filled in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PositionedGraph(pub LayoutNode);

impl LayoutGraph {
    pub fn root(&self) -> &LayoutNode {
        &self.0
    }
}

impl PositionedGraph {
    pub fn root(&self) -> &LayoutNode {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elk_json_shape() {
        let mut root = LayoutNode::new("run-1");
        root.layout_options
            .insert("elk.algorithm".to_string(), "layered".to_string());
        root.children
            .push(LayoutNode::new("a").with_label("Extract").with_size(250.0, 56.0));
        root.edges.push(LayoutEdge::new("root:a->b", "a", "b"));

        let json = serde_json::to_value(LayoutGraph(root)).unwrap();
        assert_eq!(json["layoutOptions"]["elk.algorithm"], "layered");
        assert_eq!(json["children"][0]["labels"][0]["text"], "Extract");
        assert_eq!(json["edges"][0]["sources"][0], "a");
        assert!(json["children"][0].get("x").is_none());
    }

    #[test]
    fn test_positioned_graph_parses_sections() {
        let graph: PositionedGraph = serde_json::from_value(serde_json::json!({
            "id": "run-1",
            "x": 0, "y": 0, "width": 400, "height": 200,
            "children": [{"id": "a", "x": 12, "y": 12, "width": 250, "height": 56}],
            "edges": [{
                "id": "e", "sources": ["a"], "targets": ["b"],
                "sections": [{"startPoint": {"x": 1, "y": 2}, "endPoint": {"x": 3, "y": 4},
                              "bendPoints": [{"x": 2, "y": 2}]}]
            }]
        }))
        .unwrap();
        let section = &graph.root().edges[0].sections[0];
        let points: Vec<Point> = section.points().collect();
        assert_eq!(points.len(), 3);
        assert_eq!(graph.root().children[0].offset(), Point::new(12.0, 12.0));
        assert_eq!(graph.root().descendant_count(), 1);
    }
}
