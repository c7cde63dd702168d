//! Typed layout options and their ELK key encoding.

use std::collections::BTreeMap;

pub const KEY_ALGORITHM: &str = "elk.algorithm";
pub const KEY_DIRECTION: &str = "elk.direction";
pub const KEY_HIERARCHY_HANDLING: &str = "elk.hierarchyHandling";
pub const KEY_NODE_SPACING: &str = "elk.spacing.nodeNode";
pub const KEY_LAYER_SPACING: &str = "elk.layered.spacing.nodeNodeBetweenLayers";
pub const KEY_NODE_PLACEMENT: &str = "elk.layered.nodePlacement.strategy";
pub const KEY_SEMI_INTERACTIVE: &str = "elk.layered.crossingMinimization.semiInteractive";
pub const KEY_PADDING: &str = "elk.padding";
pub const KEY_SIZE_CONSTRAINTS: &str = "elk.nodeSize.constraints";
pub const KEY_MINIMUM_SIZE: &str = "elk.nodeSize.minimum";

const DEFAULT_NODE_SPACING: f64 = 20.0;
const DEFAULT_LAYER_SPACING: f64 = 20.0;
const DEFAULT_PADDING: f64 = 12.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Algorithm {
    Layered,
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Right,
    Left,
    Down,
    Up,
}

impl Direction {
    pub fn as_elk(&self) -> &'static str {
        match self {
            Self::Right => "RIGHT",
            Self::Left => "LEFT",
            Self::Down => "DOWN",
            Self::Up => "UP",
        }
    }

    fn from_elk(raw: &str) -> Option<Self> {
        match raw {
            "RIGHT" => Some(Self::Right),
            "LEFT" => Some(Self::Left),
            "DOWN" => Some(Self::Down),
            "UP" => Some(Self::Up),
            _ => None,
        }
    }

    /// Layers advance along the x axis.
    pub fn is_horizontal(&self) -> bool {
        matches!(self, Self::Right | Self::Left)
    }

    /// Layers advance towards decreasing coordinates.
    pub fn is_reversed(&self) -> bool {
        matches!(self, Self::Left | Self::Up)
    }
}

/// Whether nested containers are laid out jointly with their parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyHandling {
    IncludeChildren,
    SeparateChildren,
    Inherit,
}

impl HierarchyHandling {
    fn as_elk(&self) -> &'static str {
        match self {
            Self::IncludeChildren => "INCLUDE_CHILDREN",
            Self::SeparateChildren => "SEPARATE_CHILDREN",
            Self::Inherit => "INHERIT",
        }
    }

    fn from_elk(raw: &str) -> Option<Self> {
        match raw {
            "INCLUDE_CHILDREN" => Some(Self::IncludeChildren),
            "SEPARATE_CHILDREN" => Some(Self::SeparateChildren),
            "INHERIT" => Some(Self::Inherit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePlacement {
    NetworkSimplex,
    BrandesKoepf,
    LinearSegments,
    Simple,
}

impl NodePlacement {
    fn as_elk(&self) -> &'static str {
        match self {
            Self::NetworkSimplex => "NETWORK_SIMPLEX",
            Self::BrandesKoepf => "BRANDES_KOEPF",
            Self::LinearSegments => "LINEAR_SEGMENTS",
            Self::Simple => "SIMPLE",
        }
    }

    fn from_elk(raw: &str) -> Option<Self> {
        match raw {
            "NETWORK_SIMPLEX" => Some(Self::NetworkSimplex),
            "BRANDES_KOEPF" => Some(Self::BrandesKoepf),
            "LINEAR_SEGMENTS" => Some(Self::LinearSegments),
            "SIMPLE" => Some(Self::Simple),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Padding {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
}

impl Padding {
    pub fn uniform(value: f64) -> Self {
        Self {
            top: value,
            left: value,
            bottom: value,
            right: value,
        }
    }

    fn to_elk(self) -> String {
        format!(
            "[top={},left={},bottom={},right={}]",
            self.top, self.left, self.bottom, self.right
        )
    }

    fn from_elk(raw: &str) -> Option<Self> {
        let inner = raw.trim().strip_prefix('[')?.strip_suffix(']')?;
        let mut padding = Padding::uniform(0.0);
        for part in inner.split(',') {
            let (key, value) = part.split_once('=')?;
            let value: f64 = value.trim().parse().ok()?;
            match key.trim() {
                "top" => padding.top = value,
                "left" => padding.left = value,
                "bottom" => padding.bottom = value,
                "right" => padding.right = value,
                _ => return None,
            }
        }
        Some(padding)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayoutOptions {
    pub algorithm: Option<Algorithm>,
    pub direction: Option<Direction>,
    pub hierarchy_handling: Option<HierarchyHandling>,
    pub node_spacing: Option<f64>,
    pub layer_spacing: Option<f64>,
    pub node_placement: Option<NodePlacement>,
    /// Keep the input order of nodes within a layer
    pub semi_interactive: Option<bool>,
    pub padding: Option<Padding>,
    pub minimum_size: Option<(f64, f64)>,
}

impl LayoutOptions {
    /// Options for the run level: wide spacing, stable ordering.
    pub fn root() -> Self {
        Self {
            algorithm: Some(Algorithm::Layered),
            direction: Some(Direction::Right),
            hierarchy_handling: Some(HierarchyHandling::IncludeChildren),
            node_spacing: Some(80.0),
            layer_spacing: Some(120.0),
            node_placement: Some(NodePlacement::NetworkSimplex),
            semi_interactive: Some(true),
            padding: None,
            minimum_size: None,
        }
    }

    /// Options for nested containers: compact boxes with explicit padding.
    pub fn nested(min_width: f64, min_height: f64) -> Self {
        Self {
            algorithm: Some(Algorithm::Layered),
            direction: Some(Direction::Right),
            hierarchy_handling: None,
            node_spacing: Some(60.0),
            layer_spacing: Some(80.0),
            node_placement: None,
            semi_interactive: None,
            padding: Some(Padding::uniform(28.0)),
            minimum_size: Some((min_width, min_height)),
        }
    }

    pub fn to_elk(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            map.insert(key.to_string(), value);
        };
        match &self.algorithm {
            Some(Algorithm::Layered) => put(KEY_ALGORITHM, "layered".to_string()),
            Some(Algorithm::Other(name)) => put(KEY_ALGORITHM, name.clone()),
            None => {}
        }
        if let Some(direction) = self.direction {
            put(KEY_DIRECTION, direction.as_elk().to_string());
        }
        if let Some(handling) = self.hierarchy_handling {
            put(KEY_HIERARCHY_HANDLING, handling.as_elk().to_string());
        }
        if let Some(spacing) = self.node_spacing {
            put(KEY_NODE_SPACING, spacing.to_string());
        }
        if let Some(spacing) = self.layer_spacing {
            put(KEY_LAYER_SPACING, spacing.to_string());
        }
        if let Some(placement) = self.node_placement {
            put(KEY_NODE_PLACEMENT, placement.as_elk().to_string());
        }
        if let Some(semi) = self.semi_interactive {
            put(KEY_SEMI_INTERACTIVE, semi.to_string());
        }
        if let Some(padding) = self.padding {
            put(KEY_PADDING, padding.to_elk());
        }
        if let Some((w, h)) = self.minimum_size {
            put(KEY_SIZE_CONSTRAINTS, "MINIMUM_SIZE".to_string());
            put(KEY_MINIMUM_SIZE, format!("({w},{h})"));
        }
        map
    }

    /// Decode options from an ELK map. Unknown keys are ignored and
    /// malformed values are dropped.
    pub fn from_elk(map: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| map.get(key).map(|v| v.trim());
        let number = |key: &str| {
            get(key).and_then(|v| {
                v.parse::<f64>().ok().or_else(|| {
                    tracing::debug!(key, value = v, "Ignoring non-numeric layout option");
                    None
                })
            })
        };
        let minimum_size = match get(KEY_SIZE_CONSTRAINTS) {
            Some(constraint) if constraint.contains("MINIMUM_SIZE") => {
                get(KEY_MINIMUM_SIZE).and_then(parse_pair)
            }
            _ => None,
        };
        Self {
            algorithm: get(KEY_ALGORITHM).map(|v| {
                let name = v.strip_prefix("org.eclipse.elk.").unwrap_or(v);
                if name == "layered" {
                    Algorithm::Layered
                } else {
                    Algorithm::Other(v.to_string())
                }
            }),
            direction: get(KEY_DIRECTION).and_then(Direction::from_elk),
            hierarchy_handling: get(KEY_HIERARCHY_HANDLING).and_then(HierarchyHandling::from_elk),
            node_spacing: number(KEY_NODE_SPACING),
            layer_spacing: number(KEY_LAYER_SPACING),
            node_placement: get(KEY_NODE_PLACEMENT).and_then(NodePlacement::from_elk),
            semi_interactive: get(KEY_SEMI_INTERACTIVE).and_then(|v| v.parse().ok()),
            padding: get(KEY_PADDING).and_then(Padding::from_elk),
            minimum_size,
        }
    }

    /// Fill unset fields from `parent`, for options that propagate down
    /// the hierarchy.
    pub fn inherit(&self, parent: &LayoutOptions) -> LayoutOptions {
        LayoutOptions {
            algorithm: self.algorithm.clone().or_else(|| parent.algorithm.clone()),
            direction: self.direction.or(parent.direction),
            hierarchy_handling: self.hierarchy_handling.or(parent.hierarchy_handling),
            node_spacing: self.node_spacing.or(parent.node_spacing),
            layer_spacing: self.layer_spacing.or(parent.layer_spacing),
            node_placement: self.node_placement.or(parent.node_placement),
            semi_interactive: self.semi_interactive.or(parent.semi_interactive),
            padding: self.padding,
            minimum_size: self.minimum_size,
        }
    }

    pub fn effective_direction(&self) -> Direction {
        self.direction.unwrap_or_default()
    }

    pub fn effective_node_spacing(&self) -> f64 {
        self.node_spacing.unwrap_or(DEFAULT_NODE_SPACING)
    }

    pub fn effective_layer_spacing(&self) -> f64 {
        self.layer_spacing.unwrap_or(DEFAULT_LAYER_SPACING)
    }

    pub fn effective_padding(&self) -> Padding {
        self.padding.unwrap_or(Padding::uniform(DEFAULT_PADDING))
    }

    pub fn keeps_input_order(&self) -> bool {
        self.semi_interactive.unwrap_or(false)
    }
}

fn parse_pair(raw: &str) -> Option<(f64, f64)> {
    let inner = raw.strip_prefix('(')?.strip_suffix(')')?;
    let (w, h) = inner.split_once(',')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_options_encode_to_elk_keys() {
        let map = LayoutOptions::root().to_elk();
        assert_eq!(map[KEY_ALGORITHM], "layered");
        assert_eq!(map[KEY_DIRECTION], "RIGHT");
        assert_eq!(map[KEY_HIERARCHY_HANDLING], "INCLUDE_CHILDREN");
        assert_eq!(map[KEY_NODE_SPACING], "80");
        assert_eq!(map[KEY_LAYER_SPACING], "120");
        assert_eq!(map[KEY_SEMI_INTERACTIVE], "true");
        assert!(!map.contains_key(KEY_PADDING));
    }

    #[test]
    fn test_nested_options_round_trip_through_elk() {
        let nested = LayoutOptions::nested(200.0, 100.0);
        let map = nested.to_elk();
        assert_eq!(map[KEY_PADDING], "[top=28,left=28,bottom=28,right=28]");
        assert_eq!(map[KEY_MINIMUM_SIZE], "(200,100)");
        assert_eq!(LayoutOptions::from_elk(&map), nested);
    }

    #[test]
    fn test_malformed_values_are_dropped() {
        let mut map = BTreeMap::new();
        map.insert(KEY_NODE_SPACING.to_string(), "wide".to_string());
        map.insert(KEY_PADDING.to_string(), "[top=1,middle=2]".to_string());
        map.insert(KEY_DIRECTION.to_string(), "SIDEWAYS".to_string());
        let options = LayoutOptions::from_elk(&map);
        assert_eq!(options.node_spacing, None);
        assert_eq!(options.padding, None);
        assert_eq!(options.effective_direction(), Direction::Right);
    }

    #[test]
    fn test_inherit_keeps_padding_local() {
        let parent = LayoutOptions {
            padding: Some(Padding::uniform(5.0)),
            ..LayoutOptions::root()
        };
        let child = LayoutOptions::default().inherit(&parent);
        assert_eq!(child.direction, Some(Direction::Right));
        assert_eq!(child.padding, None);
    }
}
