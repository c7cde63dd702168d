//! Hierarchical layout: graph model, builder, engines and flattening.

pub mod builder;
pub mod engine;
pub mod flatten;
pub mod graph;
pub mod layered;
pub mod options;
pub mod remote;

pub use builder::{BuilderSettings, GraphBuilder};
pub use engine::{LayoutEngine, LayoutError};
pub use flatten::{flatten, FlatLayout};
pub use graph::{LayoutGraph, PositionedGraph};
pub use layered::LayeredLayoutEngine;
pub use options::LayoutOptions;
pub use remote::RemoteLayoutEngine;
