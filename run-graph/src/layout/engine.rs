//! Layout invocation boundary.

use async_trait::async_trait;

use super::graph::{LayoutGraph, PositionedGraph};

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("Malformed layout graph: {0}")]
    MalformedGraph(String),

    #[error("Layout service unreachable: {0}")]
    Transport(String),

    #[error("Layout service rejected graph ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Invalid layout response: {0}")]
    InvalidResponse(String),
}

/// Assigns coordinates to a hierarchical graph.
///
/// Implementations are stateless per call and shared as `Arc<dyn LayoutEngine>`.
/// The returned graph has the same node and edge ids as the input.
#[async_trait]
pub trait LayoutEngine: Send + Sync {
    async fn layout(&self, graph: LayoutGraph) -> Result<PositionedGraph, LayoutError>;

    fn name(&self) -> &'static str;
}
