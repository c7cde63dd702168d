//! Run tree → renderer graph.
//!
//! build → layout (the only await) → flatten → paths → domain payloads.

use shared_types::RenderGraph;
use std::sync::Arc;

use crate::domain::RunTree;
use crate::layout::{flatten, FlatLayout, GraphBuilder, LayoutEngine, LayoutError};
use crate::paths::resolve_paths;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Layout failed: {0}")]
    Layout(#[from] LayoutError),
}

pub async fn compute_render_graph(
    engine: &dyn LayoutEngine,
    builder: &GraphBuilder,
    tree: &RunTree,
) -> Result<RenderGraph, PipelineError> {
    let graph = builder.build(tree);
    let positioned = engine.layout(graph).await.inspect_err(|e| {
        tracing::warn!(
            run_id = %tree.run_id(),
            engine = engine.name(),
            error = %e,
            "Layout computation failed"
        );
    })?;

    let FlatLayout { mut nodes, edges } = flatten(&positioned);
    let paths = resolve_paths(tree);
    for node in &mut nodes {
        let Some(idx) = tree.task_idx(&node.id) else {
            tracing::debug!(node_id = %node.id, "Layout node has no matching task");
            continue;
        };
        node.data.label = tree.task(idx).label().to_string();
        node.data.task_path = paths.get(&node.id).cloned();
        node.data.task = Some(tree.task_view(idx));
    }

    Ok(RenderGraph {
        run_id: tree.run_id().to_string(),
        status: Some(tree.status()),
        nodes,
        edges,
        statistics: tree.effective_statistics(),
    })
}

/// Builder and engine pair owned by whoever drives refreshes.
#[derive(Clone)]
pub struct Pipeline {
    engine: Arc<dyn LayoutEngine>,
    builder: GraphBuilder,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn LayoutEngine>, builder: GraphBuilder) -> Self {
        Self { engine, builder }
    }

    pub fn engine(&self) -> &Arc<dyn LayoutEngine> {
        &self.engine
    }

    pub fn builder(&self) -> &GraphBuilder {
        &self.builder
    }

    pub async fn render(&self, tree: &RunTree) -> Result<RenderGraph, PipelineError> {
        compute_render_graph(self.engine.as_ref(), &self.builder, tree).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("engine", &self.engine.name())
            .field("builder", &self.builder)
            .finish()
    }
}
