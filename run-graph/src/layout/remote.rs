//! Layout delegated to an external ELK-compatible service.
//!
//! The service receives the graph as ELK JSON in the request body and answers
//! with the same graph, positioned.

use async_trait::async_trait;
use std::time::Duration;

use super::engine::{LayoutEngine, LayoutError};
use super::graph::{LayoutGraph, PositionedGraph};

pub struct RemoteLayoutEngine {
    http: reqwest::Client,
    url: String,
}

impl RemoteLayoutEngine {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self::with_client(http, url)
    }

    pub fn with_client(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LayoutEngine for RemoteLayoutEngine {
    async fn layout(&self, graph: LayoutGraph) -> Result<PositionedGraph, LayoutError> {
        let root_id = graph.root().id.clone();
        let started = tokio::time::Instant::now();

        let response = self
            .http
            .post(&self.url)
            .json(&graph)
            .send()
            .await
            .map_err(|e| LayoutError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(
                url = %self.url,
                status = status.as_u16(),
                "Layout service rejected graph"
            );
            return Err(LayoutError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        let positioned: PositionedGraph = response
            .json()
            .await
            .map_err(|e| LayoutError::InvalidResponse(e.to_string()))?;
        if positioned.root().id != root_id {
            return Err(LayoutError::InvalidResponse(format!(
                "expected root '{}', got '{}'",
                root_id,
                positioned.root().id
            )));
        }

        tracing::debug!(
            url = %self.url,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Remote layout computed"
        );
        Ok(positioned)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
