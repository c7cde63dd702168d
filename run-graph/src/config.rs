use std::sync::Arc;
use std::time::Duration;

use crate::api_client::RunApiClient;
use crate::layout::{BuilderSettings, LayeredLayoutEngine, LayoutEngine, RemoteLayoutEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutEngineKind {
    Layered,
    Remote,
}

impl LayoutEngineKind {
    fn from_env(value: &str) -> anyhow::Result<Self> {
        match value {
            "layered" => Ok(Self::Layered),
            "remote" => Ok(Self::Remote),
            other => Err(anyhow::anyhow!(
                "Invalid RUN_GRAPH_LAYOUT_ENGINE '{other}'. Expected 'layered' or 'remote'"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the execution backend
    pub api_base_url: String,
    /// How often a live run is re-fetched
    pub poll_interval: Duration,
    pub layout_engine: LayoutEngineKind,
    /// Required when `layout_engine` is remote
    pub layout_service_url: Option<String>,
    pub http_timeout: Duration,
    pub task_width: f64,
    pub task_height: f64,
    pub subflow_width: f64,
    pub subflow_height: f64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let layout_engine =
            LayoutEngineKind::from_env(&env.str("RUN_GRAPH_LAYOUT_ENGINE", "layered"))?;
        let layout_service_url = (env.0)("RUN_GRAPH_LAYOUT_SERVICE_URL");
        if layout_engine == LayoutEngineKind::Remote && layout_service_url.is_none() {
            return Err(anyhow::anyhow!(
                "RUN_GRAPH_LAYOUT_SERVICE_URL is required when RUN_GRAPH_LAYOUT_ENGINE=remote"
            ));
        }

        Ok(Self {
            api_base_url: env.str("RUN_GRAPH_API_BASE_URL", "http://localhost:8000"),
            poll_interval: Duration::from_secs(env.parse("RUN_GRAPH_POLL_INTERVAL_SECS", 10)?),
            layout_engine,
            layout_service_url,
            http_timeout: Duration::from_secs(env.parse("RUN_GRAPH_HTTP_TIMEOUT_SECS", 30)?),
            task_width: env.parse("RUN_GRAPH_TASK_WIDTH", 250.0)?,
            task_height: env.parse("RUN_GRAPH_TASK_HEIGHT", 56.0)?,
            subflow_width: env.parse("RUN_GRAPH_SUBFLOW_WIDTH", 200.0)?,
            subflow_height: env.parse("RUN_GRAPH_SUBFLOW_HEIGHT", 100.0)?,
        })
    }

    pub fn builder_settings(&self) -> BuilderSettings {
        BuilderSettings::with_sizes(
            self.task_width,
            self.task_height,
            self.subflow_width,
            self.subflow_height,
        )
    }

    pub fn api_client(&self) -> RunApiClient {
        RunApiClient::new(&self.api_base_url, self.http_timeout)
    }

    pub fn layout_engine(&self) -> anyhow::Result<Arc<dyn LayoutEngine>> {
        match self.layout_engine {
            LayoutEngineKind::Layered => Ok(Arc::new(LayeredLayoutEngine::new())),
            LayoutEngineKind::Remote => {
                let url = self
                    .layout_service_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("No layout service URL configured"))?;
                Ok(Arc::new(RemoteLayoutEngine::new(url, self.http_timeout)))
            }
        }
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn str(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T::Err: std::fmt::Display,
    {
        match (self.0)(key) {
            Some(val) => val
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
            None => Ok(default),
        }
    }
}
