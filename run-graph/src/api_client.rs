//! HTTP client for the run and job endpoints of the execution backend.

use serde::de::DeserializeOwned;
use shared_types::{
    JobGraph, JobRetryRequest, JobTask, RunListResponse, RunResponse, TaskRetryRequest,
    TaskRetryResponse, JOBS_BASE_PATH, RUNS_BASE_PATH,
};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::Decode(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl RunApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    pub async fn list_runs(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<RunListResponse, ClientError> {
        let mut query: Vec<(&str, u32)> = Vec::new();
        if let Some(limit) = limit {
            query.push(("limit", limit));
        }
        if let Some(offset) = offset {
            query.push(("offset", offset));
        }
        let response = self
            .http
            .get(self.url(RUNS_BASE_PATH))
            .query(&query)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<RunResponse, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("{RUNS_BASE_PATH}/{run_id}")))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn retry_task(
        &self,
        run_id: &str,
        request: &TaskRetryRequest,
    ) -> Result<TaskRetryResponse, ClientError> {
        tracing::info!(
            run_id,
            task_path = %request.task_path,
            reset_downstream = request.reset_downstream,
            "Requesting task retry"
        );
        let response = self
            .http
            .post(self.url(&format!("{RUNS_BASE_PATH}/{run_id}/retry")))
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    pub async fn list_jobs(&self) -> Result<Vec<JobTask>, ClientError> {
        let response = self.http.get(self.url(JOBS_BASE_PATH)).send().await?;
        decode(response).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<JobGraph, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("{JOBS_BASE_PATH}/{job_id}")))
            .send()
            .await?;
        decode(response).await
    }

    /// The backend accepts the retry and runs it in the background; the
    /// response body carries nothing beyond the job id.
    pub async fn retry_job_task(&self, job_id: &str, task_id: &str) -> Result<(), ClientError> {
        tracing::info!(job_id, task_id, "Requesting job task retry");
        let response = self
            .http
            .post(self.url(&format!("{JOBS_BASE_PATH}/{job_id}/retries")))
            .json(&JobRetryRequest {
                task_id: task_id.to_string(),
            })
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(api_error(status, response).await)
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        return Err(api_error(status, response).await);
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
}

/// `{"detail": ...}` when the backend sent one, the raw body otherwise.
async fn api_error(status: reqwest::StatusCode, response: reqwest::Response) -> ClientError {
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").cloned())
        .map(|detail| match detail {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .unwrap_or(body);
    tracing::warn!(status = status.as_u16(), detail = %detail, "Backend request failed");
    ClientError::Api {
        status: status.as_u16(),
        detail,
    }
}
