//! Where run snapshots come from.

use async_trait::async_trait;
use shared_types::{ExecutionState, JobGraph, RunResponse, TaskRetryRequest};
use std::fmt;

use crate::api_client::{ClientError, RunApiClient};
use crate::domain::reader::{read_job, read_run};
use crate::domain::RunTree;

/// A run of either backend shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RunRef {
    Run(String),
    Job(String),
}

impl RunRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Run(id) | Self::Job(id) => id,
        }
    }
}

impl fmt::Display for RunRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(id) => write!(f, "run:{id}"),
            Self::Job(id) => write!(f, "job:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunSnapshot {
    Run(RunResponse),
    Job(JobGraph),
}

impl RunSnapshot {
    pub fn id(&self) -> &str {
        match self {
            Self::Run(run) => &run.id,
            Self::Job(job) => &job.id,
        }
    }

    /// Status as reported, if recognizable.
    pub fn reported_status(&self) -> Option<ExecutionState> {
        match self {
            Self::Run(run) => ExecutionState::parse(&run.status),
            Self::Job(job) => ExecutionState::parse(&job.status),
        }
    }

    pub fn to_tree(&self) -> RunTree {
        match self {
            Self::Run(run) => read_run(run),
            Self::Job(job) => read_job(job),
        }
    }
}

/// Retry of one task. Runs address it by path, jobs by instance id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryCommand {
    pub task_id: String,
    pub task_path: String,
    pub reset_downstream: bool,
}

#[async_trait]
pub trait RunSource: Send + Sync {
    async fn fetch(&self, run: &RunRef) -> Result<RunSnapshot, ClientError>;

    async fn retry(&self, run: &RunRef, command: &RetryCommand) -> Result<(), ClientError>;
}

#[async_trait]
impl RunSource for RunApiClient {
    async fn fetch(&self, run: &RunRef) -> Result<RunSnapshot, ClientError> {
        match run {
            RunRef::Run(id) => self.get_run(id).await.map(RunSnapshot::Run),
            RunRef::Job(id) => self.get_job(id).await.map(RunSnapshot::Job),
        }
    }

    async fn retry(&self, run: &RunRef, command: &RetryCommand) -> Result<(), ClientError> {
        match run {
            RunRef::Run(id) => {
                let request = TaskRetryRequest {
                    task_path: command.task_path.clone(),
                    reset_downstream: command.reset_downstream,
                };
                let response = self.retry_task(id, &request).await?;
                tracing::info!(run_id = %response.run_id, message = %response.message, "Retry accepted");
                Ok(())
            }
            RunRef::Job(id) => self.retry_job_task(id, &command.task_id).await,
        }
    }
}
