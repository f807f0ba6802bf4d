//! Agent executor: runs the paid work

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use taskmart_types::{Job, JobId};

/// What the executor is asked to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentTask {
    pub job_id: JobId,
    pub title: String,
    pub requirements: String,
    pub task_type: String,
}

impl From<&Job> for AgentTask {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            title: job.title.clone(),
            requirements: job.requirements.clone(),
            task_type: job.task_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Delivered { content: String },
    Failed { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent executor timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("agent executor unreachable: {0}")]
    Transport(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, task: &AgentTask) -> Result<ExecutionOutcome, AgentError>;
}

/// Agent section of the service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub executor_url: String,
    pub timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executor_url: "http://localhost:9300".to_string(),
            timeout_ms: 120_000,
        }
    }
}

pub struct HttpAgentExecutor {
    config: AgentConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ExecuteResponse {
    success: bool,
    #[serde(default)]
    delivery_content: Option<String>,
    #[serde(default)]
    error_reason: Option<String>,
}

impl HttpAgentExecutor {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AgentError::InvalidConfig(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl AgentExecutor for HttpAgentExecutor {
    async fn execute(&self, task: &AgentTask) -> Result<ExecutionOutcome, AgentError> {
        let url = format!("{}/execute", self.config.executor_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(task)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout {
                        timeout_ms: self.config.timeout_ms,
                    }
                } else {
                    AgentError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(AgentError::Transport(format!("HTTP {}", response.status())));
        }

        let body: ExecuteResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Transport(format!("bad executor response: {}", e)))?;

        Ok(match (body.success, body.delivery_content) {
            (true, Some(content)) => ExecutionOutcome::Delivered { content },
            (true, None) => ExecutionOutcome::Failed {
                reason: "executor reported success without content".to_string(),
            },
            (false, _) => ExecutionOutcome::Failed {
                reason: body
                    .error_reason
                    .unwrap_or_else(|| "unspecified executor failure".to_string()),
            },
        })
    }
}
