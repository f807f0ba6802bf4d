//! Raw, unstructured demand submitted by users

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, MarketError, RequestId, UserId};

/// Status of a user request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(MarketError::Validation {
                reason: format!("unknown request status '{}'", other),
            }),
        }
    }
}

/// Free-text demand waiting to be turned into a job.
///
/// Mutated exactly once, from `pending` to `processed` or `failed`. Failed
/// requests are never retried; the submitter files a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRequest {
    pub id: RequestId,
    pub submitter_id: UserId,
    pub description: String,
    pub status: RequestStatus,
    pub job_id: Option<JobId>,
    pub error_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl UserRequest {
    pub fn new(submitter_id: UserId, description: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            submitter_id,
            description: description.into(),
            status: RequestStatus::Pending,
            job_id: None,
            error_note: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}
