//! Work output attached to a job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeliveryId, JobId};

/// A delivered piece of work. Each redelivery bumps `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: DeliveryId,
    pub job_id: JobId,
    /// Inline content or an external reference
    pub content: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}
