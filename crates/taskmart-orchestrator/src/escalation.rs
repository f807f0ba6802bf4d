//! Retry accounting and escalation of repeatedly failing jobs

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::error;

use taskmart_db::{DbError, Ledger};
use taskmart_types::JobId;

use crate::error::Result;

/// Hands a job over for manual review
#[async_trait]
pub trait EscalationPolicy: Send + Sync {
    async fn escalate(&self, job_id: &JobId, attempts: u32, reason: &str) -> Result<()>;
}

/// Default policy: log at error level and open an escalation in the ledger.
/// The payment loop skips jobs with an open escalation.
pub struct LedgerEscalation {
    ledger: Arc<dyn Ledger>,
}

impl LedgerEscalation {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl EscalationPolicy for LedgerEscalation {
    async fn escalate(&self, job_id: &JobId, attempts: u32, reason: &str) -> Result<()> {
        error!(job_id = %job_id, attempts, reason, "Job escalated for manual review");
        match self.ledger.record_escalation(job_id, attempts, reason).await {
            Ok(()) | Err(DbError::Duplicate(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Consecutive failure counts per job. Lives for the process; a restart
/// starts every job from zero.
#[derive(Default)]
pub struct RetryTracker {
    failures: DashMap<JobId, u32>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failure and return the new total
    pub fn record_failure(&self, job_id: &JobId) -> u32 {
        let mut count = self.failures.entry(*job_id).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset(&self, job_id: &JobId) {
        self.failures.remove(job_id);
    }

    pub fn attempts(&self, job_id: &JobId) -> u32 {
        self.failures.get(job_id).map(|c| *c).unwrap_or(0)
    }
}
