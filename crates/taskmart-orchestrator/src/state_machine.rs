//! Job state machine over the ledger
//!
//! Each method names the status it expects the job to be in and issues one
//! compare-and-set. A job that moved in the meantime surfaces as a
//! `StateConflict`; nothing here re-reads and retries.

use std::sync::Arc;

use tracing::info;

use taskmart_db::Ledger;
use taskmart_types::{Job, JobId, JobStatus, JobTransition, MarketError};

use crate::error::Result;

#[derive(Clone)]
pub struct JobStateMachine {
    ledger: Arc<dyn Ledger>,
}

impl JobStateMachine {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub async fn load(&self, id: &JobId) -> Result<Job> {
        self.ledger
            .get_job(id)
            .await?
            .ok_or_else(|| MarketError::JobNotFound { job_id: *id }.into())
    }

    /// `unpaid → escrowed`
    pub async fn mark_escrowed(
        &self,
        id: &JobId,
        escrow_object_id: &str,
        create_tx: &str,
    ) -> Result<Job> {
        let transition = JobTransition::Escrow {
            escrow_object_id: escrow_object_id.to_string(),
            create_tx: create_tx.to_string(),
        };
        self.apply(id, JobStatus::Unpaid, transition).await
    }

    /// `escrowed → working`
    pub async fn start_work(&self, id: &JobId) -> Result<Job> {
        self.apply(id, JobStatus::Escrowed, JobTransition::StartWork)
            .await
    }

    /// `working → delivered`
    pub async fn mark_delivered(&self, id: &JobId) -> Result<Job> {
        self.apply(id, JobStatus::Working, JobTransition::Deliver)
            .await
    }

    /// `delivered → completed`
    pub async fn complete(&self, id: &JobId) -> Result<Job> {
        self.apply(id, JobStatus::Delivered, JobTransition::Complete)
            .await
    }

    /// `completed → paid_out`
    pub async fn mark_paid_out(&self, id: &JobId, release_tx: &str) -> Result<Job> {
        let transition = JobTransition::PayOut {
            release_tx: release_tx.to_string(),
        };
        self.apply(id, JobStatus::Completed, transition).await
    }

    /// `unpaid | escrowed → cancelled`
    pub async fn cancel(&self, id: &JobId, from: JobStatus) -> Result<Job> {
        self.apply(id, from, JobTransition::Cancel).await
    }

    /// `working | delivered → disputed`
    pub async fn dispute(&self, id: &JobId, from: JobStatus) -> Result<Job> {
        self.apply(id, from, JobTransition::Dispute).await
    }

    async fn apply(&self, id: &JobId, expected: JobStatus, transition: JobTransition) -> Result<Job> {
        transition.check(expected)?;
        let job = self.ledger.transition_job(id, expected, &transition).await?;
        info!(job_id = %id, from = %expected, to = %job.status, "Job transitioned");
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use rust_decimal_macros::dec;
    use taskmart_db::MemoryLedger;
    use taskmart_types::UserId;

    async fn setup() -> (JobStateMachine, Job) {
        let ledger = Arc::new(MemoryLedger::new());
        let job = Job::new("Logo", "Design a logo", UserId::new(), dec!(80));
        ledger.insert_job(&job).await.unwrap();
        (JobStateMachine::new(ledger), job)
    }

    #[tokio::test]
    async fn test_happy_path_records_references() {
        let (machine, job) = setup().await;

        let escrowed = machine.mark_escrowed(&job.id, "0xobj", "0xtx").await.unwrap();
        assert_eq!(escrowed.status, JobStatus::Escrowed);
        assert_eq!(escrowed.escrow_object_id.as_deref(), Some("0xobj"));
        assert!(escrowed.paid_at.is_some());

        machine.start_work(&job.id).await.unwrap();
        machine.mark_delivered(&job.id).await.unwrap();
        machine.complete(&job.id).await.unwrap();
        let paid = machine.mark_paid_out(&job.id, "0xrelease").await.unwrap();

        assert_eq!(paid.status, JobStatus::PaidOut);
        assert_eq!(paid.escrow_release_tx.as_deref(), Some("0xrelease"));
        assert!(paid.escrow_refs_consistent());
    }

    #[tokio::test]
    async fn test_stale_precondition_is_conflict() {
        let (machine, job) = setup().await;
        machine.mark_escrowed(&job.id, "0xobj", "0xtx").await.unwrap();

        let err = machine
            .mark_escrowed(&job.id, "0xother", "0xtx2")
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let current = machine.load(&job.id).await.unwrap();
        assert_eq!(current.escrow_object_id.as_deref(), Some("0xobj"));
    }

    #[tokio::test]
    async fn test_illegal_step_rejected_without_write() {
        let (machine, job) = setup().await;

        let err = machine.dispute(&job.id, JobStatus::Unpaid).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Market(MarketError::InvalidTransition { .. })
        ));
        assert_eq!(machine.load(&job.id).await.unwrap().status, JobStatus::Unpaid);
    }

    #[tokio::test]
    async fn test_missing_job() {
        let (machine, _) = setup().await;
        let err = machine.start_work(&JobId::new()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Market(MarketError::JobNotFound { .. })
        ));
    }
}
