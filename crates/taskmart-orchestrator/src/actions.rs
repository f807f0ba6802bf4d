//! Buyer-initiated job actions
//!
//! These sit behind the HTTP layer. Every action checks that the caller is
//! the job's buyer before touching anything.

use std::sync::Arc;

use tracing::{info, warn};

use taskmart_db::Ledger;
use taskmart_escrow::EscrowOrchestrator;
use taskmart_types::{Job, JobId, JobStatus, MarketError, UserId};

use crate::clients::PaymentProvider;
use crate::error::Result;
use crate::state_machine::JobStateMachine;

#[derive(Clone)]
pub struct BuyerActions {
    ledger: Arc<dyn Ledger>,
    machine: JobStateMachine,
    payments: Arc<dyn PaymentProvider>,
    escrow: Arc<EscrowOrchestrator>,
}

impl BuyerActions {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        payments: Arc<dyn PaymentProvider>,
        escrow: Arc<EscrowOrchestrator>,
    ) -> Self {
        Self {
            machine: JobStateMachine::new(ledger.clone()),
            ledger,
            payments,
            escrow,
        }
    }

    /// Issue the job's invoice. Hiring a job that already has an invoice
    /// returns it unchanged.
    pub async fn hire(&self, job_id: &JobId, buyer_id: &UserId) -> Result<Job> {
        let job = self.load_owned(job_id, buyer_id).await?;
        if job.status != JobStatus::Unpaid {
            return Err(MarketError::StateConflict {
                job_id: *job_id,
                expected: JobStatus::Unpaid,
                actual: job.status,
            }
            .into());
        }
        if job.invoice_id.is_some() {
            return Ok(job);
        }

        let invoice = self
            .payments
            .create_invoice(&job.reference_key, job.amount, &job.title)
            .await?;
        let job = self.ledger.attach_invoice(job_id, &invoice.invoice_id).await?;
        info!(
            job_id = %job_id,
            invoice_id = %invoice.invoice_id,
            reference_key = %job.reference_key,
            "Invoice issued"
        );
        Ok(job)
    }

    /// Accept the delivery and pay the worker.
    ///
    /// If the release fails the job is left `completed` and the error is
    /// returned; [`retry_payout`](Self::retry_payout) finishes it later.
    pub async fn approve(&self, job_id: &JobId, buyer_id: &UserId) -> Result<Job> {
        self.load_owned(job_id, buyer_id).await?;
        let completed = self.machine.complete(job_id).await?;
        self.pay_out(&completed).await
    }

    pub async fn retry_payout(&self, job_id: &JobId, buyer_id: &UserId) -> Result<Job> {
        let job = self.load_owned(job_id, buyer_id).await?;
        if job.status != JobStatus::Completed {
            return Err(MarketError::StateConflict {
                job_id: *job_id,
                expected: JobStatus::Completed,
                actual: job.status,
            }
            .into());
        }
        self.pay_out(&job).await
    }

    /// Cancel before work starts.
    ///
    /// An escrowed job is cancelled first and refunded after, so a dispatch
    /// racing the cancel either wins the job or finds it cancelled. If the
    /// refund fails the job stays `cancelled`, the error is returned, and
    /// the payment loop or [`retry_refund`](Self::retry_refund) finishes it.
    pub async fn cancel(&self, job_id: &JobId, buyer_id: &UserId) -> Result<Job> {
        let job = self.load_owned(job_id, buyer_id).await?;
        match job.status {
            JobStatus::Unpaid => self.machine.cancel(job_id, JobStatus::Unpaid).await,
            JobStatus::Escrowed => {
                let cancelled = self.machine.cancel(job_id, JobStatus::Escrowed).await?;
                self.refund(&cancelled).await?;
                Ok(cancelled)
            }
            from => Err(MarketError::InvalidTransition {
                from,
                to: JobStatus::Cancelled,
            }
            .into()),
        }
    }

    pub async fn dispute(&self, job_id: &JobId, buyer_id: &UserId, reason: &str) -> Result<Job> {
        let job = self.load_owned(job_id, buyer_id).await?;
        match job.status {
            from @ (JobStatus::Working | JobStatus::Delivered) => {
                let disputed = self.machine.dispute(job_id, from).await?;
                warn!(job_id = %job_id, reason, "Job disputed by buyer");
                Ok(disputed)
            }
            from => Err(MarketError::InvalidTransition {
                from,
                to: JobStatus::Disputed,
            }
            .into()),
        }
    }

    /// Refund the escrow of a cancelled job whose refund did not go through
    pub async fn retry_refund(&self, job_id: &JobId, buyer_id: &UserId) -> Result<Job> {
        let job = self.load_owned(job_id, buyer_id).await?;
        if job.status != JobStatus::Cancelled {
            return Err(MarketError::StateConflict {
                job_id: *job_id,
                expected: JobStatus::Cancelled,
                actual: job.status,
            }
            .into());
        }
        self.refund(&job).await?;
        Ok(job)
    }

    async fn refund(&self, job: &Job) -> Result<()> {
        match self.escrow.refund_escrow(&job.reference_key).await {
            Ok(refund) => {
                info!(job_id = %job.id, tx = %refund.tx_digest, "Escrow refunded");
                Ok(())
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Escrow refund failed, job left cancelled");
                Err(e.into())
            }
        }
    }

    async fn pay_out(&self, job: &Job) -> Result<Job> {
        let released = match self.escrow.release_escrow(&job.reference_key).await {
            Ok(released) => released,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Escrow release failed, job left completed");
                return Err(e.into());
            }
        };
        let paid = self.machine.mark_paid_out(&job.id, &released.tx_digest).await?;
        info!(job_id = %job.id, tx = %released.tx_digest, "Escrow released to worker");
        Ok(paid)
    }

    async fn load_owned(&self, job_id: &JobId, buyer_id: &UserId) -> Result<Job> {
        let job = self.machine.load(job_id).await?;
        if job.buyer_id != *buyer_id {
            return Err(MarketError::Unauthorized {
                reason: format!("user {} is not the buyer of job {}", buyer_id, job_id),
            }
            .into());
        }
        Ok(job)
    }
}
