//! Payment reconciliation: paid invoices become escrowed (and working) jobs,
//! and escrows of cancelled jobs go back to the buyer

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use taskmart_db::Ledger;
use taskmart_escrow::{EscrowCreate, EscrowError, EscrowOrchestrator};
use taskmart_types::{Job, JobId, JobStatus};

use crate::clients::{AgentExecutor, AgentTask, ExecutionOutcome, InvoiceStatus, PaymentProvider};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::escalation::{EscalationPolicy, RetryTracker};
use crate::poller::{Reconciler, TickReport};
use crate::state_machine::JobStateMachine;

/// What one job's reconciliation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Advanced,
    Unchanged,
}

pub struct PaymentReconciler {
    ledger: Arc<dyn Ledger>,
    machine: JobStateMachine,
    payments: Arc<dyn PaymentProvider>,
    escrow: Arc<EscrowOrchestrator>,
    agent: Arc<dyn AgentExecutor>,
    escalation: Arc<dyn EscalationPolicy>,
    retries: RetryTracker,
    batch_size: usize,
    auto_trigger_agent: bool,
    max_retries: u32,
    agent_timeout: Duration,
}

impl PaymentReconciler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        payments: Arc<dyn PaymentProvider>,
        escrow: Arc<EscrowOrchestrator>,
        agent: Arc<dyn AgentExecutor>,
        escalation: Arc<dyn EscalationPolicy>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            machine: JobStateMachine::new(ledger.clone()),
            ledger,
            payments,
            escrow,
            agent,
            escalation,
            retries: RetryTracker::new(),
            batch_size: config.effective_batch_size(),
            auto_trigger_agent: config.auto_trigger_agent,
            max_retries: config.max_retries,
            agent_timeout: config.agent_timeout(),
        }
    }

    /// Consecutive failures currently counted against `job_id`
    pub fn retry_count(&self, job_id: &JobId) -> u32 {
        self.retries.attempts(job_id)
    }

    async fn reconcile_job(&self, job_id: &JobId) -> Result<Progress> {
        // The batch read may be stale by now
        let job = self.machine.load(job_id).await?;
        if job.status != JobStatus::Unpaid {
            return Ok(Progress::Unchanged);
        }
        let Some(invoice_id) = job.invoice_id.as_deref() else {
            return Ok(Progress::Unchanged);
        };

        match self.payments.invoice_status(invoice_id).await? {
            InvoiceStatus::Pending => Ok(Progress::Unchanged),
            InvoiceStatus::Expired => {
                self.machine.cancel(job_id, JobStatus::Unpaid).await?;
                info!(job_id = %job_id, invoice_id, "Invoice expired, job cancelled");
                Ok(Progress::Advanced)
            }
            InvoiceStatus::Paid => {
                let request = self.escrow_request(&job).await?;
                let created = self.escrow.create_escrow(job.id, &request).await?;
                let escrowed = match self
                    .machine
                    .mark_escrowed(job_id, &created.escrow_object_id, &created.create_tx)
                    .await
                {
                    Ok(escrowed) => escrowed,
                    Err(e) if e.is_conflict() => return self.unwind_escrow(&job, e).await,
                    Err(e) => return Err(e),
                };
                info!(
                    job_id = %job_id,
                    invoice_id,
                    escrow = %created.escrow_object_id,
                    tx = %created.create_tx,
                    reused = created.reused,
                    "Payment confirmed, funds escrowed"
                );

                if self.auto_trigger_agent {
                    self.dispatch(&escrowed).await;
                }
                Ok(Progress::Advanced)
            }
        }
    }

    /// The job left `unpaid` while its escrow was being created. A cancelled
    /// job gets its funds back; any other move is someone else's progress
    /// and the original conflict is returned.
    async fn unwind_escrow(&self, job: &Job, conflict: OrchestratorError) -> Result<Progress> {
        let current = self.machine.load(&job.id).await?;
        if current.status != JobStatus::Cancelled {
            return Err(conflict);
        }

        warn!(job_id = %job.id, "Job cancelled while its escrow was created, refunding");
        let refund = self.escrow.refund_escrow(&job.reference_key).await?;
        info!(job_id = %job.id, tx = %refund.tx_digest, "Escrow refunded to buyer");
        Ok(Progress::Advanced)
    }

    async fn escrow_request(&self, job: &Job) -> Result<EscrowCreate> {
        let worker_id = job.worker_id.ok_or_else(|| EscrowError::InvalidAddress {
            address: format!("job {} has no assigned worker", job.id),
        })?;

        let buyer_address = self
            .ledger
            .wallet_address(&job.buyer_id.0)
            .await?
            .ok_or_else(|| EscrowError::InvalidAddress {
                address: format!("no wallet for buyer {}", job.buyer_id),
            })?;
        let worker_address = self
            .ledger
            .wallet_address(&worker_id.0)
            .await?
            .ok_or_else(|| EscrowError::InvalidAddress {
                address: format!("no wallet for worker {}", worker_id),
            })?;

        Ok(EscrowCreate {
            buyer_address,
            worker_address,
            amount: job.amount,
            reference_key: job.reference_key.clone(),
        })
    }

    /// Start an escrowed job and hand it to the agent executor.
    ///
    /// Returns whether this call moved the job to `working`. Executor
    /// failures leave the job `working` and never touch escrow.
    async fn dispatch(&self, job: &Job) -> bool {
        let working = match self.machine.start_work(&job.id).await {
            Ok(working) => working,
            Err(e) if e.is_conflict() => {
                debug!(job_id = %job.id, "Job already dispatched");
                return false;
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Could not start work");
                return false;
            }
        };

        let task = AgentTask::from(&working);
        let outcome = tokio::time::timeout(self.agent_timeout, self.agent.execute(&task)).await;
        match outcome {
            Ok(Ok(ExecutionOutcome::Delivered { content })) => {
                if let Err(e) = self.record_delivery(&job.id, &content).await {
                    warn!(job_id = %job.id, error = %e, "Could not record delivery");
                }
            }
            Ok(Ok(ExecutionOutcome::Failed { reason })) => {
                warn!(job_id = %job.id, reason = %reason, "Agent reported failure");
            }
            Ok(Err(e)) => {
                warn!(job_id = %job.id, error = %e, "Agent executor call failed");
            }
            Err(_) => {
                warn!(
                    job_id = %job.id,
                    timeout_ms = self.agent_timeout.as_millis() as u64,
                    "Agent executor timed out"
                );
            }
        }
        true
    }

    async fn record_delivery(&self, job_id: &JobId, content: &str) -> Result<()> {
        let delivery = self.ledger.insert_delivery(job_id, content).await?;
        self.machine.mark_delivered(job_id).await?;
        info!(job_id = %job_id, version = delivery.version, "Delivery recorded");
        Ok(())
    }

    async fn on_failure(
        &self,
        job_id: &JobId,
        error: &OrchestratorError,
        report: &mut TickReport,
    ) {
        let attempts = self.retries.record_failure(job_id);
        warn!(
            job_id = %job_id,
            attempts,
            max_retries = self.max_retries,
            transient = error.is_transient(),
            error = %error,
            "Payment reconciliation failed"
        );

        if attempts < self.max_retries {
            report.failed += 1;
            return;
        }

        match self.escalation.escalate(job_id, attempts, &error.to_string()).await {
            Ok(()) => {
                self.retries.reset(job_id);
                report.escalated += 1;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Escalation failed, will retry");
                report.failed += 1;
            }
        }
    }

    /// Refund escrows still locked for cancelled jobs: a cancel whose
    /// refund failed, or an escrow created for a job cancelled mid-create.
    async fn refund_cancelled(&self, report: &mut TickReport) {
        let owed = match self
            .ledger
            .unrefunded_cancelled_escrows(self.batch_size)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Could not fetch unrefunded escrows");
                return;
            }
        };

        for record in &owed {
            report.examined += 1;
            match self.escrow.refund_escrow(&record.reference_key).await {
                Ok(refund) => {
                    self.retries.reset(&record.job_id);
                    info!(
                        job_id = %record.job_id,
                        tx = %refund.tx_digest,
                        "Escrow of cancelled job refunded"
                    );
                    report.progressed += 1;
                }
                Err(e) => {
                    let error = OrchestratorError::from(e);
                    self.on_failure(&record.job_id, &error, report).await;
                }
            }
        }
    }

    /// Pick up jobs left `escrowed` by an earlier tick that stopped short
    /// of dispatch.
    async fn dispatch_stranded(&self, report: &mut TickReport) {
        let stranded = match self
            .ledger
            .jobs_in_status(JobStatus::Escrowed, self.batch_size)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "Could not fetch escrowed jobs");
                return;
            }
        };

        for job in &stranded {
            report.examined += 1;
            if self.dispatch(job).await {
                info!(job_id = %job.id, "Stranded escrowed job dispatched");
                report.progressed += 1;
            } else {
                report.unchanged += 1;
            }
        }
    }
}

#[async_trait]
impl Reconciler for PaymentReconciler {
    fn name(&self) -> &'static str {
        "payments"
    }

    async fn tick(&self) -> Result<TickReport> {
        let batch = self.ledger.jobs_awaiting_payment(self.batch_size).await?;
        let mut report = TickReport::default();

        // Before the batch, so a refund that fails below is not retried
        // again in the same tick
        self.refund_cancelled(&mut report).await;

        report.examined += batch.len();
        debug!(count = batch.len(), "Invoiced jobs fetched");

        for job in &batch {
            match self.reconcile_job(&job.id).await {
                Ok(progress) => {
                    self.retries.reset(&job.id);
                    match progress {
                        Progress::Advanced => report.progressed += 1,
                        Progress::Unchanged => report.unchanged += 1,
                    }
                }
                Err(e) if e.is_conflict() => {
                    debug!(job_id = %job.id, error = %e, "Job moved under us, leaving it");
                    self.retries.reset(&job.id);
                    report.unchanged += 1;
                }
                Err(e) => self.on_failure(&job.id, &e, &mut report).await,
            }
        }

        if self.auto_trigger_agent {
            self.dispatch_stranded(&mut report).await;
        }

        Ok(report)
    }
}
