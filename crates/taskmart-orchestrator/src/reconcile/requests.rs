//! Request reconciliation: pending user requests become unpaid jobs

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use taskmart_db::Ledger;
use taskmart_llm::IntentClassifier;
use taskmart_types::{Job, UserRequest};

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::matching::select_worker;
use crate::poller::{Reconciler, TickReport};

pub struct RequestReconciler {
    ledger: Arc<dyn Ledger>,
    classifier: Arc<dyn IntentClassifier>,
    batch_size: usize,
    min_budget: Decimal,
}

impl RequestReconciler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        classifier: Arc<dyn IntentClassifier>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            classifier,
            batch_size: config.effective_batch_size(),
            min_budget: config.min_budget,
        }
    }

    /// Classify, match and create the job. Returns the job as written.
    async fn convert(&self, request: &UserRequest) -> Result<Job> {
        let classification = self.classifier.classify(&request.description).await?;
        let worker = select_worker(self.ledger.as_ref(), &classification.skills).await?;
        let amount = classification.estimated_budget.max(self.min_budget);

        let job = Job::new(
            classification.title(&request.description),
            request.description.clone(),
            request.submitter_id,
            amount,
        )
        .with_worker(worker.map(|w| w.id))
        .with_task_type(classification.primary_skill())
        .with_request(request.id);

        self.ledger.create_job_for_request(&job).await?;
        Ok(job)
    }
}

#[async_trait]
impl Reconciler for RequestReconciler {
    fn name(&self) -> &'static str {
        "requests"
    }

    async fn tick(&self) -> Result<TickReport> {
        let batch = self.ledger.pending_requests(self.batch_size).await?;
        let mut report = TickReport {
            examined: batch.len(),
            ..TickReport::default()
        };
        debug!(count = batch.len(), "Pending requests fetched");

        for request in &batch {
            match self.convert(request).await {
                Ok(job) => {
                    info!(
                        request_id = %request.id,
                        job_id = %job.id,
                        worker_id = ?job.worker_id,
                        amount = %job.amount,
                        task_type = %job.task_type,
                        "Request converted to job"
                    );
                    report.progressed += 1;
                }
                Err(e) if e.is_conflict() => {
                    debug!(request_id = %request.id, "Request already handled elsewhere");
                    report.unchanged += 1;
                }
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "Request conversion failed");
                    report.failed += 1;
                    let note = e.to_string();
                    if let Err(mark_err) = self.ledger.mark_request_failed(&request.id, &note).await {
                        warn!(
                            request_id = %request.id,
                            error = %mark_err,
                            "Could not mark request failed"
                        );
                    }
                }
            }
        }

        Ok(report)
    }
}
