mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use taskmart_db::Ledger;
use taskmart_orchestrator::{
    InvoiceStatus, JobStateMachine, LedgerEscalation, OrchestratorConfig, PaymentReconciler,
    Reconciler,
};
use taskmart_types::JobStatus;

use support::{config, AgentMode, Harness, Interleave};

fn payment_loop(h: &Harness, cfg: &OrchestratorConfig) -> PaymentReconciler {
    PaymentReconciler::new(
        h.ledger.clone(),
        h.payments.clone(),
        h.escrow.clone(),
        h.agent.clone(),
        Arc::new(LedgerEscalation::new(h.ledger.clone())),
        cfg,
    )
}

#[tokio::test]
async fn paid_invoice_escrows_and_dispatches() {
    let h = Harness::new();
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let job = h.invoiced_job(Some(&worker)).await;
    h.payments.set_status(&Harness::invoice_of(&job), InvoiceStatus::Paid);

    let report = payment_loop(&h, &config()).tick().await.unwrap();
    assert_eq!(report.progressed, 1);

    let job = h.reload(&job).await;
    assert_eq!(job.status, JobStatus::Delivered);
    assert!(job.escrow_object_id.is_some());
    assert!(job.escrow_create_tx.is_some());
    assert!(job.paid_at.is_some() && job.started_at.is_some() && job.delivered_at.is_some());

    let tasks = h.agent.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].requirements, "Build a landing page");

    let delivery = h.ledger.latest_delivery(&job.id).await.unwrap().unwrap();
    assert_eq!(delivery.version, 1);
    assert_eq!(delivery.content, "done: Landing page");
}

#[tokio::test]
async fn polling_a_paid_invoice_twice_escrows_once() {
    let h = Harness::with_agent(AgentMode::Fail);
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let job = h.invoiced_job(Some(&worker)).await;
    h.payments.set_status(&Harness::invoice_of(&job), InvoiceStatus::Paid);

    let reconciler = payment_loop(&h, &config());
    reconciler.tick().await.unwrap();
    let second = reconciler.tick().await.unwrap();

    assert_eq!(h.chain.creates(), 1);
    assert_eq!(h.payments.status_calls(), 1);
    assert_eq!(second.progressed, 0);
    assert_eq!(h.agent.tasks().len(), 1);

    // Executor failure leaves the job working with escrow intact
    let job = h.reload(&job).await;
    assert_eq!(job.status, JobStatus::Working);
    assert!(job.escrow_refs_consistent());
}

#[tokio::test]
async fn expired_invoice_cancels_without_escrow() {
    let h = Harness::new();
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let job = h.invoiced_job(Some(&worker)).await;
    h.payments.set_status(&Harness::invoice_of(&job), InvoiceStatus::Expired);

    payment_loop(&h, &config()).tick().await.unwrap();

    let job = h.reload(&job).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.escrow_object_id.is_none());
    assert_eq!(h.chain.creates(), 0);
    assert!(h.agent.tasks().is_empty());
}

#[tokio::test]
async fn pending_invoice_leaves_job_alone() {
    let h = Harness::new();
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let job = h.invoiced_job(Some(&worker)).await;

    let report = payment_loop(&h, &config()).tick().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(h.reload(&job).await, job);
}

#[tokio::test]
async fn one_failing_job_does_not_block_others() {
    let h = Harness::new();
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let flaky = h.invoiced_job(Some(&worker)).await;
    let good = h.invoiced_job(Some(&worker)).await;
    h.payments.set_failing(&Harness::invoice_of(&flaky), true);
    h.payments.set_status(&Harness::invoice_of(&good), InvoiceStatus::Paid);

    let reconciler = payment_loop(&h, &config());
    let report = reconciler.tick().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.progressed, 1);

    assert_eq!(h.reload(&flaky).await.status, JobStatus::Unpaid);
    assert_eq!(h.reload(&good).await.status, JobStatus::Delivered);
    assert_eq!(reconciler.retry_count(&flaky.id), 1);
}

#[tokio::test]
async fn repeated_failures_escalate_and_drop_out_of_the_poll() {
    let h = Harness::new();
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let job = h.invoiced_job(Some(&worker)).await;
    let invoice = Harness::invoice_of(&job);
    h.payments.set_failing(&invoice, true);

    let mut cfg = config();
    cfg.max_retries = 3;
    let reconciler = payment_loop(&h, &cfg);

    for _ in 0..2 {
        let report = reconciler.tick().await.unwrap();
        assert_eq!(report.failed, 1);
    }
    assert!(h.ledger.open_escalations().await.unwrap().is_empty());

    let third = reconciler.tick().await.unwrap();
    assert_eq!(third.escalated, 1);
    let open = h.ledger.open_escalations().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].job_id, job.id);
    assert_eq!(open[0].attempts, 3);
    assert_eq!(reconciler.retry_count(&job.id), 0);

    // Escalated jobs are not polled until an operator resolves them
    assert_eq!(reconciler.tick().await.unwrap().examined, 0);

    h.payments.set_failing(&invoice, false);
    h.payments.set_status(&invoice, InvoiceStatus::Paid);
    h.ledger.resolve_escalation(&job.id).await.unwrap();

    let resumed = reconciler.tick().await.unwrap();
    assert_eq!(resumed.progressed, 1);
    assert_eq!(h.reload(&job).await.status, JobStatus::Delivered);
}

#[tokio::test]
async fn success_resets_the_retry_count() {
    let h = Harness::new();
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let job = h.invoiced_job(Some(&worker)).await;
    let invoice = Harness::invoice_of(&job);

    let reconciler = payment_loop(&h, &config());
    h.payments.set_failing(&invoice, true);
    reconciler.tick().await.unwrap();
    reconciler.tick().await.unwrap();
    assert_eq!(reconciler.retry_count(&job.id), 2);

    h.payments.set_failing(&invoice, false);
    reconciler.tick().await.unwrap();
    assert_eq!(reconciler.retry_count(&job.id), 0);
}

#[tokio::test]
async fn paid_job_without_worker_counts_as_failure() {
    let h = Harness::new();
    let job = h.invoiced_job(None).await;
    h.payments.set_status(&Harness::invoice_of(&job), InvoiceStatus::Paid);

    let reconciler = payment_loop(&h, &config());
    let report = reconciler.tick().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(h.reload(&job).await.status, JobStatus::Unpaid);
    assert_eq!(h.chain.creates(), 0);
    assert_eq!(reconciler.retry_count(&job.id), 1);
}

#[tokio::test]
async fn auto_dispatch_off_stops_at_escrowed() {
    let h = Harness::new();
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let job = h.invoiced_job(Some(&worker)).await;
    h.payments.set_status(&Harness::invoice_of(&job), InvoiceStatus::Paid);

    let mut cfg = config();
    cfg.auto_trigger_agent = false;
    let reconciler = payment_loop(&h, &cfg);
    reconciler.tick().await.unwrap();
    reconciler.tick().await.unwrap();

    assert_eq!(h.reload(&job).await.status, JobStatus::Escrowed);
    assert!(h.agent.tasks().is_empty());
}

#[tokio::test]
async fn stranded_escrowed_job_is_dispatched_once() {
    let h = Harness::with_agent(AgentMode::Fail);
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let job = h.invoiced_job(Some(&worker)).await;
    JobStateMachine::new(h.ledger.clone())
        .mark_escrowed(&job.id, "0xescrow_left", "0xcreate_left")
        .await
        .unwrap();

    let reconciler = payment_loop(&h, &config());
    let first = reconciler.tick().await.unwrap();
    assert_eq!(first.progressed, 1);
    assert_eq!(h.reload(&job).await.status, JobStatus::Working);

    reconciler.tick().await.unwrap();
    assert_eq!(h.agent.tasks().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_executor_times_out_and_leaves_job_working() {
    let h = Harness::with_agent(AgentMode::Hang);
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let job = h.invoiced_job(Some(&worker)).await;
    h.payments.set_status(&Harness::invoice_of(&job), InvoiceStatus::Paid);

    let mut cfg = config();
    cfg.agent_timeout_ms = 1_000;
    let report = payment_loop(&h, &cfg).tick().await.unwrap();

    assert_eq!(report.progressed, 1);
    assert_eq!(report.failed, 0);
    let job = h.reload(&job).await;
    assert_eq!(job.status, JobStatus::Working);
    assert!(h.ledger.latest_delivery(&job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn job_cancelled_before_the_tick_is_not_polled() {
    let h = Harness::new();
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let job = h.invoiced_job(Some(&worker)).await;
    h.payments.set_status(&Harness::invoice_of(&job), InvoiceStatus::Paid);
    JobStateMachine::new(h.ledger.clone())
        .cancel(&job.id, JobStatus::Unpaid)
        .await
        .unwrap();

    let report = payment_loop(&h, &config()).tick().await.unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(h.chain.creates(), 0);
    assert_eq!(h.reload(&job).await.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn escrow_of_a_job_cancelled_mid_create_is_refunded() {
    let h = Harness::new();
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let job = h.invoiced_job(Some(&worker)).await;
    h.payments.set_status(&Harness::invoice_of(&job), InvoiceStatus::Paid);
    h.chain.interleave_create(Interleave::Cancel {
        job_id: job.id,
        from: JobStatus::Unpaid,
    });

    let reconciler = payment_loop(&h, &config());
    let report = reconciler.tick().await.unwrap();
    assert_eq!(h.chain.interleaved(), vec![true]);
    assert_eq!(report.progressed, 1);
    assert_eq!(report.failed, 0);

    let job = h.reload(&job).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.escrow_object_id.is_none());
    assert!(h.agent.tasks().is_empty());

    let record = h.ledger.find_escrow(&job.reference_key).await.unwrap().unwrap();
    assert!(record.refund_tx.is_some());
    assert!(record.release_tx.is_none());
    assert_eq!(h.chain.refunds(), 1);

    // Nothing left owed
    assert!(reconciler.tick().await.unwrap().is_idle());
    assert_eq!(h.chain.refunds(), 1);
}

#[tokio::test]
async fn failing_refund_of_cancelled_job_retries_then_escalates() {
    let h = Harness::new();
    let worker = h.worker("Devi", &["development"], 4.5).await;
    let job = h.invoiced_job(Some(&worker)).await;
    h.payments.set_status(&Harness::invoice_of(&job), InvoiceStatus::Paid);
    h.chain.interleave_create(Interleave::Cancel {
        job_id: job.id,
        from: JobStatus::Unpaid,
    });
    h.chain.fail_refund.store(true, Ordering::SeqCst);

    let mut cfg = config();
    cfg.max_retries = 2;
    let reconciler = payment_loop(&h, &cfg);

    let first = reconciler.tick().await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(reconciler.retry_count(&job.id), 1);
    assert_eq!(h.reload(&job).await.status, JobStatus::Cancelled);

    // The cancelled job is no longer invoiced work; the refund sweep owns it
    let second = reconciler.tick().await.unwrap();
    assert_eq!(second.examined, 1);
    assert_eq!(second.escalated, 1);
    let open = h.ledger.open_escalations().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].job_id, job.id);

    assert!(reconciler.tick().await.unwrap().is_idle());

    h.chain.fail_refund.store(false, Ordering::SeqCst);
    h.ledger.resolve_escalation(&job.id).await.unwrap();
    let resumed = reconciler.tick().await.unwrap();
    assert_eq!(resumed.progressed, 1);

    let record = h.ledger.find_escrow(&job.reference_key).await.unwrap().unwrap();
    assert!(record.refund_tx.is_some());
    assert_eq!(h.chain.refunds(), 1);
}
