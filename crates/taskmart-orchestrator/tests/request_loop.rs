mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;

use taskmart_db::Ledger;
use taskmart_orchestrator::{Poller, Reconciler, RequestReconciler, TickOutcome};
use taskmart_types::{JobStatus, RequestStatus, UserId, UserRequest};

use support::{config, keyword_classifier, ExplodingClassifier, Harness, SlowClassifier};

async fn submit(h: &Harness, text: &str) -> UserRequest {
    let request = UserRequest::new(UserId::new(), text);
    h.ledger.insert_request(&request).await.unwrap();
    request
}

#[tokio::test]
async fn pending_request_becomes_unpaid_job() {
    let h = Harness::new();
    let dev = h.worker("Devi", &["development"], 4.2).await;
    let request = submit(&h, "Build a landing page for $200").await;

    let reconciler = RequestReconciler::new(h.ledger.clone(), keyword_classifier(), &config());
    let report = reconciler.tick().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.progressed, 1);

    let stored = h.ledger.get_request(&request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Processed);
    let job_id = stored.job_id.unwrap();

    let job = h.ledger.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Unpaid);
    assert_eq!(job.amount, dec!(200));
    assert_eq!(job.task_type, "development");
    assert_eq!(job.worker_id, Some(dev.id));
    assert_eq!(job.buyer_id, request.submitter_id);
    assert_eq!(job.requirements, "Build a landing page for $200");
    assert_eq!(job.request_id, Some(request.id));
    assert!(job.invoice_id.is_none());
}

#[tokio::test]
async fn one_bad_request_does_not_abort_the_batch() {
    let h = Harness::new();
    h.worker("Wren", &["writing"], 4.0).await;
    let first = submit(&h, "Write a blog post about tea for $50").await;
    let bad = submit(&h, "boom").await;
    let last = submit(&h, "Design a logo for $80").await;

    let reconciler =
        RequestReconciler::new(h.ledger.clone(), Arc::new(ExplodingClassifier::new()), &config());
    let report = reconciler.tick().await.unwrap();
    assert_eq!(report.examined, 3);
    assert_eq!(report.progressed, 2);
    assert_eq!(report.failed, 1);

    for ok in [&first, &last] {
        let stored = h.ledger.get_request(&ok.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Processed);
    }
    let failed = h.ledger.get_request(&bad.id).await.unwrap().unwrap();
    assert_eq!(failed.status, RequestStatus::Failed);
    assert!(failed.job_id.is_none());
    assert!(failed.error_note.unwrap().contains("no JSON object"));

    // Failed requests are never picked up again
    let again = reconciler.tick().await.unwrap();
    assert_eq!(again.examined, 0);
    assert_eq!(h.ledger.jobs_in_status(JobStatus::Unpaid, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn falls_back_to_top_rated_worker() {
    let h = Harness::new();
    let low = h.worker("Lo", &["marketing"], 3.1).await;
    let high = h.worker("Hi", &["data"], 4.8).await;
    let request = submit(&h, "Build an app with an api for $300").await;

    let reconciler = RequestReconciler::new(h.ledger.clone(), keyword_classifier(), &config());
    reconciler.tick().await.unwrap();

    let stored = h.ledger.get_request(&request.id).await.unwrap().unwrap();
    let job = h.ledger.get_job(&stored.job_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(job.worker_id, Some(high.id));
    assert_ne!(job.worker_id, Some(low.id));
}

#[tokio::test]
async fn job_is_created_unassigned_when_nobody_is_available() {
    let h = Harness::new();
    let request = submit(&h, "Design a banner").await;

    let reconciler = RequestReconciler::new(h.ledger.clone(), keyword_classifier(), &config());
    reconciler.tick().await.unwrap();

    let stored = h.ledger.get_request(&request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Processed);
    let job = h.ledger.get_job(&stored.job_id.unwrap()).await.unwrap().unwrap();
    assert!(job.worker_id.is_none());
    assert_eq!(job.task_type, "design");
}

#[tokio::test]
async fn budget_is_floored_at_the_minimum() {
    let h = Harness::new();
    let request = submit(&h, "Write a tagline for $3").await;

    let reconciler = RequestReconciler::new(h.ledger.clone(), keyword_classifier(), &config());
    reconciler.tick().await.unwrap();

    let stored = h.ledger.get_request(&request.id).await.unwrap().unwrap();
    let job = h.ledger.get_job(&stored.job_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(job.amount, dec!(10));
}

#[tokio::test]
async fn batch_is_bounded() {
    let h = Harness::new();
    for i in 0..7 {
        submit(&h, &format!("Write article number {}", i)).await;
    }
    let mut cfg = config();
    cfg.batch_size = 3;

    let reconciler = RequestReconciler::new(h.ledger.clone(), keyword_classifier(), &cfg);
    assert_eq!(reconciler.tick().await.unwrap().examined, 3);
    assert_eq!(reconciler.tick().await.unwrap().examined, 3);
    assert_eq!(reconciler.tick().await.unwrap().examined, 1);
    assert_eq!(reconciler.tick().await.unwrap().examined, 0);
}

#[tokio::test(start_paused = true)]
async fn overlapping_ticks_create_one_job() {
    let h = Harness::new();
    let request = submit(&h, "Build a website for $120").await;
    let classifier = Arc::new(SlowClassifier::new(Duration::from_millis(500)));

    let reconciler = RequestReconciler::new(h.ledger.clone(), classifier.clone(), &config());
    let poller = Poller::new(Arc::new(reconciler), Duration::from_millis(100));

    let (a, b) = tokio::join!(poller.run_once(), poller.run_once());
    let skipped = [&a, &b]
        .iter()
        .filter(|o| matches!(o, TickOutcome::Skipped))
        .count();
    assert_eq!(skipped, 1);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

    let jobs = h.ledger.jobs_in_status(JobStatus::Unpaid, 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].request_id, Some(request.id));
}

#[tokio::test(start_paused = true)]
async fn two_processes_racing_on_one_request_create_one_job() {
    let h = Harness::new();
    let request = submit(&h, "Build a website for $120").await;

    // Separate reconcilers share nothing but the ledger
    let a = RequestReconciler::new(
        h.ledger.clone(),
        Arc::new(SlowClassifier::new(Duration::from_millis(50))),
        &config(),
    );
    let b = RequestReconciler::new(
        h.ledger.clone(),
        Arc::new(SlowClassifier::new(Duration::from_millis(80))),
        &config(),
    );

    let (ra, rb) = tokio::join!(a.tick(), b.tick());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.progressed + rb.progressed, 1);
    assert_eq!(ra.unchanged + rb.unchanged, 1);
    assert_eq!(ra.failed + rb.failed, 0);

    let stored = h.ledger.get_request(&request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Processed);
    assert_eq!(h.ledger.jobs_in_status(JobStatus::Unpaid, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unreachable_ledger_fails_the_tick_and_leaves_requests_pending() {
    let h = Harness::new();
    let request = submit(&h, "Build a website").await;

    let reconciler = RequestReconciler::new(h.ledger.clone(), keyword_classifier(), &config());
    let poller = Poller::new(Arc::new(reconciler), Duration::from_millis(100));

    h.ledger.set_offline(true);
    assert!(matches!(poller.run_once().await, TickOutcome::Failed(_)));

    h.ledger.set_offline(false);
    let stored = h.ledger.get_request(&request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);

    assert!(matches!(poller.run_once().await, TickOutcome::Completed(r) if r.progressed == 1));
}
