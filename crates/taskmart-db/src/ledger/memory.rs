//! In-process [`Ledger`]
//!
//! One write lock over all tables, so the multi-record writes that the
//! PostgreSQL backend does in a transaction are atomic here too.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use taskmart_types::{
    Delivery, DeliveryId, EscalationRecord, EscrowRecord, Job, JobId, JobStatus, JobTransition,
    MarketError, RequestId, RequestStatus, UserRequest, Worker, WorkerId,
};

use super::Ledger;
use crate::{DbError, DbResult};

#[derive(Default)]
struct Tables {
    requests: HashMap<RequestId, UserRequest>,
    jobs: HashMap<JobId, Job>,
    workers: HashMap<WorkerId, Worker>,
    wallets: HashMap<Uuid, String>,
    escrows: HashMap<String, EscrowRecord>,
    deliveries: Vec<Delivery>,
    escalations: Vec<EscalationRecord>,
}

impl Tables {
    fn has_open_escalation(&self, job_id: &JobId) -> bool {
        self.escalations
            .iter()
            .any(|e| e.job_id == *job_id && e.resolved_at.is_none())
    }

    fn request_conflict(&self, id: &RequestId) -> MarketError {
        match self.requests.get(id) {
            None => MarketError::RequestNotFound { request_id: *id },
            Some(request) => MarketError::RequestConflict {
                request_id: *id,
                actual: request.status,
            },
        }
    }

    fn best_worker<'a>(&'a self, mut filter: impl FnMut(&Worker) -> bool) -> Option<&'a Worker> {
        let mut candidates: Vec<&Worker> = self
            .workers
            .values()
            .filter(|w| w.available && filter(w))
            .collect();
        candidates.sort_by(|a, b| {
            b.rating
                .total_cmp(&a.rating)
                .then(b.completed_jobs.cmp(&a.completed_jobs))
                .then(a.created_at.cmp(&b.created_at))
        });
        candidates.into_iter().next()
    }
}

/// Ledger kept entirely in memory
#[derive(Default)]
pub struct MemoryLedger {
    tables: RwLock<Tables>,
    offline: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the connection: every call fails with
    /// `DbError::Connection` until set back to `false`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> DbResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(DbError::Connection("memory ledger offline".to_string()))
        } else {
            Ok(())
        }
    }
}

fn oldest_first<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K, limit: usize) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items.truncate(limit);
    items
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn ping(&self) -> DbResult<()> {
        self.check_online()
    }

    async fn insert_request(&self, request: &UserRequest) -> DbResult<()> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        if tables.requests.contains_key(&request.id) {
            return Err(DbError::Duplicate(format!("request {}", request.id)));
        }
        tables.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: &RequestId) -> DbResult<Option<UserRequest>> {
        self.check_online()?;
        Ok(self.tables.read().await.requests.get(id).cloned())
    }

    async fn pending_requests(&self, limit: usize) -> DbResult<Vec<UserRequest>> {
        self.check_online()?;
        let tables = self.tables.read().await;
        let pending = tables
            .requests
            .values()
            .filter(|r| r.is_pending())
            .cloned()
            .collect();
        Ok(oldest_first(pending, |r| (r.created_at, r.id), limit))
    }

    async fn mark_request_failed(&self, id: &RequestId, note: &str) -> DbResult<()> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        let pending = tables.requests.get(id).map(UserRequest::is_pending);
        if pending != Some(true) {
            return Err(tables.request_conflict(id).into());
        }
        if let Some(request) = tables.requests.get_mut(id) {
            request.status = RequestStatus::Failed;
            request.error_note = Some(note.to_string());
            request.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn create_job_for_request(&self, job: &Job) -> DbResult<()> {
        self.check_online()?;
        let request_id = job.request_id.ok_or_else(|| MarketError::Validation {
            reason: format!("job {} has no source request", job.id),
        })?;

        let mut tables = self.tables.write().await;
        let pending = tables.requests.get(&request_id).map(UserRequest::is_pending);
        if pending != Some(true) {
            return Err(tables.request_conflict(&request_id).into());
        }
        if tables.jobs.contains_key(&job.id)
            || tables.jobs.values().any(|j| j.reference_key == job.reference_key)
        {
            return Err(DbError::Duplicate(format!("job {}", job.id)));
        }

        if let Some(request) = tables.requests.get_mut(&request_id) {
            request.status = RequestStatus::Processed;
            request.job_id = Some(job.id);
            request.processed_at = Some(Utc::now());
        }
        tables.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn upsert_worker(&self, worker: &Worker) -> DbResult<()> {
        self.check_online()?;
        self.tables
            .write()
            .await
            .workers
            .insert(worker.id, worker.clone());
        Ok(())
    }

    async fn get_worker(&self, id: &WorkerId) -> DbResult<Option<Worker>> {
        self.check_online()?;
        Ok(self.tables.read().await.workers.get(id).cloned())
    }

    async fn find_available_worker(&self, skill: &str) -> DbResult<Option<Worker>> {
        self.check_online()?;
        let tables = self.tables.read().await;
        Ok(tables.best_worker(|w| w.has_skill(skill)).cloned())
    }

    async fn top_rated_available_worker(&self) -> DbResult<Option<Worker>> {
        self.check_online()?;
        let tables = self.tables.read().await;
        Ok(tables.best_worker(|_| true).cloned())
    }

    async fn wallet_address(&self, owner: &Uuid) -> DbResult<Option<String>> {
        self.check_online()?;
        Ok(self.tables.read().await.wallets.get(owner).cloned())
    }

    async fn set_wallet_address(&self, owner: &Uuid, address: &str) -> DbResult<()> {
        self.check_online()?;
        self.tables
            .write()
            .await
            .wallets
            .insert(*owner, address.to_string());
        Ok(())
    }

    async fn insert_job(&self, job: &Job) -> DbResult<()> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        if tables.jobs.contains_key(&job.id)
            || tables.jobs.values().any(|j| j.reference_key == job.reference_key)
        {
            return Err(DbError::Duplicate(format!("job {}", job.id)));
        }
        tables.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> DbResult<Option<Job>> {
        self.check_online()?;
        Ok(self.tables.read().await.jobs.get(id).cloned())
    }

    async fn jobs_awaiting_payment(&self, limit: usize) -> DbResult<Vec<Job>> {
        self.check_online()?;
        let tables = self.tables.read().await;
        let jobs = tables
            .jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Unpaid
                    && j.invoice_id.is_some()
                    && !tables.has_open_escalation(&j.id)
            })
            .cloned()
            .collect();
        Ok(oldest_first(jobs, |j| (j.created_at, j.id), limit))
    }

    async fn jobs_in_status(&self, status: JobStatus, limit: usize) -> DbResult<Vec<Job>> {
        self.check_online()?;
        let tables = self.tables.read().await;
        let jobs = tables
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        Ok(oldest_first(jobs, |j| (j.created_at, j.id), limit))
    }

    async fn attach_invoice(&self, id: &JobId, invoice_id: &str) -> DbResult<Job> {
        self.check_online()?;
        let mut tables = self.tables.write().await;

        let taken = tables
            .jobs
            .values()
            .any(|j| j.id != *id && j.invoice_id.as_deref() == Some(invoice_id));
        if taken {
            return Err(DbError::Duplicate(format!("invoice {}", invoice_id)));
        }

        let job = tables
            .jobs
            .get_mut(id)
            .ok_or(MarketError::JobNotFound { job_id: *id })?;

        if job.invoice_id.as_deref() == Some(invoice_id) {
            return Ok(job.clone());
        }
        if job.status != JobStatus::Unpaid {
            return Err(MarketError::StateConflict {
                job_id: *id,
                expected: JobStatus::Unpaid,
                actual: job.status,
            }
            .into());
        }
        if job.invoice_id.is_some() {
            return Err(DbError::Duplicate(format!("job {} already has an invoice", id)));
        }

        job.invoice_id = Some(invoice_id.to_string());
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn transition_job(
        &self,
        id: &JobId,
        expected: JobStatus,
        transition: &JobTransition,
    ) -> DbResult<Job> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        let job = tables
            .jobs
            .get_mut(id)
            .ok_or(MarketError::JobNotFound { job_id: *id })?;
        job.apply(expected, transition, Utc::now())?;
        Ok(job.clone())
    }

    async fn find_escrow(&self, reference_key: &str) -> DbResult<Option<EscrowRecord>> {
        self.check_online()?;
        Ok(self.tables.read().await.escrows.get(reference_key).cloned())
    }

    async fn insert_escrow(&self, record: &EscrowRecord) -> DbResult<()> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        if tables.escrows.contains_key(&record.reference_key) {
            return Err(DbError::Duplicate(format!(
                "escrow for reference {}",
                record.reference_key
            )));
        }
        tables
            .escrows
            .insert(record.reference_key.clone(), record.clone());
        Ok(())
    }

    async fn record_escrow_release(&self, reference_key: &str, release_tx: &str) -> DbResult<()> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        let record = tables
            .escrows
            .get_mut(reference_key)
            .ok_or_else(|| DbError::NotFound(format!("escrow for reference {}", reference_key)))?;

        if record.release_tx.as_deref() == Some(release_tx) {
            return Ok(());
        }
        if record.is_settled() {
            return Err(DbError::Duplicate(format!(
                "escrow for reference {} already settled",
                reference_key
            )));
        }
        record.release_tx = Some(release_tx.to_string());
        record.settled_at = Some(Utc::now());
        Ok(())
    }

    async fn record_escrow_refund(&self, reference_key: &str, refund_tx: &str) -> DbResult<()> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        let record = tables
            .escrows
            .get_mut(reference_key)
            .ok_or_else(|| DbError::NotFound(format!("escrow for reference {}", reference_key)))?;

        if record.refund_tx.as_deref() == Some(refund_tx) {
            return Ok(());
        }
        if record.is_settled() {
            return Err(DbError::Duplicate(format!(
                "escrow for reference {} already settled",
                reference_key
            )));
        }
        record.refund_tx = Some(refund_tx.to_string());
        record.settled_at = Some(Utc::now());
        Ok(())
    }

    async fn unrefunded_cancelled_escrows(&self, limit: usize) -> DbResult<Vec<EscrowRecord>> {
        self.check_online()?;
        let tables = self.tables.read().await;
        let owed = tables
            .escrows
            .values()
            .filter(|r| {
                !r.is_settled()
                    && tables.jobs.get(&r.job_id).map(|j| j.status) == Some(JobStatus::Cancelled)
                    && !tables.has_open_escalation(&r.job_id)
            })
            .cloned()
            .collect();
        Ok(oldest_first(
            owed,
            |r| (r.created_at, r.reference_key.clone()),
            limit,
        ))
    }

    async fn insert_delivery(&self, job_id: &JobId, content: &str) -> DbResult<Delivery> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        if !tables.jobs.contains_key(job_id) {
            return Err(MarketError::JobNotFound { job_id: *job_id }.into());
        }
        let version = tables
            .deliveries
            .iter()
            .filter(|d| d.job_id == *job_id)
            .map(|d| d.version)
            .max()
            .unwrap_or(0)
            + 1;
        let delivery = Delivery {
            id: DeliveryId::new(),
            job_id: *job_id,
            content: content.to_string(),
            version,
            created_at: Utc::now(),
        };
        tables.deliveries.push(delivery.clone());
        Ok(delivery)
    }

    async fn latest_delivery(&self, job_id: &JobId) -> DbResult<Option<Delivery>> {
        self.check_online()?;
        let tables = self.tables.read().await;
        Ok(tables
            .deliveries
            .iter()
            .filter(|d| d.job_id == *job_id)
            .max_by_key(|d| d.version)
            .cloned())
    }

    async fn record_escalation(&self, job_id: &JobId, attempts: u32, reason: &str) -> DbResult<()> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        if tables.has_open_escalation(job_id) {
            return Err(DbError::Duplicate(format!("open escalation for job {}", job_id)));
        }
        tables.escalations.push(EscalationRecord {
            job_id: *job_id,
            attempts,
            reason: reason.to_string(),
            created_at: Utc::now(),
            resolved_at: None,
        });
        Ok(())
    }

    async fn open_escalations(&self) -> DbResult<Vec<EscalationRecord>> {
        self.check_online()?;
        let tables = self.tables.read().await;
        Ok(tables
            .escalations
            .iter()
            .filter(|e| e.resolved_at.is_none())
            .cloned()
            .collect())
    }

    async fn resolve_escalation(&self, job_id: &JobId) -> DbResult<()> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        let open = tables
            .escalations
            .iter_mut()
            .find(|e| e.job_id == *job_id && e.resolved_at.is_none())
            .ok_or_else(|| DbError::NotFound(format!("open escalation for job {}", job_id)))?;
        open.resolved_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use taskmart_types::UserId;

    fn request() -> UserRequest {
        UserRequest::new(UserId::new(), "Build a landing page for $200")
    }

    fn job_for(request: &UserRequest) -> Job {
        Job::new("Landing page", &request.description, request.submitter_id, dec!(200))
            .with_request(request.id)
    }

    #[tokio::test]
    async fn test_create_job_for_request_is_atomic() {
        let ledger = MemoryLedger::new();
        let req = request();
        ledger.insert_request(&req).await.unwrap();

        let job = job_for(&req);
        ledger.create_job_for_request(&job).await.unwrap();

        let stored = ledger.get_request(&req.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Processed);
        assert_eq!(stored.job_id, Some(job.id));
        assert!(ledger.get_job(&job.id).await.unwrap().is_some());

        // Second attempt for the same request writes nothing
        let second = job_for(&req);
        let err = ledger.create_job_for_request(&second).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(ledger.get_job(&second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_request_cannot_produce_job() {
        let ledger = MemoryLedger::new();
        let req = request();
        ledger.insert_request(&req).await.unwrap();
        ledger.mark_request_failed(&req.id, "classifier timeout").await.unwrap();

        let err = ledger.create_job_for_request(&job_for(&req)).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Market(MarketError::RequestConflict {
                actual: RequestStatus::Failed,
                ..
            })
        ));
        assert!(ledger.pending_requests(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let ledger = MemoryLedger::new();
        let job = Job::new("t", "r", UserId::new(), dec!(10));
        ledger.insert_job(&job).await.unwrap();

        ledger
            .transition_job(&job.id, JobStatus::Unpaid, &JobTransition::Cancel)
            .await
            .unwrap();

        let err = ledger
            .transition_job(
                &job.id,
                JobStatus::Unpaid,
                &JobTransition::Escrow {
                    escrow_object_id: "0xobj".to_string(),
                    create_tx: "0xtx".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let stored = ledger.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(stored.escrow_object_id.is_none());
    }

    #[tokio::test]
    async fn test_awaiting_payment_skips_escalated_and_uninvoiced() {
        let ledger = MemoryLedger::new();
        let invoiced = Job::new("a", "r", UserId::new(), dec!(10));
        let escalated = Job::new("b", "r", UserId::new(), dec!(10));
        let bare = Job::new("c", "r", UserId::new(), dec!(10));
        for job in [&invoiced, &escalated, &bare] {
            ledger.insert_job(job).await.unwrap();
        }
        ledger.attach_invoice(&invoiced.id, "inv_a").await.unwrap();
        ledger.attach_invoice(&escalated.id, "inv_b").await.unwrap();
        ledger.record_escalation(&escalated.id, 5, "chain down").await.unwrap();

        let due = ledger.jobs_awaiting_payment(10).await.unwrap();
        assert_eq!(due.iter().map(|j| j.id).collect::<Vec<_>>(), vec![invoiced.id]);

        ledger.resolve_escalation(&escalated.id).await.unwrap();
        assert_eq!(ledger.jobs_awaiting_payment(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_attach_invoice_idempotent() {
        let ledger = MemoryLedger::new();
        let job = Job::new("t", "r", UserId::new(), dec!(10));
        ledger.insert_job(&job).await.unwrap();

        ledger.attach_invoice(&job.id, "inv_1").await.unwrap();
        ledger.attach_invoice(&job.id, "inv_1").await.unwrap();
        assert!(matches!(
            ledger.attach_invoice(&job.id, "inv_2").await,
            Err(DbError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_escrow_record_unique_per_reference() {
        let ledger = MemoryLedger::new();
        let job = Job::new("t", "r", UserId::new(), dec!(10));
        let record = EscrowRecord::new(&job.reference_key, job.id, "0xobj", "0xtx", dec!(10));

        ledger.insert_escrow(&record).await.unwrap();
        assert!(matches!(
            ledger.insert_escrow(&record).await,
            Err(DbError::Duplicate(_))
        ));

        ledger.record_escrow_release(&job.reference_key, "0xrel").await.unwrap();
        ledger.record_escrow_release(&job.reference_key, "0xrel").await.unwrap();
        assert!(ledger
            .record_escrow_refund(&job.reference_key, "0xref")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_worker_ranking() {
        let ledger = MemoryLedger::new();
        let low = Worker::new("low", vec!["development".into()]).with_rating(3.0);
        let high = Worker::new("high", vec!["development".into()]).with_rating(4.8);
        let busy = Worker::new("busy", vec!["development".into()])
            .with_rating(5.0)
            .with_availability(false);
        let designer = Worker::new("designer", vec!["design".into()]).with_rating(4.9);
        for w in [&low, &high, &busy, &designer] {
            ledger.upsert_worker(w).await.unwrap();
        }

        let dev = ledger.find_available_worker("Development").await.unwrap().unwrap();
        assert_eq!(dev.id, high.id);
        let top = ledger.top_rated_available_worker().await.unwrap().unwrap();
        assert_eq!(top.id, designer.id);
        assert!(ledger.find_available_worker("writing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delivery_versions_increment() {
        let ledger = MemoryLedger::new();
        let job = Job::new("t", "r", UserId::new(), dec!(10));
        ledger.insert_job(&job).await.unwrap();

        assert_eq!(ledger.insert_delivery(&job.id, "v1").await.unwrap().version, 1);
        assert_eq!(ledger.insert_delivery(&job.id, "v2").await.unwrap().version, 2);
        let latest = ledger.latest_delivery(&job.id).await.unwrap().unwrap();
        assert_eq!(latest.content, "v2");
    }

    #[tokio::test]
    async fn test_offline_ledger_errors_are_transient() {
        let ledger = MemoryLedger::new();
        ledger.set_offline(true);
        let err = ledger.pending_requests(5).await.unwrap_err();
        assert!(err.is_transient());
        ledger.set_offline(false);
        assert!(ledger.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_unrefunded_cancelled_escrows() {
        let ledger = MemoryLedger::new();
        let owed = Job::new("a", "r", UserId::new(), dec!(10));
        let refunded = Job::new("b", "r", UserId::new(), dec!(10));
        let live = Job::new("c", "r", UserId::new(), dec!(10));
        for job in [&owed, &refunded, &live] {
            ledger.insert_job(job).await.unwrap();
            let record = EscrowRecord::new(&job.reference_key, job.id, "0xobj", "0xtx", job.amount);
            ledger.insert_escrow(&record).await.unwrap();
        }
        for job in [&owed, &refunded] {
            ledger
                .transition_job(&job.id, JobStatus::Unpaid, &JobTransition::Cancel)
                .await
                .unwrap();
        }
        ledger
            .record_escrow_refund(&refunded.reference_key, "0xrefund")
            .await
            .unwrap();

        let found = ledger.unrefunded_cancelled_escrows(10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].job_id, owed.id);

        ledger.record_escalation(&owed.id, 3, "refund failing").await.unwrap();
        assert!(ledger.unrefunded_cancelled_escrows(10).await.unwrap().is_empty());
    }
}
