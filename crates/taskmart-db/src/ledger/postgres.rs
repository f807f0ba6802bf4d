//! [`Ledger`] over PostgreSQL

use async_trait::async_trait;
use uuid::Uuid;

use taskmart_types::{
    Delivery, EscalationRecord, EscrowRecord, Job, JobId, JobStatus, JobTransition, RequestId,
    UserRequest, Worker, WorkerId,
};

use super::Ledger;
use crate::{Database, DbError, DbResult};

fn limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl Ledger for Database {
    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pg)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;
        Ok(())
    }

    async fn insert_request(&self, request: &UserRequest) -> DbResult<()> {
        self.request_repo().create(request).await
    }

    async fn get_request(&self, id: &RequestId) -> DbResult<Option<UserRequest>> {
        self.request_repo()
            .find_by_id(id.0)
            .await?
            .map(UserRequest::try_from)
            .transpose()
    }

    async fn pending_requests(&self, n: usize) -> DbResult<Vec<UserRequest>> {
        self.request_repo()
            .list_pending(limit(n))
            .await?
            .into_iter()
            .map(UserRequest::try_from)
            .collect()
    }

    async fn mark_request_failed(&self, id: &RequestId, note: &str) -> DbResult<()> {
        self.request_repo().mark_failed(id.0, note).await
    }

    async fn create_job_for_request(&self, job: &Job) -> DbResult<()> {
        self.job_repo().create_for_request(job).await
    }

    async fn upsert_worker(&self, worker: &Worker) -> DbResult<()> {
        self.worker_repo().upsert(worker).await
    }

    async fn get_worker(&self, id: &WorkerId) -> DbResult<Option<Worker>> {
        Ok(self.worker_repo().find_by_id(id.0).await?.map(Into::into))
    }

    async fn find_available_worker(&self, skill: &str) -> DbResult<Option<Worker>> {
        Ok(self
            .worker_repo()
            .find_available_by_skill(skill)
            .await?
            .map(Into::into))
    }

    async fn top_rated_available_worker(&self) -> DbResult<Option<Worker>> {
        Ok(self
            .worker_repo()
            .find_top_rated_available()
            .await?
            .map(Into::into))
    }

    async fn wallet_address(&self, owner: &Uuid) -> DbResult<Option<String>> {
        self.wallet_repo().address_of(*owner).await
    }

    async fn set_wallet_address(&self, owner: &Uuid, address: &str) -> DbResult<()> {
        self.wallet_repo().set_address(*owner, address).await
    }

    async fn insert_job(&self, job: &Job) -> DbResult<()> {
        self.job_repo().create(job).await
    }

    async fn get_job(&self, id: &JobId) -> DbResult<Option<Job>> {
        self.job_repo()
            .find_by_id(id.0)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn jobs_awaiting_payment(&self, n: usize) -> DbResult<Vec<Job>> {
        self.job_repo()
            .list_awaiting_payment(limit(n))
            .await?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    async fn jobs_in_status(&self, status: JobStatus, n: usize) -> DbResult<Vec<Job>> {
        self.job_repo()
            .list_by_status(status, limit(n))
            .await?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    async fn attach_invoice(&self, id: &JobId, invoice_id: &str) -> DbResult<Job> {
        self.job_repo().attach_invoice(id.0, invoice_id).await?.try_into()
    }

    async fn transition_job(
        &self,
        id: &JobId,
        expected: JobStatus,
        transition: &JobTransition,
    ) -> DbResult<Job> {
        self.job_repo()
            .transition(id.0, expected, transition)
            .await?
            .try_into()
    }

    async fn find_escrow(&self, reference_key: &str) -> DbResult<Option<EscrowRecord>> {
        Ok(self.escrow_repo().find(reference_key).await?.map(Into::into))
    }

    async fn insert_escrow(&self, record: &EscrowRecord) -> DbResult<()> {
        self.escrow_repo().insert(record).await
    }

    async fn record_escrow_release(&self, reference_key: &str, release_tx: &str) -> DbResult<()> {
        self.escrow_repo().record_release(reference_key, release_tx).await
    }

    async fn record_escrow_refund(&self, reference_key: &str, refund_tx: &str) -> DbResult<()> {
        self.escrow_repo().record_refund(reference_key, refund_tx).await
    }

    async fn unrefunded_cancelled_escrows(&self, n: usize) -> DbResult<Vec<EscrowRecord>> {
        Ok(self
            .escrow_repo()
            .list_unrefunded_cancelled(limit(n))
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn insert_delivery(&self, job_id: &JobId, content: &str) -> DbResult<Delivery> {
        Ok(self.delivery_repo().create(job_id.0, content).await?.into())
    }

    async fn latest_delivery(&self, job_id: &JobId) -> DbResult<Option<Delivery>> {
        Ok(self
            .delivery_repo()
            .latest_for_job(job_id.0)
            .await?
            .map(Into::into))
    }

    async fn record_escalation(&self, job_id: &JobId, attempts: u32, reason: &str) -> DbResult<()> {
        let attempts = i32::try_from(attempts).unwrap_or(i32::MAX);
        self.escalation_repo().open(job_id.0, attempts, reason).await
    }

    async fn open_escalations(&self) -> DbResult<Vec<EscalationRecord>> {
        Ok(self
            .escalation_repo()
            .list_open()
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn resolve_escalation(&self, job_id: &JobId) -> DbResult<()> {
        self.escalation_repo().resolve(job_id.0).await
    }
}
