//! The job ledger: typed reads and writes, no business logic
//!
//! The ledger is the sole writer of persisted state. Loops hold no private
//! copies; every decision re-reads through this trait and every status write
//! is a compare-and-set against the status the caller observed.

mod memory;
mod postgres;

pub use memory::MemoryLedger;

use async_trait::async_trait;
use uuid::Uuid;

use taskmart_types::{
    Delivery, EscalationRecord, EscrowRecord, Job, JobId, JobStatus, JobTransition, RequestId,
    UserRequest, Worker, WorkerId,
};

use crate::DbResult;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Cheap reachability check
    async fn ping(&self) -> DbResult<()>;

    // =========================================================================
    // Requests
    // =========================================================================

    async fn insert_request(&self, request: &UserRequest) -> DbResult<()>;

    async fn get_request(&self, id: &RequestId) -> DbResult<Option<UserRequest>>;

    /// Oldest-first batch of `pending` requests
    async fn pending_requests(&self, limit: usize) -> DbResult<Vec<UserRequest>>;

    /// `pending → failed`. Fails with `RequestConflict` if no longer pending.
    async fn mark_request_failed(&self, id: &RequestId, note: &str) -> DbResult<()>;

    /// Insert `job` and move its source request `pending → processed` in one
    /// atomic write. Fails with `RequestConflict` (and writes nothing) when
    /// the request is no longer pending.
    async fn create_job_for_request(&self, job: &Job) -> DbResult<()>;

    // =========================================================================
    // Workers and wallets
    // =========================================================================

    async fn upsert_worker(&self, worker: &Worker) -> DbResult<()>;

    async fn get_worker(&self, id: &WorkerId) -> DbResult<Option<Worker>>;

    /// Best available worker listing `skill`
    async fn find_available_worker(&self, skill: &str) -> DbResult<Option<Worker>>;

    /// Highest-rated available worker of any skill
    async fn top_rated_available_worker(&self) -> DbResult<Option<Worker>>;

    /// On-chain address for a buyer or worker
    async fn wallet_address(&self, owner: &Uuid) -> DbResult<Option<String>>;

    async fn set_wallet_address(&self, owner: &Uuid, address: &str) -> DbResult<()>;

    // =========================================================================
    // Jobs
    // =========================================================================

    async fn insert_job(&self, job: &Job) -> DbResult<()>;

    async fn get_job(&self, id: &JobId) -> DbResult<Option<Job>>;

    /// Oldest-first `unpaid` jobs with an invoice and no open escalation
    async fn jobs_awaiting_payment(&self, limit: usize) -> DbResult<Vec<Job>>;

    /// Oldest-first jobs in `status`
    async fn jobs_in_status(&self, status: JobStatus, limit: usize) -> DbResult<Vec<Job>>;

    /// Attach the payment-provider invoice to an `unpaid` job that has none.
    /// Re-attaching the same invoice is a no-op.
    async fn attach_invoice(&self, id: &JobId, invoice_id: &str) -> DbResult<Job>;

    /// Compare-and-set status write. Applies `transition` only if the job is
    /// still in `expected`; otherwise `StateConflict` with the actual status.
    async fn transition_job(
        &self,
        id: &JobId,
        expected: JobStatus,
        transition: &JobTransition,
    ) -> DbResult<Job>;

    // =========================================================================
    // Escrow records
    // =========================================================================

    async fn find_escrow(&self, reference_key: &str) -> DbResult<Option<EscrowRecord>>;

    /// Fails with `Duplicate` if the reference key already has a record
    async fn insert_escrow(&self, record: &EscrowRecord) -> DbResult<()>;

    async fn record_escrow_release(&self, reference_key: &str, release_tx: &str) -> DbResult<()>;

    async fn record_escrow_refund(&self, reference_key: &str, refund_tx: &str) -> DbResult<()>;

    /// Oldest-first unsettled escrows whose job was cancelled and has no
    /// open escalation. These are funds still owed back to the buyer.
    async fn unrefunded_cancelled_escrows(&self, limit: usize) -> DbResult<Vec<EscrowRecord>>;

    // =========================================================================
    // Deliveries
    // =========================================================================

    /// Store a delivery with the next version number for the job
    async fn insert_delivery(&self, job_id: &JobId, content: &str) -> DbResult<Delivery>;

    async fn latest_delivery(&self, job_id: &JobId) -> DbResult<Option<Delivery>>;

    // =========================================================================
    // Escalations
    // =========================================================================

    /// Open an escalation; a job has at most one open escalation
    async fn record_escalation(&self, job_id: &JobId, attempts: u32, reason: &str) -> DbResult<()>;

    async fn open_escalations(&self) -> DbResult<Vec<EscalationRecord>>;

    /// Close the job's open escalation so the payment loop picks it up again
    async fn resolve_escalation(&self, job_id: &JobId) -> DbResult<()>;
}
