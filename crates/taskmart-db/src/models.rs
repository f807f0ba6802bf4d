//! Database models - mapped from PostgreSQL tables

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use taskmart_types::{
    Delivery, EscalationRecord, EscrowRecord, Job, JobStatus, RequestStatus, UserRequest, Worker,
};

use crate::DbError;

// ============================================================================
// Job Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbJob {
    pub id: Uuid,
    pub title: String,
    pub requirements: String,
    pub buyer_id: Uuid,
    pub worker_id: Option<Uuid>,
    pub amount: Decimal,
    pub task_type: String,
    pub status: String,
    pub invoice_id: Option<String>,
    pub reference_key: String,
    pub request_id: Option<Uuid>,
    pub escrow_object_id: Option<String>,
    pub escrow_create_tx: Option<String>,
    pub escrow_release_tx: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paid_out_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbJob> for Job {
    type Error = DbError;

    fn try_from(row: DbJob) -> Result<Self, Self::Error> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|_| DbError::InvalidData(format!("job {} status '{}'", row.id, row.status)))?;

        Ok(Job {
            id: row.id.into(),
            title: row.title,
            requirements: row.requirements,
            buyer_id: row.buyer_id.into(),
            worker_id: row.worker_id.map(Into::into),
            amount: row.amount,
            task_type: row.task_type,
            status,
            invoice_id: row.invoice_id,
            reference_key: row.reference_key,
            request_id: row.request_id.map(Into::into),
            escrow_object_id: row.escrow_object_id,
            escrow_create_tx: row.escrow_create_tx,
            escrow_release_tx: row.escrow_release_tx,
            created_at: row.created_at,
            updated_at: row.updated_at,
            paid_at: row.paid_at,
            started_at: row.started_at,
            delivered_at: row.delivered_at,
            completed_at: row.completed_at,
            paid_out_at: row.paid_out_at,
        })
    }
}

// ============================================================================
// Request Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbUserRequest {
    pub id: Uuid,
    pub submitter_id: Uuid,
    pub description: String,
    pub status: String,
    pub job_id: Option<Uuid>,
    pub error_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbUserRequest> for UserRequest {
    type Error = DbError;

    fn try_from(row: DbUserRequest) -> Result<Self, Self::Error> {
        let status: RequestStatus = row.status.parse().map_err(|_| {
            DbError::InvalidData(format!("request {} status '{}'", row.id, row.status))
        })?;

        Ok(UserRequest {
            id: row.id.into(),
            submitter_id: row.submitter_id.into(),
            description: row.description,
            status,
            job_id: row.job_id.map(Into::into),
            error_note: row.error_note,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

// ============================================================================
// Worker Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbWorker {
    pub id: Uuid,
    pub name: String,
    pub skills: Vec<String>,
    pub available: bool,
    pub rating: f64,
    pub completed_jobs: i64,
    pub created_at: DateTime<Utc>,
}

impl From<DbWorker> for Worker {
    fn from(row: DbWorker) -> Self {
        Worker {
            id: row.id.into(),
            name: row.name,
            skills: row.skills,
            available: row.available,
            rating: row.rating,
            completed_jobs: row.completed_jobs,
            created_at: row.created_at,
        }
    }
}

// ============================================================================
// Escrow / Delivery / Escalation Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbEscrowRecord {
    pub reference_key: String,
    pub job_id: Uuid,
    pub escrow_object_id: String,
    pub create_tx: String,
    pub release_tx: Option<String>,
    pub refund_tx: Option<String>,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl From<DbEscrowRecord> for EscrowRecord {
    fn from(row: DbEscrowRecord) -> Self {
        EscrowRecord {
            reference_key: row.reference_key,
            job_id: row.job_id.into(),
            escrow_object_id: row.escrow_object_id,
            create_tx: row.create_tx,
            release_tx: row.release_tx,
            refund_tx: row.refund_tx,
            amount: row.amount,
            created_at: row.created_at,
            settled_at: row.settled_at,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbDelivery {
    pub id: Uuid,
    pub job_id: Uuid,
    pub content: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

impl From<DbDelivery> for Delivery {
    fn from(row: DbDelivery) -> Self {
        Delivery {
            id: row.id.into(),
            job_id: row.job_id.into(),
            content: row.content,
            version: row.version,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbEscalation {
    pub id: i64,
    pub job_id: Uuid,
    pub attempts: i32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<DbEscalation> for EscalationRecord {
    fn from(row: DbEscalation) -> Self {
        EscalationRecord {
            job_id: row.job_id.into(),
            attempts: row.attempts.max(0) as u32,
            reason: row.reason,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        }
    }
}
